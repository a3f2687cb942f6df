//! Dataset upload and location handles (workflow step 3).

use std::path::{Path, PathBuf};

use ml_platform::{parse_storage_uri, storage_uri, ObjectStore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WorkflowError};
use crate::metrics::METRICS;
use crate::obs;

/// Key prefix datasets are uploaded under.
pub const DATA_PREFIX: &str = "data";

/// Opaque reference to uploaded data, e.g. `s3://bucket/data/cifar10`.
///
/// Produced by [`upload_dataset`] and passed to the training job unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetLocation(String);

impl DatasetLocation {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bucket part, when the location uses the storage scheme.
    pub fn bucket(&self) -> Option<&str> {
        parse_storage_uri(&self.0).map(|(bucket, _)| bucket)
    }
}

impl TryFrom<String> for DatasetLocation {
    type Error = WorkflowError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let valid = match s.split_once("://") {
            Some((scheme, rest)) => {
                !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                    && !rest.is_empty()
                    && !rest.starts_with('/')
                    && !rest.chars().any(char::is_whitespace)
            }
            None => false,
        };
        if !valid {
            return Err(WorkflowError::InvalidLocation(s));
        }
        Ok(DatasetLocation(s))
    }
}

impl std::str::FromStr for DatasetLocation {
    type Err = WorkflowError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DatasetLocation::try_from(s.to_string())
    }
}

impl From<DatasetLocation> for String {
    fn from(location: DatasetLocation) -> Self {
        location.0
    }
}

impl std::fmt::Display for DatasetLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Recursively list files under `dir`, sorted for a stable upload order.
fn walk_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();

    for path in entries {
        if path.is_dir() {
            files.extend(walk_files(&path)?);
        } else if path.is_file() {
            files.push(path);
        }
    }
    Ok(files)
}

/// Storage key for `file` under the dataset prefix, always `/`-separated.
fn object_key(prefix: &str, root: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(root)
        .map_err(|_| WorkflowError::Dataset(format!("{:?} is outside {:?}", file, root)))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(format!("{}/{}", prefix, parts.join("/")))
}

/// Upload every file under `local_dir` to `bucket` at
/// `data/<dataset_name>/<relative path>` and return the dataset location.
///
/// Fails on a missing or empty directory. Storage errors propagate on the
/// first failing object; nothing is retried.
pub async fn upload_dataset(
    store: &dyn ObjectStore,
    bucket: &str,
    local_dir: &Path,
    dataset_name: &str,
) -> Result<DatasetLocation> {
    if dataset_name.is_empty() || dataset_name.contains('/') {
        return Err(WorkflowError::Dataset(format!(
            "invalid dataset name '{}'",
            dataset_name
        )));
    }
    if !local_dir.is_dir() {
        return Err(WorkflowError::Dataset(format!(
            "dataset directory not found: {:?}",
            local_dir
        )));
    }

    let files = walk_files(local_dir)?;
    if files.is_empty() {
        return Err(WorkflowError::Dataset(format!(
            "dataset directory is empty: {:?}",
            local_dir
        )));
    }

    let prefix = format!("{}/{}", DATA_PREFIX, dataset_name);
    let mut total_bytes = 0u64;
    for file in &files {
        let key = object_key(&prefix, local_dir, file)?;
        let data = tokio::fs::read(file).await?;
        total_bytes += data.len() as u64;
        debug!("uploading {:?} -> {}/{}", file, bucket, key);
        store.put_object(bucket, &key, data).await?;
        METRICS.add_objects_uploaded(1);
    }

    let location = DatasetLocation::try_from(storage_uri(bucket, &prefix))?;
    obs::emit_dataset_uploaded(location.as_str(), files.len(), total_bytes);
    Ok(location)
}
