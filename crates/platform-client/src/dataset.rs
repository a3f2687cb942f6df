//! Public dataset download
//!
//! Fetches a well-known dataset archive to local storage and unpacks it.
//! Files that are already present are reused; an expected SHA-256 is
//! verified when the source declares one.

use std::io::BufReader;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Errors raised while acquiring a dataset
#[derive(Error, Debug)]
pub enum FetchError {
    /// Download failed at the transport level
    #[error("download failed: {0}")]
    Http(String),

    /// Mirror answered with a non-success status
    #[error("mirror returned {status} for {url}")]
    Status { status: u16, url: String },

    /// Downloaded or existing file does not match the expected digest
    #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    /// Archive could not be unpacked
    #[error("cannot unpack {path}: {reason}")]
    Archive { path: String, reason: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err.to_string())
    }
}

/// A downloadable dataset archive
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSource {
    /// Dataset name, also the local directory name and the upload prefix
    pub name: String,
    /// Archive URL
    pub url: String,
    /// File name to store the archive under
    pub file_name: String,
    /// Expected lowercase hex SHA-256 of the archive, if known
    pub sha256: Option<String>,
}

impl DatasetSource {
    /// CIFAR-10, binary version (10 classes, 32x32 RGB)
    pub fn cifar10() -> Self {
        DatasetSource {
            name: "cifar10".to_string(),
            url: "https://www.cs.toronto.edu/~kriz/cifar-10-binary.tar.gz".to_string(),
            file_name: "cifar-10-binary.tar.gz".to_string(),
            sha256: None,
        }
    }

    /// Pin the archive digest
    pub fn with_sha256(mut self, sha256: &str) -> Self {
        self.sha256 = Some(sha256.to_ascii_lowercase());
        self
    }

    /// Point at a mirror. The stored file name follows the URL's last path
    /// segment; a URL without one keeps the current name.
    pub fn with_url(mut self, url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let path = path.split_once("://").map_or(path, |(_, rest)| rest);
        if let Some((_, last)) = path.rsplit_once('/') {
            if !last.is_empty() {
                self.file_name = last.to_string();
            }
        }
        self.url = url.to_string();
        self
    }

    /// Directory the dataset is stored in under `root`
    pub fn local_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.name)
    }

    /// Gzipped tarballs are unpacked into the dataset directory; anything
    /// else is stored there as-is.
    pub fn is_archive(&self) -> bool {
        self.file_name.ends_with(".tar.gz") || self.file_name.ends_with(".tgz")
    }
}

/// Hex SHA-256 of a file on disk.
pub fn sha256_file(path: &Path) -> Result<String, FetchError> {
    let content = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Ok(hex::encode(hasher.finalize()))
}

fn verify(path: &Path, expected: Option<&str>, actual: &str) -> Result<(), FetchError> {
    match expected {
        Some(expected) if !expected.eq_ignore_ascii_case(actual) => {
            Err(FetchError::ChecksumMismatch {
                path: path.display().to_string(),
                expected: expected.to_string(),
                actual: actual.to_string(),
            })
        }
        _ => Ok(()),
    }
}

/// Downloader for public dataset mirrors
pub struct DatasetFetcher {
    http_client: reqwest::Client,
}

impl DatasetFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("mlpilot-platform-client/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(DatasetFetcher { http_client })
    }

    /// Ensure the dataset exists under `root/<name>/` and return that
    /// directory.
    ///
    /// Archives are kept at `root/<file_name>` and unpacked into the dataset
    /// directory, so the directory holds only dataset files. A non-empty
    /// dataset directory is taken as already unpacked. An existing archive
    /// is not downloaded again, but it is still verified against
    /// `source.sha256` when one is set.
    pub async fn fetch(&self, source: &DatasetSource, root: &Path) -> Result<PathBuf, FetchError> {
        let dir = source.local_dir(root);
        if !source.is_archive() {
            self.ensure_file(source, &dir.join(&source.file_name)).await?;
            return Ok(dir);
        }

        let archive = root.join(&source.file_name);
        self.ensure_file(source, &archive).await?;
        if has_entries(&dir)? {
            info!("Dataset {} already unpacked at {:?}", source.name, dir);
            return Ok(dir);
        }

        unpack(&archive, root, &dir).await?;
        info!("Dataset {} unpacked into {:?}", source.name, dir);
        Ok(dir)
    }

    /// Download `source` to `target` unless it is already there, verifying
    /// the digest either way.
    async fn ensure_file(&self, source: &DatasetSource, target: &Path) -> Result<(), FetchError> {
        if target.is_file() {
            let actual = sha256_file(target)?;
            verify(target, source.sha256.as_deref(), &actual)?;
            info!("Dataset {} already present at {:?}", source.name, target);
            return Ok(());
        }

        let parent = target.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await?;
        info!("Downloading dataset {} from {}", source.name, source.url);

        let partial = parent.join(format!("{}.part", source.file_name));
        let actual = match self.download(&source.url, &partial).await {
            Ok(digest) => digest,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if let Err(e) = verify(target, source.sha256.as_deref(), &actual) {
            warn!("Discarding download of {}: {}", source.name, e);
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, target).await?;
        debug!(sha256 = %actual, "dataset file stored at {:?}", target);
        Ok(())
    }

    /// Stream `url` into `path`, returning the SHA-256 of the written bytes.
    async fn download(&self, url: &str, path: &Path) -> Result<String, FetchError> {
        let mut response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let mut file = tokio::fs::File::create(path).await?;
        let mut hasher = Sha256::new();
        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        Ok(hex::encode(hasher.finalize()))
    }
}

fn has_entries(dir: &Path) -> Result<bool, FetchError> {
    if !dir.is_dir() {
        return Ok(false);
    }
    Ok(std::fs::read_dir(dir)?.next().is_some())
}

/// Unpack a `.tar.gz` into `dir`. Entries land in a staging directory under
/// `root` first so an interrupted unpack never looks complete.
async fn unpack(archive: &Path, root: &Path, dir: &Path) -> Result<(), FetchError> {
    let dir_name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = root.join(format!(".{}.unpacking", dir_name));
    if staging.exists() {
        tokio::fs::remove_dir_all(&staging).await?;
    }
    tokio::fs::create_dir_all(&staging).await?;

    let archive_path = archive.to_path_buf();
    let target = staging.clone();
    let unpacked = tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let file = std::fs::File::open(&archive_path)?;
        tar::Archive::new(GzDecoder::new(BufReader::new(file))).unpack(&target)
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));

    if let Err(e) = unpacked.and_then(|r| r) {
        let _ = tokio::fs::remove_dir_all(&staging).await;
        return Err(FetchError::Archive {
            path: archive.display().to_string(),
            reason: e.to_string(),
        });
    }

    if dir.exists() {
        tokio::fs::remove_dir(dir).await?;
    }
    tokio::fs::rename(&staging, dir).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::tempdir;

    fn tar_gz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
        for (path, data) in entries {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    fn offline_cifar10() -> DatasetSource {
        DatasetSource::cifar10().with_url("http://127.0.0.1:1/cifar-10-binary.tar.gz")
    }

    #[test]
    fn test_cifar10_source() {
        let source = DatasetSource::cifar10();
        assert_eq!(source.name, "cifar10");
        assert!(source.url.ends_with(&source.file_name));
        assert!(source.sha256.is_none());
    }

    #[test]
    fn test_mirror_url_sets_file_name() {
        let source = DatasetSource::cifar10()
            .with_url("https://mirror.example.org/datasets/cifar10-bin.tgz?sig=abc");
        assert_eq!(source.file_name, "cifar10-bin.tgz");
        assert!(source.is_archive());

        let bare = DatasetSource::cifar10().with_url("https://mirror.example.org/");
        assert_eq!(bare.file_name, "cifar-10-binary.tar.gz");

        let plain = DatasetSource::cifar10().with_url("https://mirror.example.org/cifar10.bin");
        assert_eq!(plain.file_name, "cifar10.bin");
        assert!(!plain.is_archive());
    }

    #[test]
    fn test_sha256_file_known_value() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").unwrap();

        assert_eq!(
            sha256_file(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_existing_archive_is_reused_without_network() {
        let dir = tempdir().unwrap();
        let source = DatasetSource {
            name: "tiny".to_string(),
            url: "http://127.0.0.1:1/tiny.bin".to_string(),
            file_name: "tiny.bin".to_string(),
            sha256: None,
        }
        .with_sha256("BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD");
        let local = source.local_dir(dir.path());
        std::fs::create_dir_all(&local).unwrap();
        std::fs::write(local.join("tiny.bin"), b"abc").unwrap();

        let fetched = DatasetFetcher::new()
            .unwrap()
            .fetch(&source, dir.path())
            .await
            .unwrap();
        assert_eq!(fetched, local);
    }

    #[tokio::test]
    async fn test_existing_archive_with_wrong_digest_is_rejected() {
        let dir = tempdir().unwrap();
        let source = DatasetSource {
            name: "tiny".to_string(),
            url: "http://127.0.0.1:1/tiny.bin".to_string(),
            file_name: "tiny.bin".to_string(),
            sha256: Some("00".repeat(32)),
        };
        let local = source.local_dir(dir.path());
        std::fs::create_dir_all(&local).unwrap();
        std::fs::write(local.join("tiny.bin"), b"abc").unwrap();

        let err = DatasetFetcher::new()
            .unwrap()
            .fetch(&source, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ChecksumMismatch { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_mirror_leaves_no_partial_file() {
        let dir = tempdir().unwrap();
        let source = DatasetSource {
            name: "tiny".to_string(),
            url: "http://127.0.0.1:1/tiny.bin".to_string(),
            file_name: "tiny.bin".to_string(),
            sha256: None,
        };

        let err = DatasetFetcher::new()
            .unwrap()
            .fetch(&source, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Http(_)));
        assert!(!source.local_dir(dir.path()).join("tiny.bin.part").exists());
        assert!(!source.local_dir(dir.path()).join("tiny.bin").exists());
    }

    #[tokio::test]
    async fn test_archive_is_unpacked_into_dataset_dir() {
        let dir = tempdir().unwrap();
        let batch = vec![3u8; 64];
        let archive = tar_gz(&[
            ("cifar-10-batches-bin/batches.meta.txt", &b"airplane\nautomobile\n"[..]),
            ("cifar-10-batches-bin/test_batch.bin", batch.as_slice()),
        ]);
        let archive_path = dir.path().join("cifar-10-binary.tar.gz");
        std::fs::write(&archive_path, &archive).unwrap();
        let source = offline_cifar10().with_sha256(&sha256_file(&archive_path).unwrap());

        let fetcher = DatasetFetcher::new().unwrap();
        let local = fetcher.fetch(&source, dir.path()).await.unwrap();

        assert_eq!(local, dir.path().join("cifar10"));
        let unpacked = local.join("cifar-10-batches-bin");
        assert_eq!(std::fs::read(unpacked.join("test_batch.bin")).unwrap(), batch);
        assert!(unpacked.join("batches.meta.txt").is_file());
        assert!(!local.join("cifar-10-binary.tar.gz").exists());
        assert!(!dir.path().join(".cifar10.unpacking").exists());

        // unpacked data is reused on the next fetch
        std::fs::remove_file(unpacked.join("batches.meta.txt")).unwrap();
        fetcher.fetch(&source, dir.path()).await.unwrap();
        assert!(!unpacked.join("batches.meta.txt").exists());
    }

    #[tokio::test]
    async fn test_corrupt_archive_leaves_no_dataset_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("cifar-10-binary.tar.gz"), b"not a tarball").unwrap();

        let err = DatasetFetcher::new()
            .unwrap()
            .fetch(&offline_cifar10(), dir.path())
            .await
            .unwrap_err();

        assert!(matches!(err, FetchError::Archive { .. }));
        assert!(!dir.path().join("cifar10").exists());
        assert!(!dir.path().join(".cifar10.unpacking").exists());
    }
}
