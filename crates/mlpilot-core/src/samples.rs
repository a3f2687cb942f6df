//! CIFAR-10 sample images for inference.
//!
//! A sample is one CIFAR-10 binary record: a label byte followed by 3072
//! pixel bytes, stored channel-planar (1024 red, 1024 green, 1024 blue, each
//! row-major 32x32). Files holding the 3072 pixel bytes alone are accepted
//! too; their ground truth comes from the file name.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{Result, WorkflowError};

pub const IMAGE_SIDE: usize = 32;
pub const CHANNELS: usize = 3;
pub const PIXELS_PER_IMAGE: usize = IMAGE_SIDE * IMAGE_SIDE * CHANNELS;
/// One record in a CIFAR-10 binary batch file.
pub const RECORD_LEN: usize = PIXELS_PER_IMAGE + 1;

/// CIFAR-10 class names, indexed by label.
pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

/// Per-channel normalization used by the training transform.
const MEAN: [f32; CHANNELS] = [0.4914, 0.4822, 0.4465];
const STD: [f32; CHANNELS] = [0.2023, 0.1994, 0.2010];

/// Label index for a class name, case-insensitive.
pub fn class_index(name: &str) -> Option<u8> {
    CLASS_NAMES
        .iter()
        .position(|c| c.eq_ignore_ascii_case(name))
        .map(|i| i as u8)
}

/// Class name for a label index.
pub fn class_name(index: u8) -> Option<&'static str> {
    CLASS_NAMES.get(index as usize).copied()
}

/// One 32x32 RGB image with optional ground truth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleImage {
    name: String,
    label: Option<u8>,
    pixels: Vec<u8>,
}

impl SampleImage {
    /// Build from channel-planar pixel bytes.
    pub fn from_pixels(name: &str, label: Option<u8>, pixels: Vec<u8>) -> Result<Self> {
        if pixels.len() != PIXELS_PER_IMAGE {
            return Err(invalid(
                name,
                format!("expected {} pixel bytes, got {}", PIXELS_PER_IMAGE, pixels.len()),
            ));
        }
        if let Some(label) = label {
            if class_name(label).is_none() {
                return Err(invalid(name, format!("label {} out of range", label)));
            }
        }
        Ok(SampleImage {
            name: name.to_string(),
            label,
            pixels,
        })
    }

    /// Decode a full CIFAR-10 record (label byte + pixels).
    pub fn from_record(name: &str, record: &[u8]) -> Result<Self> {
        if record.len() != RECORD_LEN {
            return Err(invalid(
                name,
                format!("expected {} record bytes, got {}", RECORD_LEN, record.len()),
            ));
        }
        Self::from_pixels(name, Some(record[0]), record[1..].to_vec())
    }

    /// Load a sample file. The label comes from the record when present,
    /// otherwise from a file stem of the form `<class>` or `<class>_<n>`.
    pub fn load(path: &Path) -> Result<Self> {
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let bytes = std::fs::read(path)?;
        let stem_label = name.split('_').next().and_then(class_index);

        match bytes.len() {
            RECORD_LEN => {
                let sample = Self::from_record(&name, &bytes)?;
                if let (Some(stem), Some(record)) = (stem_label, sample.label) {
                    if stem != record {
                        return Err(invalid(
                            &name,
                            format!(
                                "file name says {} but record label is {}",
                                CLASS_NAMES[stem as usize], CLASS_NAMES[record as usize]
                            ),
                        ));
                    }
                }
                Ok(sample)
            }
            PIXELS_PER_IMAGE => Self::from_pixels(&name, stem_label, bytes),
            other => Err(invalid(
                &name,
                format!(
                    "expected {} or {} bytes, got {}",
                    PIXELS_PER_IMAGE, RECORD_LEN, other
                ),
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn label(&self) -> Option<u8> {
        self.label
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Normalized `[channel][row][col]` tensor as sent to the endpoint.
    pub fn to_tensor(&self) -> Vec<Vec<Vec<f32>>> {
        let plane = IMAGE_SIDE * IMAGE_SIDE;
        (0..CHANNELS)
            .map(|c| {
                (0..IMAGE_SIDE)
                    .map(|row| {
                        (0..IMAGE_SIDE)
                            .map(|col| {
                                let v = self.pixels[c * plane + row * IMAGE_SIDE + col] as f32;
                                (v / 255.0 - MEAN[c]) / STD[c]
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect()
    }

    /// JSON payload for one invocation.
    pub fn to_payload(&self) -> Value {
        serde_json::json!(self.to_tensor())
    }

    /// Full record bytes; unlabeled images are written with label 0.
    pub fn to_record(&self) -> Vec<u8> {
        let mut record = Vec::with_capacity(RECORD_LEN);
        record.push(self.label.unwrap_or(0));
        record.extend_from_slice(&self.pixels);
        record
    }
}

fn invalid(name: &str, reason: String) -> WorkflowError {
    WorkflowError::InvalidSample {
        name: name.to_string(),
        reason,
    }
}

/// Load every `.bin` sample in `dir`, sorted by file name.
pub fn load_samples(dir: &Path) -> Result<Vec<SampleImage>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    paths.retain(|p| p.is_file() && p.extension().is_some_and(|e| e == "bin"));
    paths.sort();

    if paths.is_empty() {
        return Err(WorkflowError::Dataset(format!(
            "no .bin samples found in {:?}",
            dir
        )));
    }
    paths.iter().map(|p| SampleImage::load(p)).collect()
}

/// Pick the first record of each class from a CIFAR-10 batch file.
///
/// Returns up to `per_class` samples per class, ordered by class then by
/// position in the batch, named `<class>_<n>`.
pub fn extract_from_batch(batch: &[u8], per_class: usize) -> Result<Vec<SampleImage>> {
    if batch.is_empty() || batch.len() % RECORD_LEN != 0 {
        return Err(WorkflowError::Dataset(format!(
            "batch length {} is not a multiple of {}",
            batch.len(),
            RECORD_LEN
        )));
    }

    let mut by_class: Vec<Vec<SampleImage>> = vec![Vec::new(); CLASS_NAMES.len()];
    for (i, record) in batch.chunks_exact(RECORD_LEN).enumerate() {
        let label = record[0] as usize;
        let Some(bucket) = by_class.get_mut(label) else {
            return Err(WorkflowError::Dataset(format!(
                "record {} has label {} outside 0-9",
                i, label
            )));
        };
        if bucket.len() < per_class {
            let name = format!("{}_{}", CLASS_NAMES[label], bucket.len() + 1);
            bucket.push(SampleImage::from_record(&name, record)?);
        }
        if by_class.iter().all(|b| b.len() >= per_class) {
            break;
        }
    }
    Ok(by_class.into_iter().flatten().collect())
}

/// Write samples as `<name>.bin` records into `dir`, returning the paths.
pub fn write_samples(samples: &[SampleImage], dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)?;
    samples
        .iter()
        .map(|s| {
            let path = dir.join(format!("{}.bin", s.name()));
            std::fs::write(&path, s.to_record())?;
            Ok(path)
        })
        .collect()
}

/// Held-out batch in the unpacked CIFAR-10 binary archive.
pub const TEST_BATCH: &str = "test_batch.bin";

fn has_samples(dir: &Path) -> Result<bool> {
    if !dir.is_dir() {
        return Ok(false);
    }
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|e| e == "bin") {
            return Ok(true);
        }
    }
    Ok(false)
}

fn find_file(dir: &Path, file_name: &str) -> Result<Option<PathBuf>> {
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;
    entries.sort();
    for path in entries {
        if path.is_file() && path.file_name().is_some_and(|n| n == file_name) {
            return Ok(Some(path));
        }
        if path.is_dir() {
            if let Some(found) = find_file(&path, file_name)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

/// Fill `samples_dir` from the test batch found under `dataset_dir`.
///
/// A directory that already holds `.bin` samples is left alone. Returns the
/// number of samples written.
pub fn seed_samples(dataset_dir: &Path, samples_dir: &Path, per_class: usize) -> Result<usize> {
    if has_samples(samples_dir)? {
        debug!("samples already present in {:?}", samples_dir);
        return Ok(0);
    }
    if !dataset_dir.is_dir() {
        return Err(WorkflowError::Dataset(format!(
            "dataset directory not found: {:?}",
            dataset_dir
        )));
    }
    let Some(batch) = find_file(dataset_dir, TEST_BATCH)? else {
        return Err(WorkflowError::Dataset(format!(
            "{} not found under {:?}",
            TEST_BATCH, dataset_dir
        )));
    };

    let samples = extract_from_batch(&std::fs::read(&batch)?, per_class)?;
    let written = write_samples(&samples, samples_dir)?;
    info!(batch = ?batch, count = written.len(), "seeded prediction samples");
    Ok(written.len())
}
