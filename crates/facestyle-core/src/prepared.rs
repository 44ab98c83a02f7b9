//! On-disk form of an aligned dataset.
//!
//! Layout written by [`Dataset::save`]:
//!
//! ```text
//! out/
//!   manifest.json
//!   <label>/<index>_<stem>.png
//! ```
//!
//! Reloading with [`Dataset::load_prepared`] skips face alignment entirely.

use crate::dataset::{Dataset, DatasetError, Sample};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Index of a prepared dataset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub created_at: DateTime<Utc>,
    /// (width, height) shared by every aligned image, if any were written.
    pub aligned_size: Option<(u32, u32)>,
    pub label_names: Vec<String>,
    pub entries: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Image the face was aligned from.
    pub source: PathBuf,
    /// Aligned PNG, relative to the dataset directory.
    pub aligned: PathBuf,
    pub label: i64,
}

impl Dataset {
    /// Write every aligned sample as PNG under `out_dir` plus a manifest.
    pub fn save(&self, out_dir: impl AsRef<Path>) -> Result<Manifest, DatasetError> {
        let out_dir = out_dir.as_ref();
        create_dir(out_dir)?;

        let mut entries = Vec::with_capacity(self.samples.len());
        for (index, sample) in self.samples.iter().enumerate() {
            let label_name = &self.label_names[sample.label as usize];
            let stem = sample
                .source
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "face".to_string());
            let aligned = Path::new(label_name).join(format!("{index:05}_{stem}.png"));

            let path = out_dir.join(&aligned);
            if let Some(parent) = path.parent() {
                create_dir(parent)?;
            }
            sample
                .image
                .save(&path)
                .map_err(|source| DatasetError::Encode { path: path.clone(), source })?;

            entries.push(ManifestEntry {
                source: sample.source.clone(),
                aligned,
                label: sample.label,
            });
        }

        let manifest = Manifest {
            created_at: Utc::now(),
            aligned_size: self.samples.first().map(|s| s.image.dimensions()),
            label_names: self.label_names.clone(),
            entries,
        };

        let manifest_path = out_dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(&manifest_path, json).map_err(|source| DatasetError::Io {
            path: manifest_path.clone(),
            source,
        })?;

        tracing::info!(
            path = %out_dir.display(),
            size = manifest.entries.len(),
            num_label = manifest.label_names.len(),
            "saved prepared dataset"
        );
        Ok(manifest)
    }

    /// Load a dataset previously written by [`Dataset::save`].
    pub fn load_prepared(dir: impl AsRef<Path>) -> Result<Self, DatasetError> {
        let dir = dir.as_ref();
        let manifest = read_manifest(dir)?;
        let manifest_path = dir.join(MANIFEST_FILE);

        let mut samples = Vec::with_capacity(manifest.entries.len());
        for entry in manifest.entries {
            if entry.label < 0 || entry.label as usize >= manifest.label_names.len() {
                return Err(DatasetError::Manifest {
                    path: manifest_path,
                    reason: format!("label {} out of range for {}", entry.label, entry.aligned.display()),
                });
            }
            if !is_contained(&entry.aligned) {
                return Err(DatasetError::Manifest {
                    path: manifest_path,
                    reason: format!("aligned path {} escapes the dataset directory", entry.aligned.display()),
                });
            }

            let path = dir.join(&entry.aligned);
            let image = image::open(&path)
                .map_err(|source| DatasetError::Decode { path, source })?
                .to_rgb8();

            if let Some(expected) = manifest.aligned_size {
                if image.dimensions() != expected {
                    return Err(DatasetError::ShapeMismatch {
                        expected,
                        actual: image.dimensions(),
                    });
                }
            }

            samples.push(Sample {
                image,
                label: entry.label,
                source: entry.source,
            });
        }

        tracing::info!(
            path = %dir.display(),
            size = samples.len(),
            num_label = manifest.label_names.len(),
            "loaded prepared dataset"
        );
        Dataset::new(samples, manifest.label_names)
    }
}

/// Parse `dir/manifest.json` without decoding any images.
pub fn read_manifest(dir: impl AsRef<Path>) -> Result<Manifest, DatasetError> {
    let path = dir.as_ref().join(MANIFEST_FILE);
    let raw = std::fs::read_to_string(&path).map_err(|source| DatasetError::Io { path, source })?;
    Ok(serde_json::from_str(&raw)?)
}

/// Relative path made only of plain names (no root, `.` or `..`).
fn is_contained(path: &Path) -> bool {
    path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)))
}

fn create_dir(dir: &Path) -> Result<(), DatasetError> {
    std::fs::create_dir_all(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })
}
