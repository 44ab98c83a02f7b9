//! facestyle-core — Face stylizer dataset preparation.
//!
//! Aligns face photos with SCRFD landmarks (ONNX Runtime, CPU) and pairs
//! each aligned crop with the style label taken from its directory.

pub mod aligner;
pub mod alignment;
pub mod dataset;
pub mod detector;
pub mod prepared;
pub mod types;

use std::path::PathBuf;

pub use aligner::{AlignError, AlignerOptions, FaceAligner, ScrfdAligner};
pub use dataset::{Batch, Dataset, DatasetError, LoadOptions, Sample};
pub use detector::{DetectorError, FaceDetector};
pub use prepared::{Manifest, ManifestEntry};
pub use types::{BoundingBox, Landmarks};

/// File name of the SCRFD detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

/// `$XDG_DATA_HOME/facestyle/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facestyle/models")
}
