//! Face aligner: detection + landmark alignment behind a single call.
//!
//! The dataset loader only sees the [`FaceAligner`] trait, so any model that
//! turns a photo into a canonical face crop can back it.

use crate::alignment::{self, DEFAULT_ALIGNED_SIZE};
use crate::detector::{DetectorError, FaceDetector, DEFAULT_CONFIDENCE_THRESHOLD};
use image::RgbImage;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("face has no landmarks — detector must return landmarks for alignment")]
    NoLandmarks,
    #[error("aligned size must be positive")]
    InvalidSize,
}

/// Turns an arbitrary face photo into an aligned square crop.
pub trait FaceAligner {
    fn align(&mut self, image: &RgbImage) -> Result<RgbImage, AlignError>;
}

impl<A: FaceAligner + ?Sized> FaceAligner for &mut A {
    fn align(&mut self, image: &RgbImage) -> Result<RgbImage, AlignError> {
        (**self).align(image)
    }
}

impl<A: FaceAligner + ?Sized> FaceAligner for Box<A> {
    fn align(&mut self, image: &RgbImage) -> Result<RgbImage, AlignError> {
        (**self).align(image)
    }
}

/// Options for [`ScrfdAligner`].
#[derive(Debug, Clone, Copy)]
pub struct AlignerOptions {
    /// Side length of the square aligned output.
    pub aligned_size: u32,
    /// Minimum SCRFD score for a face to be considered.
    pub confidence_threshold: f32,
}

impl Default for AlignerOptions {
    fn default() -> Self {
        Self {
            aligned_size: DEFAULT_ALIGNED_SIZE,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// SCRFD detection followed by a similarity warp of the best face.
pub struct ScrfdAligner {
    detector: FaceDetector,
    aligned_size: u32,
}

impl ScrfdAligner {
    /// Load the SCRFD model at `model_path`.
    pub fn load(model_path: impl AsRef<Path>, options: AlignerOptions) -> Result<Self, AlignError> {
        if options.aligned_size == 0 {
            return Err(AlignError::InvalidSize);
        }
        let detector = FaceDetector::load(model_path)?.with_confidence_threshold(options.confidence_threshold);
        tracing::info!(
            aligned_size = options.aligned_size,
            confidence_threshold = options.confidence_threshold,
            "face aligner ready"
        );
        Ok(Self {
            detector,
            aligned_size: options.aligned_size,
        })
    }
}

impl FaceAligner for ScrfdAligner {
    fn align(&mut self, image: &RgbImage) -> Result<RgbImage, AlignError> {
        let faces = self.detector.detect(image)?;
        let face = faces.first().ok_or(AlignError::NoFaceDetected)?;
        let landmarks = face.landmarks.as_ref().ok_or(AlignError::NoLandmarks)?;

        tracing::debug!(
            faces = faces.len(),
            confidence = face.confidence,
            "aligning highest-confidence face"
        );

        Ok(alignment::align_face(image, landmarks, self.aligned_size))
    }
}
