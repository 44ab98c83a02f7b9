//! Face stylizer dataset: aligned face crops paired with style labels.
//!
//! A style dataset directory holds one subdirectory per style label, each
//! containing one or more face images (`jpg`, `jpeg`, `png`):
//!
//! ```text
//! styles/
//!   cartoon/   a.png  b.jpg
//!   sketch/    c.jpeg
//! ```
//!
//! Labels are the sorted subdirectory names; a sample's label is the index
//! of its parent directory in that list.

use crate::aligner::{AlignError, FaceAligner};
use image::{ImageError, RgbImage};
use ndarray::{Array1, Array4};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Image file extensions accepted by [`Dataset::from_folder`].
pub const SUPPORTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Invalid input data directory: {0}")]
    InvalidDirectory(PathBuf),
    #[error("No images found under given directory: {0}")]
    NoImages(PathBuf),
    #[error("no face could be aligned in any image under {0}")]
    NoAlignedFaces(PathBuf),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("failed to write {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: ImageError,
    },
    #[error("failed to align {path}: {source}")]
    Align {
        path: PathBuf,
        #[source]
        source: AlignError,
    },
    #[error("image {path} has no label directory")]
    Unlabeled { path: PathBuf },
    #[error("split fraction must be in (0, 1), got {0}")]
    InvalidSplit(f32),
    #[error("batch size must be positive")]
    InvalidBatchSize,
    #[error("aligned images differ in size: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("invalid manifest {path}: {reason}")]
    Manifest { path: PathBuf, reason: String },
    #[error("manifest json: {0}")]
    Json(#[from] serde_json::Error),
}

/// One aligned face and the index of its style label.
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: RgbImage,
    pub label: i64,
    /// Original image the sample was aligned from.
    pub source: PathBuf,
}

/// Options for [`Dataset::from_folder_with`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Drop images in which no face could be aligned instead of failing.
    pub skip_undetected: bool,
}

/// Paired (aligned image, label) dataset for stylizer fine-tuning.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub(crate) samples: Vec<Sample>,
    pub(crate) label_names: Vec<String>,
}

/// A stacked run of samples.
#[derive(Debug, Clone)]
pub struct Batch {
    /// NHWC, RGB channels scaled to [0, 1].
    pub images: Array4<f32>,
    pub labels: Array1<i64>,
}

impl Dataset {
    /// Build a dataset from pre-aligned samples.
    ///
    /// Every label must index into `label_names`.
    pub fn new(samples: Vec<Sample>, label_names: Vec<String>) -> Result<Self, DatasetError> {
        if let Some(bad) = samples
            .iter()
            .find(|s| s.label < 0 || s.label as usize >= label_names.len())
        {
            return Err(DatasetError::Unlabeled { path: bad.source.clone() });
        }
        Ok(Self { samples, label_names })
    }

    /// Load, align and label every image under `dirname`.
    ///
    /// Fails on the first image that cannot be decoded or aligned.
    pub fn from_folder(dirname: impl AsRef<Path>, aligner: &mut impl FaceAligner) -> Result<Self, DatasetError> {
        Self::from_folder_with(dirname, aligner, LoadOptions::default())
    }

    pub fn from_folder_with(
        dirname: impl AsRef<Path>,
        aligner: &mut impl FaceAligner,
        options: LoadOptions,
    ) -> Result<Self, DatasetError> {
        let dirname = dirname.as_ref();
        let data_root = std::fs::canonicalize(dirname)
            .map_err(|_| DatasetError::InvalidDirectory(dirname.to_path_buf()))?;
        if !data_root.is_dir() {
            return Err(DatasetError::InvalidDirectory(data_root));
        }

        // Images of one label share a subdirectory: data_root/<label>/<file>.
        let candidates = list_candidates(&data_root)?;
        if candidates.is_empty() {
            return Err(DatasetError::InvalidDirectory(data_root));
        }
        if !candidates.iter().any(|p| is_supported_image(p)) {
            return Err(DatasetError::NoImages(data_root));
        }

        let label_names = list_label_names(&data_root)?;
        let index_by_label: HashMap<&str, i64> = label_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i as i64))
            .collect();

        let mut samples = Vec::with_capacity(candidates.len());
        for path in candidates {
            if !path.is_file() || !is_supported_image(&path) {
                tracing::debug!(path = %path.display(), "skipping non-image entry");
                continue;
            }

            tracing::info!(path = %path.display(), "preprocess image");
            let label = parent_name(&path)
                .and_then(|name| index_by_label.get(name.as_str()).copied())
                .ok_or_else(|| DatasetError::Unlabeled { path: path.clone() })?;

            let image = image::open(&path)
                .map_err(|source| DatasetError::Decode { path: path.clone(), source })?
                .to_rgb8();

            let aligned = match aligner.align(&image) {
                Ok(aligned) => aligned,
                Err(err @ (AlignError::NoFaceDetected | AlignError::NoLandmarks)) if options.skip_undetected => {
                    tracing::warn!(path = %path.display(), error = %err, "skipping image without alignable face");
                    continue;
                }
                Err(source) => return Err(DatasetError::Align { path, source }),
            };

            samples.push(Sample { image: aligned, label, source: path });
        }

        if samples.is_empty() {
            return Err(DatasetError::NoAlignedFaces(data_root));
        }

        tracing::info!(
            size = samples.len(),
            num_label = label_names.len(),
            labels = %label_names.join(", "),
            "loaded images dataset"
        );

        Ok(Self { samples, label_names })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of (image, label) pairs.
    pub fn size(&self) -> usize {
        self.len()
    }

    pub fn num_classes(&self) -> usize {
        self.label_names.len()
    }

    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn iter(&self) -> impl Iterator<Item = (&RgbImage, i64)> {
        self.samples.iter().map(|s| (&s.image, s.label))
    }

    /// Number of samples per label index.
    pub fn label_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.label_names.len()];
        for sample in &self.samples {
            counts[sample.label as usize] += 1;
        }
        counts
    }

    /// Split into two datasets; the first holds `round(len * fraction)` samples.
    ///
    /// Both halves keep the full label list.
    pub fn split(mut self, fraction: f32) -> Result<(Dataset, Dataset), DatasetError> {
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(DatasetError::InvalidSplit(fraction));
        }
        let at = ((self.samples.len() as f32 * fraction).round() as usize).min(self.samples.len());
        let rest = self.samples.split_off(at);
        let second = Dataset {
            samples: rest,
            label_names: self.label_names.clone(),
        };
        Ok((self, second))
    }

    /// Deterministically shuffle the samples in place.
    pub fn shuffle(&mut self, seed: u64) {
        let mut rng = StdRng::seed_from_u64(seed);
        self.samples.shuffle(&mut rng);
    }

    /// Iterate over batches of `batch_size` samples in order; the last may be short.
    pub fn batches(
        &self,
        batch_size: usize,
    ) -> Result<impl Iterator<Item = Result<Batch, DatasetError>> + '_, DatasetError> {
        if batch_size == 0 {
            return Err(DatasetError::InvalidBatchSize);
        }
        Ok(self.samples.chunks(batch_size).map(Batch::from_samples))
    }

    /// The whole dataset as a single (images, labels) tensor pair.
    pub fn to_tensors(&self) -> Result<Batch, DatasetError> {
        Batch::from_samples(&self.samples)
    }
}

impl Batch {
    /// Stack same-sized samples into NHWC `f32` images and `i64` labels.
    pub fn from_samples(samples: &[Sample]) -> Result<Batch, DatasetError> {
        let (w, h) = samples.first().map(|s| s.image.dimensions()).unwrap_or((0, 0));
        let mut images = Array4::<f32>::zeros((samples.len(), h as usize, w as usize, 3));

        for (n, sample) in samples.iter().enumerate() {
            if sample.image.dimensions() != (w, h) {
                return Err(DatasetError::ShapeMismatch {
                    expected: (w, h),
                    actual: sample.image.dimensions(),
                });
            }
            for (x, y, pixel) in sample.image.enumerate_pixels() {
                for c in 0..3 {
                    images[[n, y as usize, x as usize, c]] = pixel.0[c] as f32 / 255.0;
                }
            }
        }

        let labels = samples.iter().map(|s| s.label).collect::<Array1<i64>>();
        Ok(Batch { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Whether `path` carries one of [`SUPPORTED_EXTENSIONS`] (case-insensitive).
pub fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Sorted names of the label subdirectories directly under `data_root`.
pub fn list_label_names(data_root: &Path) -> Result<Vec<String>, DatasetError> {
    let mut names: Vec<String> = dir_entries(data_root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}

/// Every entry at depth two (`data_root/*/*`), sorted.
fn list_candidates(data_root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let mut paths = Vec::new();
    for dir in dir_entries(data_root)?.into_iter().filter(|p| p.is_dir()) {
        paths.extend(dir_entries(&dir)?);
    }
    paths.sort();
    Ok(paths)
}

/// Every entry of `dir`, hidden ones included.
fn dir_entries(dir: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    let io_err = |source| DatasetError::Io { path: dir.to_path_buf(), source };
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        out.push(entry.map_err(io_err)?.path());
    }
    Ok(out)
}

fn parent_name(path: &Path) -> Option<String> {
    path.parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::imageops::{self, FilterType};
    use image::Rgb;
    use std::fs;

    pub(crate) const ALIGNED: u32 = 8;

    /// Records every image it sees and returns a small solid crop of the
    /// input's top-left color. Pure black inputs count as "no face".
    #[derive(Default)]
    pub(crate) struct RecordingAligner {
        pub seen: Vec<[u8; 3]>,
    }

    impl FaceAligner for RecordingAligner {
        fn align(&mut self, image: &RgbImage) -> Result<RgbImage, AlignError> {
            let color = image.get_pixel(0, 0).0;
            self.seen.push(color);
            if color == [0, 0, 0] {
                return Err(AlignError::NoFaceDetected);
            }
            Ok(imageops::resize(image, ALIGNED, ALIGNED, FilterType::Nearest))
        }
    }

    pub(crate) fn write_image(root: &Path, label: &str, name: &str, color: [u8; 3]) {
        let dir = root.join(label);
        fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(12, 10, Rgb(color)).save(dir.join(name)).unwrap();
    }

    /// styles/{cartoon: a.png, b.png, sketch: c.png, empty/}
    pub(crate) fn style_tree() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        write_image(tmp.path(), "sketch", "c.png", [30, 30, 30]);
        write_image(tmp.path(), "cartoon", "b.png", [20, 20, 20]);
        write_image(tmp.path(), "cartoon", "a.png", [10, 10, 10]);
        fs::create_dir_all(tmp.path().join("empty")).unwrap();
        tmp
    }

    #[test]
    fn test_labels_are_sorted_subdirectories() {
        let tmp = style_tree();
        let mut aligner = RecordingAligner::default();
        let ds = Dataset::from_folder(tmp.path(), &mut aligner).unwrap();

        assert_eq!(ds.label_names(), &["cartoon", "empty", "sketch"]);
        assert_eq!(ds.num_classes(), 3);
        assert_eq!(ds.size(), 3);
        let labels: Vec<i64> = ds.iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec![0, 0, 2]);
        assert_eq!(ds.label_counts(), vec![2, 0, 1]);
    }

    #[test]
    fn test_each_image_aligned_once_in_path_order() {
        let tmp = style_tree();
        let mut aligner = RecordingAligner::default();
        let ds = Dataset::from_folder(tmp.path(), &mut aligner).unwrap();

        assert_eq!(aligner.seen, vec![[10, 10, 10], [20, 20, 20], [30, 30, 30]]);
        for sample in ds.samples() {
            assert_eq!(sample.image.dimensions(), (ALIGNED, ALIGNED));
            assert!(sample.source.is_absolute());
        }
    }

    #[test]
    fn test_empty_directory_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        let mut aligner = RecordingAligner::default();
        let err = Dataset::from_folder(tmp.path(), &mut aligner).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidDirectory(_)), "{err}");
    }

    #[test]
    fn test_missing_directory_is_invalid() {
        let mut aligner = RecordingAligner::default();
        let err = Dataset::from_folder("/nonexistent/styles", &mut aligner).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidDirectory(_)));
    }

    #[test]
    fn test_files_at_root_only_is_invalid() {
        let tmp = tempfile::tempdir().unwrap();
        RgbImage::new(4, 4).save(tmp.path().join("loose.png")).unwrap();
        let mut aligner = RecordingAligner::default();
        let err = Dataset::from_folder(tmp.path(), &mut aligner).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidDirectory(_)));
    }

    #[test]
    fn test_no_supported_images() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("cartoon")).unwrap();
        fs::write(tmp.path().join("cartoon/notes.txt"), "not an image").unwrap();
        let mut aligner = RecordingAligner::default();
        let err = Dataset::from_folder(tmp.path(), &mut aligner).unwrap_err();
        assert!(matches!(err, DatasetError::NoImages(_)), "{err}");
        assert!(aligner.seen.is_empty());
    }

    #[test]
    fn test_non_images_are_skipped() {
        let tmp = style_tree();
        fs::write(tmp.path().join("cartoon/readme.md"), "x").unwrap();
        fs::write(tmp.path().join("cartoon/.DS_Store"), "x").unwrap();
        fs::create_dir_all(tmp.path().join("cartoon/nested.png")).unwrap();
        let mut aligner = RecordingAligner::default();
        let ds = Dataset::from_folder(tmp.path(), &mut aligner).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(aligner.seen.len(), 3);
    }

    #[test]
    fn test_hidden_directories_are_labels() {
        let tmp = tempfile::tempdir().unwrap();
        write_image(tmp.path(), ".retro", "a.png", [40, 40, 40]);
        write_image(tmp.path(), "cartoon", "b.png", [50, 50, 50]);
        let mut aligner = RecordingAligner::default();
        let ds = Dataset::from_folder(tmp.path(), &mut aligner).unwrap();

        assert_eq!(ds.label_names(), &[".retro", "cartoon"]);
        let labels: Vec<i64> = ds.iter().map(|(_, l)| l).collect();
        assert_eq!(labels, vec![0, 1]);
        assert_eq!(aligner.seen, vec![[40, 40, 40], [50, 50, 50]]);
    }

    #[test]
    fn test_uppercase_and_jpeg_extensions() {
        let tmp = tempfile::tempdir().unwrap();
        write_image(tmp.path(), "oil", "A.PNG", [50, 60, 70]);
        write_image(tmp.path(), "oil", "b.jpg", [200, 200, 200]);
        let mut aligner = RecordingAligner::default();
        let ds = Dataset::from_folder(tmp.path(), &mut aligner).unwrap();
        assert_eq!(ds.len(), 2);
    }

    #[test]
    fn test_align_failure_propagates() {
        let tmp = style_tree();
        write_image(tmp.path(), "sketch", "dark.png", [0, 0, 0]);
        let mut aligner = RecordingAligner::default();
        let err = Dataset::from_folder(tmp.path(), &mut aligner).unwrap_err();
        match err {
            DatasetError::Align { path, source: AlignError::NoFaceDetected } => {
                assert!(path.ends_with("sketch/dark.png"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_skip_undetected() {
        let tmp = style_tree();
        write_image(tmp.path(), "sketch", "dark.png", [0, 0, 0]);
        let mut aligner = RecordingAligner::default();
        let options = LoadOptions { skip_undetected: true };
        let ds = Dataset::from_folder_with(tmp.path(), &mut aligner, options).unwrap();
        assert_eq!(ds.len(), 3);
        assert_eq!(aligner.seen.len(), 4);
    }

    #[test]
    fn test_all_undetected_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        write_image(tmp.path(), "sketch", "dark.png", [0, 0, 0]);
        let mut aligner = RecordingAligner::default();
        let options = LoadOptions { skip_undetected: true };
        let err = Dataset::from_folder_with(tmp.path(), &mut aligner, options).unwrap_err();
        assert!(matches!(err, DatasetError::NoAlignedFaces(_)));
    }

    #[test]
    fn test_corrupt_image_is_decode_error() {
        let tmp = style_tree();
        fs::write(tmp.path().join("sketch/broken.png"), b"definitely not png").unwrap();
        let mut aligner = RecordingAligner::default();
        let err = Dataset::from_folder(tmp.path(), &mut aligner).unwrap_err();
        assert!(matches!(err, DatasetError::Decode { .. }), "{err}");
    }

    #[test]
    fn test_split_keeps_labels() {
        let tmp = style_tree();
        let ds = Dataset::from_folder(tmp.path(), &mut RecordingAligner::default()).unwrap();
        let (train, test) = ds.split(0.67).unwrap();
        assert_eq!(train.len(), 2);
        assert_eq!(test.len(), 1);
        assert_eq!(train.label_names(), test.label_names());
        assert_eq!(test.samples()[0].label, 2);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        let tmp = style_tree();
        let ds = Dataset::from_folder(tmp.path(), &mut RecordingAligner::default()).unwrap();
        assert!(matches!(ds.clone().split(0.0), Err(DatasetError::InvalidSplit(_))));
        assert!(matches!(ds.clone().split(1.0), Err(DatasetError::InvalidSplit(_))));
        assert!(matches!(ds.split(f32::NAN), Err(DatasetError::InvalidSplit(_))));
    }

    #[test]
    fn test_shuffle_is_deterministic() {
        let samples: Vec<Sample> = (0..20)
            .map(|i| Sample {
                image: RgbImage::new(1, 1),
                label: i % 2,
                source: PathBuf::from(format!("{i}.png")),
            })
            .collect();
        let mut a = Dataset::new(samples.clone(), vec!["x".into(), "y".into()]).unwrap();
        let mut b = Dataset::new(samples, vec!["x".into(), "y".into()]).unwrap();
        a.shuffle(7);
        b.shuffle(7);
        let order = |d: &Dataset| d.samples().iter().map(|s| s.source.clone()).collect::<Vec<_>>();
        assert_eq!(order(&a), order(&b));
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn test_new_rejects_out_of_range_label() {
        let sample = Sample { image: RgbImage::new(1, 1), label: 3, source: PathBuf::from("x.png") };
        assert!(matches!(
            Dataset::new(vec![sample], vec!["only".into()]),
            Err(DatasetError::Unlabeled { .. })
        ));
    }

    #[test]
    fn test_batches_cover_samples() {
        let tmp = style_tree();
        let ds = Dataset::from_folder(tmp.path(), &mut RecordingAligner::default()).unwrap();
        let batches: Vec<Batch> = ds.batches(2).unwrap().collect::<Result<_, _>>().unwrap();

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].images.shape(), &[2, ALIGNED as usize, ALIGNED as usize, 3]);
        assert_eq!(batches[1].len(), 1);
        assert_eq!(batches[0].labels.to_vec(), vec![0, 0]);
        assert_eq!(batches[1].labels.to_vec(), vec![2]);

        let px = batches[0].images[[1, 0, 0, 0]];
        assert!((px - 20.0 / 255.0).abs() < 1e-6, "px = {px}");
        assert!(matches!(ds.batches(0).err(), Some(DatasetError::InvalidBatchSize)));
    }

    #[test]
    fn test_to_tensors_rejects_mixed_sizes() {
        let samples = vec![
            Sample { image: RgbImage::new(4, 4), label: 0, source: PathBuf::from("a.png") },
            Sample { image: RgbImage::new(5, 4), label: 0, source: PathBuf::from("b.png") },
        ];
        let ds = Dataset::new(samples, vec!["a".into()]).unwrap();
        assert!(matches!(ds.to_tensors(), Err(DatasetError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_is_supported_image() {
        assert!(is_supported_image(Path::new("a/b.jpg")));
        assert!(is_supported_image(Path::new("a/b.JPEG")));
        assert!(is_supported_image(Path::new("b.png")));
        assert!(!is_supported_image(Path::new("b.webp")));
        assert!(!is_supported_image(Path::new("png")));
    }
}
