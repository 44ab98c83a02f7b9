use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Dataset preparation settings.
///
/// Built from defaults, then an optional TOML file, then `FACESTYLE_*`
/// environment variables (highest precedence).
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Side length of the aligned square face crop.
    pub aligned_size: u32,
    /// Minimum SCRFD score for a face to be aligned.
    pub detect_threshold: f32,
    /// Drop images without a detectable face instead of failing the run.
    pub skip_undetected: bool,
}

/// TOML form of [`Config`]; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub model_dir: Option<PathBuf>,
    pub aligned_size: Option<u32>,
    pub detect_threshold: Option<f32>,
    pub skip_undetected: Option<bool>,
}

impl Default for Config {
    fn default() -> Self {
        let options = facestyle_core::AlignerOptions::default();
        Self {
            model_dir: facestyle_core::default_model_dir(),
            aligned_size: options.aligned_size,
            detect_threshold: options.confidence_threshold,
            skip_undetected: false,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file and the process environment.
    pub fn load(file: Option<&Path>) -> anyhow::Result<Self> {
        let file = match file {
            Some(path) => Some(read_file_config(path)?),
            None => None,
        };
        Ok(Self::from_sources(file, |key| std::env::var(key).ok()))
    }

    fn from_sources(file: Option<FileConfig>, env: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(file) = file {
            config.model_dir = file.model_dir.unwrap_or(config.model_dir);
            config.aligned_size = file.aligned_size.unwrap_or(config.aligned_size);
            config.detect_threshold = file.detect_threshold.unwrap_or(config.detect_threshold);
            config.skip_undetected = file.skip_undetected.unwrap_or(config.skip_undetected);
        }

        if let Some(dir) = env("FACESTYLE_MODEL_DIR") {
            config.model_dir = PathBuf::from(dir);
        }
        config.aligned_size = env_parse(&env, "FACESTYLE_ALIGNED_SIZE", config.aligned_size);
        config.detect_threshold = env_parse(&env, "FACESTYLE_DETECT_THRESHOLD", config.detect_threshold);
        config.skip_undetected = env("FACESTYLE_SKIP_UNDETECTED")
            .map(|v| v != "0")
            .unwrap_or(config.skip_undetected);

        config
    }

    /// Path to the SCRFD detection model.
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(facestyle_core::DETECTOR_MODEL_FILE)
    }

    pub fn aligner_options(&self) -> facestyle_core::AlignerOptions {
        facestyle_core::AlignerOptions {
            aligned_size: self.aligned_size,
            confidence_threshold: self.detect_threshold,
        }
    }
}

fn read_file_config(path: &Path) -> anyhow::Result<FileConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
}

fn env_parse<T: std::str::FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    env(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
