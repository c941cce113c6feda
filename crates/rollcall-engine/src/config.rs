use crate::engine::DEFAULT_MATCH_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// Config file picked up from the working directory when `ROLLCALL_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "rollcall.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("match_threshold must be a positive number, got {0}")]
    InvalidThreshold(f32),
}

/// Runtime configuration.
///
/// Layered as defaults, then an optional TOML file, then `ROLLCALL_*`
/// environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// SCRFD face-detection ONNX model.
    pub detector_model_path: PathBuf,
    /// Face-landmark ONNX model.
    pub model_path: PathBuf,
    /// Directory holding `face_data_<identity>.json` records.
    pub data_dir: PathBuf,
    /// Attendance CSV.
    pub log_path: PathBuf,
    /// Euclidean distance, in pixels, below which a face matches.
    pub match_threshold: f32,
    /// Frames discarded after opening the camera.
    pub warmup_frames: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            detector_model_path: PathBuf::from("models/det_10g.onnx"),
            model_path: PathBuf::from("models/face_landmark.onnx"),
            data_dir: PathBuf::from("."),
            log_path: PathBuf::from("attendance.csv"),
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            warmup_frames: 0,
        }
    }
}

/// On-disk shape of the config file; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    camera_device: Option<String>,
    detector_model_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    log_path: Option<PathBuf>,
    match_threshold: Option<f32>,
    warmup_frames: Option<usize>,
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or `./rollcall.toml` if present) and
    /// the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(|| {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                default.exists().then_some(default)
            });

        Self::load_with(path.as_deref(), |key| std::env::var(key).ok())
    }

    /// Load from an optional file and an explicit environment lookup.
    pub fn load_with<F>(path: Option<&Path>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = path {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let file: FileConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "loaded config file");
            config.apply_file(file);
        }

        config.apply_env(env);
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.camera_device {
            self.camera_device = v;
        }
        if let Some(v) = file.detector_model_path {
            self.detector_model_path = v;
        }
        if let Some(v) = file.model_path {
            self.model_path = v;
        }
        if let Some(v) = file.data_dir {
            self.data_dir = v;
        }
        if let Some(v) = file.log_path {
            self.log_path = v;
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.warmup_frames {
            self.warmup_frames = v;
        }
    }

    fn apply_env<F: Fn(&str) -> Option<String>>(&mut self, env: F) {
        if let Some(v) = env("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = env("ROLLCALL_DETECTOR_MODEL_PATH") {
            self.detector_model_path = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = env("ROLLCALL_LOG_PATH") {
            self.log_path = PathBuf::from(v);
        }
        self.match_threshold = env_parse(&env, "ROLLCALL_MATCH_THRESHOLD", self.match_threshold);
        self.warmup_frames = env_parse(&env, "ROLLCALL_WARMUP_FRAMES", self.warmup_frames);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::InvalidThreshold(self.match_threshold));
        }
        Ok(())
    }

    /// Face-mesh model path as a string for the ONNX loader.
    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }

    /// Detector model path as a string for the ONNX loader.
    pub fn detector_model_path_str(&self) -> String {
        self.detector_model_path.to_string_lossy().into_owned()
    }
}

fn env_parse<T, F>(env: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable environment value");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::load_with(None, env_from(&[])).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.match_threshold, 1000.0);
        assert_eq!(config.log_path, PathBuf::from("attendance.csv"));
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(
            &path,
            "camera_device = \"/dev/video4\"\nmatch_threshold = 750.0\ndata_dir = \"/var/lib/rollcall\"\n",
        )
        .unwrap();

        let config = Config::load_with(
            Some(&path),
            env_from(&[("ROLLCALL_MATCH_THRESHOLD", "500"), ("ROLLCALL_WARMUP_FRAMES", "3")]),
        )
        .unwrap();

        assert_eq!(config.camera_device, "/dev/video4");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/rollcall"));
        assert_eq!(config.match_threshold, 500.0);
        assert_eq!(config.warmup_frames, 3);
    }

    #[test]
    fn test_model_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "detector_model_path = \"/opt/models/scrfd.onnx\"\n").unwrap();

        let config = Config::load_with(
            Some(&path),
            env_from(&[("ROLLCALL_MODEL_PATH", "/opt/models/mesh.onnx")]),
        )
        .unwrap();

        assert_eq!(config.detector_model_path_str(), "/opt/models/scrfd.onnx");
        assert_eq!(config.model_path_str(), "/opt/models/mesh.onnx");
        assert_eq!(
            Config::default().detector_model_path,
            PathBuf::from("models/det_10g.onnx")
        );
    }

    #[test]
    fn test_bad_env_value_keeps_previous() {
        let config =
            Config::load_with(None, env_from(&[("ROLLCALL_MATCH_THRESHOLD", "lots")])).unwrap();
        assert_eq!(config.match_threshold, DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rollcall.toml");
        std::fs::write(&path, "threshold = 3\n").unwrap();
        let err = Config::load_with(Some(&path), env_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load_with(Some(Path::new("/nonexistent/rollcall.toml")), env_from(&[]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_non_positive_threshold_rejected() {
        let err = Config::load_with(None, env_from(&[("ROLLCALL_MATCH_THRESHOLD", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidThreshold(_)));
    }
}
