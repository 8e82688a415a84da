//! Reader configuration loaded from config.json.
//!
//! If the config file doesn't exist or can't be parsed, default values are
//! used. Missing fields fall back to their defaults individually.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::ocr::preprocess::UpscaleTargets;

/// Characters the recognizer is allowed to emit when hints are accepted.
pub const DEFAULT_CHARACTER_WHITELIST: &str =
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz:/|\\- ";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Per-invocation recognizer timeout for regular strategies (seconds)
    pub recognition_timeout_secs: u64,
    /// Per-invocation recognizer timeout for the segmentation-mode sweep (seconds)
    pub sweep_timeout_secs: u64,
    /// Source image decode timeout (seconds)
    pub decode_timeout_secs: u64,
    /// Recognizer startup timeout (seconds)
    pub startup_timeout_secs: u64,
    /// Largest accepted source file
    pub max_file_bytes: u64,
    /// Tesseract language code
    pub language: String,
    /// Whitelist passed as a recognition hint
    pub character_whitelist: String,
    /// Explicit tesseract executable, skips discovery when set
    pub tesseract_executable: Option<PathBuf>,
    /// Explicit tessdata directory, skips discovery when set
    pub tessdata_dir: Option<PathBuf>,
    /// Download missing language data on startup
    pub download_language_data: bool,
    /// Longer-side targets for the upscaling recipes
    pub upscale: UpscaleTargets,
    /// Threshold rule used by the CLI when no rule is given on the command line
    pub threshold_rule: ThresholdRuleConfig,
}

/// Comparison formula and threshold for the normal/abnormal verdict.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdRuleConfig {
    /// Arithmetic expression over x (diastolic) and y (systolic)
    pub formula: Option<String>,
    /// Maximum accepted |formula - systolic|
    pub threshold: Option<f64>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            recognition_timeout_secs: 90,
            sweep_timeout_secs: 60,
            decode_timeout_secs: 10,
            startup_timeout_secs: 60,
            max_file_bytes: 10 * 1024 * 1024,
            language: "eng".to_string(),
            character_whitelist: DEFAULT_CHARACTER_WHITELIST.to_string(),
            tesseract_executable: None,
            tessdata_dir: None,
            download_language_data: true,
            upscale: UpscaleTargets::default(),
            threshold_rule: ThresholdRuleConfig::default(),
        }
    }
}

impl ReaderConfig {
    /// Load config from file, or return defaults if it is missing or invalid.
    pub fn load(config_path: &Path) -> Self {
        crate::log(&format!("Looking for config at: {}", config_path.display()));

        if !config_path.exists() {
            crate::log("config.json not found. Using default config.");
            return Self::default();
        }

        match fs::read_to_string(config_path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    crate::log(&format!("Config loaded from {}", config_path.display()));
                    config
                }
                Err(e) => {
                    crate::log(&format!(
                        "Failed to parse {}: {}. Using defaults.",
                        config_path.display(),
                        e
                    ));
                    Self::default()
                }
            },
            Err(e) => {
                crate::log(&format!(
                    "Failed to read {}: {}. Using defaults.",
                    config_path.display(),
                    e
                ));
                Self::default()
            }
        }
    }

    /// Save default config to file (for reference).
    pub fn save_default(config_path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&Self::default())?;
        fs::write(config_path, json)?;
        Ok(())
    }

    pub fn recognition_timeout(&self) -> Duration {
        Duration::from_secs(self.recognition_timeout_secs)
    }

    pub fn sweep_timeout(&self) -> Duration {
        Duration::from_secs(self.sweep_timeout_secs)
    }

    pub fn decode_timeout(&self) -> Duration {
        Duration::from_secs(self.decode_timeout_secs)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = ReaderConfig::load(&dir.path().join("config.json"));
        assert_eq!(config.recognition_timeout_secs, 90);
        assert_eq!(config.language, "eng");
        assert_eq!(config.max_file_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{ "recognition_timeout_secs": 30, "threshold_rule": { "formula": "x+40" } }"#,
        )
        .unwrap();

        let config = ReaderConfig::load(&path);
        assert_eq!(config.recognition_timeout(), Duration::from_secs(30));
        assert_eq!(config.sweep_timeout(), Duration::from_secs(60));
        assert_eq!(config.threshold_rule.formula.as_deref(), Some("x+40"));
        assert!(config.threshold_rule.threshold.is_none());
    }

    #[test]
    fn test_malformed_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();

        let config = ReaderConfig::load(&path);
        assert_eq!(config.decode_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_save_default_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        ReaderConfig::save_default(&path).unwrap();

        let config = ReaderConfig::load(&path);
        assert_eq!(config.character_whitelist, DEFAULT_CHARACTER_WHITELIST);
        assert!(config.download_language_data);
    }
}
