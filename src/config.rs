//! Configuration management for crucible
//!
//! Stores settings in ~/.config/crucible/config.toml. The loaded value is
//! immutable for the rest of the session and handed to constructors.

use crate::escalation::EscalationConfig;
use crate::pipeline::PipelineConfig;
use crate::sandbox::SandboxConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub escalation: EscalationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Per-gate overrides keyed by gate id (`[gates.lint]`, `[gates.run]`, ...)
    #[serde(default)]
    pub gates: BTreeMap<String, GateOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Replaces the gate's default argument (`{arg}` in its command template)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argument: Option<String>,
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("crucible"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.toml"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path. A missing file yields defaults; a corrupt
    /// file is moved aside and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<PathBuf, String> {
        let dir = Self::config_dir()
            .ok_or_else(|| "Could not determine config directory".to_string())?;
        fs::create_dir_all(&dir)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;

        let path = dir.join("config.toml");
        let content = self.to_toml()?;
        write_config_atomic(&path, &content)
            .map_err(|e| format!("Failed to write config: {}", e))?;
        Ok(path)
    }

    pub fn to_toml(&self) -> Result<String, String> {
        toml::to_string_pretty(self).map_err(|e| format!("Failed to serialize config: {}", e))
    }

    pub fn gate_override(&self, gate_id: &str) -> Option<&GateOverride> {
        self.gates.get(gate_id)
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/crucible/config.toml".to_string())
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.escalation.max_attempts, 6);
        assert_eq!(config.sandbox.runtimes, vec!["podman", "docker"]);
        assert!(config.gates.is_empty());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[escalation]\nmax_attempts = 9\n\n[gates.complexity]\nenabled = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.escalation.max_attempts, 9);
        assert_eq!(config.escalation.attempts_per_tier, 2);
        assert_eq!(config.pipeline.stage_timeout_secs, 60);
        assert_eq!(
            config.gate_override("complexity"),
            Some(&GateOverride {
                enabled: Some(false),
                argument: None
            })
        );
    }

    #[test]
    fn corrupt_file_is_preserved_and_defaults_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[escalation\nmax_attempts = ").unwrap();

        let config = Config::load_from(&path);
        assert_eq!(config.escalation.max_attempts, 6);
        assert!(dir.path().join("config.toml.corrupt").exists());
        assert!(!path.exists());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml"));
        assert_eq!(config.pipeline.max_feedback_lines, 30);
    }

    #[test]
    fn config_round_trips_through_toml() {
        let mut config = Config::default();
        config.gates.insert(
            "complexity".to_string(),
            GateOverride {
                enabled: None,
                argument: Some("-C 20".to_string()),
            },
        );
        let text = config.to_toml().unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(
            parsed.gate_override("complexity").and_then(|o| o.argument.as_deref()),
            Some("-C 20")
        );
    }
}
