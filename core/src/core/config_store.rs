//! On-disk persistence for `ReconConfig`.
//!
//! The config lives in `~/.dnarecon/config.json`. Opening a store creates the
//! file with defaults when it is missing, and falls back to defaults (with an
//! error log) when it cannot be parsed. Writes go through a `.tmp` file and a
//! rename so a killed process never leaves half a config behind.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::BaseDirs;
use log::error;
use serde_json::Value;

use crate::ReconConfig;

const CONFIG_DIR: &str = ".dnarecon";
const CONFIG_FILE: &str = "config.json";

pub struct ConfigStore {
    path: PathBuf,
    config: ReconConfig,
}

impl ConfigStore {
    pub fn default_dir() -> PathBuf {
        match BaseDirs::new() {
            Some(dirs) => dirs.home_dir().join(CONFIG_DIR),
            None => PathBuf::from(CONFIG_DIR),
        }
    }

    pub fn default_path() -> PathBuf {
        Self::default_dir().join(CONFIG_FILE)
    }

    pub fn open_default() -> Self {
        Self::open(Self::default_path())
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let config = match Self::load_or_init(&path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration from {}: {:#}", path.display(), e);
                ReconConfig::default()
            }
        };
        Self { path, config }
    }

    /// Reads a config file without creating it. `None` when absent or unreadable.
    pub fn read(path: &Path) -> Option<ReconConfig> {
        let data = fs::read_to_string(path).ok()?;
        serde_json::from_str(&data).ok()
    }

    fn load_or_init(path: &Path) -> anyhow::Result<ReconConfig> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
        }

        if !path.exists() {
            let config = ReconConfig::default();
            write_atomic(path, &config)?;
            return Ok(config);
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &ReconConfig {
        &self.config
    }

    pub fn into_config(self) -> ReconConfig {
        self.config
    }

    pub fn save(&self) -> anyhow::Result<()> {
        write_atomic(&self.path, &self.config)
    }

    /// Applies a JSON patch on top of the current values and persists the result.
    /// Nested objects are merged key by key.
    pub fn merge(&mut self, patch: Value) -> anyhow::Result<()> {
        self.config = merged(&self.config, patch)?;
        self.save()
    }

    pub fn reset(&mut self) -> anyhow::Result<()> {
        self.config = ReconConfig::default();
        self.save()
    }
}

/// Returns `base` with `patch` layered over it.
pub fn merged(base: &ReconConfig, patch: Value) -> anyhow::Result<ReconConfig> {
    let mut current = serde_json::to_value(base)?;
    merge_values(&mut current, patch);
    serde_json::from_value(current).context("applying configuration overrides")
}

fn merge_values(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

fn write_atomic(path: &Path, config: &ReconConfig) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(config)?;
    fs::write(&tmp, &json).with_context(|| format!("writing {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}
