//! Engine configuration.
//!
//! Stored in `evotrace.toml`; a missing file yields the defaults. The
//! classifier rule table and the dimension label synonyms live here so role
//! assignment and free-text parsing can be retargeted per deployment without
//! code changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::classify::{default_rules, ClassifierRule};
use crate::extract::DimensionLabels;

pub const CONFIG_FILE: &str = "evotrace.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Node role classification rules
    #[serde(default)]
    pub classifier: ClassifierConfig,

    /// Score extraction settings
    #[serde(default)]
    pub extractor: ExtractorConfig,
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Ordered rule table; the first matching rule decides the role
    #[serde(default = "default_rules")]
    pub rules: Vec<ClassifierRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            rules: default_rules(),
        }
    }
}

/// Extractor configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExtractorConfig {
    /// Label synonyms for the three scored dimensions
    #[serde(default)]
    pub labels: DimensionLabels,
}

impl Config {
    /// Load configuration from `<dir>/evotrace.toml`, with defaults if the
    /// file doesn't exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
    }

    /// Save configuration to `<dir>/evotrace.toml`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let path = dir.join(CONFIG_FILE);
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}
