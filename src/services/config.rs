// src/services/config.rs
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::core::connections::ConnectionRecord;

/// Resolver configuration loaded from `carya.toml`.
///
/// `[connections]` is the base connection table; `[overrides]` carries
/// environment-style per-deployment records that replace base entries of
/// the same name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaryaConfig {
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    #[serde(default)]
    pub connections: IndexMap<String, ConnectionRecord>,

    #[serde(default)]
    pub overrides: IndexMap<String, ConnectionRecord>,
}

impl CaryaConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("carya.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("⚠️ {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: CaryaConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        debug!(
            "✓ Config loaded: {} connection(s), {} override(s)",
            config.connections.len(),
            config.overrides.len()
        );
        Ok(config)
    }

    /// The base connection table with overrides merged in.
    pub fn connection_table(&self) -> IndexMap<String, ConnectionRecord> {
        let mut table = self.connections.clone();
        for (name, record) in &self.overrides {
            table.insert(name.clone(), record.clone());
        }
        table
    }
}
