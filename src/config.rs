use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::GroupMode;
use crate::error::GenomeError;
use crate::source::SourceSettings;

pub const CONFIG_FILE_NAME: &str = "grnh.json";

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    #[serde(default)]
    pub group_mode: Option<GroupMode>,
    #[serde(default)]
    pub legacy_fixup: Option<bool>,
    #[serde(default)]
    pub simulation_key: Option<String>,
    #[serde(default)]
    pub pretty: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub group_mode: GroupMode,
    pub legacy_fixup: bool,
    pub simulation_key: Option<String>,
    pub pretty: bool,
    /// File the values came from; `None` when everything is defaulted.
    pub origin: Option<Utf8PathBuf>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            schema_version: 1,
            group_mode: GroupMode::default(),
            legacy_fixup: true,
            simulation_key: None,
            pretty: true,
            origin: None,
        }
    }
}

impl ResolvedConfig {
    pub fn source_settings(&self) -> SourceSettings {
        SourceSettings {
            group_mode: self.group_mode,
            sim_key: self.simulation_key.clone(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// An explicit path must exist. Without one, `grnh.json` in the working
    /// directory is tried, then the per-user config directory, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, GenomeError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::default_candidates().into_iter().find(|candidate| candidate.exists()),
        };
        let Some(config_path) = config_path else {
            debug!("no config file found, using defaults");
            return Ok(ResolvedConfig::default());
        };

        let content = fs::read_to_string(&config_path)
            .map_err(|_| GenomeError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| GenomeError::ConfigParse(err.to_string()))?;

        let mut resolved = Self::resolve_config(config)?;
        resolved.origin = Utf8PathBuf::from_path_buf(config_path).ok();
        debug!(origin = ?resolved.origin, "config loaded");
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, GenomeError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(GenomeError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }
        let simulation_key = config
            .simulation_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());

        Ok(ResolvedConfig {
            schema_version,
            group_mode: config.group_mode.unwrap_or_default(),
            legacy_fixup: config.legacy_fixup.unwrap_or(true),
            simulation_key,
            pretty: config.pretty.unwrap_or(true),
            origin: None,
        })
    }

    fn default_candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(dirs) = BaseDirs::new() {
            candidates.push(dirs.config_dir().join("grn-hierarchy").join(CONFIG_FILE_NAME));
        }
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_takes_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved, ResolvedConfig::default());
        assert_eq!(resolved.group_mode, GroupMode::MainGroupAsFallback);
    }

    #[test]
    fn blank_simulation_key_is_dropped() {
        let config = Config {
            simulation_key: Some("  ".to_string()),
            ..Config::default()
        };
        let resolved = ConfigLoader::resolve_config(config).unwrap();
        assert_eq!(resolved.simulation_key, None);
    }
}
