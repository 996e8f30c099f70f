use crate::{bg3, staging::StagingPolicy};
use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

const CONFIG_FILE: &str = "config.json";
pub const TEMPLATE_FILE: &str = "modsettings.template.lsx";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Larian user data dir; empty means auto-detect.
    #[serde(default)]
    pub larian_dir: PathBuf,
    #[serde(default)]
    pub staging_policy: StagingPolicy,
    #[serde(default = "default_true")]
    pub backup_before_sync: bool,
    #[serde(default = "default_true")]
    pub confirm_mod_delete: bool,
    #[serde(default)]
    pub debug_logging: bool,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl AppConfig {
    pub fn load_or_create() -> Result<Self> {
        Self::load_or_create_in(&base_data_dir()?)
    }

    pub fn load_or_create_in(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create app data dir")?;
        let path = data_dir.join(CONFIG_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read app config")?;
            let mut config: AppConfig = serde_json::from_str(&raw).context("parse app config")?;
            config.data_dir = data_dir.to_path_buf();
            return Ok(config);
        }

        let config = AppConfig {
            larian_dir: PathBuf::new(),
            staging_policy: StagingPolicy::default(),
            backup_before_sync: true,
            confirm_mod_delete: true,
            debug_logging: false,
            data_dir: data_dir.to_path_buf(),
        };
        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.data_dir).context("create app data dir")?;
        let path = self.data_dir.join(CONFIG_FILE);
        let raw = serde_json::to_string_pretty(self).context("serialize app config")?;
        fs::write(path, raw).context("write app config")?;
        Ok(())
    }

    pub fn game_paths(&self) -> Result<bg3::GamePaths> {
        bg3::detect_paths(Some(&self.larian_dir))
    }

    pub fn template_path(&self) -> PathBuf {
        self.data_dir.join(TEMPLATE_FILE)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

fn default_true() -> bool {
    true
}

fn base_data_dir() -> Result<PathBuf> {
    let base = BaseDirs::new().context("resolve home dir")?;
    Ok(base.data_local_dir().join("modkeeper"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_defaults_then_reloads_edits() {
        let temp = TempDir::new().unwrap();
        let mut config = AppConfig::load_or_create_in(temp.path()).unwrap();
        assert_eq!(config.staging_policy, StagingPolicy::Copy);
        assert!(config.backup_before_sync);
        assert!(temp.path().join(CONFIG_FILE).is_file());

        config.staging_policy = StagingPolicy::Move;
        config.save().unwrap();
        let reloaded = AppConfig::load_or_create_in(temp.path()).unwrap();
        assert_eq!(reloaded.staging_policy, StagingPolicy::Move);
        assert_eq!(reloaded.data_dir, temp.path());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(CONFIG_FILE), r#"{"staging_policy":"move"}"#).unwrap();
        let config = AppConfig::load_or_create_in(temp.path()).unwrap();
        assert_eq!(config.staging_policy, StagingPolicy::Move);
        assert!(config.confirm_mod_delete);
        assert!(config.larian_dir.as_os_str().is_empty());
    }
}
