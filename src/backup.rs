use crate::library::ModRecord;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use time::{macros::format_description, OffsetDateTime};

#[derive(Debug, Serialize, Deserialize)]
pub struct BackupMeta {
    pub timestamp: i64,
    pub reason: Option<String>,
    pub mod_count: usize,
    pub enabled_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct LastBackup {
    path: PathBuf,
    timestamp: i64,
}

/// Snapshots the live settings file and the record set before either is replaced.
pub fn create_backup(
    backup_root: &Path,
    records: &[ModRecord],
    modsettings_path: &Path,
    reason: Option<&str>,
) -> Result<PathBuf> {
    let now = OffsetDateTime::now_utc();
    let label = now
        .format(format_description!(
            "[year][month][day]-[hour][minute][second]"
        ))
        .context("format backup stamp")?;
    fs::create_dir_all(backup_root).context("create backups dir")?;
    let mut backup_dir = backup_root.join(format!("backup-{label}"));
    let mut suffix = 1;
    while backup_dir.exists() {
        backup_dir = backup_root.join(format!("backup-{label}-{suffix}"));
        suffix += 1;
    }
    fs::create_dir_all(&backup_dir).context("create backup dir")?;

    let library_json = serde_json::to_string_pretty(records).context("serialize records")?;
    fs::write(backup_dir.join("library.json"), library_json).context("write library backup")?;

    if modsettings_path.exists() {
        fs::copy(modsettings_path, backup_dir.join("modsettings.lsx"))
            .context("copy modsettings backup")?;
    }

    let meta = BackupMeta {
        timestamp: now.unix_timestamp(),
        reason: reason.map(|value| value.to_string()),
        mod_count: records.len(),
        enabled_count: records.iter().filter(|record| record.enabled).count(),
    };
    let meta_json = serde_json::to_string_pretty(&meta).context("serialize backup meta")?;
    fs::write(backup_dir.join("meta.json"), meta_json).context("write backup meta")?;

    let last = LastBackup {
        path: backup_dir.clone(),
        timestamp: meta.timestamp,
    };
    let last_json = serde_json::to_string_pretty(&last).context("serialize last backup")?;
    fs::write(backup_root.join("last.json"), last_json).context("write last backup")?;

    tracing::info!("backup written to {}", backup_dir.display());
    Ok(backup_dir)
}

pub fn load_last_backup(backup_root: &Path) -> Result<Option<PathBuf>> {
    let path = backup_root.join("last.json");
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(&path).context("read last backup")?;
    let last: LastBackup = serde_json::from_str(&raw).context("parse last backup")?;
    if last.path.exists() {
        Ok(Some(last.path))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::test_record;
    use tempfile::TempDir;

    #[test]
    fn backup_captures_settings_and_records() {
        let temp = TempDir::new().unwrap();
        let live = temp.path().join("modsettings.lsx");
        fs::write(&live, "<save/>").unwrap();
        let root = temp.path().join("backups");
        let records = vec![test_record("A", 0, true), test_record("B", 1, false)];

        let first = create_backup(&root, &records, &live, Some("sync")).unwrap();
        let second = create_backup(&root, &records, &live, None).unwrap();
        assert_ne!(first, second);
        assert_eq!(
            fs::read_to_string(first.join("modsettings.lsx")).unwrap(),
            "<save/>"
        );
        let meta: BackupMeta =
            serde_json::from_str(&fs::read_to_string(first.join("meta.json")).unwrap()).unwrap();
        assert_eq!(meta.enabled_count, 1);
        assert_eq!(load_last_backup(&root).unwrap(), Some(second));
    }

    #[test]
    fn no_backup_yet() {
        let temp = TempDir::new().unwrap();
        assert_eq!(load_last_backup(temp.path()).unwrap(), None);
    }
}
