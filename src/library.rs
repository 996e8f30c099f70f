use crate::{
    error::{ModError, ModResult},
    order,
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

const LIBRARY_FILE: &str = "library.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModRecord {
    pub uuid: String,
    pub md5: String,
    pub name: String,
    pub folder: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub created: Option<String>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub entries: Vec<String>,
    pub archive: String,
    #[serde(default)]
    pub directory: Option<PathBuf>,
    #[serde(default)]
    pub source_label: Option<String>,
    #[serde(default)]
    pub added_at: i64,
    pub enabled: bool,
    pub order: i64,
}

impl ModRecord {
    pub fn display_name(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.folder
        } else {
            &self.name
        }
    }

    pub fn archive_path(&self) -> Option<PathBuf> {
        self.directory.as_ref().map(|dir| dir.join(&self.archive))
    }
}

/// Key-indexed record storage with a transactional save.
///
/// Implementors only expose the backing vector; lookup helpers are shared.
pub trait RecordStore {
    fn records(&self) -> &[ModRecord];
    fn records_mut(&mut self) -> &mut Vec<ModRecord>;
    fn save(&mut self) -> ModResult<()>;

    /// Records matching `predicate`, ascending by `order`.
    fn fetch(&self, predicate: &dyn Fn(&ModRecord) -> bool) -> Vec<&ModRecord> {
        let mut out: Vec<&ModRecord> = self
            .records()
            .iter()
            .filter(|record| predicate(record))
            .collect();
        out.sort_by_key(|record| record.order);
        out
    }

    fn find(&self, uuid: &str) -> Option<&ModRecord> {
        self.records().iter().find(|record| record.uuid == uuid)
    }

    fn find_mut(&mut self, uuid: &str) -> Option<&mut ModRecord> {
        self.records_mut()
            .iter_mut()
            .find(|record| record.uuid == uuid)
    }

    fn insert(&mut self, record: ModRecord) {
        self.records_mut().push(record);
    }

    fn delete(&mut self, uuid: &str) -> Option<ModRecord> {
        let records = self.records_mut();
        let index = records.iter().position(|record| record.uuid == uuid)?;
        Some(records.remove(index))
    }
}

/// JSON-backed store living at `<data>/library.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Library {
    pub mods: Vec<ModRecord>,
    #[serde(skip)]
    path: PathBuf,
}

impl Library {
    pub fn load_or_create(data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir).context("create data dir")?;
        let path = data_dir.join(LIBRARY_FILE);
        if path.exists() {
            let raw = fs::read_to_string(&path).context("read library.json")?;
            let mut library: Library = serde_json::from_str(&raw).context("parse library.json")?;
            library.path = path;
            if order::renumber(&mut library.mods) {
                tracing::warn!("library.json had a broken load order; renumbered");
                library.save().context("save repaired library")?;
            }
            return Ok(library);
        }

        let mut library = Library {
            mods: Vec::new(),
            path,
        };
        library.save().context("create library.json")?;
        Ok(library)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordStore for Library {
    fn records(&self) -> &[ModRecord] {
        &self.mods
    }

    fn records_mut(&mut self) -> &mut Vec<ModRecord> {
        &mut self.mods
    }

    fn save(&mut self) -> ModResult<()> {
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| ModError::PersistFailed(format!("serialize library: {err}")))?;
        let temp = self.path.with_extension("json.tmp");
        fs::write(&temp, raw)
            .map_err(|err| ModError::PersistFailed(format!("write {}: {err}", temp.display())))?;
        fs::rename(&temp, &self.path).map_err(|err| {
            ModError::PersistFailed(format!("finalize {}: {err}", self.path.display()))
        })?;
        Ok(())
    }
}

/// Volatile store for dry runs and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    pub mods: Vec<ModRecord>,
    pub saves: usize,
}

impl MemoryStore {
    pub fn new(mods: Vec<ModRecord>) -> Self {
        Self { mods, saves: 0 }
    }
}

impl RecordStore for MemoryStore {
    fn records(&self) -> &[ModRecord] {
        &self.mods
    }

    fn records_mut(&mut self) -> &mut Vec<ModRecord> {
        &mut self.mods
    }

    fn save(&mut self) -> ModResult<()> {
        self.saves += 1;
        Ok(())
    }
}

pub fn library_mod_root(data_dir: &Path) -> PathBuf {
    data_dir.join("mods")
}

#[cfg(test)]
pub(crate) fn test_record(uuid: &str, order: i64, enabled: bool) -> ModRecord {
    ModRecord {
        uuid: uuid.to_string(),
        md5: format!("md5-{uuid}"),
        name: uuid.to_string(),
        folder: format!("{uuid}_folder"),
        author: None,
        description: None,
        created: None,
        group: None,
        version: None,
        entries: vec!["info.json".to_string(), format!("{uuid}.pak")],
        archive: format!("{uuid}.pak"),
        directory: None,
        source_label: None,
        added_at: 0,
        enabled,
        order,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn fetch_sorts_by_order() {
        let store = MemoryStore::new(vec![
            test_record("c", 2, false),
            test_record("a", 0, true),
            test_record("b", 1, true),
        ]);
        let enabled: Vec<&str> = store
            .fetch(&|record| record.enabled)
            .iter()
            .map(|record| record.uuid.as_str())
            .collect();
        assert_eq!(enabled, vec!["a", "b"]);
    }

    #[test]
    fn library_round_trips_through_disk() {
        let temp = TempDir::new().unwrap();
        let mut library = Library::load_or_create(temp.path()).unwrap();
        library.insert(test_record("a", 0, true));
        library.save().unwrap();

        let reloaded = Library::load_or_create(temp.path()).unwrap();
        assert_eq!(reloaded.mods, library.mods);
        assert!(!temp.path().join("library.json.tmp").exists());
    }

    #[test]
    fn load_repairs_gapped_orders() {
        let temp = TempDir::new().unwrap();
        let raw = serde_json::json!({
            "mods": [test_record("b", 7, false), test_record("a", 3, true)]
        });
        fs::write(temp.path().join("library.json"), raw.to_string()).unwrap();

        let library = Library::load_or_create(temp.path()).unwrap();
        let orders: Vec<(&str, i64)> = library
            .mods
            .iter()
            .map(|record| (record.uuid.as_str(), record.order))
            .collect();
        assert_eq!(orders, vec![("a", 0), ("b", 1)]);
    }

    #[test]
    fn delete_returns_removed_record() {
        let mut store = MemoryStore::new(vec![test_record("a", 0, true)]);
        assert_eq!(store.delete("a").map(|record| record.uuid), Some("a".into()));
        assert!(store.delete("a").is_none());
    }
}
