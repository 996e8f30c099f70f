use crate::{
    error::{ModError, ModResult},
    library::ModRecord,
};
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

pub const MANIFEST_NAME: &str = "info.json";
pub const ARCHIVE_EXTENSION: &str = ".pak";

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(rename = "Mods", alias = "mods", alias = "MODS")]
    mods: Vec<ManifestMod>,
    #[serde(rename = "MD5", alias = "md5", alias = "Md5", default)]
    md5: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ManifestMod {
    #[serde(rename = "UUID", alias = "uuid", alias = "Uuid", default)]
    uuid: Option<String>,
    #[serde(rename = "Name", alias = "name", alias = "NAME", default)]
    name: Option<String>,
    #[serde(rename = "Folder", alias = "folder", alias = "FOLDER", default)]
    folder: Option<String>,
    #[serde(rename = "MD5", alias = "md5", alias = "Md5", default)]
    md5: Option<String>,
    #[serde(rename = "Author", alias = "author", default)]
    author: Option<String>,
    #[serde(rename = "Description", alias = "description", default)]
    description: Option<String>,
    #[serde(rename = "Created", alias = "created", default)]
    created: Option<String>,
    #[serde(rename = "Group", alias = "group", default)]
    group: Option<String>,
    #[serde(rename = "Version", alias = "version", default)]
    version: Option<Scalar>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Number(serde_json::Number),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(value) => value,
            Scalar::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestData {
    pub uuid: String,
    pub name: String,
    pub folder: String,
    pub md5: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub created: Option<String>,
    pub group: Option<String>,
    pub version: Option<String>,
}

/// A mod directory that passed inspection and is ready to stage.
#[derive(Debug, Clone)]
pub struct ModPackage {
    pub root: PathBuf,
    pub manifest: ManifestData,
    pub archive: String,
    pub entries: Vec<String>,
}

impl ModPackage {
    pub fn label(&self) -> String {
        self.root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.manifest.folder.clone())
    }

    pub fn into_record(self, order: i64, directory: PathBuf, added_at: i64) -> ModRecord {
        let source_label = Some(self.label());
        let ManifestData {
            uuid,
            name,
            folder,
            md5,
            author,
            description,
            created,
            group,
            version,
        } = self.manifest;
        ModRecord {
            uuid,
            md5,
            name,
            folder,
            author,
            description,
            created,
            group,
            version,
            entries: self.entries,
            archive: self.archive,
            directory: Some(directory),
            source_label,
            added_at,
            enabled: false,
            order,
        }
    }
}

/// Inspects a directory believed to be a mod: manifest plus a single `.pak`.
pub fn read_package(root: &Path) -> ModResult<ModPackage> {
    let entries = top_level_entries(root);
    let manifest_path =
        find_manifest(root, &entries).ok_or_else(|| ModError::ManifestNotFound(root.into()))?;
    let bytes = fs::read(&manifest_path).map_err(|err| ModError::ManifestMalformed {
        path: manifest_path.clone(),
        reason: err.to_string(),
    })?;
    let manifest = parse_manifest(&bytes, &manifest_path)?;
    let archive = find_archive(root, &entries).ok_or_else(|| {
        tracing::warn!("no {ARCHIVE_EXTENSION} archive in {}", root.display());
        ModError::ArchiveNotFound(root.into())
    })?;

    tracing::debug!(uuid = %manifest.uuid, archive = %archive, "read mod package {}", root.display());
    Ok(ModPackage {
        root: root.to_path_buf(),
        manifest,
        archive,
        entries,
    })
}

pub fn parse_manifest(bytes: &[u8], path: &Path) -> ModResult<ManifestData> {
    let file: ManifestFile =
        serde_json::from_slice(bytes).map_err(|err| ModError::ManifestMalformed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    let top_md5 = file.md5;
    let entry = file
        .mods
        .into_iter()
        .next()
        .ok_or_else(|| ModError::ManifestMalformed {
            path: path.to_path_buf(),
            reason: "\"Mods\" list is empty".to_string(),
        })?;

    let missing = |field: &'static str| {
        tracing::warn!("{} lacks {field}; import skipped", path.display());
        ModError::MissingField {
            path: path.to_path_buf(),
            field,
        }
    };

    Ok(ManifestData {
        name: non_empty(entry.name).ok_or_else(|| missing("Name"))?,
        folder: non_empty(entry.folder).ok_or_else(|| missing("Folder"))?,
        uuid: non_empty(entry.uuid).ok_or_else(|| missing("UUID"))?,
        md5: entry.md5.or(top_md5).ok_or_else(|| missing("MD5"))?,
        author: non_empty(entry.author),
        description: non_empty(entry.description),
        created: non_empty(entry.created),
        group: non_empty(entry.group),
        version: non_empty(entry.version.map(Scalar::into_string)),
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn top_level_entries(root: &Path) -> Vec<String> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .collect()
}

fn find_manifest(root: &Path, entries: &[String]) -> Option<PathBuf> {
    entries
        .iter()
        .find(|name| name.eq_ignore_ascii_case(MANIFEST_NAME))
        .map(|name| root.join(name))
        .filter(|path| path.is_file())
}

fn find_archive(root: &Path, entries: &[String]) -> Option<String> {
    entries
        .iter()
        .find(|name| {
            name.to_ascii_lowercase().ends_with(ARCHIVE_EXTENSION) && root.join(name).is_file()
        })
        .cloned()
}
