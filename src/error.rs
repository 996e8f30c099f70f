use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModError {
    #[error("unable to locate info.json in {0}")]
    ManifestNotFound(PathBuf),

    #[error("malformed manifest {path}: {reason}")]
    ManifestMalformed { path: PathBuf, reason: String },

    #[error("manifest {path} is missing required field {field}")]
    MissingField { path: PathBuf, field: &'static str },

    #[error("no .pak archive found in {0}")]
    ArchiveNotFound(PathBuf),

    #[error("could not replace existing mod {uuid}: {reason}")]
    ReplaceFailed { uuid: String, reason: String },

    #[error("settings template {path} unreadable: {reason}")]
    TemplateUnreadable { path: PathBuf, reason: String },

    #[error("staging {source_path} failed: {reason}")]
    StagingFailed { source_path: PathBuf, reason: String },

    #[error("moving {archive} back out of the game folder failed: {reason}")]
    ReversalFailed { archive: String, reason: String },

    #[error("deploying {archive} failed: {reason}")]
    DeployFailed { archive: String, reason: String },

    #[error("saving the mod library failed: {0}")]
    PersistFailed(String),

    #[error("no mod with uuid {0}")]
    RecordNotFound(String),

    #[error("position {index} out of range (have {len} mods)")]
    InvalidPosition { index: usize, len: usize },
}

impl ModError {
    /// Conditions the user can fix and retry, surfaced as a transient notice.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ModError::ManifestNotFound(_)
                | ModError::ManifestMalformed { .. }
                | ModError::MissingField { .. }
                | ModError::ArchiveNotFound(_)
                | ModError::ReplaceFailed { .. }
                | ModError::InvalidPosition { .. }
                | ModError::RecordNotFound(_)
        )
    }
}

pub type ModResult<T> = std::result::Result<T, ModError>;
