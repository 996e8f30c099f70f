use crate::{
    error::{ModError, ModResult},
    library::{library_mod_root, ModRecord},
    order::PayloadHandler,
};
use filetime::{set_file_mtime, FileTime};
use serde::{Deserialize, Serialize};
use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicUsize, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use tokio::{sync::mpsc, task::JoinHandle};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StagingPolicy {
    #[default]
    Copy,
    Move,
}

impl StagingPolicy {
    pub fn label(self) -> &'static str {
        match self {
            StagingPolicy::Copy => "copy",
            StagingPolicy::Move => "move",
        }
    }
}

/// Coarse progress: one unit per whole-directory operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagingProgress {
    pub fraction: f32,
    pub completed_units: u32,
    pub total_units: u32,
}

impl StagingProgress {
    pub const TOTAL_UNITS: u32 = 1;

    pub fn started() -> Self {
        Self {
            fraction: 0.0,
            completed_units: 0,
            total_units: Self::TOTAL_UNITS,
        }
    }

    pub fn finished() -> Self {
        Self {
            fraction: 1.0,
            completed_units: Self::TOTAL_UNITS,
            total_units: Self::TOTAL_UNITS,
        }
    }
}

/// A running import. Progress arrives on `progress`; the join handle yields the staged path.
pub struct ImportTask {
    pub progress: mpsc::UnboundedReceiver<StagingProgress>,
    source: PathBuf,
    handle: JoinHandle<ModResult<PathBuf>>,
}

impl ImportTask {
    pub async fn wait(self) -> ModResult<PathBuf> {
        self.wait_with_progress(|_| {}).await
    }

    pub async fn wait_with_progress(
        mut self,
        mut on_progress: impl FnMut(StagingProgress),
    ) -> ModResult<PathBuf> {
        while let Some(progress) = self.progress.recv().await {
            on_progress(progress);
        }
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(ModError::StagingFailed {
                source_path: self.source,
                reason: format!("staging worker died: {err}"),
            }),
        }
    }
}

/// Relocates `source` into `dest_root/<basename>` on the blocking pool.
///
/// Must be called from inside a tokio runtime.
pub fn spawn_import(source: &Path, dest_root: &Path, policy: StagingPolicy) -> ImportTask {
    let (tx, rx) = mpsc::unbounded_channel();
    let source_path = source.to_path_buf();
    let dest_root = dest_root.to_path_buf();
    let worker_source = source_path.clone();
    let handle = tokio::task::spawn_blocking(move || {
        stage_dir(&worker_source, &dest_root, policy, &|progress| {
            let _ = tx.send(progress);
        })
    });
    ImportTask {
        progress: rx,
        source: source_path,
        handle,
    }
}

/// Synchronous core of [`spawn_import`].
pub fn stage_dir(
    source: &Path,
    dest_root: &Path,
    policy: StagingPolicy,
    progress: &dyn Fn(StagingProgress),
) -> ModResult<PathBuf> {
    progress(StagingProgress::started());
    let failed = |reason: String| {
        tracing::error!("staging {} failed: {reason}", source.display());
        ModError::StagingFailed {
            source_path: source.to_path_buf(),
            reason,
        }
    };

    if !source.is_dir() {
        return Err(failed("source is not a directory".to_string()));
    }
    let name = source
        .file_name()
        .ok_or_else(|| failed("source has no directory name".to_string()))?;
    let dest = dest_root.join(name);

    tracing::info!(
        "staging {} -> {} ({})",
        source.display(),
        dest.display(),
        policy.label()
    );
    let result = match policy {
        StagingPolicy::Copy => copy_into(source, &dest),
        StagingPolicy::Move => move_dir(source, &dest),
    };
    result.map_err(|err| failed(err.to_string()))?;

    progress(StagingProgress::finished());
    Ok(dest)
}

fn copy_into(source: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    let mut guard = PartialCopyGuard::new(dest.to_path_buf());
    copy_dir(source, dest)?;
    guard.disarm();
    Ok(())
}

/// Removes a half-written copy unless disarmed.
struct PartialCopyGuard {
    path: PathBuf,
    armed: bool,
}

impl PartialCopyGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PartialCopyGuard {
    fn drop(&mut self) {
        if self.armed {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

fn copy_dir(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|err| io::Error::new(io::ErrorKind::Other, err))?;
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            preserve_mtime(entry.path(), &target);
        }
    }
    Ok(())
}

fn preserve_mtime(source: &Path, dest: &Path) {
    let Ok(meta) = fs::metadata(source) else {
        return;
    };
    let Ok(modified) = meta.modified() else {
        return;
    };
    let Ok(duration) = modified.duration_since(UNIX_EPOCH) else {
        return;
    };
    let mtime = FileTime::from_unix_time(duration.as_secs() as i64, 0);
    let _ = set_file_mtime(dest, mtime);
}

/// Rename, falling back to copy + delete across filesystems.
pub fn move_dir(source: &Path, dest: &Path) -> io::Result<()> {
    if dest.exists() {
        fs::remove_dir_all(dest)?;
    }
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(err) => {
            tracing::debug!("rename failed ({err}); copying {}", source.display());
            copy_then_remove(source, dest, |path| fs::remove_dir_all(path))
        }
    }
}

/// Once `dest` holds a complete copy it is the payload, so a failed cleanup of
/// `source` is only reported.
fn copy_then_remove(
    source: &Path,
    dest: &Path,
    remove: impl FnOnce(&Path) -> io::Result<()>,
) -> io::Result<()> {
    copy_into(source, dest)?;
    if let Err(err) = remove(source) {
        tracing::warn!(
            "copied {} to {} but could not remove the original: {err}",
            source.display(),
            dest.display()
        );
    }
    Ok(())
}

fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(source, dest)?;
            preserve_mtime(source, dest);
            fs::remove_file(source)
        }
    }
}

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

fn unique_suffix() -> String {
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos}-{counter}")
}

/// Filesystem side of a mod's lifetime outside the import itself.
#[derive(Debug, Clone)]
pub struct Stager {
    pub store_root: PathBuf,
    pub temp_root: PathBuf,
    pub trash_root: PathBuf,
    pub game_mods_dir: PathBuf,
}

impl Stager {
    pub fn new(data_dir: &Path, game_mods_dir: &Path) -> Self {
        Self {
            store_root: library_mod_root(data_dir),
            temp_root: data_dir.join("tmp"),
            trash_root: data_dir.join("trash"),
            game_mods_dir: game_mods_dir.to_path_buf(),
        }
    }

    /// Fresh directory under `tmp/` to stage an import into.
    pub fn make_temp_dir(&self) -> ModResult<PathBuf> {
        let dir = self.temp_root.join(format!("import-{}", unique_suffix()));
        fs::create_dir_all(&dir).map_err(|err| ModError::StagingFailed {
            source_path: dir.clone(),
            reason: format!("create staging dir: {err}"),
        })?;
        Ok(dir)
    }

    /// Final location for a staged payload with the given base name.
    pub fn store_path(&self, label: &str) -> PathBuf {
        self.store_root.join(label)
    }

    /// Moves a staged payload into the store, trashing whatever sat there before.
    pub fn promote(&self, staged: &Path, label: &str) -> ModResult<PathBuf> {
        let dest = self.store_path(label);
        let failed = |reason: String| ModError::StagingFailed {
            source_path: staged.to_path_buf(),
            reason,
        };
        if dest.exists() {
            self.discard_dir(&dest)
                .map_err(|err| failed(format!("clear {}: {err}", dest.display())))?;
        }
        move_dir(staged, &dest).map_err(|err| failed(err.to_string()))?;
        if let Some(parent) = staged.parent() {
            let _ = fs::remove_dir(parent);
        }
        Ok(dest)
    }

    /// Undoes a staging that will not be kept.
    pub fn abandon(&self, staged: &Path, source: &Path, policy: StagingPolicy) {
        let result = match policy {
            StagingPolicy::Copy => fs::remove_dir_all(staged),
            StagingPolicy::Move => move_dir(staged, source),
        };
        if let Err(err) = result {
            tracing::warn!("could not undo staging of {}: {err}", source.display());
        }
        if let Some(parent) = staged.parent() {
            let _ = fs::remove_dir(parent);
        }
    }

    pub fn discard_dir(&self, dir: &Path) -> io::Result<PathBuf> {
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "payload".to_string());
        let dest = self.trash_root.join(format!("{name}-{}", unique_suffix()));
        move_dir(dir, &dest)?;
        tracing::debug!("moved {} to trash", dir.display());
        Ok(dest)
    }

    pub fn deployed_path(&self, record: &ModRecord) -> PathBuf {
        self.game_mods_dir.join(&record.archive)
    }

    pub fn is_deployed(&self, record: &ModRecord) -> bool {
        self.deployed_path(record).is_file()
    }

    /// Moves the record's archive into the game's Mods folder.
    pub fn deploy(&self, record: &ModRecord) -> ModResult<()> {
        let failed = |reason: String| ModError::DeployFailed {
            archive: record.archive.clone(),
            reason,
        };
        let deployed = self.deployed_path(record);
        let source = record
            .archive_path()
            .ok_or_else(|| failed("mod has no staged directory".to_string()))?;
        if !source.is_file() {
            if deployed.is_file() {
                return Ok(());
            }
            return Err(failed(format!("{} missing", source.display())));
        }
        move_file(&source, &deployed).map_err(|err| failed(err.to_string()))?;
        tracing::info!("deployed {} to {}", record.archive, self.game_mods_dir.display());
        Ok(())
    }
}

impl PayloadHandler for Stager {
    fn reverse(&mut self, record: &ModRecord) -> ModResult<()> {
        let deployed = self.deployed_path(record);
        if !deployed.is_file() {
            tracing::debug!("{} not deployed; nothing to reverse", record.archive);
            return Ok(());
        }
        let failed = |reason: String| {
            tracing::error!("reversal of {} failed: {reason}", record.archive);
            ModError::ReversalFailed {
                archive: record.archive.clone(),
                reason,
            }
        };
        let dest = record
            .archive_path()
            .ok_or_else(|| failed("mod has no staged directory".to_string()))?;
        move_file(&deployed, &dest).map_err(|err| failed(err.to_string()))?;
        tracing::info!("moved {} back out of the game folder", record.archive);
        Ok(())
    }

    fn discard(&mut self, record: &ModRecord) -> ModResult<()> {
        let Some(dir) = record.directory.as_ref().filter(|dir| dir.exists()) else {
            return Ok(());
        };
        if !dir.starts_with(&self.store_root) {
            tracing::warn!(
                "not trashing {}: outside managed store",
                dir.display()
            );
            return Ok(());
        }
        self.discard_dir(dir)
            .map(|_| ())
            .map_err(|err| ModError::StagingFailed {
                source_path: dir.clone(),
                reason: format!("move to trash: {err}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::test_record;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn payload(root: &Path, name: &str) -> PathBuf {
        let dir = root.join(name);
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("info.json"), "{}").unwrap();
        fs::write(dir.join(format!("{name}.pak")), b"LSPK").unwrap();
        fs::write(dir.join("nested").join("notes.txt"), "n").unwrap();
        dir
    }

    #[test]
    fn copy_keeps_source_and_reports_bounds() {
        let temp = TempDir::new().unwrap();
        let source = payload(temp.path(), "Camp");
        let seen = Mutex::new(Vec::new());
        let dest = stage_dir(
            &source,
            &temp.path().join("store"),
            StagingPolicy::Copy,
            &|progress| seen.lock().unwrap().push(progress.fraction),
        )
        .unwrap();

        assert_eq!(dest, temp.path().join("store").join("Camp"));
        assert!(dest.join("nested").join("notes.txt").is_file());
        assert!(source.join("Camp.pak").is_file());
        assert_eq!(*seen.lock().unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn move_removes_source() {
        let temp = TempDir::new().unwrap();
        let source = payload(temp.path(), "Camp");
        let dest = stage_dir(&source, &temp.path().join("store"), StagingPolicy::Move, &|_| {})
            .unwrap();
        assert!(!source.exists());
        assert!(dest.join("Camp.pak").is_file());
    }

    #[test]
    fn missing_source_fails_without_finishing() {
        let temp = TempDir::new().unwrap();
        let seen = Mutex::new(Vec::new());
        let err = stage_dir(
            &temp.path().join("nope"),
            temp.path(),
            StagingPolicy::Copy,
            &|progress| seen.lock().unwrap().push(progress.fraction),
        )
        .unwrap_err();
        assert!(matches!(err, ModError::StagingFailed { .. }));
        assert_eq!(*seen.lock().unwrap(), vec![0.0]);
    }

    #[tokio::test]
    async fn spawned_import_streams_progress() {
        let temp = TempDir::new().unwrap();
        let source = payload(temp.path(), "Camp");
        let task = spawn_import(&source, &temp.path().join("store"), StagingPolicy::Copy);
        let mut seen = Vec::new();
        let dest = task
            .wait_with_progress(|progress| seen.push(progress))
            .await
            .unwrap();
        assert!(dest.is_dir());
        assert_eq!(seen.first().map(|p| p.fraction), Some(0.0));
        assert_eq!(seen.last().map(|p| p.fraction), Some(1.0));
        assert!(seen.windows(2).all(|pair| pair[0].fraction <= pair[1].fraction));
        assert!(seen.iter().all(|p| p.total_units == 1));
    }

    fn staged_record(stager: &Stager, name: &str) -> ModRecord {
        let dir = payload(&stager.store_root, name);
        let mut record = test_record(name, 0, true);
        record.archive = format!("{name}.pak");
        record.directory = Some(dir);
        record
    }

    #[test]
    fn failed_source_cleanup_keeps_the_copy() {
        let temp = TempDir::new().unwrap();
        let source = payload(temp.path(), "Camp");
        let dest = temp.path().join("store").join("Camp");
        copy_then_remove(&source, &dest, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))
        })
        .unwrap();
        assert!(dest.join("Camp.pak").is_file());
        assert!(dest.join("nested").join("notes.txt").is_file());
    }

    #[test]
    fn copy_then_remove_consumes_the_source() {
        let temp = TempDir::new().unwrap();
        let source = payload(temp.path(), "Camp");
        let dest = temp.path().join("store").join("Camp");
        copy_then_remove(&source, &dest, |path| fs::remove_dir_all(path)).unwrap();
        assert!(!source.exists());
        assert!(dest.join("Camp.pak").is_file());
    }

    #[test]
    fn deploy_and_reverse_move_the_archive() {
        let temp = TempDir::new().unwrap();
        let mut stager = Stager::new(temp.path(), &temp.path().join("game").join("Mods"));
        let record = staged_record(&stager, "Camp");

        stager.deploy(&record).unwrap();
        assert!(stager.is_deployed(&record));
        assert!(!record.archive_path().unwrap().exists());

        stager.reverse(&record).unwrap();
        assert!(!stager.is_deployed(&record));
        assert!(record.archive_path().unwrap().is_file());

        // Nothing deployed: reversal is a no-op.
        stager.reverse(&record).unwrap();
    }

    #[test]
    fn discard_moves_payload_to_trash() {
        let temp = TempDir::new().unwrap();
        let mut stager = Stager::new(temp.path(), &temp.path().join("Mods"));
        let record = staged_record(&stager, "Camp");
        stager.discard(&record).unwrap();
        assert!(!record.directory.as_ref().unwrap().exists());
        assert_eq!(fs::read_dir(&stager.trash_root).unwrap().count(), 1);
    }

    #[test]
    fn discard_ignores_paths_outside_store() {
        let temp = TempDir::new().unwrap();
        let mut stager = Stager::new(&temp.path().join("data"), &temp.path().join("Mods"));
        let mut record = test_record("Camp", 0, false);
        let outside = payload(temp.path(), "Camp");
        record.directory = Some(outside.clone());
        stager.discard(&record).unwrap();
        assert!(outside.exists());
    }

    #[test]
    fn abandon_returns_moved_payload() {
        let temp = TempDir::new().unwrap();
        let stager = Stager::new(temp.path(), &temp.path().join("Mods"));
        let source = payload(temp.path(), "Camp");
        let staging = stager.make_temp_dir().unwrap();
        let staged = stage_dir(&source, &staging, StagingPolicy::Move, &|_| {}).unwrap();
        assert!(!source.exists());

        stager.abandon(&staged, &source, StagingPolicy::Move);
        assert!(source.join("Camp.pak").is_file());
        assert!(!staging.exists());
    }

    #[test]
    fn promote_replaces_existing_store_entry() {
        let temp = TempDir::new().unwrap();
        let stager = Stager::new(temp.path(), &temp.path().join("Mods"));
        payload(&stager.store_root, "Camp");
        let source = payload(&temp.path().join("incoming"), "Camp");
        fs::write(source.join("fresh.txt"), "new").unwrap();
        let staging = stager.make_temp_dir().unwrap();
        let staged = stage_dir(&source, &staging, StagingPolicy::Copy, &|_| {}).unwrap();

        let dest = stager.promote(&staged, "Camp").unwrap();
        assert_eq!(dest, stager.store_path("Camp"));
        assert!(dest.join("fresh.txt").is_file());
        assert_eq!(fs::read_dir(&stager.trash_root).unwrap().count(), 1);
    }
}
