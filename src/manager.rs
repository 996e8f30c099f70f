use crate::{
    backup,
    bg3::GamePaths,
    config::AppConfig,
    error::{ModError, ModResult},
    identity::{self, ImportOutcome},
    library::{Library, ModRecord, RecordStore},
    manifest, modsettings,
    order::{self, PayloadHandler},
    staging::{self, Stager, StagingPolicy, StagingProgress},
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

/// Everything the manager needs to know about the filesystem, resolved up front.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub data_dir: PathBuf,
    pub game_mods_dir: PathBuf,
    pub live_settings_path: PathBuf,
    pub template_path: PathBuf,
    pub staging_policy: StagingPolicy,
    pub backup_before_sync: bool,
}

impl ManagerSettings {
    pub fn new(config: &AppConfig, paths: &GamePaths) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            game_mods_dir: paths.larian_mods_dir.clone(),
            live_settings_path: paths.modsettings_path.clone(),
            template_path: config.template_path(),
            staging_policy: config.staging_policy,
            backup_before_sync: config.backup_before_sync,
        }
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }
}

#[derive(Debug, Clone)]
pub struct ImportReport {
    pub outcome: ImportOutcome,
    pub uuid: String,
    pub name: String,
    pub order: i64,
    pub directory: PathBuf,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub path: PathBuf,
    pub enabled: usize,
    pub backup: Option<PathBuf>,
}

/// Owns the record store and runs every operation that touches it, one at a time.
pub struct ModManager<S: RecordStore = Library> {
    store: S,
    stager: Stager,
    settings: ManagerSettings,
}

impl ModManager<Library> {
    pub fn open(config: &AppConfig) -> Result<Self> {
        let paths = config.game_paths()?;
        let settings = ManagerSettings::new(config, &paths);
        let library = Library::load_or_create(&config.data_dir)?;
        modsettings::seed_template(&settings.template_path, &settings.live_settings_path)?;
        Ok(Self::new(library, settings))
    }
}

impl<S: RecordStore> ModManager<S> {
    pub fn new(store: S, settings: ManagerSettings) -> Self {
        let stager = Stager::new(&settings.data_dir, &settings.game_mods_dir);
        Self {
            store,
            stager,
            settings,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// All records in load order.
    pub fn mods(&self) -> Vec<ModRecord> {
        order::ordered(&self.store)
    }

    pub fn is_deployed(&self, record: &ModRecord) -> bool {
        self.stager.is_deployed(record)
    }

    /// Imports one mod directory, replacing an existing mod with the same UUID.
    pub async fn import(
        &mut self,
        source: &Path,
        mut on_progress: impl FnMut(StagingProgress),
    ) -> ModResult<ImportReport> {
        let package = manifest::read_package(source).map_err(|err| {
            tracing::warn!("import of {} skipped: {err}", source.display());
            err
        })?;
        let uuid = package.manifest.uuid.clone();
        let resolution = identity::resolve(self.store.records(), &uuid);
        let policy = self.settings.staging_policy;

        let staging_root = self.stager.make_temp_dir()?;
        let staged = staging::spawn_import(source, &staging_root, policy)
            .wait_with_progress(&mut on_progress)
            .await;
        let staged = match staged {
            Ok(staged) => staged,
            Err(err) => {
                let _ = std::fs::remove_dir_all(&staging_root);
                return Err(err);
            }
        };

        let was_enabled = resolution.previous().is_some_and(|previous| previous.enabled);
        if let Some(previous) = resolution.previous() {
            if let Err(err) = self.retire(previous) {
                self.stager.abandon(&staged, source, policy);
                return Err(ModError::ReplaceFailed {
                    uuid,
                    reason: err.to_string(),
                });
            }
        }

        let label = self.store_label(&package.label(), &uuid);
        let directory = match self.stager.promote(&staged, &label) {
            Ok(directory) => directory,
            Err(err) => {
                self.stager.abandon(&staged, source, policy);
                return Err(err);
            }
        };

        let name = package.manifest.name.clone();
        let record = package.into_record(resolution.order(), directory.clone(), now());
        let outcome = identity::upsert(&mut self.store, record, &resolution)?;

        let mut enabled = false;
        if was_enabled {
            match self.enable_uuid(&uuid, true) {
                Ok(_) => enabled = true,
                Err(err) => tracing::warn!("{name} was replaced but could not be re-enabled: {err}"),
            }
        }

        let order = self
            .store
            .find(&uuid)
            .map(|record| record.order)
            .unwrap_or_else(|| resolution.order());
        tracing::info!(%uuid, order, "{} {name}", outcome.label());
        Ok(ImportReport {
            outcome,
            uuid,
            name,
            order,
            directory,
            enabled,
        })
    }

    /// Takes an about-to-be-replaced mod out of play and out of the store directory.
    ///
    /// On failure the previous mod is left deployed and enabled as it was.
    fn retire(&mut self, previous: &ModRecord) -> ModResult<()> {
        if previous.enabled {
            self.stager.reverse(previous)?;
        }
        if let Err(err) = self.stager.discard(previous) {
            if previous.enabled {
                if let Err(redeploy) = self.stager.deploy(previous) {
                    tracing::error!(
                        "{} could not be redeployed after a failed replace: {redeploy}",
                        previous.display_name()
                    );
                }
            }
            return Err(err);
        }
        if previous.enabled {
            if let Err(err) = order::set_enabled(&mut self.store, &previous.uuid, false) {
                tracing::warn!("{} disabled in memory only: {err}", previous.display_name());
            }
        }
        Ok(())
    }

    /// Store directory name for `uuid`. Another mod's directory is never reused.
    fn store_label(&self, label: &str, uuid: &str) -> String {
        let owned_by_other = |candidate: &str| {
            let path = self.stager.store_path(candidate);
            self.store.records().iter().any(|record| {
                record.uuid != uuid && record.directory.as_deref() == Some(path.as_path())
            })
        };
        if !owned_by_other(label) {
            return label.to_string();
        }
        let unique = (2..)
            .map(|n| format!("{label}-{n}"))
            .find(|candidate| {
                !owned_by_other(candidate) && !self.stager.store_path(candidate).exists()
            })
            .unwrap_or_else(|| format!("{label}-{uuid}"));
        tracing::info!("{label} is taken by another mod; storing {uuid} as {unique}");
        unique
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) -> ModResult<bool> {
        let uuid = order::uuid_at(&self.store, index)?;
        self.enable_uuid(&uuid, enabled)
    }

    fn enable_uuid(&mut self, uuid: &str, enabled: bool) -> ModResult<bool> {
        let record = self
            .store
            .find(uuid)
            .cloned()
            .ok_or_else(|| ModError::RecordNotFound(uuid.to_string()))?;
        if enabled {
            self.stager.deploy(&record)?;
        } else {
            self.stager.reverse(&record)?;
        }
        order::set_enabled(&mut self.store, uuid, enabled)
    }

    pub fn set_staging_policy(&mut self, policy: StagingPolicy) {
        self.settings.staging_policy = policy;
    }

    pub fn move_mod(&mut self, from: usize, to: usize) -> ModResult<()> {
        order::move_record(&mut self.store, from, to)
    }

    pub fn move_up(&mut self, index: usize) -> ModResult<()> {
        order::move_up(&mut self.store, index)
    }

    pub fn move_down(&mut self, index: usize) -> ModResult<()> {
        order::move_down(&mut self.store, index)
    }

    /// Deletes by position; returns the removed record and the position to select next.
    pub fn delete(&mut self, index: usize) -> ModResult<(ModRecord, Option<usize>)> {
        order::delete_at(&mut self.store, index, &mut self.stager)
    }

    /// Regenerates the live settings file from the template and the enabled mods.
    pub fn sync(&mut self) -> Result<SyncReport> {
        let template = modsettings::read_template(&self.settings.template_path)?;
        let mods = order::enabled_in_order(&self.store);
        let xml = modsettings::synthesize(&template, &mods).context("render modsettings")?;
        let backup = self.replace_live(&xml, "sync")?;
        tracing::info!("synced {} enabled mod(s)", mods.len());
        Ok(SyncReport {
            path: self.settings.live_settings_path.clone(),
            enabled: mods.len(),
            backup,
        })
    }

    /// Writes the template's defaults back to the live settings file.
    pub fn restore(&mut self) -> Result<SyncReport> {
        let template = modsettings::read_template(&self.settings.template_path)?;
        let xml = modsettings::synthesize(&template, &[]).context("render modsettings")?;
        let backup = self.replace_live(&xml, "restore")?;
        tracing::info!("restored default mod settings");
        Ok(SyncReport {
            path: self.settings.live_settings_path.clone(),
            enabled: 0,
            backup,
        })
    }

    fn replace_live(&self, xml: &str, reason: &str) -> Result<Option<PathBuf>> {
        let backup = if self.settings.backup_before_sync {
            Some(backup::create_backup(
                &self.settings.backups_dir(),
                self.store.records(),
                &self.settings.live_settings_path,
                Some(reason),
            )?)
        } else {
            None
        };
        modsettings::write_atomic_text(&self.settings.live_settings_path, xml)
            .context("replace live modsettings")?;
        Ok(backup)
    }
}

fn now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}
