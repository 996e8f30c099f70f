use crate::{
    config::AppConfig,
    library::ModRecord,
    manager::{ImportReport, ModManager},
    staging::{StagingPolicy, StagingProgress},
};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliCommand {
    List,
    Import {
        paths: Vec<PathBuf>,
        policy: Option<StagingPolicy>,
    },
    Enable(usize),
    Disable(usize),
    Move { from: usize, to: usize },
    Up(usize),
    Down(usize),
    Delete { index: usize, assume_yes: bool },
    Sync,
    Restore,
    Paths,
    Help,
    Version,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliAction {
    pub command: CliCommand,
    pub format: OutputFormat,
}

impl CliCommand {
    /// Commands that never touch the library or the game folder.
    pub fn is_offline(&self) -> bool {
        matches!(self, CliCommand::Help | CliCommand::Version)
    }
}

pub fn parse_args(args: &[String]) -> Result<CliAction> {
    let mut format = OutputFormat::Text;
    let mut tokens = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--json" => format = OutputFormat::Json,
            _ => tokens.push(arg.as_str()),
        }
    }

    let Some((name, rest)) = tokens.split_first() else {
        return Ok(CliAction {
            command: CliCommand::Help,
            format,
        });
    };
    let command = match *name {
        "--help" | "-h" | "help" => CliCommand::Help,
        "--version" | "-V" | "version" => CliCommand::Version,
        "list" | "ls" => CliCommand::List,
        "import" | "--import" | "-i" => parse_import(rest)?,
        "enable" => CliCommand::Enable(position(rest, 0)?),
        "disable" => CliCommand::Disable(position(rest, 0)?),
        "move" | "mv" => CliCommand::Move {
            from: position(rest, 0)?,
            to: position(rest, 1)?,
        },
        "up" => CliCommand::Up(position(rest, 0)?),
        "down" => CliCommand::Down(position(rest, 0)?),
        "delete" | "rm" => CliCommand::Delete {
            index: position(rest, 0)?,
            assume_yes: rest.iter().any(|arg| matches!(*arg, "--yes" | "-y")),
        },
        "sync" => CliCommand::Sync,
        "restore" => CliCommand::Restore,
        "paths" => CliCommand::Paths,
        other => bail!("unknown command: {other} (try --help)"),
    };
    Ok(CliAction { command, format })
}

fn parse_import(rest: &[&str]) -> Result<CliCommand> {
    let mut paths = Vec::new();
    let mut policy = None;
    for arg in rest {
        match *arg {
            "--copy" => policy = Some(StagingPolicy::Copy),
            "--move" => policy = Some(StagingPolicy::Move),
            path => paths.push(PathBuf::from(path)),
        }
    }
    if paths.is_empty() {
        bail!("import requires at least one mod directory");
    }
    Ok(CliCommand::Import { paths, policy })
}

/// Positions are 1-based on the command line and 0-based internally.
fn position(rest: &[&str], slot: usize) -> Result<usize> {
    let raw = rest
        .iter()
        .filter(|arg| !arg.starts_with('-'))
        .nth(slot)
        .context("missing mod position")?;
    let value: usize = raw
        .parse()
        .with_context(|| format!("invalid mod position: {raw}"))?;
    if value == 0 {
        bail!("mod positions start at 1");
    }
    Ok(value - 1)
}

pub fn print_help() {
    println!("modkeeper v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Usage: modkeeper [--json] <command>");
    println!();
    println!("Commands:");
    println!("  list                      Show managed mods in load order");
    println!("  import <dir>... [--copy|--move]");
    println!("                            Stage mod folders (info.json + .pak) into the library");
    println!("  enable <n> / disable <n>  Deploy or withdraw the mod at position n");
    println!("  move <from> <to>          Reorder the load order");
    println!("  up <n> / down <n>         Nudge a mod by one slot");
    println!("  delete <n> [--yes]        Remove a mod and its staged files");
    println!("  sync                      Write enabled mods into modsettings.lsx");
    println!("  restore                   Write the template's defaults into modsettings.lsx");
    println!("  paths                     Show resolved game and data paths");
}

#[derive(Serialize)]
struct ModRow<'a> {
    position: usize,
    uuid: &'a str,
    name: &'a str,
    folder: &'a str,
    version: Option<&'a str>,
    enabled: bool,
    deployed: bool,
    archive: &'a str,
}

#[derive(Serialize)]
struct ImportRow {
    source: PathBuf,
    outcome: Option<&'static str>,
    uuid: Option<String>,
    position: Option<usize>,
    error: Option<String>,
}

/// Help and version, which must work before any config or game folder exists.
pub fn run_command_offline(action: &CliAction) -> Result<()> {
    match action.command {
        CliCommand::Version => println!("modkeeper v{}", env!("CARGO_PKG_VERSION")),
        _ => print_help(),
    }
    Ok(())
}

pub async fn run_command(
    config: &AppConfig,
    manager: &mut ModManager,
    action: CliAction,
) -> Result<()> {
    let format = action.format;
    match action.command {
        CliCommand::Help => print_help(),
        CliCommand::Version => println!("modkeeper v{}", env!("CARGO_PKG_VERSION")),
        CliCommand::List => print_mods(manager, format)?,
        CliCommand::Paths => print_paths(manager, format)?,
        CliCommand::Import { paths, policy } => {
            if let Some(policy) = policy {
                manager.set_staging_policy(policy);
            }
            import_all(manager, &paths, format).await?;
        }
        CliCommand::Enable(index) => {
            manager.set_enabled(index, true)?;
            report(format, "enabled", &record_at(manager, index)?);
        }
        CliCommand::Disable(index) => {
            manager.set_enabled(index, false)?;
            report(format, "disabled", &record_at(manager, index)?);
        }
        CliCommand::Move { from, to } => {
            manager.move_mod(from, to)?;
            report(format, "moved", &record_at(manager, to)?);
        }
        CliCommand::Up(index) => {
            manager.move_up(index)?;
            report(format, "moved", &record_at(manager, index.saturating_sub(1))?);
        }
        CliCommand::Down(index) => {
            manager.move_down(index)?;
            let last = manager.mods().len().saturating_sub(1);
            report(format, "moved", &record_at(manager, (index + 1).min(last))?);
        }
        CliCommand::Delete { index, assume_yes } => {
            let record = record_at(manager, index)?;
            if config.confirm_mod_delete && !assume_yes && !confirm(&record)? {
                println!("Kept {}", record.display_name());
                return Ok(());
            }
            let (removed, _) = manager.delete(index)?;
            report(format, "deleted", &removed);
        }
        CliCommand::Sync => {
            let sync = manager.sync()?;
            if format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "path": sync.path,
                    "enabled": sync.enabled,
                    "backup": sync.backup,
                }))?;
            } else {
                println!("Wrote {} enabled mod(s) to {}", sync.enabled, sync.path.display());
                if let Some(backup) = sync.backup {
                    println!("Backup: {}", backup.display());
                }
            }
        }
        CliCommand::Restore => {
            let restore = manager.restore()?;
            if format == OutputFormat::Json {
                print_json(&serde_json::json!({
                    "path": restore.path,
                    "backup": restore.backup,
                }))?;
            } else {
                println!("Restored defaults to {}", restore.path.display());
            }
        }
    }
    Ok(())
}

async fn import_all(manager: &mut ModManager, paths: &[PathBuf], format: OutputFormat) -> Result<()> {
    let mut rows = Vec::new();
    let mut failures = 0;
    for path in paths {
        let result = manager
            .import(path, |progress: StagingProgress| {
                if format == OutputFormat::Text {
                    eprint!("\r{} {:>3.0}%", path.display(), progress.fraction * 100.0);
                    if progress.completed_units == progress.total_units {
                        eprintln!();
                    }
                }
            })
            .await;
        match result {
            Ok(ImportReport {
                outcome,
                uuid,
                name,
                order,
                ..
            }) => {
                if format == OutputFormat::Text {
                    println!("{} {name} at position {}", capitalize(outcome.label()), order + 1);
                }
                rows.push(ImportRow {
                    source: path.clone(),
                    outcome: Some(outcome.label()),
                    uuid: Some(uuid),
                    position: usize::try_from(order + 1).ok(),
                    error: None,
                });
            }
            Err(err) => {
                failures += 1;
                if !err.is_recoverable() {
                    tracing::error!("import of {} failed: {err}", path.display());
                }
                if format == OutputFormat::Text {
                    eprintln!("Skipped {}: {err}", path.display());
                }
                rows.push(ImportRow {
                    source: path.clone(),
                    outcome: None,
                    uuid: None,
                    position: None,
                    error: Some(err.to_string()),
                });
            }
        }
    }
    if format == OutputFormat::Json {
        print_json(&rows)?;
    }
    if failures == paths.len() {
        bail!("no mods imported");
    }
    Ok(())
}

fn print_mods(manager: &ModManager, format: OutputFormat) -> Result<()> {
    let mods = manager.mods();
    let rows: Vec<ModRow> = mods
        .iter()
        .enumerate()
        .map(|(index, record)| ModRow {
            position: index + 1,
            uuid: &record.uuid,
            name: record.display_name(),
            folder: &record.folder,
            version: record.version.as_deref(),
            enabled: record.enabled,
            deployed: manager.is_deployed(record),
            archive: &record.archive,
        })
        .collect();

    if format == OutputFormat::Json {
        return print_json(&rows);
    }
    if rows.is_empty() {
        println!("No mods imported yet.");
        return Ok(());
    }
    for row in rows {
        let mark = if row.enabled { "[x]" } else { "[ ]" };
        let drift = if row.enabled != row.deployed { " (not deployed)" } else { "" };
        println!("{:>3} {mark} {}  {}{drift}", row.position, row.name, row.uuid);
    }
    Ok(())
}

fn print_paths(manager: &ModManager, format: OutputFormat) -> Result<()> {
    let settings = manager.settings();
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "data_dir": settings.data_dir,
            "game_mods_dir": settings.game_mods_dir,
            "modsettings": settings.live_settings_path,
            "template": settings.template_path,
            "staging_policy": settings.staging_policy,
        }));
    }
    println!("Data dir:    {}", settings.data_dir.display());
    println!("Game Mods:   {}", settings.game_mods_dir.display());
    println!("Settings:    {}", settings.live_settings_path.display());
    println!("Template:    {}", settings.template_path.display());
    println!("Staging:     {}", settings.staging_policy.label());
    Ok(())
}

fn record_at(manager: &ModManager, index: usize) -> Result<ModRecord> {
    let mods = manager.mods();
    let len = mods.len();
    mods.into_iter()
        .nth(index)
        .with_context(|| format!("no mod at position {} ({len} mods)", index + 1))
}

fn report(format: OutputFormat, action: &str, record: &ModRecord) {
    if format == OutputFormat::Json {
        let value = serde_json::json!({
            "action": action,
            "uuid": record.uuid,
            "name": record.display_name(),
            "enabled": record.enabled,
        });
        println!("{value}");
    } else {
        println!("{} {}", capitalize(action), record.display_name());
    }
}

fn confirm(record: &ModRecord) -> Result<bool> {
    print!("Delete {}? [y/N] ", record.display_name());
    io::stdout().flush().context("flush prompt")?;
    let mut answer = String::new();
    io::stdin()
        .lock()
        .read_line(&mut answer)
        .context("read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{library::Library, manager::ManagerSettings};
    use std::fs;
    use tempfile::TempDir;

    fn parse(line: &str) -> Result<CliAction> {
        let args: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        parse_args(&args)
    }

    #[test]
    fn no_args_shows_help() {
        assert_eq!(parse("").unwrap().command, CliCommand::Help);
    }

    #[test]
    fn positions_are_one_based() {
        assert_eq!(parse("enable 1").unwrap().command, CliCommand::Enable(0));
        assert_eq!(
            parse("move 3 1").unwrap().command,
            CliCommand::Move { from: 2, to: 0 }
        );
        assert!(parse("enable 0").is_err());
        assert!(parse("disable").is_err());
    }

    #[test]
    fn import_collects_paths_and_policy() {
        let action = parse("--json import a b --move").unwrap();
        assert_eq!(action.format, OutputFormat::Json);
        assert_eq!(
            action.command,
            CliCommand::Import {
                paths: vec![PathBuf::from("a"), PathBuf::from("b")],
                policy: Some(StagingPolicy::Move),
            }
        );
        assert!(parse("import --copy").is_err());
    }

    #[test]
    fn delete_flags() {
        assert_eq!(
            parse("delete 2 --yes").unwrap().command,
            CliCommand::Delete {
                index: 1,
                assume_yes: true
            }
        );
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(parse("frobnicate").is_err());
        assert!(parse("--version").unwrap().command.is_offline());
    }

    #[tokio::test]
    async fn import_policy_flag_applies_to_one_run() {
        let temp = TempDir::new().unwrap();
        let data = temp.path().join("data");
        let config = AppConfig::load_or_create_in(&data).unwrap();
        let settings = ManagerSettings {
            data_dir: data.clone(),
            game_mods_dir: temp.path().join("Mods"),
            live_settings_path: temp.path().join("modsettings.lsx"),
            template_path: config.template_path(),
            staging_policy: config.staging_policy,
            backup_before_sync: false,
        };
        let mut manager = ModManager::new(Library::load_or_create(&data).unwrap(), settings);
        let source = temp.path().join("downloads").join("Camp");
        fs::create_dir_all(&source).unwrap();
        fs::write(
            source.join("info.json"),
            r#"{"Mods":[{"Name":"Camp","Folder":"Camp","UUID":"u-camp"}],"MD5":"m"}"#,
        )
        .unwrap();
        fs::write(source.join("Camp.pak"), b"LSPK").unwrap();

        let action = CliAction {
            command: CliCommand::Import {
                paths: vec![source.clone()],
                policy: Some(StagingPolicy::Move),
            },
            format: OutputFormat::Json,
        };
        run_command(&config, &mut manager, action).await.unwrap();

        assert!(!source.exists());
        let reloaded = AppConfig::load_or_create_in(&data).unwrap();
        assert_eq!(reloaded.staging_policy, StagingPolicy::Copy);
    }
}
