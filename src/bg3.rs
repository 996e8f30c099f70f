use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

pub const GAME_NAME: &str = "Baldur's Gate 3";
const STEAM_APP_ID: &str = "1086940";

#[derive(Debug, Clone)]
pub struct GamePaths {
    pub larian_dir: PathBuf,
    pub larian_mods_dir: PathBuf,
    pub modsettings_path: PathBuf,
}

impl GamePaths {
    pub fn from_larian_dir(larian_dir: &Path) -> Self {
        Self {
            larian_dir: larian_dir.to_path_buf(),
            larian_mods_dir: larian_dir.join("Mods"),
            modsettings_path: larian_dir
                .join("PlayerProfiles")
                .join("Public")
                .join("modsettings.lsx"),
        }
    }
}

pub fn detect_paths(larian_dir_override: Option<&Path>) -> Result<GamePaths> {
    let larian_dir = match larian_dir_override {
        Some(path) if !path.as_os_str().is_empty() => path.to_path_buf(),
        _ => find_larian_dir().context("locate BG3 Larian data directory")?,
    };

    if !looks_like_larian_dir(&larian_dir) {
        bail!(
            "invalid Larian data dir: expected PlayerProfiles/ in {}",
            larian_dir.display()
        );
    }

    Ok(GamePaths::from_larian_dir(&larian_dir))
}

fn find_larian_dir() -> Option<PathBuf> {
    let home = dirs_home()?;
    let native = home.join(".local/share/Larian Studios").join(GAME_NAME);
    if native.exists() {
        return Some(native);
    }

    let proton = home
        .join(".local/share/Steam/steamapps/compatdata")
        .join(STEAM_APP_ID)
        .join("pfx/drive_c/users/steamuser/AppData/Local/Larian Studios")
        .join(GAME_NAME);
    if proton.exists() {
        return Some(proton);
    }

    let mac = home
        .join("Documents/Larian Studios")
        .join(GAME_NAME);
    if mac.exists() {
        return Some(mac);
    }

    None
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

pub fn looks_like_larian_dir(path: &Path) -> bool {
    path.join("PlayerProfiles").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn override_must_contain_player_profiles() {
        let temp = TempDir::new().unwrap();
        assert!(detect_paths(Some(temp.path())).is_err());

        fs::create_dir_all(temp.path().join("PlayerProfiles")).unwrap();
        let paths = detect_paths(Some(temp.path())).unwrap();
        assert_eq!(paths.larian_mods_dir, temp.path().join("Mods"));
        assert!(paths
            .modsettings_path
            .ends_with("PlayerProfiles/Public/modsettings.lsx"));
    }
}
