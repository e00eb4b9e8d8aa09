/*
 * Locations of the per-user application directories: the configuration
 * directory (settings file), the filter preset directory and the log
 * directory. Every getter creates the directory on first use.
 */
use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};

pub const FILTER_PRESETS_DIR_NAME: &str = "filter_presets";
pub const LOGS_DIR_NAME: &str = "logs";

/* Returns `dir` after creating it if needed, or `None` if creation fails. */
pub fn ensure_dir(dir: &Path) -> Option<PathBuf> {
    if dir.is_dir() {
        log::trace!("PathUtils: Directory already exists: {dir:?}");
        return Some(dir.to_path_buf());
    }
    match fs::create_dir_all(dir) {
        Ok(()) => {
            log::debug!("PathUtils: Created directory: {dir:?}");
            Some(dir.to_path_buf())
        }
        Err(e) => {
            log::error!("PathUtils: Failed to create directory {dir:?}: {e}");
            None
        }
    }
}

/*
 * The platform's local (non-roaming) configuration directory for `app_name`,
 * e.g. `~/.config/<app>` on Linux. `None` if the platform has no home
 * directory or the directory cannot be created.
 */
pub fn get_base_app_config_local_dir(app_name: &str) -> Option<PathBuf> {
    log::trace!("PathUtils: Resolving config dir for '{app_name}'");
    let project_dirs = ProjectDirs::from("", "", app_name)?;
    ensure_dir(project_dirs.config_local_dir())
}

pub fn get_filter_presets_dir(app_name: &str) -> Option<PathBuf> {
    let base = get_base_app_config_local_dir(app_name)?;
    ensure_dir(&base.join(FILTER_PRESETS_DIR_NAME))
}

pub fn get_log_dir(app_name: &str) -> Option<PathBuf> {
    let base = get_base_app_config_local_dir(app_name)?;
    ensure_dir(&base.join(LOGS_DIR_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_dir_creates_nested_directories() {
        // Arrange
        let temp = tempdir().expect("Failed to create temp dir for test");
        let nested = temp.path().join("a").join("b");

        // Act
        let created = ensure_dir(&nested);

        // Assert
        assert_eq!(created.as_deref(), Some(nested.as_path()));
        assert!(nested.is_dir());
        assert_eq!(ensure_dir(&nested), Some(nested.clone()));
    }

    #[test]
    fn test_ensure_dir_fails_when_a_file_is_in_the_way() {
        let temp = tempdir().expect("Failed to create temp dir for test");
        let blocker = temp.path().join("blocker");
        fs::write(&blocker, "x").unwrap();

        assert_eq!(ensure_dir(&blocker.join("child")), None);
    }

    #[test]
    fn test_app_directories_contain_app_name() {
        let unique_app_name = format!("TestApp_PathUtils_{}", rand::random::<u128>());

        // ProjectDirs depends on the environment; there is nothing to check without a home dir.
        let Some(presets) = get_filter_presets_dir(&unique_app_name) else {
            return;
        };

        assert!(presets.is_dir());
        assert!(presets.ends_with(FILTER_PRESETS_DIR_NAME));
        assert!(
            presets
                .to_string_lossy()
                .to_lowercase()
                .contains(&unique_app_name.to_lowercase())
        );

        if let Some(proj_dirs) = ProjectDirs::from("", "", &unique_app_name) {
            let _ = fs::remove_dir_all(proj_dirs.config_local_dir());
        }
    }
}
