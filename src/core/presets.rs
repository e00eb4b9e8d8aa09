/*
 * This module manages saved filter presets. A preset is a JSON document
 * holding a filter expression plus the editor mode it was saved from, stored
 * as `<name>.json` in the user's preset directory (see `path_utils`).
 *
 * It includes a trait for preset operations (`PresetManagerOperations`) so the
 * storage can be swapped in tests, and a concrete implementation
 * (`CorePresetManager`). Files written by older versions that contain only
 * the bare expression are still readable and open in advanced mode.
 */
use serde::Serialize;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};

use super::config::APP_NAME;
use super::filters::{FilterError, FilterExpression, FilterMode};
use super::path_utils;

pub const PRESET_FILE_EXTENSION: &str = "json";
pub const PRESET_FORMAT_VERSION: &str = "1.0";

#[derive(Debug)]
pub enum PresetError {
    Io(io::Error),
    Serde(serde_json::Error),
    Filter(FilterError),
    NoPresetDirectory,
    PresetNotFound(String),
    InvalidPresetName(String),
    UnsupportedVersion(String),
    ModeMismatch,
}

impl From<io::Error> for PresetError {
    fn from(err: io::Error) -> Self {
        PresetError::Io(err)
    }
}

impl From<serde_json::Error> for PresetError {
    fn from(err: serde_json::Error) -> Self {
        PresetError::Serde(err)
    }
}

impl From<FilterError> for PresetError {
    fn from(err: FilterError) -> Self {
        PresetError::Filter(err)
    }
}

impl std::fmt::Display for PresetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PresetError::Io(e) => write!(f, "I/O error: {e}"),
            PresetError::Serde(e) => write!(f, "Serialization/Deserialization error: {e}"),
            PresetError::Filter(e) => write!(f, "Invalid filter in preset: {e}"),
            PresetError::NoPresetDirectory => {
                write!(f, "Could not determine the directory for filter presets")
            }
            PresetError::PresetNotFound(name) => write!(f, "Preset not found: {name}"),
            PresetError::InvalidPresetName(name) => write!(
                f,
                "Invalid preset name: {name}. Contains invalid characters or is empty."
            ),
            PresetError::UnsupportedVersion(v) => {
                write!(f, "Unsupported preset format version: {v}")
            }
            PresetError::ModeMismatch => write!(
                f,
                "Preset is marked as simple but its filter needs the advanced editor"
            ),
        }
    }
}

impl std::error::Error for PresetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PresetError::Io(e) => Some(e),
            PresetError::Serde(e) => Some(e),
            PresetError::Filter(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PresetError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterPreset {
    pub version: String,
    pub mode: FilterMode,
    pub is_complex: bool,
    pub filter: FilterExpression,
}

impl FilterPreset {
    /* Fails with `ModeMismatch` if `mode` is simple but the filter is not. */
    pub fn new(filter: FilterExpression, mode: FilterMode) -> Result<Self> {
        let is_complex = !filter.is_simple();
        if mode == FilterMode::Simple && is_complex {
            return Err(PresetError::ModeMismatch);
        }
        Ok(FilterPreset {
            version: PRESET_FORMAT_VERSION.to_string(),
            mode,
            is_complex,
            filter,
        })
    }

    /* A preset in whichever mode can display the filter. */
    pub fn from_filter(filter: FilterExpression) -> Self {
        let mode = filter.mode();
        FilterPreset {
            version: PRESET_FORMAT_VERSION.to_string(),
            mode,
            is_complex: mode == FilterMode::Advanced,
            filter,
        }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(mut object) = value else {
            return Err(FilterError::InvalidExpression("expected a JSON object".to_string()).into());
        };

        // Older files hold the expression itself.
        if !object.contains_key("filter") {
            let filter = FilterExpression::from_value(Value::Object(object))?;
            return FilterPreset::new(filter, FilterMode::Advanced);
        }

        let version = match object.remove("version") {
            Some(Value::String(v)) => v,
            Some(other) => other.to_string(),
            None => PRESET_FORMAT_VERSION.to_string(),
        };
        if version != PRESET_FORMAT_VERSION {
            return Err(PresetError::UnsupportedVersion(version));
        }
        let mode: FilterMode = match object.remove("mode") {
            Some(v) => serde_json::from_value(v)?,
            None => FilterMode::Advanced,
        };
        let filter = FilterExpression::from_value(object.remove("filter").unwrap_or(Value::Null))?;
        FilterPreset::new(filter, mode)
    }
}

pub fn sanitize_preset_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

pub fn is_valid_preset_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == ' '
}

fn validate_preset_name(name: &str) -> Result<()> {
    if name.trim().is_empty()
        || !name.chars().all(is_valid_preset_name_char)
        || sanitize_preset_name(name).is_empty()
    {
        return Err(PresetError::InvalidPresetName(name.to_string()));
    }
    Ok(())
}

pub trait PresetManagerOperations: Send + Sync {
    fn save_preset(&self, name: &str, preset: &FilterPreset) -> Result<PathBuf>;
    fn load_preset(&self, name: &str) -> Result<FilterPreset>;
    fn load_preset_from_path(&self, path: &Path) -> Result<FilterPreset>;
    fn save_preset_to_path(&self, path: &Path, preset: &FilterPreset) -> Result<()>;
    fn list_presets(&self) -> Result<Vec<String>>;
    fn delete_preset(&self, name: &str) -> Result<()>;
    fn get_preset_dir_path(&self) -> Option<PathBuf>;
}

pub struct CorePresetManager {
    storage_dir: Option<PathBuf>,
}

impl CorePresetManager {
    /* Stores presets in the per-user application directory. */
    pub fn new() -> Self {
        CorePresetManager { storage_dir: None }
    }

    pub fn with_directory(dir: impl Into<PathBuf>) -> Self {
        CorePresetManager {
            storage_dir: Some(dir.into()),
        }
    }

    fn storage_dir_impl(&self) -> Option<PathBuf> {
        let dir = match &self.storage_dir {
            Some(dir) => dir.clone(),
            None => path_utils::get_filter_presets_dir(APP_NAME)?,
        };
        if !dir.exists() {
            if let Err(e) = fs::create_dir_all(&dir) {
                log::error!("CorePresetManager: Failed to create preset directory {dir:?}: {e}");
                return None;
            }
            log::debug!("CorePresetManager: Created preset directory: {dir:?}");
        }
        Some(dir)
    }

    fn preset_file_path(&self, name: &str) -> Result<PathBuf> {
        validate_preset_name(name)?;
        let dir = self
            .storage_dir_impl()
            .ok_or(PresetError::NoPresetDirectory)?;
        Ok(dir.join(format!(
            "{}.{PRESET_FILE_EXTENSION}",
            sanitize_preset_name(name)
        )))
    }
}

impl Default for CorePresetManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PresetManagerOperations for CorePresetManager {
    fn save_preset(&self, name: &str, preset: &FilterPreset) -> Result<PathBuf> {
        log::trace!("CorePresetManager: Saving preset '{name}'");
        let file_path = self.preset_file_path(name)?;
        self.save_preset_to_path(&file_path, preset)?;
        Ok(file_path)
    }

    fn load_preset(&self, name: &str) -> Result<FilterPreset> {
        log::trace!("CorePresetManager: Loading preset '{name}'");
        let file_path = self.preset_file_path(name)?;
        if !file_path.exists() {
            log::debug!("CorePresetManager: Preset file {file_path:?} not found.");
            return Err(PresetError::PresetNotFound(name.to_string()));
        }
        self.load_preset_from_path(&file_path)
    }

    fn load_preset_from_path(&self, path: &Path) -> Result<FilterPreset> {
        let reader = BufReader::new(File::open(path)?);
        let value: Value = serde_json::from_reader(reader)?;
        let preset = FilterPreset::from_value(value)?;
        log::debug!(
            "CorePresetManager: Loaded {:?} preset from {path:?}.",
            preset.mode
        );
        Ok(preset)
    }

    fn save_preset_to_path(&self, path: &Path, preset: &FilterPreset) -> Result<()> {
        if preset.mode == FilterMode::Simple && preset.filter.to_simple().is_err() {
            return Err(PresetError::ModeMismatch);
        }
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, preset)?;
        log::debug!("CorePresetManager: Saved preset to {path:?}.");
        Ok(())
    }

    fn list_presets(&self) -> Result<Vec<String>> {
        let Some(dir) = self.storage_dir_impl() else {
            log::debug!("CorePresetManager: No preset directory, returning empty list.");
            return Ok(Vec::new());
        };

        let mut names = Vec::new();
        for entry_result in fs::read_dir(dir)? {
            let path = entry_result?.path();
            if path.is_file()
                && let Some(ext) = path.extension()
                && ext == PRESET_FILE_EXTENSION
                && let Some(stem) = path.file_stem()
            {
                names.push(stem.to_string_lossy().into_owned());
            }
        }
        names.sort_unstable();
        log::debug!("CorePresetManager: Found {} presets.", names.len());
        Ok(names)
    }

    fn delete_preset(&self, name: &str) -> Result<()> {
        let file_path = self.preset_file_path(name)?;
        if !file_path.exists() {
            return Err(PresetError::PresetNotFound(name.to_string()));
        }
        fs::remove_file(&file_path)?;
        log::debug!("CorePresetManager: Deleted preset '{name}' at {file_path:?}.");
        Ok(())
    }

    fn get_preset_dir_path(&self) -> Option<PathBuf> {
        self.storage_dir_impl()
    }
}

#[cfg(test)]
mod preset_tests {
    use super::*;
    use crate::core::filters::{CompareOperator, Condition};
    use serde_json::json;
    use tempfile::TempDir;

    fn simple_filter() -> FilterExpression {
        FilterExpression::from_simple(vec![
            Condition::modality("anat"),
            Condition::participant("age", CompareOperator::GreaterThan, "20"),
        ])
    }

    fn complex_filter() -> FilterExpression {
        FilterExpression::or(vec![
            Condition::subject_id("01").into(),
            FilterExpression::not(vec![Condition::modality("dwi").into()]),
        ])
    }

    #[test]
    fn test_save_and_load_preset() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CorePresetManager::with_directory(temp_dir.path());
        let preset = FilterPreset::new(simple_filter(), FilterMode::Simple)?;

        let path = manager.save_preset("Adults with anat", &preset)?;
        let loaded = manager.load_preset("Adults with anat")?;

        assert_eq!(
            path.file_name().unwrap_or_default(),
            "Adultswithanat.json"
        );
        assert_eq!(loaded, preset);
        assert!(!loaded.is_complex);
        Ok(())
    }

    #[test]
    fn test_saved_document_shape() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CorePresetManager::with_directory(temp_dir.path());
        let path = manager.save_preset("complex", &FilterPreset::from_filter(complex_filter()))?;

        let value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;

        assert_eq!(value["version"], json!("1.0"));
        assert_eq!(value["mode"], json!("advanced"));
        assert_eq!(value["is_complex"], json!(true));
        assert_eq!(value["filter"]["type"], json!("logical_operation"));
        assert_eq!(value["filter"]["operator"], json!("OR"));
        Ok(())
    }

    #[test]
    fn test_legacy_bare_expression_loads_as_advanced() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CorePresetManager::with_directory(temp_dir.path());
        let path = temp_dir.path().join("old.json");
        fs::write(
            &path,
            r#"{"type": "logical_operation", "operator": "AND",
                "conditions": [{"type": "modality", "modalities": ["func"]}]}"#,
        )?;

        let preset = manager.load_preset_from_path(&path)?;

        assert_eq!(preset.mode, FilterMode::Advanced);
        assert_eq!(
            preset.filter,
            FilterExpression::from_simple(vec![Condition::modality("func")])
        );
        Ok(())
    }

    #[test]
    fn test_simple_mode_with_complex_filter_is_rejected() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CorePresetManager::with_directory(temp_dir.path());
        let path = temp_dir.path().join("bad.json");
        let document = json!({
            "version": "1.0",
            "mode": "simple",
            "is_complex": false,
            "filter": serde_json::to_value(complex_filter()).unwrap(),
        });
        fs::write(&path, document.to_string()).unwrap();

        assert!(matches!(
            manager.load_preset_from_path(&path),
            Err(PresetError::ModeMismatch)
        ));
        assert!(matches!(
            FilterPreset::new(complex_filter(), FilterMode::Simple),
            Err(PresetError::ModeMismatch)
        ));
    }

    #[test]
    fn test_unsupported_version_is_rejected() {
        let value = json!({"version": "2.0", "mode": "advanced", "filter": {"type": "logical_operation"}});
        assert!(matches!(
            FilterPreset::from_value(value),
            Err(PresetError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn test_list_and_delete_presets() -> Result<()> {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CorePresetManager::with_directory(temp_dir.path());
        assert!(manager.list_presets()?.is_empty());

        for name in ["Beta", "alpha", "Gamma-1"] {
            manager.save_preset(name, &FilterPreset::from_filter(simple_filter()))?;
        }
        fs::write(temp_dir.path().join("notes.txt"), "ignored")?;

        assert_eq!(manager.list_presets()?, vec!["Beta", "Gamma-1", "alpha"]);

        manager.delete_preset("Beta")?;
        assert_eq!(manager.list_presets()?, vec!["Gamma-1", "alpha"]);
        assert!(matches!(
            manager.delete_preset("Beta"),
            Err(PresetError::PresetNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_invalid_preset_names() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir for test");
        let manager = CorePresetManager::with_directory(temp_dir.path());
        let preset = FilterPreset::from_filter(simple_filter());

        for name in ["", "   ", "My/Preset", "a.b"] {
            assert!(matches!(
                manager.save_preset(name, &preset),
                Err(PresetError::InvalidPresetName(_))
            ));
        }
        assert!(matches!(
            manager.load_preset("does not exist"),
            Err(PresetError::PresetNotFound(_))
        ));
    }
}
