use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use super::bids_filename;
use super::config::BidsConfig;
use super::entity_registry::EntityRegistry;
use super::tsv::TsvRow;

pub type JsonMap = Map<String, Value>;

/*
 * The entities parsed from a BIDS filename, kept in the order in which they
 * were encountered (`sub-01_ses-pre_task-rest` yields sub, ses, task).
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityMap {
    entries: Vec<(String, String)>,
}

impl EntityMap {
    pub fn new() -> Self {
        EntityMap {
            entries: Vec::new(),
        }
    }

    /* A repeated key keeps its original position and takes the new value. */
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for EntityMap {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut map = EntityMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

/*
 * Sidecar metadata is either not yet read (lazy mode) or read. A missing or
 * malformed sidecar reads as an empty map.
 */
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SidecarMetadata {
    #[default]
    Unloaded,
    Loaded(JsonMap),
}

/*
 * A single file in the dataset. `path` is absolute (rooted at the dataset
 * root); `modality` is the name of the directory holding the file unless that
 * directory is a subject or session directory.
 */
#[derive(Debug, Clone, PartialEq)]
pub struct BidsFile {
    pub path: PathBuf,
    pub modality: Option<String>,
    pub suffix: Option<String>,
    pub extension: String,
    pub entities: EntityMap,
    pub metadata: SidecarMetadata,
}

impl BidsFile {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /* The JSON sidecar this file would have. JSON files have none. */
    pub fn sidecar_path(&self) -> Option<PathBuf> {
        bids_filename::sidecar_path(&self.path)
    }

    pub fn metadata(&self) -> Option<&JsonMap> {
        match &self.metadata {
            SidecarMetadata::Loaded(map) => Some(map),
            SidecarMetadata::Unloaded => None,
        }
    }

    /*
     * Returns a copy of this file with its sidecar read. Reading never fails:
     * a missing, unreadable or malformed sidecar yields an empty map.
     */
    pub fn with_metadata(&self) -> BidsFile {
        let metadata = match self.sidecar_path() {
            Some(sidecar) => read_json_object(&sidecar).unwrap_or_default(),
            None => JsonMap::new(),
        };
        BidsFile {
            metadata: SidecarMetadata::Loaded(metadata),
            ..self.clone()
        }
    }
}

/*
 * Reads a JSON object from disk. Returns `None` if the file is missing, and an
 * empty map (with a warning) if it cannot be read or is not a JSON object.
 */
pub fn read_json_object(path: &Path) -> Option<JsonMap> {
    if !path.is_file() {
        return None;
    }
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            log::warn!("Models: Failed to read JSON file {path:?}: {e}");
            return Some(JsonMap::new());
        }
    };
    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => {
            log::warn!("Models: JSON file {path:?} does not contain an object, ignoring it.");
            Some(JsonMap::new())
        }
        Err(e) => {
            log::warn!("Models: Malformed JSON in {path:?}: {e}");
            Some(JsonMap::new())
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub session_id: Option<String>,
    pub files: Vec<BidsFile>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Derivative {
    pub pipeline_name: String,
    pub sessions: Vec<Session>,
    pub files: Vec<BidsFile>,
    pub pipeline_description: JsonMap,
}

impl Derivative {
    /* Files directly under the derivative subject folder, then session files. */
    pub fn all_files(&self) -> impl Iterator<Item = &BidsFile> {
        self.files
            .iter()
            .chain(self.sessions.iter().flat_map(|s| s.files.iter()))
    }
}

/* Electrophysiology side tables, keyed by the TSV file they were read from. */
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IeegData {
    pub channels: BTreeMap<PathBuf, Vec<TsvRow>>,
    pub electrodes: BTreeMap<PathBuf, Vec<TsvRow>>,
}

impl IeegData {
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.electrodes.is_empty()
    }

    pub fn channel_rows(&self) -> impl Iterator<Item = &TsvRow> {
        self.channels.values().flatten()
    }

    pub fn electrode_rows(&self) -> impl Iterator<Item = &TsvRow> {
        self.electrodes.values().flatten()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Subject {
    pub subject_id: String,
    pub sessions: Vec<Session>,
    pub files: Vec<BidsFile>,
    pub derivatives: Vec<Derivative>,
    pub metadata: BTreeMap<String, String>,
    pub ieeg_data: Option<IeegData>,
}

impl Subject {
    pub fn new(subject_id: impl Into<String>) -> Self {
        Subject {
            subject_id: subject_id.into(),
            ..Default::default()
        }
    }

    pub fn get_derivative(&self, pipeline_name: &str) -> Option<&Derivative> {
        self.derivatives
            .iter()
            .find(|d| d.pipeline_name == pipeline_name)
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.iter().filter_map(|s| s.session_id.as_deref())
    }

    /* Raw files of this subject: subject-level files, then session files. */
    pub fn all_files(&self) -> impl Iterator<Item = &BidsFile> {
        self.files
            .iter()
            .chain(self.sessions.iter().flat_map(|s| s.files.iter()))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dataset {
    pub root_path: PathBuf,
    pub subjects: Vec<Subject>,
    pub dataset_description: JsonMap,
    pub dataset_files: Vec<BidsFile>,
}

impl Dataset {
    pub fn get_subject(&self, subject_id: &str) -> Option<&Subject> {
        self.subjects.iter().find(|s| s.subject_id == subject_id)
    }

    pub fn subject_ids(&self) -> Vec<String> {
        self.subjects.iter().map(|s| s.subject_id.clone()).collect()
    }

    pub fn name(&self) -> Option<&str> {
        self.dataset_description.get("Name").and_then(Value::as_str)
    }

    pub fn all_modalities(&self) -> BTreeSet<String> {
        self.subjects
            .iter()
            .flat_map(|s| s.all_files())
            .filter_map(|f| f.modality.clone())
            .collect()
    }

    pub fn all_tasks(&self) -> BTreeSet<String> {
        self.entity_values("task")
    }

    pub fn all_derivative_pipelines(&self) -> BTreeSet<String> {
        self.subjects
            .iter()
            .flat_map(|s| s.derivatives.iter())
            .map(|d| d.pipeline_name.clone())
            .collect()
    }

    /* Distinct values of one entity across all raw files. */
    pub fn entity_values(&self, code: &str) -> BTreeSet<String> {
        self.subjects
            .iter()
            .flat_map(|s| s.all_files())
            .filter_map(|f| f.entities.get(code).map(str::to_string))
            .collect()
    }

    /*
     * Aggregates the counts and value sets a dataset browser shows. Entity
     * codes are listed in filename order as defined by `registry`.
     */
    pub fn summarize(&self, registry: &EntityRegistry) -> DatasetSummary {
        let mut entity_values: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut file_count = 0;
        for file in self.subjects.iter().flat_map(|s| s.all_files()) {
            file_count += 1;
            for (key, value) in file.entities.iter() {
                entity_values
                    .entry(key.to_string())
                    .or_default()
                    .insert(value.to_string());
            }
        }
        let entities = registry
            .sort_codes(entity_values.keys().cloned())
            .into_iter()
            .map(|code| {
                let values = entity_values.remove(&code).unwrap_or_default();
                (code, values)
            })
            .collect();

        DatasetSummary {
            name: self.name().map(str::to_string),
            subject_count: self.subjects.len(),
            session_count: self.subjects.iter().map(|s| s.sessions.len()).sum(),
            file_count,
            derivative_file_count: self
                .subjects
                .iter()
                .flat_map(|s| s.derivatives.iter())
                .map(|d| d.all_files().count())
                .sum(),
            modalities: self.all_modalities(),
            pipelines: self.all_derivative_pipelines(),
            entities,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DatasetSummary {
    pub name: Option<String>,
    pub subject_count: usize,
    pub session_count: usize,
    pub file_count: usize,
    pub derivative_file_count: usize,
    pub modalities: BTreeSet<String>,
    pub pipelines: BTreeSet<String>,
    pub entities: Vec<(String, BTreeSet<String>)>,
}

/*
 * The user's export selection: for each entity code, the allowed values, plus
 * the derivative pipelines to include. A key that is absent places no
 * constraint; a key that is present with an empty list excludes everything in
 * that dimension.
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedEntities {
    #[serde(default)]
    pub entities: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub derivative_pipelines: Vec<String>,
}

impl SelectedEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity<I, S>(mut self, code: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities.insert(
            code.to_string(),
            values.into_iter().map(Into::into).collect(),
        );
        self
    }

    pub fn with_pipelines<I, S>(mut self, pipelines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.derivative_pipelines = pipelines.into_iter().map(Into::into).collect();
        self
    }

    pub fn allowed_values(&self, code: &str) -> Option<&[String]> {
        self.entities.get(code).map(Vec::as_slice)
    }

    pub fn includes_pipeline(&self, pipeline_name: &str) -> bool {
        self.derivative_pipelines.iter().any(|p| p == pipeline_name)
    }
}

pub struct ExportRequest<'a> {
    pub source_dataset: &'a Dataset,
    pub selected_entities: SelectedEntities,
    pub output_path: PathBuf,
    pub verify: bool,
}

impl<'a> ExportRequest<'a> {
    /* A request whose checksum verification follows the `verify_exports` setting. */
    pub fn new(
        source_dataset: &'a Dataset,
        selected_entities: SelectedEntities,
        output_path: impl Into<PathBuf>,
        config: &BidsConfig,
    ) -> Self {
        ExportRequest {
            source_dataset,
            selected_entities,
            output_path: output_path.into(),
            verify: config.verify_exports,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub file_count: usize,
    pub total_size: u64,
}

/* `failed_files` also lists a `participants.tsv` that could not be rewritten. */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    pub output_path: PathBuf,
    pub files_copied: usize,
    pub failed_files: Vec<PathBuf>,
    pub metadata_files_copied: usize,
    pub participants_written: usize,
    pub verification_failures: Vec<PathBuf>,
}
