use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

use super::bids_filename::{
    self, SUBJECT_PREFIX, session_id_from_dir_name, subject_id_from_dir_name,
};
use super::models::{
    BidsFile, Dataset, Derivative, IeegData, JsonMap, Session, Subject, read_json_object,
};
use super::progress::{ProgressAction, ProgressReporter};
use super::tsv::{self, IeegTable, PARTICIPANTS_TSV, is_hidden};

/*
 * This module turns a BIDS directory tree into the in-memory `Dataset` model.
 * It defines the loader errors, the `DatasetLoaderOperations` trait used by
 * the repository (and replaced by fakes in tests), and the concrete
 * `CoreDatasetLoader`.
 *
 * Layout handled: `sub-*` directories at the root, optional `ses-*` levels,
 * modality folders below those, and derivative pipelines under
 * `derivatives/<pipeline>/` with subject folders at any depth.
 */

pub const DATASET_DESCRIPTION: &str = "dataset_description.json";
pub const DERIVATIVES_DIR: &str = "derivatives";

/* Dataset-level files recorded when present at the root. */
pub const DATASET_LEVEL_FILES: &[&str] = &[
    "README",
    "README.md",
    "README.txt",
    "README.rst",
    "LICENSE",
    "CHANGES",
    "CHANGES.md",
    "participants.tsv",
    "participants.json",
];

#[derive(Debug)]
pub enum LoaderError {
    NotFound(PathBuf),
    NotADirectory(PathBuf),
    InvalidDataset(PathBuf),
    Io(io::Error),
    Cancelled,
}

impl From<io::Error> for LoaderError {
    fn from(err: io::Error) -> Self {
        LoaderError::Io(err)
    }
}

impl std::fmt::Display for LoaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoaderError::NotFound(p) => write!(f, "Dataset root does not exist: {p:?}"),
            LoaderError::NotADirectory(p) => write!(f, "Dataset root is not a directory: {p:?}"),
            LoaderError::InvalidDataset(p) => {
                write!(f, "Not a BIDS dataset (no {DATASET_DESCRIPTION}): {p:?}")
            }
            LoaderError::Io(e) => write!(f, "I/O error: {e}"),
            LoaderError::Cancelled => write!(f, "Loading was cancelled"),
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoaderError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderOptions {
    pub load_sidecars: bool,
    pub load_ieeg: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        LoaderOptions {
            load_sidecars: true,
            load_ieeg: true,
        }
    }
}

/*
 * Defines the loading operations. `load` reads the whole dataset, reporting
 * one progress step per subject (and, when enabled, one per subject for the
 * iEEG tables). `load_lazy` reads only the dataset-level information and
 * leaves `subjects` empty; subjects are then read one at a time with
 * `load_subject`.
 */
pub trait DatasetLoaderOperations: Send + Sync {
    fn load(&self, root: &Path, progress: &mut ProgressReporter<'_>) -> Result<Dataset>;
    fn load_lazy(&self, root: &Path) -> Result<Dataset>;
    fn load_subject(&self, root: &Path, subject_id: &str) -> Result<Option<Subject>>;
    fn subject_ids(&self, root: &Path) -> Result<Vec<String>>;
}

/* A derivative pipeline with its subject folders located once per load. */
struct PipelineIndex {
    name: String,
    description: JsonMap,
    subject_dirs: BTreeMap<String, PathBuf>,
}

pub struct CoreDatasetLoader {
    options: LoaderOptions,
}

impl CoreDatasetLoader {
    pub fn new() -> Self {
        Self::with_options(LoaderOptions::default())
    }

    pub fn with_options(options: LoaderOptions) -> Self {
        CoreDatasetLoader { options }
    }

    pub fn options(&self) -> LoaderOptions {
        self.options
    }

    /*
     * Checks that `root` is an existing directory with a dataset descriptor
     * and returns the parsed descriptor. A malformed descriptor reads as an
     * empty map.
     */
    fn validate_root(root: &Path) -> Result<JsonMap> {
        if !root.exists() {
            return Err(LoaderError::NotFound(root.to_path_buf()));
        }
        if !root.is_dir() {
            return Err(LoaderError::NotADirectory(root.to_path_buf()));
        }
        read_json_object(&root.join(DATASET_DESCRIPTION))
            .ok_or_else(|| LoaderError::InvalidDataset(root.to_path_buf()))
    }

    fn dataset_level_files(root: &Path) -> Vec<BidsFile> {
        DATASET_LEVEL_FILES
            .iter()
            .map(|name| root.join(name))
            .filter(|path| path.is_file())
            .map(|path| {
                let mut file = bids_filename::parse_bids_file(&path);
                file.modality = None;
                file
            })
            .collect()
    }

    fn load_dataset_shell(root: &Path) -> Result<Dataset> {
        let dataset_description = Self::validate_root(root)?;
        Ok(Dataset {
            root_path: root.to_path_buf(),
            subjects: Vec::new(),
            dataset_description,
            dataset_files: Self::dataset_level_files(root),
        })
    }

    /* Subject ids found as `sub-*` directories directly under `root`, sorted. */
    fn list_subject_ids(root: &Path) -> Vec<String> {
        list_dir(root)
            .into_iter()
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                subject_id_from_dir_name(&e.file_name().to_string_lossy()).map(str::to_string)
            })
            .collect()
    }

    fn index_pipelines(root: &Path) -> Vec<PipelineIndex> {
        let derivatives_dir = root.join(DERIVATIVES_DIR);
        if !derivatives_dir.is_dir() {
            return Vec::new();
        }
        list_dir(&derivatives_dir)
            .into_iter()
            .filter(|e| e.file_type().is_dir())
            .map(|e| {
                let pipeline_dir = e.path();
                let name = e.file_name().to_string_lossy().into_owned();
                let description =
                    read_json_object(&pipeline_dir.join(DATASET_DESCRIPTION)).unwrap_or_default();
                let subject_dirs = find_subject_dirs(pipeline_dir);
                log::debug!(
                    "DatasetLoader: Pipeline '{name}' has {} subject folders",
                    subject_dirs.len()
                );
                PipelineIndex {
                    name,
                    description,
                    subject_dirs,
                }
            })
            .collect()
    }

    fn scan_files(&self, container: &Path) -> Vec<BidsFile> {
        let mut files = Vec::new();
        for entry in list_dir(container) {
            let name = entry.file_name().to_string_lossy();
            if entry.file_type().is_file() {
                files.push(self.make_file(entry.path()));
            } else if entry.file_type().is_dir()
                && !name.starts_with(SUBJECT_PREFIX)
                && !name.starts_with(bids_filename::SESSION_PREFIX)
            {
                for inner in list_dir(entry.path()) {
                    if inner.file_type().is_file() {
                        files.push(self.make_file(inner.path()));
                    }
                }
            }
        }
        files
    }

    fn make_file(&self, path: &Path) -> BidsFile {
        let file = bids_filename::parse_bids_file(path);
        if self.options.load_sidecars {
            file.with_metadata()
        } else {
            file
        }
    }

    /*
     * Reads the files under a subject folder (raw or derivative). If the
     * folder has `ses-*` children, the files inside them form sessions and
     * only the files directly in the folder stay at subject level; otherwise
     * everything is subject level.
     */
    fn scan_subject_dir(&self, subject_dir: &Path) -> (Vec<Session>, Vec<BidsFile>) {
        let session_dirs: Vec<(String, PathBuf)> = list_dir(subject_dir)
            .into_iter()
            .filter(|e| e.file_type().is_dir())
            .filter_map(|e| {
                session_id_from_dir_name(&e.file_name().to_string_lossy())
                    .map(|id| (id.to_string(), e.path().to_path_buf()))
            })
            .collect();

        if session_dirs.is_empty() {
            return (Vec::new(), self.scan_files(subject_dir));
        }

        let sessions = session_dirs
            .into_iter()
            .map(|(id, dir)| Session {
                session_id: Some(id),
                files: self.scan_files(&dir),
            })
            .collect();
        let files = list_dir(subject_dir)
            .into_iter()
            .filter(|e| e.file_type().is_file())
            .map(|e| self.make_file(e.path()))
            .collect();
        (sessions, files)
    }

    fn build_subject(
        &self,
        root: &Path,
        subject_id: &str,
        participants: &BTreeMap<String, tsv::TsvRow>,
        pipelines: &[PipelineIndex],
    ) -> Subject {
        let subject_dir = root.join(format!("{SUBJECT_PREFIX}{subject_id}"));
        let (sessions, files) = self.scan_subject_dir(&subject_dir);

        let derivatives = pipelines
            .iter()
            .filter_map(|pipeline| {
                let dir = pipeline.subject_dirs.get(subject_id)?;
                let (sessions, files) = self.scan_subject_dir(dir);
                Some(Derivative {
                    pipeline_name: pipeline.name.clone(),
                    sessions,
                    files,
                    pipeline_description: pipeline.description.clone(),
                })
            })
            .collect();

        Subject {
            subject_id: subject_id.to_string(),
            sessions,
            files,
            derivatives,
            metadata: participants.get(subject_id).cloned().unwrap_or_default(),
            ieeg_data: None,
        }
    }

    fn load_ieeg_data(subject_dir: &Path) -> Option<IeegData> {
        let read_tables = |table: IeegTable| -> BTreeMap<PathBuf, Vec<tsv::TsvRow>> {
            tsv::find_ieeg_tsv_files(subject_dir, table)
                .into_iter()
                .map(|path| {
                    let rows = tsv::load_tsv_file(&path);
                    (path, rows)
                })
                .collect()
        };
        let data = IeegData {
            channels: read_tables(IeegTable::Channels),
            electrodes: read_tables(IeegTable::Electrodes),
        };
        if data.is_empty() { None } else { Some(data) }
    }
}

impl Default for CoreDatasetLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetLoaderOperations for CoreDatasetLoader {
    fn load(&self, root: &Path, progress: &mut ProgressReporter<'_>) -> Result<Dataset> {
        log::info!("DatasetLoader: Loading dataset at {root:?}");
        let mut dataset = Self::load_dataset_shell(root)?;
        let participants = tsv::load_participants(&root.join(PARTICIPANTS_TSV));
        let pipelines = Self::index_pipelines(root);
        let subject_ids = Self::list_subject_ids(root);
        let total = subject_ids.len();

        for (i, subject_id) in subject_ids.iter().enumerate() {
            let message = format!("Loading subject: {subject_id}");
            if progress.report(i + 1, total, &message) == ProgressAction::Cancel {
                log::info!("DatasetLoader: Loading cancelled at subject {subject_id}");
                return Err(LoaderError::Cancelled);
            }
            dataset
                .subjects
                .push(self.build_subject(root, subject_id, &participants, &pipelines));
        }

        if self.options.load_ieeg {
            for (i, subject) in dataset.subjects.iter_mut().enumerate() {
                let message = format!("Loading iEEG data: {}", subject.subject_id);
                if progress.report(i + 1, total, &message) == ProgressAction::Cancel {
                    log::info!("DatasetLoader: iEEG loading cancelled");
                    return Err(LoaderError::Cancelled);
                }
                let subject_dir = root.join(format!("{SUBJECT_PREFIX}{}", subject.subject_id));
                subject.ieeg_data = Self::load_ieeg_data(&subject_dir);
            }
        }

        log::info!(
            "DatasetLoader: Loaded {} subjects from {root:?}",
            dataset.subjects.len()
        );
        Ok(dataset)
    }

    fn load_lazy(&self, root: &Path) -> Result<Dataset> {
        log::info!("DatasetLoader: Loading dataset metadata at {root:?} (lazy)");
        Self::load_dataset_shell(root)
    }

    fn load_subject(&self, root: &Path, subject_id: &str) -> Result<Option<Subject>> {
        Self::validate_root(root)?;
        let subject_dir = root.join(format!("{SUBJECT_PREFIX}{subject_id}"));
        if !subject_dir.is_dir() {
            log::debug!("DatasetLoader: Subject folder {subject_dir:?} not found");
            return Ok(None);
        }
        log::debug!("DatasetLoader: Loading subject {subject_id}");
        let participants = tsv::load_participants(&root.join(PARTICIPANTS_TSV));
        let pipelines = Self::index_pipelines(root);
        let mut subject = self.build_subject(root, subject_id, &participants, &pipelines);
        if self.options.load_ieeg {
            subject.ieeg_data = Self::load_ieeg_data(&subject_dir);
        }
        Ok(Some(subject))
    }

    fn subject_ids(&self, root: &Path) -> Result<Vec<String>> {
        Self::validate_root(root)?;
        Ok(Self::list_subject_ids(root))
    }
}

/*
 * Lists the direct children of `dir` sorted by name, skipping hidden entries.
 * Unreadable entries are logged and skipped. Symlinks are followed so that
 * annexed datasets read like plain ones.
 */
fn list_dir(dir: &Path) -> Vec<DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("DatasetLoader: Skipping unreadable entry in {dir:?}: {err}");
                None
            }
        })
        .filter(|e| !is_hidden(e.file_name()))
        .collect()
}

/*
 * Finds `sub-<id>` folders anywhere below a pipeline folder. The first folder
 * found for an id (in sorted depth-first order) wins; the walk does not descend
 * into subject folders.
 */
fn find_subject_dirs(pipeline_dir: &Path) -> BTreeMap<String, PathBuf> {
    let mut subject_dirs = BTreeMap::new();
    let mut walker = WalkDir::new(pipeline_dir)
        .min_depth(1)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter();

    while let Some(entry) = walker.next() {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                log::warn!("DatasetLoader: Error walking {pipeline_dir:?}: {err}");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        if is_hidden(entry.file_name()) {
            walker.skip_current_dir();
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(id) = subject_id_from_dir_name(&name) {
            subject_dirs
                .entry(id.to_string())
                .or_insert_with(|| entry.path().to_path_buf());
            walker.skip_current_dir();
        }
    }
    subject_dirs
}
