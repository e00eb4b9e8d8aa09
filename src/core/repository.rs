/*
 * The repository is the single entry point an application holds for one open
 * dataset. It owns the loader, remembers the loaded `Dataset`, and in lazy
 * mode loads subjects on first access, keeping them in the order in which
 * their folders appear on disk.
 */
use std::path::{Path, PathBuf};

use super::config::BidsConfig;
use super::entity_registry::EntityRegistry;
use super::filters::{FilterExpression, apply_filter};
use super::loader::{CoreDatasetLoader, DatasetLoaderOperations, LoaderError, LoaderOptions};
use super::models::{Dataset, DatasetSummary, Subject};
use super::progress::{ProgressAction, ProgressReporter};

#[derive(Debug)]
pub enum RepositoryError {
    Loader(LoaderError),
    NotLoaded,
}

impl From<LoaderError> for RepositoryError {
    fn from(err: LoaderError) -> Self {
        RepositoryError::Loader(err)
    }
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::Loader(e) => write!(f, "{e}"),
            RepositoryError::NotLoaded => write!(f, "No dataset has been loaded yet"),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Loader(e) => Some(e),
            RepositoryError::NotLoaded => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RepositoryError>;

impl From<&BidsConfig> for LoaderOptions {
    fn from(config: &BidsConfig) -> Self {
        LoaderOptions {
            load_sidecars: config.load_sidecars_eagerly,
            load_ieeg: config.load_ieeg_data,
        }
    }
}

pub struct DatasetRepository {
    root_path: PathBuf,
    lazy: bool,
    loader: Box<dyn DatasetLoaderOperations>,
    registry: EntityRegistry,
    dataset: Option<Dataset>,
    subject_ids: Vec<String>,
}

impl DatasetRepository {
    pub fn new(root_path: impl Into<PathBuf>, config: &BidsConfig) -> Self {
        let loader = CoreDatasetLoader::with_options(LoaderOptions::from(config));
        Self::with_loader(root_path, config.lazy_loading, Box::new(loader))
    }

    pub fn with_loader(
        root_path: impl Into<PathBuf>,
        lazy: bool,
        loader: Box<dyn DatasetLoaderOperations>,
    ) -> Self {
        DatasetRepository {
            root_path: root_path.into(),
            lazy,
            loader,
            registry: EntityRegistry::bids(),
            dataset: None,
            subject_ids: Vec::new(),
        }
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn is_loaded(&self) -> bool {
        self.dataset.is_some()
    }

    /*
     * Loads the dataset: everything in eager mode, only dataset-level data
     * and the subject id list in lazy mode. A failed load leaves the
     * previously loaded dataset in place.
     */
    pub fn load(&mut self, progress: &mut ProgressReporter<'_>) -> Result<&Dataset> {
        let (dataset, subject_ids) = if self.lazy {
            let dataset = self.loader.load_lazy(&self.root_path)?;
            let ids = self.loader.subject_ids(&self.root_path)?;
            (dataset, ids)
        } else {
            let dataset = self.loader.load(&self.root_path, progress)?;
            let ids = dataset.subject_ids();
            (dataset, ids)
        };
        log::info!(
            "DatasetRepository: Opened {:?} with {} subjects{}",
            self.root_path,
            subject_ids.len(),
            if self.lazy { " (lazy)" } else { "" }
        );
        self.subject_ids = subject_ids;
        Ok(self.dataset.insert(dataset))
    }

    pub fn reload(&mut self, progress: &mut ProgressReporter<'_>) -> Result<&Dataset> {
        log::debug!("DatasetRepository: Reloading {:?}", self.root_path);
        self.load(progress)
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    /* All subject ids of the dataset, including subjects not yet loaded. */
    pub fn subject_ids(&self) -> &[String] {
        &self.subject_ids
    }

    /*
     * Returns a subject, loading it first if the repository is lazy and the
     * subject has not been read yet. `None` for unknown ids.
     */
    pub fn get_subject(&mut self, subject_id: &str) -> Result<Option<&Subject>> {
        let dataset = self.dataset.as_mut().ok_or(RepositoryError::NotLoaded)?;
        if dataset.get_subject(subject_id).is_none()
            && self.lazy
            && self.subject_ids.iter().any(|id| id == subject_id)
            && let Some(subject) = self.loader.load_subject(&self.root_path, subject_id)?
        {
            dataset.subjects.push(subject);
            let order = &self.subject_ids;
            dataset
                .subjects
                .sort_by_key(|s| order.iter().position(|id| *id == s.subject_id));
        }
        Ok(self
            .dataset
            .as_ref()
            .and_then(|d| d.get_subject(subject_id)))
    }

    /* In lazy mode, loads every subject not read yet. */
    pub fn load_all_subjects(&mut self, progress: &mut ProgressReporter<'_>) -> Result<&Dataset> {
        if self.dataset.is_none() {
            return Err(RepositoryError::NotLoaded);
        }
        let ids = self.subject_ids.clone();
        let total = ids.len();
        for (i, id) in ids.iter().enumerate() {
            let message = format!("Loading subject: {id}");
            if progress.report(i + 1, total, &message) == ProgressAction::Cancel {
                return Err(LoaderError::Cancelled.into());
            }
            self.get_subject(id)?;
        }
        self.dataset.as_ref().ok_or(RepositoryError::NotLoaded)
    }

    /* The loaded subjects the expression matches. */
    pub fn query(&self, expression: &FilterExpression) -> Result<Dataset> {
        let dataset = self.dataset.as_ref().ok_or(RepositoryError::NotLoaded)?;
        Ok(apply_filter(dataset, expression))
    }

    pub fn summary(&self) -> Result<DatasetSummary> {
        let dataset = self.dataset.as_ref().ok_or(RepositoryError::NotLoaded)?;
        let mut summary = dataset.summarize(&self.registry);
        summary.subject_count = self.subject_ids.len().max(dataset.subjects.len());
        Ok(summary)
    }
}
