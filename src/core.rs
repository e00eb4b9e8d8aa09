/*
 * This module consolidates the platform-agnostic logic of the crate.
 * It re-exports the dataset model, the loader (`DatasetLoaderOperations`),
 * the filter language and its editable tree, preset storage
 * (`PresetManagerOperations`), configuration (`ConfigManagerOperations`),
 * the export engine and the repository facade that ties them together.
 */
pub mod bids_filename;
pub mod checksum_utils;
pub mod config;
pub mod entity_registry;
pub mod export;
pub mod filter_tree;
pub mod filters;
pub mod loader;
pub mod models;
pub mod path_utils;
pub mod presets;
pub mod progress;
pub mod repository;
pub mod tsv;

#[cfg(test)]
mod workflow_tests;

// Re-export the data model
pub use models::{
    BidsFile, Dataset, DatasetSummary, Derivative, EntityMap, ExportReport, ExportRequest,
    ExportStats, IeegData, SelectedEntities, Session, SidecarMetadata, Subject,
};

pub use entity_registry::EntityRegistry;

// Re-export loader related items
pub use loader::{CoreDatasetLoader, DatasetLoaderOperations, LoaderError, LoaderOptions};

// Re-export filter related items
pub use filter_tree::{FilterTree, NodeId, NodeKind};
pub use filters::{
    CompareOperator, Condition, FilterError, FilterExpression, FilterMode, LogicalOperation,
    LogicalOperator,
};

// Re-export preset related items
pub use presets::{CorePresetManager, FilterPreset, PresetError, PresetManagerOperations};

// Re-export export related items
pub use export::{ExportError, calculate_export_stats, export_dataset, generate_file_list};

// Re-export config related items
pub use config::{BidsConfig, ConfigError, ConfigManagerOperations, CoreConfigManager};

pub use progress::{ProgressAction, ProgressReporter};

pub use repository::{DatasetRepository, RepositoryError};
