use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};

use super::checksum_utils;
use super::loader::{DATASET_DESCRIPTION, DERIVATIVES_DIR};
use super::models::{
    BidsFile, Dataset, ExportReport, ExportRequest, ExportStats, SelectedEntities, Session,
    Subject,
};
use super::progress::{ProgressAction, ProgressReporter};
use super::tsv::{PARTICIPANTS_TSV, participant_id, tsv_reader_builder};

/*
 * Export of a filtered subset of a dataset into a new directory that is
 * itself a BIDS dataset.
 *
 * The selection is resolved into a sorted, de-duplicated list of source
 * files (data files plus their JSON sidecars, and files of the selected
 * derivative pipelines). Files are copied with their path relative to the
 * dataset root preserved. Dataset-level metadata, the descriptors of the
 * selected pipelines and a `participants.tsv` restricted to the exported
 * subjects complete the output.
 *
 * A single file that fails to copy is logged and reported; it does not stop
 * the export.
 */

/* Root-level files copied verbatim when present. */
pub const DATASET_METADATA_FILES: &[&str] = &[
    DATASET_DESCRIPTION,
    "README",
    "README.md",
    "README.txt",
    "README.rst",
    "CHANGES",
    "CHANGES.md",
    "LICENSE",
    "participants.json",
];

#[derive(Debug)]
pub enum ExportError {
    DestinationParentMissing(PathBuf),
    NoFilesMatched,
    Io(io::Error),
    Cancelled { files_copied: usize },
}

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportError::DestinationParentMissing(p) => {
                write!(f, "Parent directory of export destination does not exist: {p:?}")
            }
            ExportError::NoFilesMatched => write!(f, "No files match the selected criteria"),
            ExportError::Io(e) => write!(f, "I/O error during export: {e}"),
            ExportError::Cancelled { files_copied } => {
                write!(f, "Export cancelled after {files_copied} files")
            }
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExportError>;

/*
 * Whether a session passes the `ses` selection. An empty list excludes every
 * file; a non-empty list does not constrain files outside any session.
 */
fn session_selected(selection: &SelectedEntities, session_id: Option<&str>) -> bool {
    match selection.allowed_values("ses") {
        None => true,
        Some([]) => false,
        Some(allowed) => session_id.is_none_or(|id| allowed.iter().any(|a| a == id)),
    }
}

fn subject_selected(selection: &SelectedEntities, subject_id: &str) -> bool {
    selection
        .allowed_values("sub")
        .is_none_or(|allowed| allowed.iter().any(|a| a == subject_id))
}

/*
 * Decides whether one file of `subject_id` (in `session_id`, if any) is part
 * of the selection. Subject and session come from the folder the file was
 * found in. Every other selected entity constrains the file only if the file
 * carries that entity.
 */
pub fn file_matches_entities(
    file: &BidsFile,
    subject_id: &str,
    session_id: Option<&str>,
    selection: &SelectedEntities,
) -> bool {
    if !subject_selected(selection, subject_id) || !session_selected(selection, session_id) {
        return false;
    }
    file.entities
        .iter()
        .filter(|(key, _)| *key != "sub" && *key != "ses")
        .all(|(key, value)| match selection.allowed_values(key) {
            Some(allowed) => allowed.iter().any(|a| a == value),
            None => true,
        })
}

struct ExportPlan {
    files: BTreeSet<PathBuf>,
    subject_ids: BTreeSet<String>,
}

fn add_matching(
    plan: &mut ExportPlan,
    subject_id: &str,
    session_id: Option<&str>,
    files: &[BidsFile],
    selection: &SelectedEntities,
) {
    for file in files {
        if !file_matches_entities(file, subject_id, session_id, selection) {
            continue;
        }
        plan.files.insert(file.path.clone());
        plan.subject_ids.insert(subject_id.to_string());
        if let Some(sidecar) = file.sidecar_path()
            && sidecar.is_file()
        {
            plan.files.insert(sidecar);
        }
    }
}

fn add_subject_files(
    plan: &mut ExportPlan,
    subject_id: &str,
    files: &[BidsFile],
    sessions: &[Session],
    selection: &SelectedEntities,
) {
    add_matching(plan, subject_id, None, files, selection);
    for session in sessions {
        add_matching(
            plan,
            subject_id,
            session.session_id.as_deref(),
            &session.files,
            selection,
        );
    }
}

fn build_plan(dataset: &Dataset, selection: &SelectedEntities) -> ExportPlan {
    let mut plan = ExportPlan {
        files: BTreeSet::new(),
        subject_ids: BTreeSet::new(),
    };
    for subject in &dataset.subjects {
        let Subject {
            subject_id,
            sessions,
            files,
            derivatives,
            ..
        } = subject;
        add_subject_files(&mut plan, subject_id, files, sessions, selection);
        for derivative in derivatives
            .iter()
            .filter(|d| selection.includes_pipeline(&d.pipeline_name))
        {
            add_subject_files(
                &mut plan,
                subject_id,
                &derivative.files,
                &derivative.sessions,
                selection,
            );
        }
    }
    plan
}

/* Source paths selected for export, sorted and without duplicates. */
pub fn generate_file_list(dataset: &Dataset, selection: &SelectedEntities) -> BTreeSet<PathBuf> {
    build_plan(dataset, selection).files
}

/* Number and total size of the files an export would copy. Unreadable files count 0 bytes. */
pub fn calculate_export_stats(dataset: &Dataset, selection: &SelectedEntities) -> ExportStats {
    let files = generate_file_list(dataset, selection);
    let total_size = files
        .iter()
        .map(|p| fs::metadata(p).map(|m| m.len()).unwrap_or(0))
        .sum();
    ExportStats {
        file_count: files.len(),
        total_size,
    }
}

/*
 * Copies each file to `destination_root` under its path relative to
 * `source_root`. Returns the files that could not be copied; reports one
 * progress step per file and stops with `Cancelled` when asked to.
 */
pub fn copy_file_tree(
    files: &BTreeSet<PathBuf>,
    source_root: &Path,
    destination_root: &Path,
    progress: &mut ProgressReporter<'_>,
) -> Result<Vec<PathBuf>> {
    let total = files.len();
    let mut failed = Vec::new();
    for (i, source) in files.iter().enumerate() {
        if let Err(e) = copy_relative(source, source_root, destination_root) {
            log::warn!("Export: Failed to copy {source:?}: {e}");
            failed.push(source.clone());
        }
        let message = source.to_string_lossy();
        if progress.report(i + 1, total, &message) == ProgressAction::Cancel {
            log::info!("Export: Cancelled after {} of {total} files", i + 1);
            return Err(ExportError::Cancelled {
                files_copied: i + 1 - failed.len(),
            });
        }
    }
    Ok(failed)
}

fn copy_relative(source: &Path, source_root: &Path, destination_root: &Path) -> io::Result<u64> {
    let relative = source.strip_prefix(source_root).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{source:?} is not inside {source_root:?}"),
        )
    })?;
    let destination = destination_root.join(relative);
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, destination)
}

/*
 * Writes `participants.tsv` keeping the header and the rows whose first
 * column names one of `subject_ids` (with or without the `sub-` prefix).
 * Rows the participant loader would reject are dropped. Returns the number of
 * data rows written, or `None` if the source file does not exist.
 */
pub fn create_participants_tsv(
    source: &Path,
    subject_ids: &BTreeSet<String>,
    output: &Path,
) -> io::Result<Option<usize>> {
    if !source.is_file() {
        return Ok(None);
    }
    let mut reader = tsv_reader_builder().from_path(source)?;
    let headers = reader.headers()?.clone();
    let mut writer = WriterBuilder::new()
        .delimiter(b'\t')
        .quote_style(QuoteStyle::Never)
        .from_path(output)?;
    writer.write_record(&headers)?;

    let mut rows = 0;
    for (line, record) in reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                log::warn!(
                    "Export: Dropping malformed participant row {} in {source:?}: {e}",
                    line + 2
                );
                continue;
            }
        };
        if record
            .get(0)
            .is_some_and(|cell| subject_ids.contains(participant_id(cell)))
        {
            writer.write_record(&record)?;
            rows += 1;
        }
    }
    writer.flush()?;
    log::debug!("Export: Wrote {rows} participant rows to {output:?}");
    Ok(Some(rows))
}

fn copy_if_present(source: &Path, destination: &Path) -> bool {
    if !source.is_file() {
        return false;
    }
    let result = destination
        .parent()
        .map_or(Ok(()), fs::create_dir_all)
        .and_then(|_| fs::copy(source, destination));
    match result {
        Ok(_) => true,
        Err(e) => {
            log::warn!("Export: Failed to copy metadata file {source:?}: {e}");
            false
        }
    }
}

fn verify_copies(files: &BTreeSet<PathBuf>, source_root: &Path, output: &Path) -> Vec<PathBuf> {
    files
        .iter()
        .filter(|source| {
            let Ok(relative) = source.strip_prefix(source_root) else {
                return true;
            };
            match checksum_utils::files_match(source, &output.join(relative)) {
                Ok(true) => false,
                Ok(false) => {
                    log::warn!("Export: Checksum mismatch for {source:?}");
                    true
                }
                Err(e) => {
                    log::warn!("Export: Could not verify {source:?}: {e}");
                    true
                }
            }
        })
        .cloned()
        .collect()
}

/*
 * Runs a complete export. Fails before writing anything if the destination's
 * parent directory is missing or if nothing matches the selection.
 */
pub fn export_dataset(
    request: &ExportRequest<'_>,
    progress: &mut ProgressReporter<'_>,
) -> Result<ExportReport> {
    let dataset = request.source_dataset;
    let output = request.output_path.as_path();
    let source_root = dataset.root_path.as_path();

    if let Some(parent) = output.parent()
        && !parent.as_os_str().is_empty()
        && !parent.is_dir()
    {
        return Err(ExportError::DestinationParentMissing(parent.to_path_buf()));
    }

    let plan = build_plan(dataset, &request.selected_entities);
    if plan.files.is_empty() {
        return Err(ExportError::NoFilesMatched);
    }
    log::info!(
        "Export: Exporting {} files for {} subjects to {output:?}",
        plan.files.len(),
        plan.subject_ids.len()
    );

    fs::create_dir_all(output)?;
    let mut failed_files = copy_file_tree(&plan.files, source_root, output, progress)?;

    let mut metadata_files_copied = DATASET_METADATA_FILES
        .iter()
        .filter(|name| copy_if_present(&source_root.join(name), &output.join(name)))
        .count();
    for pipeline in &request.selected_entities.derivative_pipelines {
        let relative = Path::new(DERIVATIVES_DIR)
            .join(pipeline)
            .join(DATASET_DESCRIPTION);
        if copy_if_present(&source_root.join(&relative), &output.join(&relative)) {
            metadata_files_copied += 1;
        }
    }

    let participants_source = source_root.join(PARTICIPANTS_TSV);
    let files_copied = plan.files.len() - failed_files.len();
    let participants_written = match create_participants_tsv(
        &participants_source,
        &plan.subject_ids,
        &output.join(PARTICIPANTS_TSV),
    ) {
        Ok(rows) => rows.unwrap_or(0),
        Err(e) => {
            log::warn!(
                "Export: Failed to write participant table from {participants_source:?}: {e}"
            );
            failed_files.push(participants_source);
            0
        }
    };

    let verification_failures = if request.verify {
        verify_copies(&plan.files, source_root, output)
    } else {
        Vec::new()
    };

    let report = ExportReport {
        output_path: output.to_path_buf(),
        files_copied,
        failed_files,
        metadata_files_copied,
        participants_written,
        verification_failures,
    };
    log::info!(
        "Export: Finished, {} files copied, {} failed",
        report.files_copied,
        report.failed_files.len()
    );
    Ok(report)
}
