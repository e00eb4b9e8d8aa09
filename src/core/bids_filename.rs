/*
 * Parsing of BIDS filenames into entities, suffix and extension.
 *
 * A BIDS filename is a sequence of `key-value` segments joined by `_`,
 * optionally followed by a suffix segment without a dash, and an extension
 * that may span several dots (`.nii.gz`). Parsing is total: names that do not
 * follow the convention simply yield fewer entities.
 */
use std::path::{Path, PathBuf};

use super::models::{BidsFile, EntityMap, SidecarMetadata};

pub const SUBJECT_PREFIX: &str = "sub-";
pub const SESSION_PREFIX: &str = "ses-";
pub const SIDECAR_EXTENSION: &str = ".json";

// Longest first so that `.dtseries.nii` wins over `.nii`.
const COMPOUND_EXTENSIONS: &[&str] = &[
    ".dtseries.nii",
    ".func.gii",
    ".surf.gii",
    ".ome.tiff",
    ".ome.zarr",
    ".nii.gz",
    ".tsv.gz",
];

/* Splits a file name into stem and extension (extension keeps its leading dot). */
pub fn split_extension(file_name: &str) -> (&str, &str) {
    let lower = file_name.to_ascii_lowercase();
    for ext in COMPOUND_EXTENSIONS {
        if lower.ends_with(ext) && file_name.len() > ext.len() {
            let cut = file_name.len() - ext.len();
            return (&file_name[..cut], &file_name[cut..]);
        }
    }
    match file_name.rfind('.') {
        Some(idx) if idx > 0 => (&file_name[..idx], &file_name[idx..]),
        _ => (file_name, ""),
    }
}

/*
 * Parses the stem of a filename. Every `key-value` segment with a non-empty
 * key and value becomes an entity. The last segment becomes the suffix if it
 * contains no dash.
 */
pub fn parse_stem(stem: &str) -> (EntityMap, Option<String>) {
    let mut entities = EntityMap::new();
    let mut suffix = None;
    let segments: Vec<&str> = stem.split('_').collect();
    let last_index = segments.len().saturating_sub(1);

    for (i, segment) in segments.iter().enumerate() {
        match segment.split_once('-') {
            Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                entities.insert(key, value);
            }
            Some(_) => {
                log::trace!("BidsFilename: Ignoring malformed segment '{segment}' in '{stem}'");
            }
            None if i == last_index && !segment.is_empty() => {
                suffix = Some(segment.to_string());
            }
            None => {}
        }
    }
    (entities, suffix)
}

/*
 * The modality of a file is the name of its parent directory, unless that
 * directory is itself a subject or session directory.
 */
pub fn modality_from_path(path: &Path) -> Option<String> {
    let parent_name = path.parent()?.file_name()?.to_string_lossy();
    if parent_name.starts_with(SUBJECT_PREFIX) || parent_name.starts_with(SESSION_PREFIX) {
        None
    } else {
        Some(parent_name.into_owned())
    }
}

/* Builds an unloaded `BidsFile` for a path found on disk. */
pub fn parse_bids_file(path: &Path) -> BidsFile {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (stem, extension) = split_extension(&file_name);
    let (entities, suffix) = parse_stem(stem);
    BidsFile {
        path: path.to_path_buf(),
        modality: modality_from_path(path),
        suffix,
        extension: extension.to_string(),
        entities,
        metadata: SidecarMetadata::Unloaded,
    }
}

/*
 * The sidecar of `data.nii.gz` is `data.json` in the same directory. A JSON
 * file is its own metadata and has no sidecar.
 */
pub fn sidecar_path(path: &Path) -> Option<PathBuf> {
    let file_name = path.file_name()?.to_string_lossy();
    let (stem, extension) = split_extension(&file_name);
    if extension.eq_ignore_ascii_case(SIDECAR_EXTENSION) || stem.is_empty() {
        return None;
    }
    Some(path.with_file_name(format!("{stem}{SIDECAR_EXTENSION}")))
}

/* `sub-01` yields `01`; anything else yields `None`. */
pub fn subject_id_from_dir_name(name: &str) -> Option<&str> {
    name.strip_prefix(SUBJECT_PREFIX).filter(|id| !id.is_empty())
}

pub fn session_id_from_dir_name(name: &str) -> Option<&str> {
    name.strip_prefix(SESSION_PREFIX).filter(|id| !id.is_empty())
}
