/*
 * Reading of the tab-separated tables a BIDS dataset carries:
 * `participants.tsv` at the root and the iEEG `*_channels.tsv` /
 * `*_electrodes.tsv` side tables inside subject folders.
 *
 * Table reads never fail: a missing or unreadable table yields no rows, and
 * rows whose field count does not match the header are skipped.
 */
use csv::{ReaderBuilder, StringRecord, Trim};
use glob::Pattern;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::bids_filename::SUBJECT_PREFIX;

pub type TsvRow = BTreeMap<String, String>;

pub const PARTICIPANTS_TSV: &str = "participants.tsv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IeegTable {
    Channels,
    Electrodes,
}

impl IeegTable {
    pub fn file_pattern(self) -> &'static str {
        match self {
            IeegTable::Channels => "*_channels.tsv",
            IeegTable::Electrodes => "*_electrodes.tsv",
        }
    }
}

/* Tab-delimited, unquoted, trimmed, with a header and a fixed field count. */
pub fn tsv_reader_builder() -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder
        .delimiter(b'\t')
        .quoting(false)
        .has_headers(true)
        .flexible(false)
        .trim(Trim::All);
    builder
}

fn zip_row(headers: &StringRecord, record: &StringRecord) -> TsvRow {
    headers
        .iter()
        .zip(record.iter())
        .map(|(h, v)| (h.to_string(), v.to_string()))
        .collect()
}

/* Loads every well-formed row of a TSV file as a column -> value map. */
pub fn load_tsv_file(path: &Path) -> Vec<TsvRow> {
    let mut reader = match tsv_reader_builder().from_path(path) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Tsv: Failed to open {path:?}: {e}");
            return Vec::new();
        }
    };
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            log::warn!("Tsv: Failed to read header of {path:?}: {e}");
            return Vec::new();
        }
    };

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        match record {
            Ok(record) => rows.push(zip_row(&headers, &record)),
            Err(e) => log::warn!("Tsv: Skipping malformed row {} in {path:?}: {e}", line + 2),
        }
    }
    log::trace!("Tsv: Loaded {} rows from {path:?}", rows.len());
    rows
}

/* Strips the `sub-` prefix from a participant id cell. */
pub fn participant_id(cell: &str) -> &str {
    let trimmed = cell.trim();
    trimmed.strip_prefix(SUBJECT_PREFIX).unwrap_or(trimmed)
}

/*
 * Loads `participants.tsv` keyed by subject id (without the `sub-` prefix).
 * The id is taken from the first column; the remaining columns become the
 * subject's metadata. A missing file yields an empty table.
 */
pub fn load_participants(path: &Path) -> BTreeMap<String, TsvRow> {
    let mut participants = BTreeMap::new();
    if !path.is_file() {
        log::debug!("Tsv: No participants table at {path:?}");
        return participants;
    }

    let mut reader = match tsv_reader_builder().from_path(path) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("Tsv: Failed to open participants table {path:?}: {e}");
            return participants;
        }
    };
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(e) => {
            log::warn!("Tsv: Failed to read participants header in {path:?}: {e}");
            return participants;
        }
    };

    for record in reader.records() {
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                log::warn!("Tsv: Skipping malformed participants row in {path:?}: {e}");
                continue;
            }
        };
        let Some(first) = record.get(0) else {
            continue;
        };
        let id = participant_id(first);
        if id.is_empty() {
            continue;
        }
        let metadata: TsvRow = headers
            .iter()
            .zip(record.iter())
            .skip(1)
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        participants.entry(id.to_string()).or_insert(metadata);
    }
    log::debug!(
        "Tsv: Loaded {} participants from {path:?}",
        participants.len()
    );
    participants
}

/*
 * Recursively finds the iEEG tables of one kind under a subject directory,
 * in sorted path order. Hidden entries are skipped.
 */
pub fn find_ieeg_tsv_files(subject_dir: &Path, table: IeegTable) -> Vec<PathBuf> {
    let pattern = match Pattern::new(table.file_pattern()) {
        Ok(p) => p,
        Err(e) => {
            log::error!("Tsv: Invalid table pattern {:?}: {e}", table.file_pattern());
            return Vec::new();
        }
    };

    WalkDir::new(subject_dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.depth() == 0 || !is_hidden(entry.file_name()))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(err) => {
                log::warn!("Tsv: Error while searching {subject_dir:?}: {err}");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| pattern.matches(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .collect()
}

pub fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_tsv_file_trims_and_skips_malformed_rows() -> std::io::Result<()> {
        // Arrange
        let dir = tempdir()?;
        let path = dir.path().join("sub-01_channels.tsv");
        fs::write(
            &path,
            "name\ttype\tstatus\nLA1 \tSEEG\tgood\nLA2\tSEEG\nLA3\tECOG\tbad\n",
        )?;

        // Act
        let rows = load_tsv_file(&path);

        // Assert
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").map(String::as_str), Some("LA1"));
        assert_eq!(rows[1].get("type").map(String::as_str), Some("ECOG"));
        Ok(())
    }

    #[test]
    fn test_load_tsv_file_missing_file_yields_no_rows() {
        let dir = tempdir().unwrap();
        assert!(load_tsv_file(&dir.path().join("nope.tsv")).is_empty());
    }

    #[test]
    fn test_load_participants_keys_by_id_without_prefix() -> std::io::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(PARTICIPANTS_TSV);
        fs::write(
            &path,
            "participant_id\tage\tsex\nsub-01\t25\tM\nsub-02\t30\nsub-03\t35\tF\n",
        )?;

        let participants = load_participants(&path);

        assert_eq!(participants.len(), 2);
        let p1 = &participants["01"];
        assert_eq!(p1.get("age").map(String::as_str), Some("25"));
        assert_eq!(p1.get("sex").map(String::as_str), Some("M"));
        assert!(!p1.contains_key("participant_id"));
        assert!(participants.contains_key("03"));
        Ok(())
    }

    #[test]
    fn test_participant_id_prefix_is_optional() {
        assert_eq!(participant_id("sub-07"), "07");
        assert_eq!(participant_id(" 07 "), "07");
    }

    #[test]
    fn test_find_ieeg_tsv_files_recurses_and_filters_by_kind() -> std::io::Result<()> {
        let dir = tempdir()?;
        let ieeg = dir.path().join("ses-1").join("ieeg");
        fs::create_dir_all(&ieeg)?;
        fs::create_dir_all(dir.path().join(".hidden"))?;
        fs::write(ieeg.join("sub-01_ses-1_channels.tsv"), "name\n")?;
        fs::write(ieeg.join("sub-01_ses-1_electrodes.tsv"), "name\n")?;
        fs::write(dir.path().join(".hidden").join("x_channels.tsv"), "name\n")?;

        let channels = find_ieeg_tsv_files(dir.path(), IeegTable::Channels);
        let electrodes = find_ieeg_tsv_files(dir.path(), IeegTable::Electrodes);

        assert_eq!(channels, vec![ieeg.join("sub-01_ses-1_channels.tsv")]);
        assert_eq!(electrodes, vec![ieeg.join("sub-01_ses-1_electrodes.tsv")]);
        Ok(())
    }
}
