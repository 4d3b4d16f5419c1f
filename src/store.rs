use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::debug;

use crate::model::Sheet;

/// Per-user ledger store. Maps a user identity to a tabular CSV file
/// under the data directory; callers only ever see the key, never the
/// file naming.
pub struct LedgerStore {
    data_dir: PathBuf,
}

impl LedgerStore {
    pub fn new(data_dir: PathBuf) -> Result<LedgerStore> {
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;
        Ok(LedgerStore { data_dir })
    }

    fn ledger_path(&self, user: &str) -> PathBuf {
        self.data_dir.join(format!("ledger_{}.csv", sanitize_user(user)))
    }

    /// Load the accumulated ledger for a user. A store that was never
    /// created yields an empty sheet with the canonical columns; a store
    /// that exists but cannot be read is an error, never an empty
    /// fallback.
    pub fn load(&self, user: &str) -> Result<Sheet> {
        let path = self.ledger_path(user);
        if !path.exists() {
            debug!("no ledger for {}, starting empty", user);
            return Ok(Sheet::empty());
        }
        read_sheet_file(&path)
    }

    /// Append `incoming` rows after `existing` rows (column union, no
    /// dedup) and rewrite the user's ledger. The write goes through a
    /// temp file and a rename, so a reader never observes a partial
    /// table. The existing file is untouched on any failure.
    pub fn merge_and_persist(&self, user: &str, existing: &Sheet, incoming: &Sheet) -> Result<Sheet> {
        let merged = Sheet::union(existing, incoming);
        let path = self.ledger_path(user);
        write_sheet(&path, &merged)
            .with_context(|| format!("Failed to persist ledger {}", path.display()))?;
        debug!(
            "persisted {} rows ({} new) for {}",
            merged.rows.len(),
            incoming.rows.len(),
            user
        );
        Ok(merged)
    }
}

/// Keep user keys filesystem-safe: alphanumerics, dash and underscore
/// pass through, everything else becomes an underscore.
pub fn sanitize_user(user: &str) -> String {
    user.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Read a tabular CSV file into a sheet. A file that is not parsable as
/// tabular data is a structural fault and fails the whole read.
pub fn read_sheet_file(path: &Path) -> Result<Sheet> {
    let file = fs::File::open(path)
        .with_context(|| format!("Failed to open spreadsheet {}", path.display()))?;
    read_sheet(file).with_context(|| format!("Failed to parse spreadsheet {}", path.display()))
}

/// Read a tabular CSV stream into a sheet. Rows whose field count does
/// not match the header are rejected; the upload path relies on that to
/// refuse malformed files before any merge.
pub fn read_sheet<R: Read>(reader: R) -> Result<Sheet> {
    let mut csv_reader = csv::ReaderBuilder::new().from_reader(reader);

    let columns: Vec<String> = csv_reader
        .headers()
        .context("Failed to read header row")?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for record in csv_reader.records() {
        let record = record.context("Failed to read data row")?;
        rows.push(record.iter().map(|c| c.to_string()).collect());
    }

    Ok(Sheet { columns, rows })
}

fn write_sheet(path: &Path, sheet: &Sheet) -> Result<()> {
    let tmp_path = path.with_extension("csv.tmp");
    {
        let mut writer = csv::Writer::from_path(&tmp_path)
            .with_context(|| format!("Failed to open {} for writing", tmp_path.display()))?;
        writer.write_record(&sheet.columns)?;
        for row in &sheet.rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store() -> (tempfile::TempDir, LedgerStore) {
        let dir = tempdir().unwrap();
        let store = LedgerStore::new(dir.path().to_path_buf()).unwrap();
        (dir, store)
    }

    fn sheet_with(columns: &[&str], rows: &[&[&str]]) -> Sheet {
        Sheet {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        }
    }

    #[test]
    fn load_missing_ledger_is_empty_with_canonical_columns() {
        let (_dir, store) = store();
        let sheet = store.load("ana").unwrap();
        assert_eq!(sheet, Sheet::empty());
        assert_eq!(sheet.columns[0], "protocol_id");
    }

    #[test]
    fn merge_then_load_round_trips_in_order() {
        let (_dir, store) = store();
        let existing = store.load("ana").unwrap();
        let incoming = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
            ],
            &[
                &["1", "ana", "Finished", "00:10:00", "01/01/2024 09:00:00"],
                &["2", "ana", "Cancelled", "00:20:00", "01/01/2024 10:00:00"],
            ],
        );

        store.merge_and_persist("ana", &existing, &incoming).unwrap();

        let second = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
            ],
            &[&["3", "bia", "Finished", "00:05:00", "02/01/2024 09:00:00"]],
        );
        let loaded = store.load("ana").unwrap();
        store.merge_and_persist("ana", &loaded, &second).unwrap();

        let finished = store.load("ana").unwrap();
        assert_eq!(finished.rows.len(), 3);
        assert_eq!(finished.rows[0][0], "1");
        assert_eq!(finished.rows[1][0], "2");
        assert_eq!(finished.rows[2][0], "3");
    }

    #[test]
    fn merge_preserves_unknown_columns() {
        let (_dir, store) = store();
        let existing = store.load("ana").unwrap();
        let incoming = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
                "queue",
            ],
            &[&["1", "ana", "Finished", "00:10:00", "01/01/2024 09:00:00", "north"]],
        );

        store.merge_and_persist("ana", &existing, &incoming).unwrap();
        let loaded = store.load("ana").unwrap();
        assert!(loaded.columns.contains(&"queue".to_string()));
        assert_eq!(loaded.rows[0].last().unwrap(), "north");
    }

    #[test]
    fn upload_missing_task_type_column_still_merges() {
        let (_dir, store) = store();
        let existing = store.load("ana").unwrap();
        // canonical columns only, no task_type
        let incoming = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
            ],
            &[&["1", "ana", "Finished", "00:10:00", "01/01/2024 09:00:00"]],
        );
        let merged = store.merge_and_persist("ana", &existing, &incoming).unwrap();
        assert_eq!(merged.rows.len(), 1);
        assert!(crate::metrics::task_type_breakdown(&crate::model::normalize(&merged), "ana").is_none());
    }

    #[test]
    fn unparsable_upload_is_rejected() {
        // ragged row: three header columns, two cells
        let bad = "a,b,c\n1,2\n";
        assert!(read_sheet(bad.as_bytes()).is_err());
    }

    #[test]
    fn rejected_upload_leaves_the_store_untouched() {
        let (dir, store) = store();
        let existing = store.load("ana").unwrap();
        let incoming = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
            ],
            &[&["1", "ana", "Finished", "00:10:00", "01/01/2024 09:00:00"]],
        );
        store.merge_and_persist("ana", &existing, &incoming).unwrap();
        let before = fs::read_to_string(dir.path().join("ledger_ana.csv")).unwrap();

        // the upload never parses, so no merge is attempted
        assert!(read_sheet("a,b\n1\n".as_bytes()).is_err());

        let after = fs::read_to_string(dir.path().join("ledger_ana.csv")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn user_keys_are_isolated_and_sanitized() {
        let (dir, store) = store();
        let incoming = sheet_with(
            &[
                "protocol_id",
                "completed_by",
                "status",
                "handling_time",
                "task_started_at",
            ],
            &[&["1", "ana", "Finished", "00:10:00", "01/01/2024 09:00:00"]],
        );
        let empty = Sheet::empty();
        store.merge_and_persist("ana maria", &empty, &incoming).unwrap();
        assert!(dir.path().join("ledger_ana_maria.csv").exists());

        // the other user still loads empty
        assert!(store.load("bia").unwrap().rows.is_empty());
        assert_eq!(sanitize_user("../x"), "___x");
    }
}
