//! Row-oriented tabular store backed by CSV files.
//!
//! A [`Dataset`] is an ordered set of column names plus an ordered sequence
//! of rows; every row has exactly the dataset's columns, with missing values
//! represented as empty strings. Saves are atomic: write to a temp file in
//! the destination directory, then rename over the target, so a reader never
//! observes a partially written file.

use std::collections::HashMap;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::debug;

use rostermill_shared::{Result, RostermillError};

/// Sentinel check: trimmed-empty, `N/A`, and `Not specified` are all treated
/// as "no data" during eligibility checks. Stored values are never rewritten
/// to a canonical form.
pub fn is_missing(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("not specified")
}

/// An in-memory CSV dataset keyed by column name.
#[derive(Debug, Clone)]
pub struct Dataset {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Dataset {
    /// Create an empty dataset with the given schema.
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Load a dataset from a CSV file with a header row.
    ///
    /// Fails with [`RostermillError::NotFound`] if the path is absent. Short
    /// records are padded with empty strings and long records truncated so
    /// the row/schema invariant holds.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(RostermillError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| RostermillError::Csv(format!("{}: {e}", path.display())))?;

        let columns: Vec<String> = reader
            .headers()
            .map_err(|e| RostermillError::Csv(format!("{}: {e}", path.display())))?
            .iter()
            .map(str::to_string)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| RostermillError::Csv(format!("{}: {e}", path.display())))?;
            let mut values: Vec<String> = record.iter().map(str::to_string).collect();
            values.resize(columns.len(), String::new());
            rows.push(values);
        }

        debug!(path = %path.display(), rows = rows.len(), columns = columns.len(), "dataset loaded");

        Ok(Self { columns, rows })
    }

    /// Atomically save the dataset to `path`: temp file in the same
    /// directory, then rename over the destination. Creates parent
    /// directories on demand.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir).map_err(|e| RostermillError::io(dir, e))?;

        let tmp = NamedTempFile::new_in(dir).map_err(|e| RostermillError::io(dir, e))?;
        {
            let mut writer = csv::Writer::from_writer(tmp.as_file());
            writer
                .write_record(&self.columns)
                .map_err(|e| RostermillError::Csv(e.to_string()))?;
            for row in &self.rows {
                writer
                    .write_record(row)
                    .map_err(|e| RostermillError::Csv(e.to_string()))?;
            }
            writer
                .flush()
                .map_err(|e| RostermillError::io(path, e))?;
        }
        tmp.persist(path)
            .map_err(|e| RostermillError::io(path, e.error))?;

        debug!(path = %path.display(), rows = self.rows.len(), "dataset saved");

        Ok(())
    }

    /// Column names, in file order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the dataset has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a column by name, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Add a column to the schema, back-filling every existing row with the
    /// empty string. Returns `true` if the column was added.
    pub fn ensure_column(&mut self, name: &str) -> bool {
        if self.column_index(name).is_some() {
            return false;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        true
    }

    /// Fail with a schema error unless every named column is present.
    pub fn require_columns(&self, names: &[&str]) -> Result<()> {
        let missing: Vec<&str> = names
            .iter()
            .copied()
            .filter(|n| self.column_index(n).is_none())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(RostermillError::schema(format!(
                "missing required columns: {}",
                missing.join(", ")
            )))
        }
    }

    /// Value at (row, column), or `""` when the column is absent.
    pub fn get(&self, row: usize, column: &str) -> &str {
        self.column_index(column)
            .and_then(|c| self.rows.get(row).map(|r| r[c].as_str()))
            .unwrap_or("")
    }

    /// Set the value at (row, column). Returns `false` when the row or
    /// column does not exist.
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) -> bool {
        match (self.column_index(column), self.rows.get_mut(row)) {
            (Some(c), Some(r)) => {
                r[c] = value.into();
                true
            }
            _ => false,
        }
    }

    /// Append a row; padded/truncated to the schema width.
    pub fn push_row(&mut self, mut values: Vec<String>) {
        values.resize(self.columns.len(), String::new());
        self.rows.push(values);
    }

    /// First row whose trimmed `key_column` value equals `key`.
    pub fn find_by_key(&self, key_column: &str, key: &str) -> Option<usize> {
        let c = self.column_index(key_column)?;
        self.rows.iter().position(|r| r[c].trim() == key)
    }

    /// Snapshot of one row as a column-name -> value map.
    pub fn row_fields(&self, row: usize) -> HashMap<String, String> {
        match self.rows.get(row) {
            Some(r) => self
                .columns
                .iter()
                .cloned()
                .zip(r.iter().cloned())
                .collect(),
            None => HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Dataset {
        let mut ds = Dataset::new(vec!["Company name".into(), "Website URL".into()]);
        ds.push_row(vec!["Acme Foods".into(), "https://acme.test".into()]);
        ds.push_row(vec!["Beta Meats".into(), "https://beta.test".into()]);
        ds
    }

    #[test]
    fn load_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = Dataset::load(&dir.path().join("absent.csv")).unwrap_err();
        assert!(matches!(err, RostermillError::NotFound { .. }));
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");

        let ds = sample();
        ds.save(&path).unwrap();

        let loaded = Dataset::load(&path).unwrap();
        assert_eq!(loaded.columns(), ds.columns());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get(1, "Company name"), "Beta Meats");
    }

    #[test]
    fn save_replaces_whole_file_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.csv");

        sample().save(&path).unwrap();

        let mut ds = Dataset::load(&path).unwrap();
        ds.set(0, "Company name", "Renamed Co");
        ds.save(&path).unwrap();

        let loaded = Dataset::load(&path).unwrap();
        assert_eq!(loaded.get(0, "Company name"), "Renamed Co");
        assert_eq!(loaded.len(), 2);

        // Only the destination file remains in the directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("out.csv");
        sample().save(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn ensure_column_backfills_existing_rows() {
        let mut ds = sample();
        assert!(ds.ensure_column("Vertical"));
        assert!(!ds.ensure_column("Vertical"));
        assert_eq!(ds.columns().len(), 3);
        assert_eq!(ds.get(0, "Vertical"), "");
        assert!(ds.set(0, "Vertical", "Meat"));
        assert_eq!(ds.get(0, "Vertical"), "Meat");
    }

    #[test]
    fn require_columns_reports_missing() {
        let ds = sample();
        assert!(ds.require_columns(&["Company name"]).is_ok());
        let err = ds.require_columns(&["Company name", "Score"]).unwrap_err();
        assert!(matches!(err, RostermillError::Schema { .. }));
        assert!(err.to_string().contains("Score"));
    }

    #[test]
    fn ragged_records_are_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ragged.csv");
        std::fs::write(&path, "a,b,c\n1,2\n4,5,6,7\n").unwrap();

        let ds = Dataset::load(&path).unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(0, "c"), "");
        assert_eq!(ds.get(1, "c"), "6");
    }

    #[test]
    fn find_by_key_trims() {
        let mut ds = sample();
        ds.push_row(vec!["Gamma".into(), "  https://gamma.test ".into()]);
        assert_eq!(ds.find_by_key("Website URL", "https://gamma.test"), Some(2));
        assert_eq!(ds.find_by_key("Website URL", "https://none.test"), None);
    }

    #[test]
    fn sentinels_count_as_missing() {
        assert!(is_missing(""));
        assert!(is_missing("   "));
        assert!(is_missing("N/A"));
        assert!(is_missing("n/a"));
        assert!(is_missing("Not specified"));
        assert!(!is_missing("Broadline distributor"));
    }
}
