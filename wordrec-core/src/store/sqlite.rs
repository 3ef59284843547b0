//! Codebooks in a SQLite database: one table per word (`<word>_cbk`), one row
//! per centroid, one REAL column per dimension (`c0..c{k-1}`).
//!
//! Table and column names cannot be bound as parameters, so every identifier
//! is validated before it reaches SQL text. Values are always bound.

use std::path::Path;

use rusqlite::{params_from_iter, Connection};
use tracing::{debug, info};

use crate::error::{Result, WordrecError};
use crate::vq::{Codebook, FeatureVector};

/// Suffix of per-word codebook tables.
pub const CODEBOOK_TABLE_SUFFIX: &str = "_cbk";

/// SQL column types accepted by `create_table`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Real,
    Integer,
    Text,
}

impl ColumnType {
    fn sql(self) -> &'static str {
        match self {
            ColumnType::Real => "REAL",
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
        }
    }
}

#[derive(Debug)]
pub struct CodebookStore {
    conn: Connection,
}

impl CodebookStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        debug!(path = %path.display(), "codebook store opened");
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            conn: Connection::open_in_memory()?,
        })
    }

    /// `CREATE TABLE name (col type, ...)`. Fails if the table exists.
    pub fn create_table(&self, name: &str, columns: &[&str], types: &[ColumnType]) -> Result<()> {
        if columns.is_empty() || columns.len() != types.len() {
            return Err(WordrecError::Configuration(format!(
                "table {name}: {} columns but {} types",
                columns.len(),
                types.len()
            )));
        }
        let table = identifier(name)?;
        let defs = columns
            .iter()
            .zip(types)
            .map(|(col, ty)| Ok(format!("{} {}", identifier(col)?, ty.sql())))
            .collect::<Result<Vec<_>>>()?;
        self.conn
            .execute(&format!("CREATE TABLE {table} ({})", defs.join(", ")), [])?;
        Ok(())
    }

    /// Append one row; `values` must cover every column.
    pub fn insert_row(&self, name: &str, values: &[f64]) -> Result<()> {
        let table = identifier(name)?;
        let placeholders = vec!["?"; values.len()].join(", ");
        self.conn.execute(
            &format!("INSERT INTO {table} VALUES ({placeholders})"),
            params_from_iter(values.iter()),
        )?;
        Ok(())
    }

    /// Every row, in insertion order, every column read as f64.
    pub fn retrieve(&self, name: &str) -> Result<Vec<Vec<f64>>> {
        let table = identifier(name)?;
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {table} ORDER BY rowid"))?;
        let width = stmt.column_count();
        let rows = stmt.query_map([], |row| {
            (0..width).map(|i| row.get::<_, f64>(i)).collect::<rusqlite::Result<Vec<f64>>>()
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn row_count(&self, name: &str) -> Result<usize> {
        let table = identifier(name)?;
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn table_exists(&self, name: &str) -> Result<bool> {
        let table = identifier(name)?;
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [&table],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Replace `<word>_cbk` with `codebook`, atomically.
    pub fn save_codebook(&mut self, word: &str, codebook: &Codebook) -> Result<()> {
        let table = identifier(&format!("{word}{CODEBOOK_TABLE_SUFFIX}"))?;
        let columns: Vec<String> = (0..codebook.dimension()).map(|k| format!("c{k}")).collect();
        let defs = columns
            .iter()
            .map(|c| format!("{c} {}", ColumnType::Real.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        let placeholders = vec!["?"; columns.len()].join(", ");

        let tx = self.conn.transaction()?;
        tx.execute(&format!("DROP TABLE IF EXISTS {table}"), [])?;
        tx.execute(&format!("CREATE TABLE {table} ({defs})"), [])?;
        {
            let mut insert = tx.prepare(&format!("INSERT INTO {table} VALUES ({placeholders})"))?;
            for centroid in codebook.centroids() {
                insert.execute(params_from_iter(centroid.position().coords().iter()))?;
            }
        }
        tx.commit()?;

        info!(word, table = %table, centroids = codebook.len(), "codebook stored");
        Ok(())
    }

    /// Rebuild the codebook stored for `word`.
    ///
    /// # Errors
    /// `NoModel` when the word has no table.
    pub fn load_codebook(&self, word: &str) -> Result<Codebook> {
        let table = format!("{word}{CODEBOOK_TABLE_SUFFIX}");
        if !self.table_exists(&table)? {
            return Err(WordrecError::NoModel(format!(
                "no stored codebook for '{word}'"
            )));
        }
        let positions = self
            .retrieve(&table)?
            .into_iter()
            .map(FeatureVector::new)
            .collect();
        Codebook::from_positions(positions)
    }
}

/// Spaces become `_`; the result must be `[A-Za-z_][A-Za-z0-9_]*`.
fn identifier(name: &str) -> Result<String> {
    let ident = name.trim().replace(' ', "_");
    let mut chars = ident.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if !valid {
        return Err(WordrecError::Configuration(format!(
            "invalid SQL identifier: {name:?}"
        )));
    }
    Ok(ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_codebook() -> Codebook {
        Codebook::from_positions(vec![
            FeatureVector::new(vec![1.0, -2.5, 3.25]),
            FeatureVector::new(vec![0.0, 0.5, -1.0]),
        ])
        .unwrap()
    }

    #[test]
    fn generic_table_operations() {
        let store = CodebookStore::open_in_memory().unwrap();
        store
            .create_table("readings", &["a", "b"], &[ColumnType::Real, ColumnType::Real])
            .unwrap();
        store.insert_row("readings", &[1.5, 2.0]).unwrap();
        store.insert_row("readings", &[-3.0, 4.25]).unwrap();

        assert_eq!(store.row_count("readings").unwrap(), 2);
        assert_eq!(
            store.retrieve("readings").unwrap(),
            vec![vec![1.5, 2.0], vec![-3.0, 4.25]]
        );
    }

    #[test]
    fn codebook_round_trip_preserves_coordinates() {
        let mut store = CodebookStore::open_in_memory().unwrap();
        let codebook = sample_codebook();
        store.save_codebook("turn left", &codebook).unwrap();

        assert!(store.table_exists("turn_left_cbk").unwrap());
        let loaded = store.load_codebook("turn left").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dimension(), 3);
        for (a, b) in codebook.centroids().iter().zip(loaded.centroids()) {
            assert_eq!(a.position(), b.position());
        }
    }

    #[test]
    fn saving_twice_replaces_the_table() {
        let mut store = CodebookStore::open_in_memory().unwrap();
        store.save_codebook("go", &sample_codebook()).unwrap();
        store.save_codebook("go", &sample_codebook()).unwrap();
        assert_eq!(store.row_count("go_cbk").unwrap(), 2);
    }

    #[test]
    fn unsafe_identifiers_are_rejected() {
        let store = CodebookStore::open_in_memory().unwrap();
        for bad in ["x; DROP TABLE y", "1abc", "", "na-me"] {
            assert!(
                matches!(
                    store.create_table(bad, &["c0"], &[ColumnType::Real]),
                    Err(WordrecError::Configuration(_))
                ),
                "{bad:?} accepted"
            );
        }
    }

    #[test]
    fn column_type_count_must_match() {
        let store = CodebookStore::open_in_memory().unwrap();
        assert!(matches!(
            store.create_table("t", &["a", "b"], &[ColumnType::Real]),
            Err(WordrecError::Configuration(_))
        ));
    }

    #[test]
    fn missing_codebook_is_no_model() {
        let store = CodebookStore::open_in_memory().unwrap();
        assert!(matches!(
            store.load_codebook("absent"),
            Err(WordrecError::NoModel(_))
        ));
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("codebooks.db");
        {
            let mut store = CodebookStore::open(&path).unwrap();
            store.save_codebook("stop", &sample_codebook()).unwrap();
        }
        let store = CodebookStore::open(&path).unwrap();
        assert_eq!(store.load_codebook("stop").unwrap().len(), 2);
    }
}
