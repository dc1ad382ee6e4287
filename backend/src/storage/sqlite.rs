use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::{Mapping, MappingField, MappingOptions, StoredMapping};

/// Outcome of a catalog write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Created,
    Replaced,
    /// The name was taken and `if_not_exists` was set
    Skipped,
    /// The name was taken and neither flag was set
    Exists,
}

/// SQLite storage for the mapping catalog
/// Uses tokio::Mutex for async-friendly locking
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open (or create) the catalog. `:memory:` keeps it in memory.
    pub async fn new<P: AsRef<Path>>(db_path: P) -> SqliteResult<Self> {
        // Handle SQLite URL format (sqlite:./path or sqlite://path)
        let path_str = db_path.as_ref().to_string_lossy();
        let clean_path: &str = if path_str.starts_with("sqlite:") {
            path_str.trim_start_matches("sqlite:").trim_start_matches("//")
        } else {
            path_str.as_ref()
        };

        let conn = if clean_path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(clean_path)?
        };
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS mappings (
                name TEXT PRIMARY KEY,
                connector_type TEXT NOT NULL,
                fields_json TEXT NOT NULL,
                options_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )?;
        Ok(())
    }

    /// Insert a mapping. Existence check and write happen in one transaction.
    pub async fn put_mapping(
        &self,
        mapping: &Mapping,
        replace: bool,
        if_not_exists: bool,
    ) -> SqliteResult<PutOutcome> {
        let fields_json = to_json_text(&mapping.fields)?;
        let options_json = to_json_text(&mapping.options)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let exists = tx
            .query_row(
                "SELECT 1 FROM mappings WHERE name = ?1",
                rusqlite::params![mapping.name],
                |_| Ok(()),
            )
            .optional()?
            .is_some();

        let outcome = match (exists, replace, if_not_exists) {
            (false, _, _) => {
                tx.execute(
                    r#"
                    INSERT INTO mappings (name, connector_type, fields_json, options_json, created_at, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                    "#,
                    rusqlite::params![mapping.name, mapping.connector_type, fields_json, options_json, now],
                )?;
                PutOutcome::Created
            }
            (true, true, _) => {
                tx.execute(
                    r#"
                    UPDATE mappings
                    SET connector_type = ?2, fields_json = ?3, options_json = ?4, updated_at = ?5
                    WHERE name = ?1
                    "#,
                    rusqlite::params![mapping.name, mapping.connector_type, fields_json, options_json, now],
                )?;
                PutOutcome::Replaced
            }
            (true, false, true) => PutOutcome::Skipped,
            (true, false, false) => PutOutcome::Exists,
        };
        tx.commit()?;
        Ok(outcome)
    }

    pub async fn get_mapping(&self, name: &str) -> SqliteResult<Option<StoredMapping>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT name, connector_type, fields_json, options_json, created_at, updated_at FROM mappings WHERE name = ?1",
        )?;
        stmt.query_row(rusqlite::params![name], read_mapping).optional()
    }

    /// All mappings ordered by name
    pub async fn list_mappings(&self) -> SqliteResult<Vec<StoredMapping>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT name, connector_type, fields_json, options_json, created_at, updated_at FROM mappings ORDER BY name",
        )?;
        let rows = stmt.query_map([], read_mapping)?;

        let mut mappings = Vec::new();
        for row in rows {
            mappings.push(row?);
        }
        Ok(mappings)
    }

    /// Remove a mapping; false when it did not exist
    pub async fn delete_mapping(&self, name: &str) -> SqliteResult<bool> {
        let conn = self.conn.lock().await;
        let rows_affected = conn.execute("DELETE FROM mappings WHERE name = ?1", rusqlite::params![name])?;
        Ok(rows_affected > 0)
    }
}

fn to_json_text<T: serde::Serialize>(value: &T) -> SqliteResult<String> {
    serde_json::to_string(value).map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))
}

fn from_json_text<T: serde::de::DeserializeOwned>(index: usize, text: &str) -> SqliteResult<T> {
    serde_json::from_str(text).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn parse_timestamp(index: usize, text: &str) -> SqliteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, rusqlite::types::Type::Text, Box::new(e)))
}

fn read_mapping(row: &rusqlite::Row<'_>) -> SqliteResult<StoredMapping> {
    let fields: Vec<MappingField> = from_json_text(2, &row.get::<_, String>(2)?)?;
    let options: MappingOptions = from_json_text(3, &row.get::<_, String>(3)?)?;
    Ok(StoredMapping {
        mapping: Mapping::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?, fields, options),
        created_at: parse_timestamp(4, &row.get::<_, String>(4)?)?,
        updated_at: parse_timestamp(5, &row.get::<_, String>(5)?)?,
    })
}
