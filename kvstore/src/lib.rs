use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

const TABLENAME: &str = "kvstore";
const KEY_FIELD: &str = "key";
const VALUE_FIELD: &str = "value";

#[derive(Error, Debug)]
pub enum KVStoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),
    #[error("could not (de)serialize value: {0}")]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A single-table SQLite key-value store with JSON-serialized values.
pub struct KVDb(Connection);

impl KVDb {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, KVStoreError> {
        // Create directory for DB if it doesn't already exist
        std::fs::create_dir_all(path.as_ref().parent().unwrap_or(Path::new("")))?;
        let connection = Connection::open(path)?;
        connection.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS '{TABLENAME}' (
                {KEY_FIELD} TEXT PRIMARY KEY NOT NULL,
                {VALUE_FIELD} BLOB NOT NULL
                )"
            ),
            [],
        )?;
        Ok(KVDb(connection))
    }

    fn select(&self, key: &str) -> Result<Option<Vec<u8>>, KVStoreError> {
        self.0
            .query_row(
                &format!("SELECT {VALUE_FIELD} FROM '{TABLENAME}' WHERE {KEY_FIELD} = ?1"),
                [key],
                |r| r.get::<_, Vec<u8>>(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get<T: DeserializeOwned>(
        &self,
        key: impl AsRef<str>,
    ) -> Result<Option<T>, KVStoreError> {
        self.select(key.as_ref())?
            .map(|v| serde_json::from_slice::<T>(&v))
            .transpose()
            .map_err(Into::into)
    }

    fn upsert(&self, key: &str, value: &[u8]) -> Result<(), KVStoreError> {
        let mut stmt = self.0.prepare(&format!(
            "INSERT INTO '{TABLENAME}' ({KEY_FIELD}, {VALUE_FIELD}) values (?1, ?2)
            ON CONFLICT({KEY_FIELD}) DO UPDATE SET {VALUE_FIELD}=?2",
        ))?;
        stmt.execute(params![key, value])?;
        Ok(())
    }

    pub fn set<V: Serialize>(&self, key: impl AsRef<str>, value: V) -> Result<(), KVStoreError> {
        self.upsert(key.as_ref(), &serde_json::to_vec(&value)?)
    }

    pub fn delete(&self, key: impl AsRef<str>) -> Result<(), KVStoreError> {
        self.0.execute(
            &format!("DELETE FROM '{TABLENAME}' WHERE {KEY_FIELD} = ?1"),
            [key.as_ref()],
        )?;
        Ok(())
    }

    /// Keys starting with the given prefix, in lexical order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, KVStoreError> {
        let mut stmt = self.0.prepare(&format!(
            "SELECT {KEY_FIELD} FROM '{TABLENAME}' \
             WHERE {KEY_FIELD} LIKE ?1 ESCAPE '\\' ORDER BY {KEY_FIELD}"
        ))?;
        let pattern = format!(
            "{}%",
            prefix
                .replace('\\', "\\\\")
                .replace('%', "\\%")
                .replace('_', "\\_")
        );
        let rows = stmt.query_map([pattern], |r| r.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
