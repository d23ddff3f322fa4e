use super::{ConnectOptions, Connection, Driver};
use crate::document::{DocumentData, StoredDocument, ID_FIELD};
use crate::error::{ModelDbError, Result};
use async_trait::async_trait;
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

const MEMORY_URI: &str = "sqlite::memory:";
const FILE_URI_PREFIX: &str = "sqlite://";

/// Driver for `sqlite::memory:` and `sqlite://<path>` URIs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDriver;

#[async_trait]
impl Driver for SqliteDriver {
    async fn connect(&self, uri: &str, options: &ConnectOptions) -> Result<Arc<dyn Connection>> {
        let conn = if uri == MEMORY_URI {
            SqliteConnection::open_in_memory()?
        } else if let Some(path) = uri.strip_prefix(FILE_URI_PREFIX) {
            SqliteConnection::open(Path::new(path), options)?
        } else {
            return Err(ModelDbError::Connection(format!(
                "Unsupported connection URI '{uri}' (expected {MEMORY_URI} or {FILE_URI_PREFIX}<path>)"
            )));
        };
        Ok(Arc::new(conn))
    }
}

/// One SQLite database holding every collection in a single `documents` table.
/// Access is serialized through a mutex; `close` drops the handle.
pub struct SqliteConnection {
    conn: Mutex<Option<rusqlite::Connection>>,
}

impl SqliteConnection {
    /// Open or create the database file at `path`.
    pub fn open(path: &Path, options: &ConnectOptions) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path).map_err(|e| {
            ModelDbError::Connection(format!("Failed to open {}: {e}", path.display()))
        })?;
        conn.busy_timeout(options.server_selection_timeout)?;
        Self::initialize(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| ModelDbError::Connection(e.to_string()))?;
        Self::initialize(conn)
    }

    fn initialize(conn: rusqlite::Connection) -> Result<Self> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data_json TEXT NOT NULL,
                UNIQUE (collection, id)
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
            ",
        )?;
        Ok(SqliteConnection {
            conn: Mutex::new(Some(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<rusqlite::Connection>>> {
        self.conn
            .lock()
            .map_err(|_| ModelDbError::Connection("SQLite connection lock poisoned".into()))
    }

    fn with_conn<R>(&self, f: impl FnOnce(&mut rusqlite::Connection) -> Result<R>) -> Result<R> {
        let mut guard = self.lock()?;
        match guard.as_mut() {
            Some(conn) => f(conn),
            None => Err(ModelDbError::Connection("Connection is closed".into())),
        }
    }
}

fn decode(id: String, data_json: &str) -> Result<StoredDocument> {
    let data: DocumentData = serde_json::from_str(data_json)?;
    Ok(StoredDocument::new(id, data))
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(err, rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation)
}

#[async_trait]
impl Connection for SqliteConnection {
    fn is_alive(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    async fn close(&self) -> Result<()> {
        let taken = self.lock()?.take();
        if let Some(conn) = taken {
            conn.close().map_err(|(_, e)| ModelDbError::Sqlite(e))?;
        }
        Ok(())
    }

    async fn insert(&self, collection: &str, docs: &[StoredDocument]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO documents (collection, id, data_json) VALUES (?1, ?2, ?3)",
                )?;
                for doc in docs {
                    let data_json = serde_json::to_string(&doc.data)?;
                    stmt.execute(params![collection, doc.id, data_json])
                        .map_err(|e| {
                            if is_constraint_violation(&e) {
                                ModelDbError::DuplicateKey {
                                    model: collection.to_string(),
                                    field: ID_FIELD.to_string(),
                                    value: doc.id.clone(),
                                }
                            } else {
                                ModelDbError::Sqlite(e)
                            }
                        })?;
                }
            }
            tx.commit()?;
            Ok(())
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, data_json FROM documents WHERE collection = ?1 AND id = ?2",
                    params![collection, id],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
                )
                .optional()?;
            row.map(|(id, data_json)| decode(id, &data_json)).transpose()
        })
    }

    async fn scan(&self, collection: &str) -> Result<Vec<StoredDocument>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, data_json FROM documents WHERE collection = ?1 ORDER BY seq",
            )?;
            let rows = stmt.query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut docs = Vec::new();
            for row in rows {
                let (id, data_json) = row?;
                docs.push(decode(id, &data_json)?);
            }
            Ok(docs)
        })
    }

    async fn replace(&self, collection: &str, doc: &StoredDocument) -> Result<bool> {
        self.with_conn(|conn| {
            let data_json = serde_json::to_string(&doc.data)?;
            let changed = conn.execute(
                "UPDATE documents SET data_json = ?3 WHERE collection = ?1 AND id = ?2",
                params![collection, doc.id, data_json],
            )?;
            Ok(changed > 0)
        })
    }

    async fn remove(&self, collection: &str, ids: &[String]) -> Result<u64> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut removed = 0u64;
            {
                let mut stmt =
                    tx.prepare("DELETE FROM documents WHERE collection = ?1 AND id = ?2")?;
                for id in ids {
                    removed += stmt.execute(params![collection, id])? as u64;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn options() -> ConnectOptions {
        ConnectOptions {
            server_selection_timeout: Duration::from_millis(500),
        }
    }

    fn doc(id: &str, value: serde_json::Value) -> StoredDocument {
        let mut data = match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        };
        data.insert(ID_FIELD.to_string(), json!(id));
        StoredDocument::new(id.to_string(), data)
    }

    #[tokio::test]
    async fn test_insert_get_scan() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.insert("users", &[doc("b", json!({ "n": 1 })), doc("a", json!({ "n": 2 }))])
            .await
            .unwrap();
        conn.insert("posts", &[doc("a", json!({ "title": "x" }))]).await.unwrap();

        let got = conn.get("users", "a").await.unwrap().unwrap();
        assert_eq!(got.data["n"], 2);
        assert!(conn.get("users", "zzz").await.unwrap().is_none());

        let ids: Vec<_> = conn.scan("users").await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert!(conn.scan("empty").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rolls_back_batch() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.insert("users", &[doc("a", json!({}))]).await.unwrap();

        let err = conn
            .insert("users", &[doc("c", json!({})), doc("a", json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, ModelDbError::DuplicateKey { ref value, .. } if value == "a"));
        assert!(conn.get("users", "c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_and_remove() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        conn.insert("users", &[doc("a", json!({ "n": 1 }))]).await.unwrap();

        assert!(conn.replace("users", &doc("a", json!({ "n": 5 }))).await.unwrap());
        assert!(!conn.replace("users", &doc("missing", json!({}))).await.unwrap());
        assert_eq!(conn.get("users", "a").await.unwrap().unwrap().data["n"], 5);

        let removed = conn
            .remove("users", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_closed_connection_errors() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        assert!(conn.is_alive());
        conn.close().await.unwrap();
        assert!(!conn.is_alive());
        assert!(conn.scan("users").await.is_err());
        // Closing twice is fine
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_database_persists() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("store.db");
        let uri = format!("sqlite://{}", path.display());

        let first = SqliteDriver.connect(&uri, &options()).await.unwrap();
        first.insert("users", &[doc("a", json!({ "n": 1 }))]).await.unwrap();
        first.close().await.unwrap();

        let second = SqliteDriver.connect(&uri, &options()).await.unwrap();
        assert!(second.get("users", "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_uri() {
        let err = SqliteDriver
            .connect("mongodb://localhost/db", &options())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ModelDbError::Connection(_)));
    }
}
