// Storage seam - the connect primitive and the document operations a live
// connection offers

mod sqlite;

pub use sqlite::{SqliteConnection, SqliteDriver};

use crate::document::StoredDocument;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Options handed to `Driver::connect`.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub server_selection_timeout: Duration,
}

/// Opens connections. Implementations must be cheap to share.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn connect(&self, uri: &str, options: &ConnectOptions) -> Result<Arc<dyn Connection>>;
}

/// A live handle to a document store. Collections are created on first write.
///
/// `scan` returns documents in insertion order.
#[async_trait]
pub trait Connection: Send + Sync {
    fn is_alive(&self) -> bool;

    async fn close(&self) -> Result<()>;

    /// Insert all documents or none. A duplicate `_id` fails the whole batch.
    async fn insert(&self, collection: &str, docs: &[StoredDocument]) -> Result<()>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredDocument>>;

    async fn scan(&self, collection: &str) -> Result<Vec<StoredDocument>>;

    /// Overwrite an existing document. Returns false when it no longer exists.
    async fn replace(&self, collection: &str, doc: &StoredDocument) -> Result<bool>;

    /// Remove documents by id, returning how many were removed.
    async fn remove(&self, collection: &str, ids: &[String]) -> Result<u64>;
}
