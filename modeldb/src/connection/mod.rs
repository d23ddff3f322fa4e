use crate::config::DbConfig;
use crate::driver::{ConnectOptions, Connection, Driver, SqliteDriver};
use crate::error::{ModelDbError, Result};
use serde::Serialize;
use std::fmt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Lifecycle of the managed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

struct ConnectionState {
    connection: Option<Arc<dyn Connection>>,
    status: ConnectionStatus,
    last_uri: Option<String>,
    last_error: Option<String>,
    /// Completed connect attempts, successful or not.
    attempts: u64,
}

/// Owns at most one live connection and coalesces concurrent connects.
///
/// Callers that arrive while an attempt is in flight wait for it and share its
/// outcome: the same connection on success, the same error on failure.
///
/// The manager also hands out one write lock per collection. Every
/// read-check-write operation on a collection holds it, so unique checks and
/// update operators see no interleaved writer.
pub struct ConnectionManager {
    driver: Arc<dyn Driver>,
    config: DbConfig,
    state: RwLock<ConnectionState>,
    connect_lock: tokio::sync::Mutex<()>,
    write_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConnectionManager {
    pub fn new(driver: Arc<dyn Driver>, config: DbConfig) -> Self {
        ConnectionManager {
            driver,
            config,
            state: RwLock::new(ConnectionState {
                connection: None,
                status: ConnectionStatus::Disconnected,
                last_uri: None,
                last_error: None,
                attempts: 0,
            }),
            connect_lock: tokio::sync::Mutex::new(()),
            write_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Manager over the bundled SQLite driver.
    pub fn sqlite(config: DbConfig) -> Self {
        Self::new(Arc::new(SqliteDriver), config)
    }

    pub fn config(&self) -> &DbConfig {
        &self.config
    }

    /// Return the live connection, opening one if needed.
    pub async fn connect(&self, uri: Option<&str>) -> Result<Arc<dyn Connection>> {
        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }

        let seen_attempts = self.read_state().attempts;
        let _guard = self.connect_lock.lock().await;

        if let Some(conn) = self.live_connection() {
            return Ok(conn);
        }
        {
            let state = self.read_state();
            // The attempt we waited on failed. A successful one that was
            // disconnected since leaves no error, and we connect again.
            if state.attempts != seen_attempts {
                if let Some(message) = &state.last_error {
                    return Err(ModelDbError::Connection(message.clone()));
                }
            }
        }

        let Some(uri) = uri.map(str::to_string).or_else(|| self.config.uri.clone()) else {
            let message = format!(
                "No connection URI provided; pass one to connect() or set {}",
                crate::config::URI_ENV
            );
            self.finish_attempt(None, Err(&message));
            log::error!("{message}");
            return Err(ModelDbError::Connection(message));
        };

        self.write_state().status = ConnectionStatus::Connecting;
        log::debug!("Connecting to {uri}");

        let options = ConnectOptions {
            server_selection_timeout: self.config.server_selection_timeout,
        };
        let outcome = tokio::time::timeout(
            options.server_selection_timeout,
            self.driver.connect(&uri, &options),
        )
        .await;

        let result = match outcome {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(ModelDbError::Connection(message))) => Err(message),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "Server selection timed out after {} ms",
                options.server_selection_timeout.as_millis()
            )),
        };

        match result {
            Ok(conn) => {
                self.finish_attempt(Some(&uri), Ok(conn.clone()));
                log::info!("Database connected ({uri})");
                Ok(conn)
            }
            Err(message) => {
                self.finish_attempt(Some(&uri), Err(&message));
                log::error!("Database connection failed: {message}");
                Err(ModelDbError::Connection(message))
            }
        }
    }

    /// True when a connection is held and still alive.
    pub fn is_connected(&self) -> bool {
        self.live_connection().is_some()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.read_state().status
    }

    pub fn last_error(&self) -> Option<String> {
        self.read_state().last_error.clone()
    }

    /// The live connection, or `NotConnected`.
    pub fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.live_connection().ok_or(ModelDbError::NotConnected)
    }

    /// Close and forget the connection. No-op when already disconnected.
    pub async fn disconnect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        let taken = {
            let mut state = self.write_state();
            state.status = ConnectionStatus::Disconnected;
            state.connection.take()
        };
        if let Some(conn) = taken {
            conn.close().await?;
            log::info!("Database disconnected");
        }
        Ok(())
    }

    /// Disconnect, then connect again with the last used URI.
    pub async fn reconnect(&self) -> Result<Arc<dyn Connection>> {
        let uri = self.read_state().last_uri.clone();
        self.disconnect().await?;
        self.connect(uri.as_deref()).await
    }

    /// Write lock shared by every operation that writes to `collection`.
    pub fn write_lock(&self, collection: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.write_locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(collection.to_string())
            .or_default()
            .clone()
    }

    fn live_connection(&self) -> Option<Arc<dyn Connection>> {
        self.read_state()
            .connection
            .as_ref()
            .filter(|conn| conn.is_alive())
            .cloned()
    }

    fn finish_attempt(
        &self,
        uri: Option<&str>,
        result: std::result::Result<Arc<dyn Connection>, &str>,
    ) {
        let mut state = self.write_state();
        state.attempts += 1;
        if let Some(uri) = uri {
            state.last_uri = Some(uri.to_string());
        }
        match result {
            Ok(conn) => {
                state.connection = Some(conn);
                state.status = ConnectionStatus::Connected;
                state.last_error = None;
            }
            Err(message) => {
                state.connection = None;
                state.status = ConnectionStatus::Error;
                state.last_error = Some(message.to_string());
            }
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ConnectionState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ConnectionState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
