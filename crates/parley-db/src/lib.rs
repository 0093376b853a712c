pub mod error;
pub mod migrations;
pub mod models;
pub mod queries;
pub mod query;
pub mod watch;

pub use error::{Result, StoreError};
pub use query::{Filter, Query};
pub use watch::Watch;

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

use crate::models::FeedEvent;

/// Default number of writes buffered for watchers before they lag.
pub const DEFAULT_FEED_CAPACITY: usize = 1024;

/// Default period at which watches on a file-backed database look for
/// writes committed through other connections.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Capacity of the in-process change feed.
    pub feed_capacity: usize,
    /// How often watches check for writes made by other connections to the
    /// same file. `None` disables the check. Ignored for in-memory databases.
    pub poll_interval: Option<Duration>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            feed_capacity: DEFAULT_FEED_CAPACITY,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
        }
    }
}

/// Embedded document store: JSON documents grouped in collections, kept in
/// a single SQLite table, with a live feed of every committed write.
///
/// The feed only carries writes made through this handle. Writes committed
/// by other connections to the same file are picked up by watches polling
/// SQLite's `data_version`.
pub struct Database {
    conn: Mutex<Connection>,
    feed: broadcast::Sender<FeedEvent>,
    poll_interval: Option<Duration>,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, DatabaseConfig::default())
    }

    pub fn open_with(path: &Path, config: DatabaseConfig) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL mode for concurrent reads
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&conn)?;

        info!("Database opened at {}", path.display());
        Ok(Self::from_conn(conn, &config, config.poll_interval))
    }

    /// Private, non-persistent database. Used by tests and throwaway tooling.
    pub fn open_in_memory() -> Result<Self> {
        Self::open_in_memory_with(DatabaseConfig::default())
    }

    pub fn open_in_memory_with(config: DatabaseConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run(&conn)?;
        // Nothing else can open a private in-memory database
        Ok(Self::from_conn(conn, &config, None))
    }

    fn from_conn(conn: Connection, config: &DatabaseConfig, poll_interval: Option<Duration>) -> Self {
        let (feed, _) = broadcast::channel(config.feed_capacity.max(1));
        Self {
            conn: Mutex::new(conn),
            feed,
            poll_interval,
        }
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        f(&conn)
    }

    /// SQLite's counter of commits made by other connections since this one
    /// opened. Unchanged means nobody else wrote.
    pub fn data_version(&self) -> Result<i64> {
        self.with_conn(|conn| Ok(conn.pragma_query_value(None, "data_version", |row| row.get(0))?))
    }

    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval
    }

    /// Publish a committed write. Nobody listening is fine.
    fn publish(&self, event: FeedEvent) {
        let _ = self.feed.send(event);
    }

    fn subscribe_feed(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }
}
