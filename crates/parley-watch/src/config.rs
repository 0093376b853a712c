use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use parley_db::{DEFAULT_FEED_CAPACITY, DEFAULT_POLL_INTERVAL};

#[derive(Debug, Clone, PartialEq)]
pub struct WatchConfig {
    pub db_path: PathBuf,
    pub sender_id: String,
    pub recipient_id: String,
    pub feed_capacity: usize,
    /// Period for picking up writes made by other processes. `None` when
    /// `PARLEY_POLL_MS` is 0.
    pub poll_interval: Option<Duration>,
}

impl WatchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup, so tests don't touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = lookup("PARLEY_DB_PATH").unwrap_or_else(|| "parley.db".into());
        let sender_id = lookup("PARLEY_SENDER_ID").context("PARLEY_SENDER_ID is not set")?;
        let recipient_id =
            lookup("PARLEY_RECIPIENT_ID").context("PARLEY_RECIPIENT_ID is not set")?;
        let feed_capacity = match lookup("PARLEY_FEED_CAPACITY") {
            Some(raw) => raw
                .parse()
                .with_context(|| format!("PARLEY_FEED_CAPACITY is not a number: {}", raw))?,
            None => DEFAULT_FEED_CAPACITY,
        };
        let poll_interval = match lookup("PARLEY_POLL_MS") {
            Some(raw) => {
                let ms: u64 = raw
                    .parse()
                    .with_context(|| format!("PARLEY_POLL_MS is not a number: {}", raw))?;
                (ms > 0).then(|| Duration::from_millis(ms))
            }
            None => Some(DEFAULT_POLL_INTERVAL),
        };

        Ok(Self {
            db_path: PathBuf::from(db_path),
            sender_id,
            recipient_id,
            feed_capacity,
            poll_interval,
        })
    }
}
