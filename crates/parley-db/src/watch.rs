use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

use parley_types::events::DocumentChange;
use parley_types::models::Document;

use crate::models::FeedEvent;
use crate::query::Query;
use crate::{Database, Result};

/// A live view of a query's result set.
///
/// The snapshot taken at creation is handed out once by [`Watch::initial`];
/// every later write that touches the result set comes back from
/// [`Watch::next_changes`], classified as added, modified or removed.
/// A query limit only bounds the initial snapshot.
///
/// Writes through the same [`Database`] arrive on its change feed. On a
/// file-backed database the watch also polls for commits made by other
/// connections and reconciles its result set when it sees one.
pub struct Watch {
    db: Arc<Database>,
    query: Query,
    rx: broadcast::Receiver<FeedEvent>,
    /// Last delivered body of every document currently in the result set
    known: HashMap<String, Document>,
    initial: Vec<DocumentChange>,
    /// `data_version` as of the last read of the result set
    data_version: i64,
    /// Created on first wait, so a watch can be built outside a runtime
    ticker: Option<Interval>,
}

enum Wake {
    Feed(std::result::Result<FeedEvent, RecvError>),
    Poll,
}

impl Database {
    /// Start watching a query. Blocks on the snapshot read; call it from
    /// `spawn_blocking` inside async code.
    pub fn watch(self: &Arc<Self>, query: Query) -> Result<Watch> {
        // Subscribe before reading so no write can fall between the two
        let rx = self.subscribe_feed();
        // Read the version first: a commit landing before the snapshot then
        // costs one redundant resync instead of going unseen
        let data_version = self.data_version()?;
        let snapshot = self.get_documents(&query)?;

        debug!(
            "Watch on '{}' started with {} documents",
            query.collection,
            snapshot.len()
        );

        let known = snapshot.iter().map(|d| (d.id.clone(), d.clone())).collect();
        let initial = snapshot.into_iter().map(DocumentChange::added).collect();

        Ok(Watch {
            db: Arc::clone(self),
            query,
            rx,
            known,
            initial,
            data_version,
            ticker: None,
        })
    }
}

impl Watch {
    /// The initial snapshot as `Added` changes, in query order. Empty on
    /// every call after the first.
    pub fn initial(&mut self) -> Vec<DocumentChange> {
        std::mem::take(&mut self.initial)
    }

    /// Wait for the next batch of changes to the result set. Returns
    /// `Ok(None)` once the store is gone.
    pub async fn next_changes(&mut self) -> Result<Option<Vec<DocumentChange>>> {
        if self.ticker.is_none() {
            self.ticker = self.db.poll_interval().map(|period| {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker
            });
        }

        loop {
            let wake = match self.ticker.as_mut() {
                Some(ticker) => tokio::select! {
                    // Drain our own writes before re-reading for anyone else's
                    biased;
                    result = self.rx.recv() => Wake::Feed(result),
                    _ = ticker.tick() => Wake::Poll,
                },
                None => Wake::Feed(self.rx.recv().await),
            };

            let result = match wake {
                Wake::Feed(result) => result,
                Wake::Poll => {
                    let changes = self.poll_other_connections().await?;
                    if !changes.is_empty() {
                        return Ok(Some(changes));
                    }
                    continue;
                }
            };

            match result {
                Ok(event) => {
                    if let Some(change) = self.classify(event) {
                        return Ok(Some(vec![change]));
                    }
                }
                Err(RecvError::Lagged(n)) => {
                    warn!(
                        "Watch on '{}' lagged by {} writes, re-reading",
                        self.query.collection, n
                    );
                    let changes = self.resync().await?;
                    if !changes.is_empty() {
                        return Ok(Some(changes));
                    }
                }
                Err(RecvError::Closed) => return Ok(None),
            }
        }
    }

    fn classify(&mut self, event: FeedEvent) -> Option<DocumentChange> {
        if event.collection() != self.query.collection {
            return None;
        }

        match event {
            FeedEvent::Written { document, .. } => {
                if self.query.matches(&document.data) {
                    match self.known.insert(document.id.clone(), document.clone()) {
                        // Already delivered through the snapshot
                        Some(previous) if previous == document => None,
                        Some(_) => Some(DocumentChange::modified(document)),
                        None => Some(DocumentChange::added(document)),
                    }
                } else {
                    self.known.remove(&document.id).map(DocumentChange::removed)
                }
            }
            FeedEvent::Deleted { id, .. } => self.known.remove(&id).map(DocumentChange::removed),
        }
    }

    /// Resync if another connection committed since the last read.
    async fn poll_other_connections(&mut self) -> Result<Vec<DocumentChange>> {
        let db = Arc::clone(&self.db);
        let version = tokio::task::spawn_blocking(move || db.data_version()).await??;
        if version == self.data_version {
            return Ok(Vec::new());
        }

        debug!(
            "Another connection wrote to the database, re-reading '{}'",
            self.query.collection
        );
        self.resync().await
    }

    /// Reconcile against a fresh read after missing feed events.
    async fn resync(&mut self) -> Result<Vec<DocumentChange>> {
        let db = Arc::clone(&self.db);
        let query = Query {
            limit: None,
            ..self.query.clone()
        };
        let (version, current) = tokio::task::spawn_blocking(move || {
            let version = db.data_version()?;
            let docs = db.get_documents(&query)?;
            Ok::<_, crate::StoreError>((version, docs))
        })
        .await??;
        self.data_version = version;

        let current_ids: HashSet<&str> = current.iter().map(|d| d.id.as_str()).collect();
        let mut changes: Vec<DocumentChange> = self
            .known
            .values()
            .filter(|d| !current_ids.contains(d.id.as_str()))
            .cloned()
            .map(DocumentChange::removed)
            .collect();

        for doc in &current {
            match self.known.get(&doc.id) {
                Some(previous) if previous == doc => {}
                Some(_) => changes.push(DocumentChange::modified(doc.clone())),
                None => changes.push(DocumentChange::added(doc.clone())),
            }
        }

        self.known = current.into_iter().map(|d| (d.id.clone(), d)).collect();
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DatabaseConfig;
    use crate::query::Filter;
    use parley_types::events::ChangeKind;
    use serde_json::json;
    use std::time::Duration;

    async fn next(watch: &mut Watch) -> Vec<DocumentChange> {
        tokio::time::timeout(Duration::from_secs(2), watch.next_changes())
            .await
            .expect("timed out waiting for change")
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn initial_snapshot_is_sorted_and_delivered_once() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        for n in [1, 3, 2] {
            db.add_document("messages", json!({ "sent_on": n })).unwrap();
        }

        let mut watch = db.watch(Query::collection("messages").order_by("sent_on")).unwrap();
        let order: Vec<_> = watch
            .initial()
            .into_iter()
            .map(|c| {
                assert_eq!(c.kind, ChangeKind::Added);
                c.document.data["sent_on"].as_i64().unwrap()
            })
            .collect();
        assert_eq!(order, [1, 2, 3]);
        assert!(watch.initial().is_empty());
    }

    #[tokio::test]
    async fn classifies_added_modified_removed() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let q = Query::collection("c").filter(Filter::eq("room", "r1"));
        let mut watch = db.watch(q).unwrap();
        assert!(watch.initial().is_empty());

        let r = db.add_document("c", json!({ "room": "r1", "v": 1 })).unwrap();
        assert_eq!(next(&mut watch).await[0].kind, ChangeKind::Added);

        db.set_document("c", &r.id, json!({ "room": "r1", "v": 2 })).unwrap();
        assert_eq!(next(&mut watch).await[0].kind, ChangeKind::Modified);

        db.set_document("c", &r.id, json!({ "room": "r2", "v": 3 })).unwrap();
        let removed = next(&mut watch).await;
        assert_eq!(removed[0].kind, ChangeKind::Removed);
        assert_eq!(removed[0].document.data["v"], 2);

        // Deleting a document outside the result set is silent
        db.delete_document("c", &r.id).unwrap();
        db.add_document("c", json!({ "room": "r1", "v": 4 })).unwrap();
        let added = next(&mut watch).await;
        assert_eq!(added[0].kind, ChangeKind::Added);
        assert_eq!(added[0].document.data["v"], 4);
    }

    #[tokio::test]
    async fn ignores_other_collections_and_non_matching_writes() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let mut watch = db.watch(Query::collection("c").filter(Filter::eq("k", 1))).unwrap();

        db.add_document("other", json!({ "k": 1 })).unwrap();
        db.add_document("c", json!({ "k": 2 })).unwrap();
        db.add_document("c", json!({ "k": 1, "mark": true })).unwrap();

        let changes = next(&mut watch).await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].document.data["mark"], true);
    }

    #[tokio::test]
    async fn lagging_watch_resyncs_without_losing_inserts() {
        let config = DatabaseConfig {
            feed_capacity: 2,
            ..DatabaseConfig::default()
        };
        let db = Arc::new(Database::open_in_memory_with(config).unwrap());
        let mut watch = db.watch(Query::collection("c")).unwrap();

        for n in 0..5 {
            db.add_document("c", json!({ "n": n })).unwrap();
        }

        let mut seen = HashSet::new();
        while seen.len() < 5 {
            for change in next(&mut watch).await {
                assert_eq!(change.kind, ChangeKind::Added);
                assert!(seen.insert(change.document.id));
            }
        }
    }

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("parley_watch_{}_{}", name, uuid::Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("store.db")
    }

    fn fast_poll() -> DatabaseConfig {
        DatabaseConfig {
            poll_interval: Some(Duration::from_millis(20)),
            ..DatabaseConfig::default()
        }
    }

    #[tokio::test]
    async fn sees_writes_from_another_connection() {
        let path = temp_db_path("cross");
        let watcher = Arc::new(Database::open_with(&path, fast_poll()).unwrap());
        let writer = Database::open(&path).unwrap();

        let q = Query::collection("c").filter(Filter::eq("room", "r1"));
        let mut watch = watcher.watch(q).unwrap();
        assert!(watch.initial().is_empty());

        let r = writer.add_document("c", json!({ "room": "r1", "v": 1 })).unwrap();
        writer.add_document("c", json!({ "room": "r2" })).unwrap();
        let added = next(&mut watch).await;
        assert_eq!(added.len(), 1);
        assert_eq!(added[0].kind, ChangeKind::Added);
        assert_eq!(added[0].document.id, r.id);

        writer.set_document("c", &r.id, json!({ "room": "r1", "v": 2 })).unwrap();
        assert_eq!(next(&mut watch).await[0].kind, ChangeKind::Modified);

        writer.delete_document("c", &r.id).unwrap();
        assert_eq!(next(&mut watch).await[0].kind, ChangeKind::Removed);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn own_writes_are_not_delivered_twice_when_polling() {
        let path = temp_db_path("own");
        let db = Arc::new(Database::open_with(&path, fast_poll()).unwrap());
        let mut watch = db.watch(Query::collection("c")).unwrap();

        let first = db.add_document("c", json!({ "n": 1 })).unwrap();
        assert_eq!(next(&mut watch).await[0].document.id, first.id);

        // Give the poller a few ticks; it must stay quiet until the next write
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = db.add_document("c", json!({ "n": 2 })).unwrap();
        let changes = next(&mut watch).await;
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].document.id, second.id);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn data_version_moves_only_for_other_connections() {
        let path = temp_db_path("version");
        let a = Database::open(&path).unwrap();
        let b = Database::open(&path).unwrap();

        let before = a.data_version().unwrap();
        a.add_document("c", json!({ "n": 1 })).unwrap();
        assert_eq!(a.data_version().unwrap(), before);

        b.add_document("c", json!({ "n": 2 })).unwrap();
        assert_ne!(a.data_version().unwrap(), before);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
