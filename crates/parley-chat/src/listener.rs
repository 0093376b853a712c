use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use parley_db::{Database, Query, Watch};
use parley_types::events::{ChangeKind, DocumentChange};
use parley_types::models::ConversationMessage;

use crate::messages::conversation_query;
use crate::view::ConversationView;

/// Owns the single live conversation subscription and the view it feeds.
///
/// `start` always stops the previous subscription first, so at most one
/// background task ever writes to the view.
pub struct ConversationListener {
    db: Arc<Database>,
    view: ConversationView,
    active: Mutex<Option<ActiveListener>>,
}

struct ActiveListener {
    sender_id: String,
    recipient_id: String,
    handle: JoinHandle<()>,
}

impl ConversationListener {
    pub fn new(db: Arc<Database>, view: ConversationView) -> Self {
        Self {
            db,
            view,
            active: Mutex::new(None),
        }
    }

    pub fn view(&self) -> &ConversationView {
        &self.view
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveListener>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The (sender, recipient) pair currently followed, if any.
    pub fn active_pair(&self) -> Option<(String, String)> {
        self.active()
            .as_ref()
            .map(|a| (a.sender_id.clone(), a.recipient_id.clone()))
    }

    /// Follow the conversation between `sender_id` and `recipient_id`.
    ///
    /// The subscription runs as a task on the current tokio runtime. Called
    /// outside a runtime, the previous subscription is still stopped but no
    /// new one starts; the failure is logged.
    pub fn start(&self, sender_id: &str, recipient_id: &str) {
        let mut active = self.active();
        self.stop_locked(&mut active);

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                error!(
                    "Cannot listen for messages between {} and {}: {}",
                    sender_id, recipient_id, e
                );
                return;
            }
        };

        let generation = self.view.generation();
        let query = conversation_query(sender_id, recipient_id);
        let handle = runtime.spawn(run_listener(
            self.db.clone(),
            query,
            self.view.clone(),
            generation,
        ));

        info!(
            "Listening for messages between {} and {}",
            sender_id, recipient_id
        );
        *active = Some(ActiveListener {
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            handle,
        });
    }

    /// Cancel the active subscription. Nothing it had in flight reaches the
    /// view after this returns.
    pub fn stop(&self) {
        let mut active = self.active();
        self.stop_locked(&mut active);
    }

    fn stop_locked(&self, active: &mut Option<ActiveListener>) {
        if let Some(previous) = active.take() {
            self.view.supersede();
            previous.handle.abort();
            debug!(
                "Stopped listening for messages between {} and {}",
                previous.sender_id, previous.recipient_id
            );
        }
    }
}

impl Drop for ConversationListener {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_listener(db: Arc<Database>, query: Query, view: ConversationView, generation: u64) {
    let mut watch = match open_watch(db, query).await {
        Ok(watch) => watch,
        Err(e) => {
            error!("Failed to subscribe to conversation: {}", e);
            return;
        }
    };

    let initial = watch.initial();
    if !append_added(&view, generation, initial) {
        return;
    }

    loop {
        match watch.next_changes().await {
            Ok(Some(changes)) => {
                if !append_added(&view, generation, changes) {
                    return;
                }
            }
            Ok(None) => {
                debug!("Change feed closed, conversation listener exiting");
                return;
            }
            Err(e) => {
                error!("Conversation subscription failed: {}", e);
                return;
            }
        }
    }
}

async fn open_watch(db: Arc<Database>, query: Query) -> parley_db::Result<Watch> {
    tokio::task::spawn_blocking(move || db.watch(query)).await?
}

/// Append every `Added` change in delivery order. Modified and removed
/// documents are left alone. Returns false once this listener has been
/// superseded.
fn append_added(view: &ConversationView, generation: u64, changes: Vec<DocumentChange>) -> bool {
    for change in changes {
        if change.kind != ChangeKind::Added {
            debug!("Ignoring {:?} change for message {}", change.kind, change.document.id);
            continue;
        }

        let message = match ConversationMessage::from_document(&change.document) {
            Ok(message) => message,
            Err(e) => {
                warn!("Skipping malformed message {}: {}", change.document.id, e);
                continue;
            }
        };

        if !view.append_if_current(generation, message) {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use parley_types::models::{Document, MessageRecord};
    use serde_json::json;

    fn doc(id: &str, sent_on: i64) -> Document {
        let message = MessageRecord::new("a", "b", DateTime::from_timestamp_millis(sent_on).unwrap());
        Document {
            id: id.into(),
            data: serde_json::to_value(message).unwrap().as_object().unwrap().clone(),
        }
    }

    #[test]
    fn only_added_changes_are_appended() {
        let view = ConversationView::new();
        let changes = vec![
            DocumentChange::added(doc("m1", 1)),
            DocumentChange::modified(doc("m1", 1)),
            DocumentChange::removed(doc("m1", 1)),
            DocumentChange::added(doc("m2", 2)),
        ];

        assert!(append_added(&view, view.generation(), changes));
        let ids: Vec<_> = view.snapshot().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["m1", "m2"]);
    }

    #[test]
    fn malformed_documents_are_skipped() {
        let view = ConversationView::new();
        let broken = Document {
            id: "bad".into(),
            data: json!({ "sender_id": "a", "recipient_id": "b", "sent_on": "yesterday" })
                .as_object()
                .unwrap()
                .clone(),
        };

        let changes = vec![DocumentChange::added(broken), DocumentChange::added(doc("ok", 1))];
        assert!(append_added(&view, view.generation(), changes));
        assert_eq!(view.len(), 1);
        assert_eq!(view.snapshot()[0].id, "ok");
    }

    #[test]
    fn superseded_batch_stops_appending() {
        let view = ConversationView::new();
        let generation = view.generation();
        view.supersede();

        assert!(!append_added(&view, generation, vec![DocumentChange::added(doc("m1", 1))]));
        assert!(view.is_empty());
    }

    #[tokio::test]
    async fn start_replaces_the_active_pair_and_stop_clears_it() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let listener = ConversationListener::new(db, ConversationView::new());
        assert!(listener.active_pair().is_none());

        listener.start("a", "b");
        listener.start("c", "d");
        assert_eq!(listener.active_pair(), Some(("c".into(), "d".into())));

        listener.stop();
        assert!(listener.active_pair().is_none());
        // Stopping twice is harmless
        listener.stop();
    }

    #[test]
    fn start_outside_a_runtime_stops_the_old_pair_without_panicking() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let db = Arc::new(Database::open_in_memory().unwrap());
        let listener = ConversationListener::new(db, ConversationView::new());

        runtime.block_on(async { listener.start("a", "b") });
        assert!(listener.active_pair().is_some());

        // No runtime context on this thread
        listener.start("c", "d");
        assert!(listener.active_pair().is_none());
    }
}
