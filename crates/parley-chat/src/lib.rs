//! Chat-side adapter over the document store: create and look up users,
//! send messages, and keep a live view of one two-person conversation.

pub mod listener;
pub mod messages;
pub mod users;
pub mod view;

pub use listener::ConversationListener;
pub use parley_db::{Result, StoreError};
pub use view::ConversationView;

use std::sync::Arc;

use parley_db::Database;

/// The adapter the UI layer talks to.
///
/// Holds a shared handle to an already opened [`Database`] and at most one
/// live conversation subscription.
pub struct ConversationStore {
    db: Arc<Database>,
    listener: ConversationListener,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        let listener = ConversationListener::new(db.clone(), ConversationView::new());
        Self { db, listener }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Handle onto the shared message list fed by the active listener.
    pub fn messages(&self) -> ConversationView {
        self.listener.view().clone()
    }

    /// Follow the conversation between two users, cancelling whatever
    /// conversation was followed before. Fire-and-forget: matching messages
    /// show up in [`ConversationStore::messages`] as the store delivers them.
    /// Needs a tokio runtime to run the subscription; without one the call
    /// only stops the previous subscription and logs an error.
    pub fn register_conversation_listener(&self, sender_id: &str, recipient_id: &str) {
        self.listener.start(sender_id, recipient_id);
    }

    /// Cancel the active conversation subscription, if any.
    pub fn stop_conversation_listener(&self) {
        self.listener.stop();
    }

    pub fn listener(&self) -> &ConversationListener {
        &self.listener
    }

    /// Run a blocking store call off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(db.as_ref())).await?
    }
}
