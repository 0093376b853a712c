use tracing::info;

use parley_db::{Filter, Query};
use parley_types::MESSAGES_COLLECTION;
use parley_types::models::{DocumentRef, MessageRecord};

use crate::{ConversationStore, Result};

impl ConversationStore {
    /// Write a message document as given.
    pub async fn add_message(&self, message: MessageRecord) -> Result<DocumentRef> {
        info!("Adding a new message to the database");

        let data = serde_json::to_value(&message)?;
        let doc_ref = self
            .blocking(move |db| db.add_document(MESSAGES_COLLECTION, data))
            .await?;

        info!("Message doc {} added", doc_ref.id);
        Ok(doc_ref)
    }
}

/// Every message exchanged between `a` and `b`, either direction, oldest first.
pub fn conversation_query(a: &str, b: &str) -> Query {
    Query::collection(MESSAGES_COLLECTION)
        .filter(Filter::or([
            Filter::and([Filter::eq("sender_id", a), Filter::eq("recipient_id", b)]),
            Filter::and([Filter::eq("sender_id", b), Filter::eq("recipient_id", a)]),
        ]))
        .order_by("sent_on")
}
