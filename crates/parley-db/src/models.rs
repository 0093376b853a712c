//! Database row types. These map directly to SQLite rows and stay
//! distinct from parley-types models to keep the storage layout private.

use parley_types::models::Document;

use crate::{Result, StoreError};

pub struct DocumentRow {
    pub collection: String,
    pub id: String,
    pub data: String,
}

impl DocumentRow {
    pub fn into_document(self) -> Result<Document> {
        match serde_json::from_str(&self.data)? {
            serde_json::Value::Object(data) => Ok(Document { id: self.id, data }),
            _ => Err(StoreError::NotAnObject {
                collection: self.collection,
            }),
        }
    }
}

/// A committed write as seen on the change feed, before any watch has
/// classified it against its query.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Written {
        collection: String,
        document: Document,
    },
    Deleted {
        collection: String,
        id: String,
    },
}

impl FeedEvent {
    pub fn collection(&self) -> &str {
        match self {
            Self::Written { collection, .. } | Self::Deleted { collection, .. } => collection,
        }
    }
}
