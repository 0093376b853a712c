use serde::{Deserialize, Serialize};

use crate::models::Document;

/// How a document's membership in a watched result set changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    /// The document entered the result set (new write, or initial snapshot)
    Added,
    /// The document was rewritten and still matches
    Modified,
    /// The document was deleted or no longer matches
    Removed,
}

/// A change notification delivered by a watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    /// For `Removed`, the last known body of the document.
    pub document: Document,
}

impl DocumentChange {
    pub fn added(document: Document) -> Self {
        Self {
            kind: ChangeKind::Added,
            document,
        }
    }

    pub fn modified(document: Document) -> Self {
        Self {
            kind: ChangeKind::Modified,
            document,
        }
    }

    pub fn removed(document: Document) -> Self {
        Self {
            kind: ChangeKind::Removed,
            document,
        }
    }
}
