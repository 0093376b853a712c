use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use parley_types::models::{Document, DocumentRef};

use crate::models::{DocumentRow, FeedEvent};
use crate::query::Query;
use crate::{Database, Result, StoreError};

impl Database {
    // -- Writes --

    /// Insert a new document under a freshly generated id.
    pub fn add_document(&self, collection: &str, data: Value) -> Result<DocumentRef> {
        let data = into_object(collection, data)?;
        let id = Uuid::new_v4().simple().to_string();
        let encoded = serde_json::to_string(&data)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)",
                (collection, &id, &encoded),
            )?;
            Ok(())
        })?;

        debug!("Document {}/{} added", collection, id);
        self.publish(FeedEvent::Written {
            collection: collection.to_string(),
            document: Document { id: id.clone(), data },
        });

        Ok(DocumentRef {
            collection: collection.to_string(),
            id,
        })
    }

    /// Create or overwrite the document at `collection/id`. An overwrite
    /// keeps the document's original insertion position.
    pub fn set_document(&self, collection: &str, id: &str, data: Value) -> Result<DocumentRef> {
        let data = into_object(collection, data)?;
        let encoded = serde_json::to_string(&data)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(collection, id) DO UPDATE
                 SET data = excluded.data, updated_at = datetime('now')",
                (collection, id, &encoded),
            )?;
            Ok(())
        })?;

        debug!("Document {}/{} written", collection, id);
        self.publish(FeedEvent::Written {
            collection: collection.to_string(),
            document: Document {
                id: id.to_string(),
                data,
            },
        });

        Ok(DocumentRef {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    /// Delete a document. Returns whether it existed.
    pub fn delete_document(&self, collection: &str, id: &str) -> Result<bool> {
        let removed = self.with_conn(|conn| {
            let n = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                (collection, id),
            )?;
            Ok(n > 0)
        })?;

        if removed {
            debug!("Document {}/{} deleted", collection, id);
            self.publish(FeedEvent::Deleted {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }

        Ok(removed)
    }

    // -- Reads --

    pub fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.with_conn(|conn| query_document(conn, collection, id))
    }

    /// Run a one-shot query. Unordered queries return documents in insertion order.
    pub fn get_documents(&self, query: &Query) -> Result<Vec<Document>> {
        let docs = self.with_conn(|conn| query_collection(conn, &query.collection))?;
        Ok(query.apply(docs))
    }
}

fn into_object(collection: &str, data: Value) -> Result<Map<String, Value>> {
    match data {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::NotAnObject {
            collection: collection.to_string(),
        }),
    }
}

fn query_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let mut stmt = conn.prepare(
        "SELECT collection, id, data FROM documents WHERE collection = ?1 AND id = ?2",
    )?;

    let row = stmt
        .query_row((collection, id), |row| {
            Ok(DocumentRow {
                collection: row.get(0)?,
                id: row.get(1)?,
                data: row.get(2)?,
            })
        })
        .optional()?;

    row.map(DocumentRow::into_document).transpose()
}

fn query_collection(conn: &Connection, collection: &str) -> Result<Vec<Document>> {
    let mut stmt = conn.prepare(
        "SELECT collection, id, data FROM documents WHERE collection = ?1 ORDER BY seq ASC",
    )?;

    let rows = stmt
        .query_map([collection], |row| {
            Ok(DocumentRow {
                collection: row.get(0)?,
                id: row.get(1)?,
                data: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter().map(DocumentRow::into_document).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Filter;
    use serde_json::json;

    #[test]
    fn add_then_get_roundtrips_body() {
        let db = Database::open_in_memory().unwrap();
        let r = db.add_document("users", json!({ "email": "a@x.io" })).unwrap();

        assert_eq!(r.collection, "users");
        assert!(!r.id.is_empty());

        let doc = db.get_document("users", &r.id).unwrap().unwrap();
        assert_eq!(doc.data["email"], "a@x.io");
        assert!(!doc.data.contains_key("id"));
    }

    #[test]
    fn non_object_bodies_are_rejected() {
        let db = Database::open_in_memory().unwrap();
        let err = db.add_document("users", json!([1, 2])).unwrap_err();
        assert!(matches!(err, StoreError::NotAnObject { .. }));
    }

    #[test]
    fn collections_are_isolated() {
        let db = Database::open_in_memory().unwrap();
        db.add_document("users", json!({ "k": 1 })).unwrap();
        db.add_document("messages", json!({ "k": 1 })).unwrap();

        let users = db.get_documents(&Query::collection("users")).unwrap();
        assert_eq!(users.len(), 1);
    }

    #[test]
    fn unordered_query_returns_insertion_order() {
        let db = Database::open_in_memory().unwrap();
        let first = db.add_document("users", json!({ "email": "dup@x.io", "n": 1 })).unwrap();
        let second = db.add_document("users", json!({ "email": "dup@x.io", "n": 2 })).unwrap();

        let q = Query::collection("users").filter(Filter::eq("email", "dup@x.io"));
        let ids: Vec<_> = db.get_documents(&q).unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, [first.id, second.id]);
    }

    #[test]
    fn set_overwrites_in_place_and_delete_removes() {
        let db = Database::open_in_memory().unwrap();
        let a = db.add_document("c", json!({ "n": 1 })).unwrap();
        let b = db.add_document("c", json!({ "n": 2 })).unwrap();

        db.set_document("c", &a.id, json!({ "n": 10 })).unwrap();
        let all = db.get_documents(&Query::collection("c")).unwrap();
        assert_eq!(all[0].id, a.id);
        assert_eq!(all[0].data["n"], 10);

        assert!(db.delete_document("c", &b.id).unwrap());
        assert!(!db.delete_document("c", &b.id).unwrap());
        assert!(db.get_document("c", &b.id).unwrap().is_none());
    }

    #[test]
    fn file_backed_database_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("parley_db_test_{}", Uuid::new_v4().simple()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("store.db");

        let id = {
            let db = Database::open(&path).unwrap();
            db.add_document("users", json!({ "email": "keep@x.io" })).unwrap().id
        };

        let db = Database::open(&path).unwrap();
        let doc = db.get_document("users", &id).unwrap().unwrap();
        assert_eq!(doc.data["email"], "keep@x.io");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
