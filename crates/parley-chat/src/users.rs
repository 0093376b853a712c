use chrono::NaiveDate;
use tracing::{debug, info};

use parley_db::{Filter, Query};
use parley_types::USERS_COLLECTION;
use parley_types::models::{DocumentRef, NewUser, UserRecord};

use crate::{ConversationStore, Result};

impl ConversationStore {
    /// Write a new user document. No validation and no duplicate check:
    /// two calls with the same email create two users.
    pub async fn add_user(
        &self,
        email: &str,
        first_name: &str,
        last_name: &str,
        birthdate: NaiveDate,
    ) -> Result<DocumentRef> {
        info!("Adding a new user to the database");

        let user = NewUser {
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            birthdate,
            email: email.to_string(),
        };
        let data = serde_json::to_value(&user)?;

        let doc_ref = self
            .blocking(move |db| db.add_document(USERS_COLLECTION, data))
            .await?;

        info!("User doc {} added", doc_ref.id);
        Ok(doc_ref)
    }

    /// Find a user by exact, case-sensitive email after trimming the input.
    /// With several matches the first in store order is returned.
    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRecord>> {
        let email = email.trim().to_string();
        info!("Retrieving details of user with email: {}", email);

        let query = Query::collection(USERS_COLLECTION).filter(Filter::eq("email", email));
        let docs = self.blocking(move |db| db.get_documents(&query)).await?;

        let Some(doc) = docs.into_iter().next() else {
            info!("User does not exist");
            return Ok(None);
        };

        let user: NewUser = doc.decode()?;
        debug!("User found: {}", doc.id);
        Ok(Some(UserRecord::from_new(doc.id, user)))
    }
}
