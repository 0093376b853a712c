pub mod events;
pub mod models;

/// Collection holding one document per registered user.
pub const USERS_COLLECTION: &str = "users";

/// Collection holding one document per sent message, both directions.
pub const MESSAGES_COLLECTION: &str = "messages";
