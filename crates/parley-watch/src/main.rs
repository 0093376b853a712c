mod config;

use std::sync::Arc;

use tracing::info;

use parley_chat::ConversationStore;
use parley_db::{Database, DatabaseConfig};

use crate::config::WatchConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley_watch=debug,parley_chat=debug,parley_db=info".into()),
        )
        .init();

    let config = WatchConfig::from_env()?;

    let db = Database::open_with(
        &config.db_path,
        DatabaseConfig {
            feed_capacity: config.feed_capacity,
            poll_interval: config.poll_interval,
        },
    )?;
    let store = ConversationStore::new(Arc::new(db));

    let view = store.messages();
    let mut lengths = view.subscribe();
    store.register_conversation_listener(&config.sender_id, &config.recipient_id);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut printed = 0;
    loop {
        tokio::select! {
            changed = lengths.changed() => {
                if changed.is_err() {
                    break;
                }
                for message in view.messages_from(printed) {
                    info!(
                        "[{}] {} -> {}: {}",
                        message.message.sent_on,
                        message.message.sender_id,
                        message.message.recipient_id,
                        serde_json::Value::Object(message.message.payload.clone()),
                    );
                    printed += 1;
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    store.stop_conversation_listener();
    Ok(())
}
