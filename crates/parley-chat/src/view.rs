use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;

use parley_types::models::ConversationMessage;

/// The shared, append-only list of messages the UI renders.
///
/// Cloning gives another handle onto the same list. Only the active
/// conversation listener appends; readers take snapshots or watch the
/// length. The list is never cleared, not even when the listener moves to
/// another pair of users.
#[derive(Clone)]
pub struct ConversationView {
    inner: Arc<ViewInner>,
}

struct ViewInner {
    state: Mutex<ViewState>,
    len_tx: watch::Sender<usize>,
}

#[derive(Default)]
struct ViewState {
    /// Bumped whenever the writing subscription is cancelled. A writer may
    /// only append while the generation it was started under is current.
    generation: u64,
    messages: Vec<ConversationMessage>,
}

impl ConversationView {
    pub fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(ViewInner {
                state: Mutex::new(ViewState::default()),
                len_tx,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Vec<ConversationMessage> {
        self.state().messages.clone()
    }

    /// Messages appended at or after position `start`.
    pub fn messages_from(&self, start: usize) -> Vec<ConversationMessage> {
        self.state().messages.iter().skip(start).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Watch the list length. Fires after every append.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.inner.len_tx.subscribe()
    }

    /// Resolve once the list holds at least `len` messages.
    pub async fn wait_for_len(&self, len: usize) {
        let mut rx = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|n| *n >= len).await;
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state().generation
    }

    /// Invalidate the current writer. Once this returns, appends made under
    /// any earlier generation are refused.
    pub(crate) fn supersede(&self) {
        self.state().generation += 1;
    }

    /// Append on behalf of the writer started under `generation`. Returns
    /// false, appending nothing, if that writer has been superseded.
    pub(crate) fn append_if_current(&self, generation: u64, message: ConversationMessage) -> bool {
        let mut state = self.state();
        if state.generation != generation {
            return false;
        }
        state.messages.push(message);
        self.inner.len_tx.send_replace(state.messages.len());
        true
    }
}

impl Default for ConversationView {
    fn default() -> Self {
        Self::new()
    }
}
