use crate::models::command::RequestId;
use std::collections::HashMap;
use tracing::debug;

pub type ReleaseAction = Box<dyn FnOnce() + Send + Sync>;

/// One-shot cleanup actions keyed by request id
#[derive(Default)]
pub struct ReleaseRegistry {
    actions: HashMap<RequestId, ReleaseAction>,
}

impl ReleaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a cleanup for `id`.
    ///
    /// An action already registered under the same id is released first.
    /// Returns true if that happened.
    pub fn register(&mut self, id: RequestId, action: ReleaseAction) -> bool {
        let replaced = self.release(&id);
        if replaced {
            debug!(request_id = %id, "Released previous action for reused request id");
        }
        self.actions.insert(id, action);
        replaced
    }

    /// Run and forget the action for `id`; a no-op for unknown ids
    pub fn release(&mut self, id: &str) -> bool {
        match self.actions.remove(id) {
            Some(action) => {
                action();
                true
            }
            None => false,
        }
    }

    pub fn release_all(&mut self) -> usize {
        let count = self.actions.len();
        for (_, action) in self.actions.drain() {
            action();
        }
        count
    }

    pub fn contains(&self, id: &str) -> bool {
        self.actions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}
