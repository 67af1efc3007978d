use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard},
};

/// Set of sessions with a completion in flight.
#[derive(Clone, Default)]
pub struct CompletionGuard {
    completing: Arc<Mutex<HashSet<String>>>,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self) -> MutexGuard<'_, HashSet<String>> {
        match self.completing.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// None when another completion for the session holds the guard.
    pub fn try_acquire(&self, session_id: &str) -> Option<CompletionTicket> {
        if !self.set().insert(session_id.to_string()) {
            return None;
        }
        Some(CompletionTicket {
            session_id: session_id.to_string(),
            guard: self.clone(),
        })
    }

    pub fn is_completing(&self, session_id: &str) -> bool {
        self.set().contains(session_id)
    }
}

/// Held for the whole completion; dropping it releases the session.
pub struct CompletionTicket {
    session_id: String,
    guard: CompletionGuard,
}

impl Drop for CompletionTicket {
    fn drop(&mut self) {
        self.guard.set().remove(&self.session_id);
    }
}
