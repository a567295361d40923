//! Single-slot cache for TLS session resumption state.
//!
//! At most one live session exists process-wide: `put` drops the previous
//! occupant before storing its replacement. The store is deliberately not
//! thread-safe; a single reporting task owns it (callers adding concurrent
//! reporters must wrap it in exclusive-access discipline).

#[derive(Debug, Default)]
pub struct SessionStore<S> {
    slot: Option<S>,
}

impl<S> SessionStore<S> {
    pub fn new() -> Self {
        SessionStore { slot: None }
    }

    /// Borrow the cached session for the duration of one connection attempt.
    pub fn get(&self) -> Option<&S> {
        self.slot.as_ref()
    }

    /// Replace the cached session. The old session's resources are released
    /// before the new one takes the slot.
    pub fn put(&mut self, session: S) {
        self.slot = Some(session);
    }

    /// Release the cached session, leaving the slot empty.
    pub fn clear(&mut self) {
        self.slot = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
