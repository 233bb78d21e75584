//! Per-session cancellation and the single-session slot.
//!
//! A [`CancelToken`] belongs to exactly one session id. Interim notifications are sent
//! through [`CancelToken::emit_unless_cancelled`], which shares a lock with
//! [`CancelToken::cancel`]: once `cancel` returns, no further notification can be sent
//! for that session.
//!
//! [`SessionSlot`] holds at most one active token. [`SessionGuard`] clears the slot on
//! drop only if it still holds the guard's own session id.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{AppResult, DaqError};

#[derive(Debug)]
struct TokenInner {
    session_id: u64,
    cancelled: AtomicBool,
    emit_lock: Mutex<()>,
}

/// Cooperative cancellation flag for one session.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

impl CancelToken {
    fn new(session_id: u64) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                session_id,
                cancelled: AtomicBool::new(false),
                emit_lock: Mutex::new(()),
            }),
        }
    }

    /// Session this token belongs to.
    pub fn session_id(&self) -> u64 {
        self.inner.session_id
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Request cancellation. Waits for an in-flight notification to finish.
    pub fn cancel(&self) {
        let _emit = self.emit_guard();
        self.inner.cancelled.store(true, Ordering::SeqCst);
    }

    /// Run `emit` unless the token is cancelled. Returns whether it ran.
    pub fn emit_unless_cancelled<F: FnOnce()>(&self, emit: F) -> bool {
        let _emit = self.emit_guard();
        if self.is_cancelled() {
            return false;
        }
        emit();
        true
    }

    fn emit_guard(&self) -> MutexGuard<'_, ()> {
        self.inner
            .emit_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Holder of the one running session, if any.
#[derive(Debug, Default)]
pub struct SessionSlot {
    active: Mutex<Option<CancelToken>>,
    next_id: AtomicU64,
}

impl SessionSlot {
    /// Empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for a new session.
    ///
    /// # Errors
    ///
    /// `DaqError::SessionBusy` if another session holds it.
    pub fn try_acquire(&self) -> AppResult<SessionGuard<'_>> {
        let mut active = self.lock();
        if active.is_some() {
            return Err(DaqError::SessionBusy);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let token = CancelToken::new(id);
        *active = Some(token.clone());
        tracing::debug!(session_id = id, "session slot acquired");
        Ok(SessionGuard { slot: self, token })
    }

    /// Token of the running session.
    pub fn current(&self) -> Option<CancelToken> {
        self.lock().clone()
    }

    /// Whether a session is running.
    pub fn is_busy(&self) -> bool {
        self.lock().is_some()
    }

    /// Clear the slot if it still belongs to `session_id`.
    fn release(&self, session_id: u64) -> bool {
        let mut active = self.lock();
        if active.as_ref().map(CancelToken::session_id) == Some(session_id) {
            *active = None;
            tracing::debug!(session_id, "session slot released");
            true
        } else {
            false
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<CancelToken>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// RAII claim on a [`SessionSlot`].
#[derive(Debug)]
pub struct SessionGuard<'a> {
    slot: &'a SessionSlot,
    token: CancelToken,
}

impl SessionGuard<'_> {
    /// Token of the guarded session.
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        self.slot.release(self.token.session_id());
    }
}
