//! Microphone resource guard
//!
//! Only one component may have the physical input device open at a time:
//! either the wake word listener or the command recorder. Ownership is
//! expressed as a [`MicLease`] handed out by [`MicrophoneGuard::acquire`].

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::{Error, Result};

/// Component that can hold the microphone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MicOwner {
    /// Keyword spotting engine
    WakeWord,
    /// Command recorder
    Recorder,
}

impl fmt::Display for MicOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WakeWord => write!(f, "wake word listener"),
            Self::Recorder => write!(f, "command recorder"),
        }
    }
}

#[derive(Debug)]
struct Holder {
    owner: MicOwner,
    lease_id: u64,
    revoked: Arc<Notify>,
}

#[derive(Debug, Default)]
struct GuardState {
    holder: Option<Holder>,
    next_id: u64,
}

/// Serializes access to the single audio input device
#[derive(Debug, Clone, Default)]
pub struct MicrophoneGuard {
    inner: Arc<Mutex<GuardState>>,
}

impl MicrophoneGuard {
    /// Create an unheld guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take exclusive ownership of the microphone
    ///
    /// Overlapping recordings are never queued: acquiring a held guard is a
    /// sequencing bug in the caller and is reported, not waited out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyHeld`] if another lease is outstanding
    pub fn acquire(&self, owner: MicOwner) -> Result<MicLease> {
        let mut state = self.lock();

        if let Some(holder) = &state.holder {
            tracing::error!(
                requested_by = %owner,
                held_by = %holder.owner,
                "microphone acquire while held"
            );
            return Err(Error::AlreadyHeld(holder.owner));
        }

        state.next_id += 1;
        let lease_id = state.next_id;
        let revoked = Arc::new(Notify::new());
        state.holder = Some(Holder {
            owner,
            lease_id,
            revoked: Arc::clone(&revoked),
        });

        tracing::debug!(owner = %owner, lease_id, "microphone acquired");

        Ok(MicLease {
            id: lease_id,
            owner,
            guard: self.clone(),
            revoked,
        })
    }

    /// Return a lease to the guard
    ///
    /// Releasing a lease that was already revoked is a no-op.
    pub fn release(&self, lease: MicLease) {
        drop(lease);
    }

    /// Forcibly take the microphone away from `owner`
    ///
    /// Succeeds whether or not `owner` currently holds it; returns true if a
    /// lease was actually revoked. The audio driver may need one scheduler
    /// tick after this before the device is really free.
    pub fn force_revoke(&self, owner: MicOwner) -> bool {
        let mut state = self.lock();

        match state.holder.take() {
            Some(holder) if holder.owner == owner => {
                holder.revoked.notify_one();
                tracing::debug!(owner = %owner, lease_id = holder.lease_id, "microphone revoked");
                true
            }
            other => {
                state.holder = other;
                false
            }
        }
    }

    /// Current holder, if any
    #[must_use]
    pub fn holder(&self) -> Option<MicOwner> {
        self.lock().holder.as_ref().map(|h| h.owner)
    }

    /// Check if any lease is outstanding
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.lock().holder.is_some()
    }

    fn release_id(&self, lease_id: u64) -> bool {
        let mut state = self.lock();

        if state.holder.as_ref().is_some_and(|h| h.lease_id == lease_id) {
            state.holder = None;
            true
        } else {
            false
        }
    }

    fn is_current(&self, lease_id: u64) -> bool {
        self.lock()
            .holder
            .as_ref()
            .is_some_and(|h| h.lease_id == lease_id)
    }

    fn lock(&self) -> MutexGuard<'_, GuardState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive ownership of the microphone input stream
///
/// Dropping the lease releases it.
#[derive(Debug)]
pub struct MicLease {
    id: u64,
    owner: MicOwner,
    guard: MicrophoneGuard,
    revoked: Arc<Notify>,
}

impl MicLease {
    /// Who holds this lease
    #[must_use]
    pub const fn owner(&self) -> MicOwner {
        self.owner
    }

    /// False once the lease was released or revoked
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.guard.is_current(self.id)
    }

    /// Resolve when the guard revokes this lease
    pub async fn revoked(&self) {
        if !self.is_active() {
            return;
        }
        self.revoked.notified().await;
    }

    /// Give the microphone back
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for MicLease {
    fn drop(&mut self) {
        if self.guard.release_id(self.id) {
            tracing::debug!(owner = %self.owner, lease_id = self.id, "microphone released");
        }
    }
}
