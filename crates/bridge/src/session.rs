//! In-memory registry of live streaming sessions.
//!
//! Each entry maps a session id to the outbound channel of the connection currently serving it.
//! Connections hold a [`SessionLease`]; a resumed session bumps the entry's generation so the
//! replaced connection's teardown cannot remove the new registration.

use crate::error::{BridgeError, Result};
use crate::protocol::OutboundMessage;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

pub type OutboundSender = mpsc::Sender<OutboundMessage>;

struct SessionEntry {
    sender: OutboundSender,
    cancel: CancellationToken,
    generation: u64,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    sessions: HashMap<String, SessionEntry>,
    next_generation: u64,
}

/// A connection's claim on a registered session.
#[derive(Debug, Clone)]
pub struct SessionLease {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Cancelled when the session is removed, replaced by a resume, or the server shuts down.
    pub cancel: CancellationToken,
    pub resumed: bool,
    generation: u64,
}

pub struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    max_sessions: usize,
    shutdown: CancellationToken,
}

impl SessionRegistry {
    /// `max_sessions == 0` means unbounded.
    #[must_use]
    pub fn new(max_sessions: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            max_sessions,
            shutdown: CancellationToken::new(),
        }
    }

    /// Register `sender` under a fresh id, or under `requested_id` when resuming.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::UnknownSession`] if `requested_id` is given but not live. Nothing is
    ///   registered in that case.
    /// - [`BridgeError::SessionLimitReached`] if a new session would exceed the bound.
    pub fn create(
        &self,
        requested_id: Option<&str>,
        sender: OutboundSender,
    ) -> Result<SessionLease> {
        let mut inner = self.inner.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let cancel = self.shutdown.child_token();

        if let Some(id) = requested_id {
            let Some(existing) = inner.sessions.get_mut(id) else {
                return Err(BridgeError::UnknownSession);
            };
            existing.cancel.cancel();
            existing.sender = sender;
            existing.cancel = cancel.clone();
            existing.generation = generation;
            let created_at = existing.created_at;
            info!(session_id = %id, "session resumed");
            return Ok(SessionLease {
                id: id.to_string(),
                created_at,
                cancel,
                resumed: true,
                generation,
            });
        }

        if self.max_sessions > 0 && inner.sessions.len() >= self.max_sessions {
            return Err(BridgeError::SessionLimitReached);
        }

        let id = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        let created_at = Utc::now();
        inner.sessions.insert(
            id.clone(),
            SessionEntry {
                sender,
                cancel: cancel.clone(),
                generation,
                created_at,
            },
        );
        info!(session_id = %id, live = inner.sessions.len(), "session created");

        Ok(SessionLease {
            id,
            created_at,
            cancel,
            resumed: false,
            generation,
        })
    }

    /// Outbound channel of a live session.
    #[must_use]
    pub fn lookup(&self, id: &str) -> Option<OutboundSender> {
        self.inner.lock().sessions.get(id).map(|e| e.sender.clone())
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().sessions.contains_key(id)
    }

    /// Remove a session regardless of which connection serves it. Idempotent.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.inner.lock().sessions.remove(id);
        match removed {
            Some(entry) => {
                entry.cancel.cancel();
                info!(session_id = %id, "session removed");
                true
            }
            None => false,
        }
    }

    /// Connection-scoped teardown: remove the session only if `lease` still owns it. Idempotent.
    pub fn release(&self, lease: &SessionLease) -> bool {
        let mut inner = self.inner.lock();
        let owned = inner
            .sessions
            .get(&lease.id)
            .is_some_and(|e| e.generation == lease.generation);
        if !owned {
            debug!(session_id = %lease.id, "lease no longer current; nothing to release");
            return false;
        }
        inner.sessions.remove(&lease.id);
        drop(inner);
        lease.cancel.cancel();
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cancel every live session's connection. Entries are released by their connections.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}
