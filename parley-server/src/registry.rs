//! Session Registry and Broadcaster
//!
//! One task owns the set of live sessions. Connection handlers never touch
//! the set directly; they submit [`RegistryEvent`]s through a shared intake
//! channel and the registry applies them strictly in arrival order. Fan-out
//! happens inside the same loop, so membership cannot change mid-broadcast.
//!
//! ```text
//! handler A ─┐
//! handler B ─┼─► intake (mpsc) ─► Registry::run ─┬─► outbox A ─► writer A
//! handler C ─┘                                   ├─► outbox B ─► writer B
//!                                                └─► outbox C ─► writer C
//! ```
//!
//! ## Rules
//! - A session is a member iff its Join was processed and its Leave was not
//! - Broadcasts skip the session named as sender
//! - Leave drops the session, which closes its outbox exactly once
//! - A full outbox blocks the loop until the writer makes room

use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use parley_protocol::SessionId;
use parley_utils::{ParleyError, Result};

use crate::observability::Metrics;
use crate::session::Session;

/// A chat line awaiting fan-out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Session that produced the line; never receives it back
    pub sender_id: SessionId,
    pub content: String,
}

/// Events accepted by the registry loop
#[derive(Debug)]
pub enum RegistryEvent {
    /// Add a session to the membership set
    Join(Session),
    /// Remove a session and close its outbox
    Leave(SessionId),
    /// Deliver a message to every member except its sender
    Broadcast(Message),
    /// Report the current membership size
    Count(oneshot::Sender<usize>),
}

/// Cloneable submission side of the registry intake
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    intake: mpsc::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Register a session
    ///
    /// Each session may join at most once.
    pub async fn join(&self, session: Session) -> Result<()> {
        self.submit(RegistryEvent::Join(session)).await
    }

    /// Deregister a session (no-op if it is not a member)
    pub async fn leave(&self, session_id: SessionId) -> Result<()> {
        self.submit(RegistryEvent::Leave(session_id)).await
    }

    /// Fan a line out to everyone except `sender_id`
    pub async fn broadcast(&self, sender_id: SessionId, content: impl Into<String>) -> Result<()> {
        self.submit(RegistryEvent::Broadcast(Message {
            sender_id,
            content: content.into(),
        }))
        .await
    }

    /// Number of registered sessions, as seen after all previously
    /// submitted events from this handle
    pub async fn session_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.submit(RegistryEvent::Count(tx)).await?;
        rx.await.map_err(|_| ParleyError::RegistryClosed)
    }

    /// Whether the registry loop has stopped
    pub fn is_closed(&self) -> bool {
        self.intake.is_closed()
    }

    async fn submit(&self, event: RegistryEvent) -> Result<()> {
        self.intake
            .send(event)
            .await
            .map_err(|_| ParleyError::RegistryClosed)
    }
}

/// Owner of the membership set
pub struct Registry {
    sessions: HashMap<SessionId, Session>,
    intake: mpsc::Receiver<RegistryEvent>,
}

impl Registry {
    /// Create a registry and the handle feeding its intake
    pub fn new(intake_capacity: usize) -> (Self, RegistryHandle) {
        let (tx, rx) = mpsc::channel(intake_capacity);
        let registry = Self {
            sessions: HashMap::new(),
            intake: rx,
        };
        (registry, RegistryHandle { intake: tx })
    }

    /// Create a registry and run its loop on a new task
    pub fn spawn(intake_capacity: usize) -> (RegistryHandle, JoinHandle<()>) {
        let (registry, handle) = Self::new(intake_capacity);
        let task = tokio::spawn(registry.run());
        (handle, task)
    }

    /// Process events until every handle has been dropped
    ///
    /// Sessions still registered at that point are dropped, closing their
    /// outboxes.
    pub async fn run(mut self) {
        debug!("Registry loop started");

        while let Some(event) = self.intake.recv().await {
            self.handle_event(event).await;
        }

        info!(
            remaining = self.sessions.len(),
            "Registry intake closed, releasing remaining sessions"
        );
        self.sessions.clear();
    }

    /// Apply one event
    pub async fn handle_event(&mut self, event: RegistryEvent) {
        match event {
            RegistryEvent::Join(session) => self.join(session),
            RegistryEvent::Leave(session_id) => {
                self.leave(session_id);
            }
            RegistryEvent::Broadcast(message) => {
                self.broadcast(message).await;
            }
            RegistryEvent::Count(reply) => {
                // Requester may have given up
                let _ = reply.send(self.sessions.len());
            }
        }
    }

    fn join(&mut self, session: Session) {
        let id = session.id();

        debug_assert!(
            !self.sessions.contains_key(&id),
            "session {} joined twice",
            id
        );
        if self.sessions.contains_key(&id) {
            // Keep the original entry; the duplicate's outbox closes on drop
            error!(session_id = %id, "Session joined twice, ignoring duplicate");
            return;
        }

        debug!(
            session_id = %id,
            remote_addr = %session.remote_addr(),
            "Session joined"
        );
        self.sessions.insert(id, session);
        Metrics::global().record_join(self.sessions.len());
    }

    /// Returns true if the session was a member
    fn leave(&mut self, session_id: SessionId) -> bool {
        match self.sessions.remove(&session_id) {
            Some(session) => {
                let connected_for = chrono::Utc::now() - session.joined_at();
                debug!(
                    session_id = %session_id,
                    connected_secs = connected_for.num_seconds(),
                    "Session left"
                );
                // Dropping the session drops the only outbox sender
                drop(session);
                Metrics::global().record_leave(self.sessions.len());
                true
            }
            None => {
                debug!(session_id = %session_id, "Leave for unknown session ignored");
                false
            }
        }
    }

    /// Returns the number of outboxes the message was enqueued on
    async fn broadcast(&mut self, message: Message) -> usize {
        let mut delivered = 0;

        for (id, session) in &self.sessions {
            if *id == message.sender_id {
                continue;
            }

            match session.deliver(message.content.clone()).await {
                Ok(()) => delivered += 1,
                Err(_) => {
                    // Writer already stopped; the session's own Leave removes it
                    debug!(session_id = %id, "Skipping session with closed outbox");
                }
            }
        }

        Metrics::global().record_broadcast(delivered);
        delivered
    }
}

#[cfg(test)]
impl Registry {
    fn len(&self) -> usize {
        self.sessions.len()
    }

    fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn contains(&self, session_id: SessionId) -> bool {
        self.sessions.contains_key(&session_id)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("session_count", &self.sessions.len())
            .finish()
    }
}
