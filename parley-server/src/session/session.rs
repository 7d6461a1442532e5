use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use parley_protocol::SessionId;

use super::{Outbox, OutboxClosed};

/// Server-side state for one connected client
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    /// Peer address as reported at accept time
    remote_addr: String,
    joined_at: DateTime<Utc>,
    outbox: Outbox,
}

impl Session {
    /// Create a session with a fresh identity and a bounded outbox
    ///
    /// Returns the receiving end of the outbox for the writer task.
    pub fn new(
        remote_addr: impl Into<String>,
        outbox_capacity: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        Self::with_id(SessionId::new(), remote_addr, outbox_capacity)
    }

    /// Create a session with a caller-chosen identity
    pub fn with_id(
        id: SessionId,
        remote_addr: impl Into<String>,
        outbox_capacity: usize,
    ) -> (Self, mpsc::Receiver<String>) {
        let (outbox, receiver) = Outbox::channel(outbox_capacity);
        let session = Self {
            id,
            remote_addr: remote_addr.into(),
            joined_at: Utc::now(),
            outbox,
        };
        (session, receiver)
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn joined_at(&self) -> DateTime<Utc> {
        self.joined_at
    }

    /// Enqueue a line for this client, waiting while the outbox is full
    pub async fn deliver(&self, line: impl Into<String>) -> Result<(), OutboxClosed> {
        self.outbox.deliver(line.into()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_protocol::Notice;

    #[test]
    fn test_new_session_has_unique_id() {
        let (a, _rx_a) = Session::new("127.0.0.1:1000", 8);
        let (b, _rx_b) = Session::new("127.0.0.1:1001", 8);

        assert_ne!(a.id(), b.id());
        assert_eq!(a.remote_addr(), "127.0.0.1:1000");
    }

    #[test]
    fn test_joined_at_is_now() {
        let before = Utc::now();
        let (session, _rx) = Session::new("peer", 1);
        let after = Utc::now();

        assert!(session.joined_at() >= before);
        assert!(session.joined_at() <= after);
    }

    #[tokio::test]
    async fn test_deliver_reaches_receiver() {
        let (session, mut rx) = Session::new("peer", 8);
        let id = session.id();

        session.deliver(Notice::Welcome { id }).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), format!("Welcome {} to chat room!", id));
    }

    #[tokio::test]
    async fn test_dropping_session_closes_outbox() {
        let (session, mut rx) = Session::new("peer", 8);
        drop(session);
        assert!(rx.recv().await.is_none());
    }
}
