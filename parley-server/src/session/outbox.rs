//! Bounded outbound mailbox

use tokio::sync::mpsc;

/// The session's writer task has stopped and the mailbox no longer accepts lines
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("outbox closed")]
pub struct OutboxClosed(pub String);

/// Sending side of a session's mailbox
///
/// Not `Clone`: exactly one enqueuer exists, so dropping it is what closes
/// the mailbox and lets the writer task finish.
pub struct Outbox {
    sender: mpsc::Sender<String>,
}

impl Outbox {
    /// Create a mailbox holding at most `capacity` undelivered lines
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Enqueue a line, waiting for room if the mailbox is full
    pub async fn deliver(&self, line: String) -> Result<(), OutboxClosed> {
        self.sender
            .send(line)
            .await
            .map_err(|mpsc::error::SendError(line)| OutboxClosed(line))
    }

    /// Whether the receiving writer task has gone away
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Free slots right now
    pub fn capacity(&self) -> usize {
        self.sender.capacity()
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outbox")
            .field("closed", &self.is_closed())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deliver_in_order() {
        let (outbox, mut rx) = Outbox::channel(4);

        outbox.deliver("one".into()).await.unwrap();
        outbox.deliver("two".into()).await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("one"));
        assert_eq!(rx.recv().await.as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_drop_closes_receiver() {
        let (outbox, mut rx) = Outbox::channel(4);
        outbox.deliver("last".into()).await.unwrap();
        drop(outbox);

        // Queued lines still drain, then the stream ends
        assert_eq!(rx.recv().await.as_deref(), Some("last"));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_deliver_after_receiver_dropped() {
        let (outbox, rx) = Outbox::channel(1);
        drop(rx);

        assert!(outbox.is_closed());
        let err = outbox.deliver("lost".into()).await.unwrap_err();
        assert_eq!(err, OutboxClosed("lost".into()));
    }

    #[tokio::test]
    async fn test_capacity_shrinks_while_full() {
        let (outbox, _rx) = Outbox::channel(2);
        assert_eq!(outbox.capacity(), 2);

        outbox.deliver("a".into()).await.unwrap();
        outbox.deliver("b".into()).await.unwrap();
        assert_eq!(outbox.capacity(), 0);
    }
}
