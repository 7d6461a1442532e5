//! Per-connection chat session state
//!
//! A [`Session`] is created by the connection handler and handed to the
//! registry on join. Its [`Outbox`] is the only way lines reach the client.

#[allow(clippy::module_inception)]
mod session;
mod outbox;

pub use outbox::{Outbox, OutboxClosed};
pub use session::Session;
