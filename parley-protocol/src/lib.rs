//! parley-protocol: Wire format shared by the relay and its clients
//!
//! The chat protocol is newline-delimited UTF-8 text in both directions.
//! Inbound lines are raw chat content; outbound lines are one of the
//! [`Notice`] kinds.

pub mod codec;
pub mod messages;
pub mod types;

pub use codec::{CodecError, LineCodec, DEFAULT_MAX_LINE_LENGTH};
pub use messages::{echo_reply_json, Notice, ECHO_INDEX_BODY, ECHO_REPLY};
pub use types::SessionId;
