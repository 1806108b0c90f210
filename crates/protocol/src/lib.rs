//! Wire protocol for lanshare.
//!
//! Devices talk to the server over a persistent WebSocket carrying
//! JSON frames. Every frame is a tagged message with a `type`
//! discriminator; the set of types is closed and unknown tags are
//! dropped by the dispatcher. File uploads ride over a separate
//! resumable HTTP protocol and only surface here as server-pushed
//! `file_offer` broadcasts.

pub mod constants;
mod message;

pub use message::{DecodeError, WireMessage, now_ts};
