//! Push Relay Core Types
//!
//! Shared domain types for the push notification relay: identities, inbound
//! messages and their fingerprints, outbound notification payloads, time and
//! configuration.

mod clock;
mod config;
mod identity;
mod message;
mod notification;

pub use clock::*;
pub use config::*;
pub use identity::*;
pub use message::*;
pub use notification::*;
