//! Push Relay Service Layer
//!
//! Decides whether a message warrants a push, throttles and deduplicates
//! attempts, fans notifications out to every registration, and gates the
//! reclamation of detached client connections.

mod connections;
mod dispatch;
mod events;
mod gate;
mod maintenance;
mod registration;
mod throttle;

pub use connections::ConnectionRegistry;
pub use dispatch::*;
pub use events::*;
pub use gate::*;
pub use maintenance::*;
pub use registration::*;
pub use throttle::*;
