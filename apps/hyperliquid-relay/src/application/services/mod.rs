//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `SubscriptionRegistry`: session ↔ subscription membership and the
//!   upstream requests it implies
//! - `SessionManager`: client session lifecycle and control messages
//! - `MessageRouter`: upstream message → outward event + audience
//! - `Relay`: the routing task fed by the upstream connector

mod registry;
mod relay;
mod router;
mod sessions;

pub use registry::{RegistrySnapshot, SubscriptionRegistry};
pub use relay::Relay;
pub use router::{MessageRouter, Route};
pub use sessions::{SessionChannel, SessionManager, SessionSendError};
