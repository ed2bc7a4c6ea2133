//! Streaming Protocol Types
//!
//! Closed message types for each side of the relay, parsed once at the
//! boundary:
//!
//! - [`control`]: client → relay control requests and their errors
//! - [`outbound`]: relay → client events
//! - [`channel`]: upstream channel messages and routing-key extraction

pub mod channel;
pub mod control;
pub mod outbound;

pub use channel::{UpstreamMessage, candle_key, extract_user};
pub use control::{ClientProtocolError, ClientRequest};
pub use outbound::{CONNECTED_MESSAGE, Confirmation, ServerMessage};
