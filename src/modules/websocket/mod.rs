//! WebSocket transport. The domain lives in the other modules; this one
//! only frames events for the wire and keeps one session actor per
//! connection.

pub mod handler;
pub mod message;
pub mod session;
