//! Connection Session: maintains the authenticated, subscribed connection
//! to the home-automation hub's event bus and forwards raw events into the
//! pipeline over a bounded channel.

pub mod backoff;
pub mod session;

pub use backoff::{Backoff, BackoffConfig};
pub use session::{ClientConfig, ConnectionSession, SessionError, SessionState};
