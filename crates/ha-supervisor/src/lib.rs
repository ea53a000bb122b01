//! Supervisor: dependency-ordered startup, bounded-restart policy, and
//! health roll-up across the other components.

pub mod health;
pub mod supervisor;

pub use health::roll_up;
pub use supervisor::{BoxFuture, RestartPolicy, Supervisor, SupervisorError};
