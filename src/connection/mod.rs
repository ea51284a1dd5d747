//! Stream connection lifecycle.
//!
//! Split into an IO-free state machine ([`machine`]) and an async driver
//! ([`driver`]) that runs it against a [`StreamTransport`]. Configuration
//! lives in [`config`].
//!
//! [`StreamTransport`]: crate::traits::StreamTransport

mod config;
mod driver;
mod machine;

pub use config::StreamConfig;
pub use driver::StreamConnection;
pub use machine::{Action, CloseReason, ConnectionState, Step, StreamMachine, StreamUpdate};
