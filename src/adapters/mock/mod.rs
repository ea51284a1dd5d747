//! Mock adapters for testing.

mod transport;

pub use transport::{MockOutcome, MockTransport};
