//! Trait abstractions for dependency injection
//!
//! Follows the adapter pattern: traits here define capability seams, concrete
//! implementations live in [`crate::adapters`].

mod transport;

pub use transport::{ByteStream, StreamTarget, StreamTransport, TransportError};
