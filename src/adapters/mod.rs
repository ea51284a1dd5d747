//! Concrete implementations of the trait abstractions in [`crate::traits`].

pub mod mock;
mod reqwest_transport;

pub use reqwest_transport::ReqwestTransport;
