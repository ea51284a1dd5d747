//! Jobstream - streaming progress client for knowledge-portal crawl jobs
//! and chat responses.
//!
//! Layers, bottom up: [`sse`] decodes transport chunks into frames,
//! [`events`] types them per protocol, [`connection`] runs the reconnecting
//! lifecycle, [`progress`] folds job events into monotonic snapshots, and
//! [`monitor`] ties it all together for consumers. [`client`] is the HTTP
//! entry point.

pub mod adapters;
pub mod client;
pub mod connection;
pub mod events;
pub mod monitor;
pub mod progress;
pub mod sse;
pub mod traits;
