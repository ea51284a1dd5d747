//! High-level job monitor.
//!
//! [`JobMonitor`] composes a [`StreamConnection`] over the job protocol with
//! a [`ProgressTracker`], turning raw connection updates into ready-to-render
//! progress updates. This is the surface most consumers want; the lower
//! layers stay available for anything bespoke.

use std::sync::Arc;

use crate::connection::{CloseReason, ConnectionState, StreamConfig, StreamConnection, StreamUpdate};
use crate::events::{JobEvent, JobProtocol};
use crate::progress::{CompletionStats, ProgressSnapshot, ProgressTracker, TrackerUpdate};
use crate::traits::StreamTransport;

/// Consumer-facing updates for a monitored job.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorUpdate {
    /// The stream connected (or reconnected).
    Opened,
    /// The job advanced.
    Progress(ProgressSnapshot),
    /// The job finished successfully.
    Completed(CompletionStats),
    /// The job itself reported failure or cancellation.
    Failed { snapshot: ProgressSnapshot },
    /// Transient transport trouble; the job may still be running.
    TransportError(String),
    /// A reconnection attempt is pending.
    Reconnecting { attempt: u8 },
    /// The connection gave up. Says nothing about the job's fate.
    ConnectionLost { message: String },
    /// The monitor was misconfigured.
    ConfigError(String),
    /// The connection closed.
    Closed(CloseReason),
}

/// Watches one crawl job over its progress stream.
pub struct JobMonitor {
    connection: StreamConnection<JobProtocol>,
    tracker: ProgressTracker,
}

impl JobMonitor {
    pub fn new(config: StreamConfig, transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            connection: StreamConnection::new(config, transport),
            tracker: ProgressTracker::new(),
        }
    }

    /// Next consumer-visible update, or `None` once the stream is drained.
    ///
    /// Events that do not move the job forward (duplicate completions,
    /// unknown names) are swallowed here rather than surfaced as no-ops.
    pub async fn next_update(&mut self) -> Option<MonitorUpdate> {
        loop {
            let update = self.connection.recv().await?;
            match update {
                StreamUpdate::Opened => return Some(MonitorUpdate::Opened),
                StreamUpdate::Event(event) => {
                    if let JobEvent::StreamError { message } = &event {
                        self.tracker.apply(&event);
                        return Some(MonitorUpdate::TransportError(message.clone()));
                    }
                    match self.tracker.apply(&event) {
                        TrackerUpdate::Progress(snapshot) => {
                            return Some(MonitorUpdate::Progress(snapshot))
                        }
                        TrackerUpdate::Completed(_, stats) => {
                            return Some(MonitorUpdate::Completed(stats))
                        }
                        TrackerUpdate::Failed(snapshot) => {
                            return Some(MonitorUpdate::Failed { snapshot })
                        }
                        TrackerUpdate::None => continue,
                    }
                }
                StreamUpdate::TransportError(message) => {
                    return Some(MonitorUpdate::TransportError(message))
                }
                StreamUpdate::Reconnecting { attempt, .. } => {
                    return Some(MonitorUpdate::Reconnecting { attempt })
                }
                StreamUpdate::ReconnectsExhausted { last_error, .. } => {
                    return Some(MonitorUpdate::ConnectionLost {
                        message: last_error,
                    })
                }
                StreamUpdate::ConfigError(message) => {
                    return Some(MonitorUpdate::ConfigError(message))
                }
                StreamUpdate::Closed(reason) => return Some(MonitorUpdate::Closed(reason)),
            }
        }
    }

    pub fn connect(&self) {
        self.connection.connect();
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    pub fn snapshot(&self) -> &ProgressSnapshot {
        self.tracker.snapshot()
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }
}
