//! Connection state machine.
//!
//! [`StreamMachine`] is the IO-free core of a stream connection: one dispatch
//! method per inbound signal (connect request, transport open, chunk,
//! transport error, reconnect timer, disconnect), each returning the updates
//! to deliver to the consumer and the action the driver must perform next.
//! Keeping the machine free of IO lets the whole lifecycle, including
//! reconnection and teardown ordering, be tested without a transport.

use std::collections::VecDeque;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::connection::config::StreamConfig;
use crate::events::StreamProtocol;
use crate::sse::FrameDecoder;

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// `disconnect()` was called.
    Manual,
    /// A terminal event finished the stream.
    Terminal,
    /// Reconnection attempts were exhausted.
    MaxAttempts,
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Manual => write!(f, "manual"),
            CloseReason::Terminal => write!(f, "terminal"),
            CloseReason::MaxAttempts => write!(f, "max_attempts"),
        }
    }
}

/// Lifecycle of one stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting { attempt: u8 },
    Closed(CloseReason),
}

/// Updates delivered to the consumer, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamUpdate<E> {
    /// The transport confirmed it is ready. Precedes any event of its cycle.
    Opened,
    /// One decoded protocol event.
    Event(E),
    /// Transient transport error; reconnection is in progress.
    TransportError(String),
    /// A reconnection attempt has been scheduled.
    Reconnecting { attempt: u8, delay: Duration },
    /// Reconnection gave up. Fatal to the connection, not the job, and
    /// distinct from a job-reported failure.
    ReconnectsExhausted { attempts: u8, last_error: String },
    /// `connect()` was called without an endpoint configured.
    ConfigError(String),
    /// The connection closed. Emitted exactly once per connect cycle group;
    /// intermediate reconnect attempts do not produce it.
    Closed(CloseReason),
}

/// What the driver must do after a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing pending.
    None,
    /// Open the transport now.
    Connect,
    /// Wait `delay`, then fire the reconnect timer.
    ScheduleReconnect { attempt: u8, delay: Duration },
}

/// Result of one dispatch: consumer updates plus the driver's next action.
#[derive(Debug)]
pub struct Step<E> {
    pub updates: Vec<StreamUpdate<E>>,
    pub action: Action,
}

impl<E> Step<E> {
    fn noop() -> Self {
        Self {
            updates: Vec::new(),
            action: Action::None,
        }
    }
}

/// IO-free state machine for one logical stream subscription.
///
/// Generic over the wire protocol so the same machine serves job-progress
/// and chat-token streams.
pub struct StreamMachine<P: StreamProtocol> {
    config: StreamConfig,
    state: ConnectionState,
    attempts: u8,
    decoder: FrameDecoder,
    /// Set when a terminal event closed the stream deliberately. The
    /// transport reports our own close as an error immediately afterwards;
    /// this latch is what keeps that error from scheduling a reconnect.
    terminated: bool,
    /// Guards the once-per-cycle-group `Closed` update.
    close_emitted: bool,
    latest_event: Option<P::Event>,
    history: VecDeque<P::Event>,
    last_error: Option<String>,
}

impl<P: StreamProtocol> StreamMachine<P> {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            state: ConnectionState::Idle,
            attempts: 0,
            decoder: FrameDecoder::new(),
            terminated: false,
            close_emitted: false,
            latest_event: None,
            history: VecDeque::new(),
            last_error: None,
        }
    }

    /// Handle a `connect()` request.
    ///
    /// Idempotent while already `Connecting` or `Open`. Fails fast with a
    /// configuration error, never touching the network, when no endpoint is
    /// configured. Otherwise starts a fresh connect cycle group.
    pub fn begin_connect(&mut self) -> Step<P::Event> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => Step::noop(),
            _ => {
                if self.config.target.is_none() {
                    let message = "no stream endpoint configured".to_string();
                    warn!("connect refused: {}", message);
                    self.last_error = Some(message.clone());
                    return Step {
                        updates: vec![StreamUpdate::ConfigError(message)],
                        action: Action::None,
                    };
                }
                self.state = ConnectionState::Connecting;
                self.attempts = 0;
                self.terminated = false;
                self.close_emitted = false;
                self.last_error = None;
                self.decoder.reset();
                Step {
                    updates: Vec::new(),
                    action: Action::Connect,
                }
            }
        }
    }

    /// Handle the transport confirming it is open.
    pub fn open_succeeded(&mut self) -> Vec<StreamUpdate<P::Event>> {
        if self.is_closed() {
            return Vec::new();
        }
        info!("stream connected");
        self.state = ConnectionState::Open;
        self.attempts = 0;
        self.decoder.reset();
        vec![StreamUpdate::Opened]
    }

    /// Handle one transport chunk, emitting every event it completes.
    ///
    /// A terminal event closes the connection deliberately: remaining events
    /// in the same chunk are discarded and no reconnect will follow.
    pub fn chunk(&mut self, data: &[u8]) -> Vec<StreamUpdate<P::Event>> {
        if self.state != ConnectionState::Open {
            return Vec::new();
        }

        let mut updates = Vec::new();
        for raw in self.decoder.feed(data) {
            let event = P::decode(&raw);
            self.record_event(event.clone());
            let terminal = P::is_terminal(&event);
            updates.push(StreamUpdate::Event(event));
            if terminal {
                debug!("terminal event received, closing stream");
                self.terminated = true;
                self.close(CloseReason::Terminal, &mut updates);
                break;
            }
        }
        updates
    }

    /// Handle a transport-level failure (failed open, broken read, or EOF).
    ///
    /// Ignored after a terminal event or manual close. Otherwise schedules
    /// the next reconnect attempt with linear backoff, or gives up once the
    /// attempt limit is reached.
    pub fn transport_error(&mut self, message: &str) -> Step<P::Event> {
        if self.terminated || self.is_closed() {
            debug!(error = %message, "ignoring transport error after close");
            return Step::noop();
        }
        if self.state == ConnectionState::Idle {
            return Step::noop();
        }

        self.last_error = Some(message.to_string());

        if self.attempts >= self.config.max_reconnect_attempts {
            warn!(
                attempts = self.attempts,
                "reconnection attempts exhausted, giving up"
            );
            let mut updates = vec![StreamUpdate::ReconnectsExhausted {
                attempts: self.attempts,
                last_error: message.to_string(),
            }];
            self.close(CloseReason::MaxAttempts, &mut updates);
            return Step {
                updates,
                action: Action::None,
            };
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let delay = self.config.reconnect_delay * u32::from(attempt);
        info!(attempt, ?delay, error = %message, "scheduling reconnect");
        self.state = ConnectionState::Reconnecting { attempt };
        Step {
            updates: vec![
                StreamUpdate::TransportError(message.to_string()),
                StreamUpdate::Reconnecting { attempt, delay },
            ],
            action: Action::ScheduleReconnect { attempt, delay },
        }
    }

    /// Handle the reconnect timer firing.
    pub fn timer_fired(&mut self) -> Step<P::Event> {
        match self.state {
            ConnectionState::Reconnecting { .. } => {
                self.state = ConnectionState::Connecting;
                self.decoder.reset();
                Step {
                    updates: Vec::new(),
                    action: Action::Connect,
                }
            }
            // Disconnected while the timer was pending.
            _ => Step::noop(),
        }
    }

    /// Handle a `disconnect()` request. No-op once closed.
    pub fn disconnect(&mut self) -> Vec<StreamUpdate<P::Event>> {
        if self.is_closed() {
            return Vec::new();
        }
        info!("stream disconnected");
        let mut updates = Vec::new();
        self.close(CloseReason::Manual, &mut updates);
        updates
    }

    fn close(&mut self, reason: CloseReason, updates: &mut Vec<StreamUpdate<P::Event>>) {
        self.state = ConnectionState::Closed(reason);
        if !self.close_emitted {
            self.close_emitted = true;
            updates.push(StreamUpdate::Closed(reason));
        }
    }

    fn record_event(&mut self, event: P::Event) {
        self.latest_event = Some(event.clone());
        if let Some(limit) = self.config.history_limit {
            while self.history.len() >= limit {
                self.history.pop_front();
            }
        }
        self.history.push_back(event);
    }

    // Observables

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Open
    }

    pub fn is_reconnecting(&self) -> bool {
        matches!(self.state, ConnectionState::Reconnecting { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ConnectionState::Closed(_))
    }

    pub fn latest_event(&self) -> Option<&P::Event> {
        self.latest_event.as_ref()
    }

    /// Append-only trailing window of received events, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &P::Event> {
        self.history.iter()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn target(&self) -> Option<&crate::traits::StreamTarget> {
        self.config.target.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{JobEvent, JobProtocol};
    use crate::traits::StreamTarget;

    fn config() -> StreamConfig {
        StreamConfig::for_target(StreamTarget::new("http://portal/api/v1/crawl-jobs/j1/stream"))
            .with_reconnect_delay(Duration::from_millis(100))
    }

    fn machine() -> StreamMachine<JobProtocol> {
        StreamMachine::new(config())
    }

    fn open_machine() -> StreamMachine<JobProtocol> {
        let mut m = machine();
        assert_eq!(m.begin_connect().action, Action::Connect);
        m.open_succeeded();
        m
    }

    #[test]
    fn test_connect_transitions_to_connecting() {
        let mut m = machine();
        let step = m.begin_connect();
        assert_eq!(step.action, Action::Connect);
        assert!(step.updates.is_empty());
        assert_eq!(*m.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_connect_idempotent_while_connecting_or_open() {
        let mut m = machine();
        m.begin_connect();
        let step = m.begin_connect();
        assert_eq!(step.action, Action::None);

        m.open_succeeded();
        let step = m.begin_connect();
        assert_eq!(step.action, Action::None);
        assert_eq!(*m.state(), ConnectionState::Open);
    }

    #[test]
    fn test_connect_without_endpoint_fails_fast() {
        let mut m: StreamMachine<JobProtocol> = StreamMachine::new(StreamConfig::default());
        let step = m.begin_connect();
        assert_eq!(step.action, Action::None);
        assert!(matches!(
            step.updates.as_slice(),
            [StreamUpdate::ConfigError(_)]
        ));
        assert_eq!(*m.state(), ConnectionState::Idle);
        assert!(m.last_error().is_some());
    }

    #[test]
    fn test_open_emits_opened_and_resets_attempts() {
        let mut m = machine();
        m.begin_connect();
        m.transport_error("refused");
        m.timer_fired();
        let updates = m.open_succeeded();
        assert_eq!(updates, vec![StreamUpdate::Opened]);
        assert!(m.is_connected());

        // Counter reset: next error schedules attempt 1 again.
        let step = m.transport_error("dropped");
        assert_eq!(
            step.action,
            Action::ScheduleReconnect {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
    }

    #[test]
    fn test_chunk_emits_events_in_order() {
        let mut m = open_machine();
        let updates = m.chunk(
            b"event: job_started\ndata: {}\n\ndata: {\"event\":\"searching\"}\n",
        );
        assert_eq!(
            updates,
            vec![
                StreamUpdate::Event(JobEvent::JobStarted),
                StreamUpdate::Event(JobEvent::Searching),
            ]
        );
        assert_eq!(m.latest_event(), Some(&JobEvent::Searching));
        assert_eq!(m.history().count(), 2);
    }

    #[test]
    fn test_history_bounded() {
        let mut m: StreamMachine<JobProtocol> =
            StreamMachine::new(config().with_history_limit(Some(2)));
        m.begin_connect();
        m.open_succeeded();
        m.chunk(b"data: {\"event\":\"job_started\"}\ndata: {\"event\":\"searching\"}\ndata: {\"event\":\"embedding\"}\n");
        let history: Vec<_> = m.history().cloned().collect();
        assert_eq!(history, vec![JobEvent::Searching, JobEvent::Embedding]);
    }

    #[test]
    fn test_terminal_event_closes_without_reconnect() {
        let mut m = open_machine();
        let updates = m.chunk(b"data: {\"event\":\"job_completed\",\"crawled_issues\":10}\n");
        assert_eq!(updates.len(), 2);
        assert!(matches!(updates[0], StreamUpdate::Event(_)));
        assert_eq!(updates[1], StreamUpdate::Closed(CloseReason::Terminal));
        assert_eq!(*m.state(), ConnectionState::Closed(CloseReason::Terminal));

        // Closing the transport ourselves surfaces as an error right after;
        // it must not schedule anything.
        let step = m.transport_error("connection reset");
        assert!(step.updates.is_empty());
        assert_eq!(step.action, Action::None);
    }

    #[test]
    fn test_events_after_terminal_in_same_chunk_discarded() {
        let mut m = open_machine();
        let updates = m.chunk(
            b"data: {\"event\":\"job_failed\",\"message\":\"boom\"}\ndata: {\"event\":\"searching\"}\n",
        );
        assert_eq!(updates.len(), 2);
        assert_eq!(
            updates[0],
            StreamUpdate::Event(JobEvent::JobFailed {
                message: "boom".to_string()
            })
        );
        assert_eq!(updates[1], StreamUpdate::Closed(CloseReason::Terminal));
    }

    #[test]
    fn test_linear_backoff_schedule() {
        let mut m = open_machine();

        let step = m.transport_error("drop 1");
        assert_eq!(
            step.action,
            Action::ScheduleReconnect {
                attempt: 1,
                delay: Duration::from_millis(100)
            }
        );
        assert!(m.is_reconnecting());
        m.timer_fired();

        let step = m.transport_error("drop 2");
        assert_eq!(
            step.action,
            Action::ScheduleReconnect {
                attempt: 2,
                delay: Duration::from_millis(200)
            }
        );
        m.timer_fired();

        let step = m.transport_error("drop 3");
        assert_eq!(
            step.action,
            Action::ScheduleReconnect {
                attempt: 3,
                delay: Duration::from_millis(300)
            }
        );
        m.timer_fired();

        // Fourth consecutive failure: limit of 3 reached, no further timer.
        let step = m.transport_error("drop 4");
        assert_eq!(step.action, Action::None);
        assert_eq!(
            step.updates,
            vec![
                StreamUpdate::ReconnectsExhausted {
                    attempts: 3,
                    last_error: "drop 4".to_string()
                },
                StreamUpdate::Closed(CloseReason::MaxAttempts),
            ]
        );
        assert_eq!(*m.state(), ConnectionState::Closed(CloseReason::MaxAttempts));
    }

    #[test]
    fn test_zero_max_attempts_fails_immediately() {
        let mut m: StreamMachine<JobProtocol> =
            StreamMachine::new(config().with_max_reconnect_attempts(0));
        m.begin_connect();
        m.open_succeeded();
        let step = m.transport_error("drop");
        assert_eq!(step.action, Action::None);
        assert_eq!(*m.state(), ConnectionState::Closed(CloseReason::MaxAttempts));
    }

    #[test]
    fn test_disconnect_emits_closed_once() {
        let mut m = open_machine();
        let updates = m.disconnect();
        assert_eq!(updates, vec![StreamUpdate::Closed(CloseReason::Manual)]);

        // Safe to call again: no-op.
        assert!(m.disconnect().is_empty());
    }

    #[test]
    fn test_disconnect_cancels_pending_reconnect() {
        let mut m = open_machine();
        m.transport_error("drop");
        assert!(m.is_reconnecting());

        let updates = m.disconnect();
        assert_eq!(updates, vec![StreamUpdate::Closed(CloseReason::Manual)]);

        // The timer may still fire after cancellation was requested; it must
        // not restart the cycle.
        let step = m.timer_fired();
        assert_eq!(step.action, Action::None);
        assert_eq!(*m.state(), ConnectionState::Closed(CloseReason::Manual));
    }

    #[test]
    fn test_reconnect_cycle_does_not_emit_intermediate_closes() {
        let mut m = open_machine();
        let step = m.transport_error("drop");
        assert!(!step
            .updates
            .iter()
            .any(|u| matches!(u, StreamUpdate::Closed(_))));
        let step = m.timer_fired();
        assert!(step.updates.is_empty());
    }

    #[test]
    fn test_chunks_ignored_when_not_open() {
        let mut m = machine();
        assert!(m.chunk(b"data: {\"event\":\"job_started\"}\n").is_empty());

        let mut m = open_machine();
        m.disconnect();
        assert!(m.chunk(b"data: {\"event\":\"job_started\"}\n").is_empty());
    }

    #[test]
    fn test_partial_frame_across_chunks() {
        let mut m = open_machine();
        assert!(m.chunk(b"data: {\"event\":\"searc").is_empty());
        let updates = m.chunk(b"hing\"}\n");
        assert_eq!(updates, vec![StreamUpdate::Event(JobEvent::Searching)]);
    }

    #[test]
    fn test_manual_reconnect_after_exhaustion() {
        let mut m: StreamMachine<JobProtocol> =
            StreamMachine::new(config().with_max_reconnect_attempts(0));
        m.begin_connect();
        m.open_succeeded();
        m.transport_error("drop");
        assert!(m.is_closed());

        // Consumer-initiated retry starts a fresh cycle group.
        let step = m.begin_connect();
        assert_eq!(step.action, Action::Connect);
        let updates = m.open_succeeded();
        assert_eq!(updates, vec![StreamUpdate::Opened]);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::Manual.to_string(), "manual");
        assert_eq!(CloseReason::Terminal.to_string(), "terminal");
        assert_eq!(CloseReason::MaxAttempts.to_string(), "max_attempts");
    }
}
