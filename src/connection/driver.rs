//! Async driver for a stream connection.
//!
//! [`StreamConnection`] owns a background task that performs the IO the
//! [`StreamMachine`] asks for: opening the transport, reading chunks,
//! sleeping between reconnect attempts. Every state decision stays in the
//! machine; the task just shuttles signals in and updates out.
//!
//! Updates are sent while the machine lock is held, so their order always
//! matches the order of state transitions and nothing can be delivered after
//! the `Closed` update.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::connection::config::StreamConfig;
use crate::connection::machine::{
    Action, ConnectionState, Step, StreamMachine, StreamUpdate,
};
use crate::events::StreamProtocol;
use crate::traits::StreamTransport;

/// Handle to a running stream connection.
///
/// A handle serves one connect cycle group: once the connection closes, the
/// `Closed` update is the last one and [`recv`] drains to `None`. Retrying
/// after a close means building a new connection. Dropping the handle shuts
/// the background task down; [`disconnect`] does the same but delivers the
/// closing update first.
///
/// [`recv`]: StreamConnection::recv
/// [`disconnect`]: StreamConnection::disconnect
pub struct StreamConnection<P: StreamProtocol> {
    machine: Arc<Mutex<StreamMachine<P>>>,
    updates_rx: mpsc::UnboundedReceiver<StreamUpdate<P::Event>>,
    /// Our copy of the sender, released on close so the channel can drain
    /// to `None` instead of blocking a naive receive loop forever.
    updates_tx: Mutex<Option<mpsc::UnboundedSender<StreamUpdate<P::Event>>>>,
    connect_tx: mpsc::UnboundedSender<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl<P: StreamProtocol> StreamConnection<P> {
    /// Spawn the driver task. When `config.auto_connect` is set the first
    /// connect cycle starts immediately.
    pub fn new(config: StreamConfig, transport: Arc<dyn StreamTransport>) -> Self {
        let auto_connect = config.auto_connect;
        let machine = Arc::new(Mutex::new(StreamMachine::new(config)));
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (connect_tx, connect_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(drive(
            Arc::clone(&machine),
            transport,
            updates_tx.clone(),
            connect_rx,
            shutdown_rx,
        ));

        let connection = Self {
            machine,
            updates_rx,
            updates_tx: Mutex::new(Some(updates_tx)),
            connect_tx,
            shutdown_tx,
        };
        if auto_connect {
            connection.connect();
        }
        connection
    }

    /// Request a connect cycle. Idempotent while connecting or open.
    pub fn connect(&self) {
        let _ = self.connect_tx.send(());
    }

    /// Close the connection and stop the driver task.
    ///
    /// The close is applied synchronously so the state is `Closed` when this
    /// returns; the `Closed` update is still delivered through [`recv`], and
    /// nothing follows it.
    ///
    /// [`recv`]: StreamConnection::recv
    pub fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        // The machine lock is held across the send so an in-flight chunk on
        // the driver side cannot be delivered after the close update.
        let mut machine = self.machine.lock().unwrap();
        let updates = machine.disconnect();
        let mut slot = self.updates_tx.lock().unwrap();
        if let Some(tx) = slot.as_ref() {
            for update in updates {
                let _ = tx.send(update);
            }
        }
        *slot = None;
    }

    /// Receive the next update, or `None` once closed and drained.
    pub async fn recv(&mut self) -> Option<StreamUpdate<P::Event>> {
        let update = self.updates_rx.recv().await;
        if matches!(update, Some(StreamUpdate::Closed(_))) {
            // Nothing follows a close; release our sender so the channel
            // finishes once the driver task exits.
            self.updates_tx.lock().unwrap().take();
        }
        update
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.lock().unwrap().state().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.machine.lock().unwrap().is_connected()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.machine.lock().unwrap().is_reconnecting()
    }

    pub fn latest_event(&self) -> Option<P::Event> {
        self.machine.lock().unwrap().latest_event().cloned()
    }

    pub fn history(&self) -> Vec<P::Event> {
        self.machine.lock().unwrap().history().cloned().collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.machine.lock().unwrap().last_error().map(str::to_string)
    }
}

impl<P: StreamProtocol> Drop for StreamConnection<P> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Background task: waits for connect requests, then runs connect cycles.
/// Exits once the machine closes so its update sender is released.
async fn drive<P: StreamProtocol>(
    machine: Arc<Mutex<StreamMachine<P>>>,
    transport: Arc<dyn StreamTransport>,
    updates_tx: mpsc::UnboundedSender<StreamUpdate<P::Event>>,
    mut connect_rx: mpsc::UnboundedReceiver<()>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    debug!("driver shutting down");
                    return;
                }
            }
            signal = connect_rx.recv() => {
                if signal.is_none() {
                    // Handle dropped without an explicit disconnect.
                    return;
                }
                let action = dispatch(&machine, &updates_tx, |m| m.begin_connect());
                run_cycle(&machine, &transport, &updates_tx, &mut shutdown_rx, action).await;
                if *shutdown_rx.borrow() || machine.lock().unwrap().is_closed() {
                    return;
                }
            }
        }
    }
}

/// Run one connect cycle group to completion: connect, read, reconnect on
/// the machine's schedule, until the machine stops asking for work.
async fn run_cycle<P: StreamProtocol>(
    machine: &Arc<Mutex<StreamMachine<P>>>,
    transport: &Arc<dyn StreamTransport>,
    updates_tx: &mpsc::UnboundedSender<StreamUpdate<P::Event>>,
    shutdown_rx: &mut watch::Receiver<bool>,
    mut action: Action,
) {
    loop {
        match action {
            Action::None => return,
            Action::Connect => {
                let target = match machine.lock().unwrap().target().cloned() {
                    Some(target) => target,
                    None => return,
                };
                match transport.open(&target).await {
                    Ok(stream) => {
                        {
                            let mut m = machine.lock().unwrap();
                            let updates = m.open_succeeded();
                            send_all(updates_tx, updates);
                        }
                        action = read_stream(machine, updates_tx, shutdown_rx, stream).await;
                    }
                    Err(e) => {
                        action =
                            dispatch(machine, updates_tx, |m| m.transport_error(&e.to_string()));
                    }
                }
            }
            Action::ScheduleReconnect { delay, .. } => {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            return;
                        }
                    }
                    _ = tokio::time::sleep(delay) => {
                        action = dispatch(machine, updates_tx, |m| m.timer_fired());
                    }
                }
            }
        }
    }
}

/// Read transport chunks until the stream ends, errors, or the connection
/// closes. Returns the next action the cycle loop must take.
async fn read_stream<P: StreamProtocol>(
    machine: &Arc<Mutex<StreamMachine<P>>>,
    updates_tx: &mpsc::UnboundedSender<StreamUpdate<P::Event>>,
    shutdown_rx: &mut watch::Receiver<bool>,
    mut stream: crate::traits::ByteStream,
) -> Action {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    return Action::None;
                }
            }
            item = stream.next() => {
                match item {
                    Some(Ok(bytes)) => {
                        let mut m = machine.lock().unwrap();
                        let updates = m.chunk(&bytes);
                        send_all(updates_tx, updates);
                        let closed = m.is_closed();
                        drop(m);
                        if closed {
                            return Action::None;
                        }
                    }
                    Some(Err(e)) => {
                        return dispatch(machine, updates_tx, |m| {
                            m.transport_error(&e.to_string())
                        });
                    }
                    None => {
                        // Server closed without a terminal event; the machine
                        // ignores this if a terminal event already latched.
                        return dispatch(machine, updates_tx, |m| {
                            m.transport_error("stream ended")
                        });
                    }
                }
            }
        }
    }
}

/// Apply one machine transition and send its updates before releasing the
/// machine lock.
fn dispatch<P: StreamProtocol>(
    machine: &Arc<Mutex<StreamMachine<P>>>,
    updates_tx: &mpsc::UnboundedSender<StreamUpdate<P::Event>>,
    apply: impl FnOnce(&mut StreamMachine<P>) -> Step<P::Event>,
) -> Action {
    let mut m = machine.lock().unwrap();
    let step = apply(&mut m);
    send_all(updates_tx, step.updates);
    step.action
}

fn send_all<E>(updates_tx: &mpsc::UnboundedSender<StreamUpdate<E>>, updates: Vec<StreamUpdate<E>>) {
    for update in updates {
        let _ = updates_tx.send(update);
    }
}
