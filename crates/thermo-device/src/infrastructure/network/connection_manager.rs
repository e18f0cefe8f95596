//! ConnectionManager: owns the TCP link to the collector and wires the device
//! together.
//!
//! # State machine
//!
//! ```text
//!              connect()                 handshake ok
//! Disconnected ─────────> Connecting ─────────────────> Connected
//!      ^  ^                   │                            │  │
//!      │  │    socket error   v        write/read error    │  │
//!      │  └──────────────── Error <────────────────────────┘  │
//!      └──────────────────────────────────────────────────────┘
//!            disconnect() / peer closed / peer sent DISCONNECT
//! ```
//!
//! `connect` is accepted from `Disconnected` and `Error` only.  State changes
//! are idempotent: when the receive loop notices a closed socket at the same
//! moment `disconnect()` tears the session down, whichever comes second finds
//! nothing left to do.
//!
//! # Tasks
//!
//! - **Receive loop** (one per session) – reads into a fixed buffer, feeds the
//!   [`FrameBuffer`], dispatches frames in arrival order.  It races every read
//!   against a cancellation signal so `disconnect()` never has to abort it.
//! - **Reading forwarder** (one per manager) – subscribed to the thermometer;
//!   reports every reading to the shell and sends it to the collector while
//!   connected.
//!
//! All writes go through one async mutex around the write half, so frames
//! from the forwarder, the receive loop and shell calls never interleave.
//! Every write also races the session's cancel signal: a collector that stops
//! reading can stall a write, but never the lock holder's release, so
//! `disconnect()` always completes.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, UNIX_EPOCH};

use thermo_core::protocol::{format_temperature, FrameBuffer, FrameCodec, Message, Method};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::application::dispatch_message::{Action, MessageDispatcher};
use crate::application::log_line::LogLabel;
use crate::application::simulate_device::Thermometer;
use crate::infrastructure::network::{ConnectionConfig, NetworkError, MAX_PORT, MIN_PORT};
use crate::infrastructure::shell_bridge::{ConnectionState, DeviceStatusDto, ShellEvent};

/// Longest `disconnect()` waits to deliver `Method: DISCONNECT;`.
const GOODBYE_TIMEOUT: Duration = Duration::from_millis(500);

/// Write half of the current session's socket.
struct SessionWriter {
    id: Uuid,
    half: OwnedWriteHalf,
    /// Raised when the session is torn down; aborts a pending write.
    cancel: watch::Receiver<bool>,
}

/// Handle on a running receive loop.
struct Session {
    id: Uuid,
    cancel: watch::Sender<bool>,
    receiver: Option<JoinHandle<()>>,
}

/// Why a receive loop stopped.
enum LoopEnd {
    Cancelled,
    Closed,
    PeerRequested,
    Failed(io::Error),
}

/// The connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    codec: FrameCodec,
    thermometer: Arc<Thermometer>,
    dispatcher: MessageDispatcher,
    events: mpsc::UnboundedSender<ShellEvent>,
    state: Mutex<ConnectionState>,
    writer: tokio::sync::Mutex<Option<SessionWriter>>,
    session: Mutex<Option<Session>>,
}

impl ConnectionManager {
    /// Creates a manager and returns it together with the shell event
    /// receiver.
    ///
    /// Spawns the reading forwarder, so it must be called from within a Tokio
    /// runtime.
    pub fn new(
        config: ConnectionConfig,
        thermometer: Arc<Thermometer>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ShellEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            codec: FrameCodec::new(config.encoding),
            dispatcher: MessageDispatcher::new(Arc::clone(&thermometer)),
            config,
            thermometer,
            events,
            state: Mutex::new(ConnectionState::Disconnected),
            writer: tokio::sync::Mutex::new(None),
            session: Mutex::new(None),
        });

        tokio::spawn(forward_readings(
            Arc::downgrade(&manager),
            manager.thermometer.subscribe(),
        ));

        (manager, rx)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// The thermometer this manager reports on.
    pub fn thermometer(&self) -> &Arc<Thermometer> {
        &self.thermometer
    }

    /// The configuration the manager was built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Opens a session with the collector at `ip:port`.
    ///
    /// On success the `Device` and `Update interval` facts have been written,
    /// in that order, and the receive loop is running.
    ///
    /// # Errors
    ///
    /// - [`NetworkError::InvalidPort`] for ports outside [1024, 49151].
    /// - [`NetworkError::AlreadyActive`] unless the state is `Disconnected`
    ///   or `Error`.
    /// - [`NetworkError::ConnectFailed`] if the TCP handshake fails; the state
    ///   becomes `Error`.
    /// - [`NetworkError::Io`] if the handshake facts cannot be written.
    pub async fn connect(self: &Arc<Self>, ip: IpAddr, port: u16) -> Result<(), NetworkError> {
        if !(MIN_PORT..=MAX_PORT).contains(&port) {
            let err = NetworkError::InvalidPort(port.to_string());
            self.log_error(LogLabel::Port.line(&err));
            return Err(err);
        }

        if let Err(current) = self.transition(
            &[ConnectionState::Disconnected, ConnectionState::Error],
            ConnectionState::Connecting,
        ) {
            let err = NetworkError::AlreadyActive(current);
            self.log_error(LogLabel::Connection.line(&err));
            return Err(err);
        }

        let addr = SocketAddr::new(ip, port);
        self.log(LogLabel::Connection.line(format_args!("Connecting to {addr}")));

        let stream = match TcpStream::connect(addr).await {
            Ok(stream) => stream,
            Err(source) => {
                let err = NetworkError::ConnectFailed { addr, source };
                // disconnect() may have reset the state while we waited.
                let _ = self.transition(&[ConnectionState::Connecting], ConnectionState::Error);
                self.log_error(LogLabel::Connection.line(&err));
                return Err(err);
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable Nagle on collector socket: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let id = Uuid::new_v4();
        let (cancel, cancel_rx) = watch::channel(false);

        // Hold the write path for the whole handshake so no other frame can
        // slip in ahead of the identity facts.
        let mut writer = self.writer.lock().await;
        if self
            .transition(&[ConnectionState::Connecting], ConnectionState::Connected)
            .is_err()
        {
            info!(%addr, "connect abandoned: disconnected during handshake");
            return Ok(());
        }
        let previous = lock(&self.session).replace(Session {
            id,
            cancel,
            receiver: None,
        });
        if let Some(stale) = previous {
            stale.cancel.send_replace(true);
        }
        *writer = Some(SessionWriter {
            id,
            half: write_half,
            cancel: cancel_rx.clone(),
        });
        self.log(LogLabel::Connection.line(format_args!("Connected to {addr}")));

        let handshake = [
            Message::Device(self.config.device_type.clone()),
            Message::UpdateInterval(i64::from(self.thermometer.update_interval())),
        ];
        for msg in &handshake {
            if let Err(e) = self.write_locked(&mut writer, msg).await {
                drop(writer);
                if self.write_failed(id, &e) {
                    return Err(e);
                }
                info!(%addr, "connect abandoned: disconnected during handshake");
                return Ok(());
            }
            self.log_sent(msg);
        }

        let handle = tokio::spawn(Arc::clone(self).receive_loop(id, read_half, cancel_rx));
        if let Some(session) = lock(&self.session).as_mut().filter(|s| s.id == id) {
            session.receiver = Some(handle);
        }
        drop(writer);

        info!(%addr, session = %id, "session established");
        Ok(())
    }

    /// Closes the session.  Valid in every state; when never connected it
    /// only makes sure the state reads `Disconnected`.
    ///
    /// The goodbye frame is best effort: it is skipped when another write is
    /// in progress and abandoned after [`GOODBYE_TIMEOUT`], so a collector
    /// that stopped reading cannot keep the session open.
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Connected {
            self.say_goodbye().await;
        }

        // Cancelling first releases any task blocked in a write, which in
        // turn frees the writer lock taken below.
        let session = lock(&self.session).take();
        if let Some(session) = session {
            session.cancel.send_replace(true);
            if let Some(handle) = session.receiver {
                if let Err(e) = handle.await {
                    debug!(session = %session.id, "receive loop ended abnormally: {e}");
                }
            }
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.half.shutdown().await {
                debug!(session = %writer.id, "socket shutdown failed: {e}");
            }
        }

        self.set_state(ConnectionState::Disconnected);
        self.log_verbose(LogLabel::Connection.line("Connection was manually closed"));
    }

    async fn say_goodbye(&self) {
        let goodbye = Message::Method(Method::Disconnect);
        let Ok(mut writer) = self.writer.try_lock() else {
            debug!("writer busy; skipping goodbye frame");
            return;
        };
        let delivered =
            tokio::time::timeout(GOODBYE_TIMEOUT, self.write_locked(&mut writer, &goodbye)).await;
        match delivered {
            Ok(Ok(())) => {
                drop(writer);
                self.log_sent(&goodbye);
            }
            Ok(Err(e)) => debug!("goodbye frame not delivered: {e}"),
            Err(_) => debug!("goodbye frame timed out"),
        }
    }

    /// Writes one message to the collector.
    ///
    /// Does nothing unless connected.  A write failure moves the state to
    /// `Error` and is logged; it is never returned to the caller.  Returns
    /// whether the frame was written.
    pub async fn send(&self, msg: &Message) -> bool {
        if self.state() != ConnectionState::Connected {
            trace!(frame = %msg, "not connected; frame dropped");
            return false;
        }

        let mut writer = self.writer.lock().await;
        let Some(id) = writer.as_ref().map(|w| w.id) else {
            return false;
        };

        match self.write_locked(&mut writer, msg).await {
            Ok(()) => {
                drop(writer);
                self.log_sent(msg);
                true
            }
            Err(NetworkError::Protocol(e)) => {
                drop(writer);
                self.log_error(LogLabel::Network.line(format_args!("Cannot send {}: {e}", msg.key())));
                false
            }
            Err(e) => {
                drop(writer);
                self.write_failed(id, &e);
                false
            }
        }
    }

    /// Changes the update interval from the shell and tells the collector.
    ///
    /// # Errors
    ///
    /// [`NetworkError::Interval`] if `seconds` is outside [1, 10]; nothing
    /// changes in that case.
    pub async fn set_update_interval(&self, seconds: i64) -> Result<(), NetworkError> {
        if let Err(e) = self.thermometer.set_update_interval(seconds) {
            self.log_error(LogLabel::UpdateInterval.line(&e));
            return Err(e.into());
        }

        let secs = self.thermometer.update_interval();
        self.log(LogLabel::UpdateInterval.line(format_args!("Set to {secs}")));
        self.emit(ShellEvent::UpdateIntervalChanged(secs));
        self.send(&Message::UpdateInterval(i64::from(secs))).await;
        Ok(())
    }

    /// Generates a reading now; the forwarder delivers it like any other.
    pub fn force_temperature_update(&self) -> f64 {
        self.log_verbose(LogLabel::Thermometer.line("Temperature update was forced"));
        self.thermometer.update_temperature()
    }

    /// Snapshot for the shell.
    pub fn status(&self) -> DeviceStatusDto {
        let state = self.state();
        let temperature = self.thermometer.temperature();
        let last_update_us = self
            .thermometer
            .last_update()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);

        DeviceStatusDto {
            connection_state: state,
            connection_label: state.label().to_string(),
            temperature,
            temperature_display: format_temperature(temperature),
            update_interval_secs: self.thermometer.update_interval(),
            last_update_us,
        }
    }

    /// Sends a line to the shell log.
    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        info!("{line}");
        self.emit(ShellEvent::LogLine(line));
    }

    fn log_error(&self, line: impl Into<String>) {
        let line = line.into();
        warn!("{line}");
        self.emit(ShellEvent::LogLine(line));
    }

    fn log_verbose(&self, line: impl Into<String>) {
        let line = line.into();
        debug!("{line}");
        if self.config.verbose {
            self.emit(ShellEvent::LogLine(line));
        }
    }

    fn log_sent(&self, msg: &Message) {
        match msg {
            Message::Device(_) => self.log(LogLabel::Network.line("Sent info")),
            Message::UpdateInterval(_) => self.log(LogLabel::Network.line("Sent update interval")),
            Message::Temperature(t) => self.log(LogLabel::Network.line(format_args!(
                "Sent temperature: {}",
                format_temperature(*t)
            ))),
            Message::Status(code) => {
                self.log_verbose(LogLabel::Network.line(format_args!("Sent status: {code}")))
            }
            Message::Method(method) => {
                self.log_verbose(LogLabel::Network.line(format_args!("Sent method: {method}")))
            }
        }
    }

    fn emit(&self, event: ShellEvent) {
        // The shell may have gone away; the device keeps running regardless.
        let _ = self.events.send(event);
    }

    // ── State ─────────────────────────────────────────────────────────────────

    fn set_state(&self, next: ConnectionState) {
        let mut state = lock(&self.state);
        self.store_state(&mut state, next);
    }

    /// Moves to `next` only if the current state is one of `from`; returns the
    /// current state otherwise.
    fn transition(
        &self,
        from: &[ConnectionState],
        next: ConnectionState,
    ) -> Result<(), ConnectionState> {
        let mut state = lock(&self.state);
        if !from.contains(&*state) {
            return Err(*state);
        }
        self.store_state(&mut state, next);
        Ok(())
    }

    /// Events are emitted under the state lock so the shell sees transitions
    /// in the order they happened.
    fn store_state(&self, state: &mut ConnectionState, next: ConnectionState) {
        if *state != next {
            *state = next;
            info!(state = %next, "connection state changed");
            self.emit(ShellEvent::ConnectionStateChanged(next));
        }
    }

    // ── Write path ────────────────────────────────────────────────────────────

    /// Encodes and writes `msg` while the caller holds the writer lock.  An
    /// I/O failure clears the slot, which closes the write side.
    async fn write_locked(
        &self,
        slot: &mut Option<SessionWriter>,
        msg: &Message,
    ) -> Result<(), NetworkError> {
        let bytes = self.codec.encode_message(msg)?;
        let Some(writer) = slot.as_mut() else {
            return Err(io::Error::from(io::ErrorKind::NotConnected).into());
        };
        let id = writer.id;

        let written = tokio::select! {
            written = writer.half.write_all(&bytes) => written,
            () = cancelled(&mut writer.cancel) => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "session closed while writing",
            )),
        };
        if let Err(e) = written {
            *slot = None;
            return Err(e.into());
        }
        trace!(session = %id, frame = %msg, "frame written");
        Ok(())
    }

    /// Handles a failed write on session `id`.  Returns `false` when the
    /// session was already being torn down elsewhere; nothing is reported in
    /// that case.
    fn write_failed(&self, id: Uuid, err: &NetworkError) -> bool {
        let session = {
            let mut slot = lock(&self.session);
            if slot.as_ref().is_some_and(|s| s.id == id) {
                slot.take()
            } else {
                None
            }
        };
        let Some(session) = session else {
            debug!(session = %id, "write aborted during teardown: {err}");
            return false;
        };
        session.cancel.send_replace(true);

        let _ = self.transition(&[ConnectionState::Connected], ConnectionState::Error);
        if self.config.verbose {
            self.log_error(LogLabel::Network.line(err));
        } else {
            self.log_error(LogLabel::Connection.line("Connection's unavailable."));
        }
        true
    }

    // ── Receive path ──────────────────────────────────────────────────────────

    async fn receive_loop(
        self: Arc<Self>,
        id: Uuid,
        mut reader: OwnedReadHalf,
        mut cancel: watch::Receiver<bool>,
    ) {
        let mut frames = FrameBuffer::new(self.codec);
        let mut buf = vec![0u8; self.config.read_buffer_size.max(1)];
        debug!(session = %id, "receive loop started");

        let end = 'read: loop {
            if *cancel.borrow() {
                break 'read LoopEnd::Cancelled;
            }

            let read = tokio::select! {
                _ = cancel.changed() => break 'read LoopEnd::Cancelled,
                read = reader.read(&mut buf) => read,
            };
            let n = match read {
                Ok(0) => break 'read LoopEnd::Closed,
                Ok(n) => n,
                Err(e) => break 'read LoopEnd::Failed(e),
            };
            trace!(session = %id, bytes = n, "read from collector");

            for frame in frames.push(&buf[..n]) {
                if self.handle_frame(&frame).await.is_break() {
                    break 'read LoopEnd::PeerRequested;
                }
            }
        };

        match end {
            LoopEnd::Cancelled => {
                debug!(session = %id, "receive loop cancelled");
                self.log(LogLabel::Network.line("Disconnected."));
            }
            LoopEnd::Closed | LoopEnd::PeerRequested => {
                self.log(LogLabel::Network.line("Disconnected."));
                self.finish_session(id, ConnectionState::Disconnected).await;
            }
            LoopEnd::Failed(e) => {
                self.log_error(LogLabel::Network.line(format_args!("Disconnected: {e}")));
                self.finish_session(id, ConnectionState::Error).await;
            }
        }
    }

    async fn handle_frame(&self, frame: &str) -> ControlFlow<()> {
        trace!(frame, "frame received");
        for action in self.dispatcher.dispatch(frame) {
            match action {
                Action::Send(msg) => {
                    self.send(&msg).await;
                }
                Action::Disconnect => return ControlFlow::Break(()),
                Action::IntervalChanged(secs) => self.emit(ShellEvent::UpdateIntervalChanged(secs)),
                Action::Log(line) => self.log(line),
                Action::LogVerbose(line) => self.log_verbose(line),
            }
        }
        ControlFlow::Continue(())
    }

    /// Tears down session `id` after its receive loop stopped on its own.
    /// Does nothing if `disconnect()` or a newer session already took over.
    async fn finish_session(&self, id: Uuid, next: ConnectionState) {
        let owned = {
            let mut slot = lock(&self.session);
            if slot.as_ref().is_some_and(|s| s.id == id) {
                slot.take();
                true
            } else {
                false
            }
        };
        if !owned {
            return;
        }

        let writer = {
            let mut slot = self.writer.lock().await;
            if slot.as_ref().is_some_and(|w| w.id == id) {
                slot.take()
            } else {
                None
            }
        };
        if let Some(mut writer) = writer {
            if let Err(e) = writer.half.shutdown().await {
                debug!(session = %id, "socket shutdown failed: {e}");
            }
        }

        let _ = self.transition(&[ConnectionState::Connected], next);
    }
}

/// Reports every thermometer reading to the shell and, while connected, to
/// the collector.  Ends when the manager or the thermometer is dropped.
async fn forward_readings(manager: Weak<ConnectionManager>, mut readings: broadcast::Receiver<f64>) {
    loop {
        let value = match readings.recv().await {
            Ok(value) => value,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "reading forwarder fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.emit(ShellEvent::TemperatureChanged(value));
        if manager.state() == ConnectionState::Connected {
            manager.send(&Message::Temperature(value)).await;
        }
    }
    debug!("reading forwarder stopped");
}

/// Resolves once the session's cancel flag is raised or its sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|raised| *raised).await;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
