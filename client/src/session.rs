//! Streaming session state machine.
//!
//! The session owns the single live connection and the sink fed from it.
//! Everything that changes it (user requests, transport open/close reports,
//! inbound frames) arrives through `&mut self` methods, so transitions never
//! interleave. Transport activity is reported as [`SessionEvent`]s tagged
//! with the [`ConnectionId`] they came from; anything tagged with an id other
//! than the current connection's is discarded, which keeps audio from an
//! abandoned connection out of the fresh sink.

use std::fmt;
use std::time::Instant;

use paroli_protocol::{AudioFormat, InboundFrame, StatusFrame, SynthesisRequest};
use tracing::{debug, error, info, trace, warn};

use crate::audio::{AudioSink, SinkFactory};
use crate::ClientError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing attempted yet
    #[default]
    Idle,
    Connecting,
    Open,
    /// Explicit close requested, waiting for the transport to confirm
    Closing,
    /// The connection is gone; the next request opens a new one
    Closed,
}

/// Something the transport observed on a connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Opened(ConnectionId),
    Frame(ConnectionId, InboundFrame),
    /// Closed locally or remotely, or failed to open; `None` for a clean
    /// local close
    Closed(ConnectionId, Option<String>),
}

impl SessionEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            Self::Opened(id) | Self::Frame(id, _) | Self::Closed(id, _) => *id,
        }
    }
}

/// Opens connections that report back through [`SessionEvent`]s
pub trait Connector {
    type Connection: Connection;

    /// Start connecting. Completion, failure and inbound frames are all
    /// reported later as events carrying `id`.
    fn open(&mut self, id: ConnectionId) -> Self::Connection;
}

pub trait Connection {
    /// Queue one text frame. Only called once the connection reported open.
    /// Returns false if the connection is already gone.
    fn send(&mut self, frame: String) -> bool;

    /// Tear down. No frame events may be emitted afterwards.
    fn close(&mut self);
}

/// Receives server-side errors, the only failures surfaced to the user
pub trait ErrorReporter {
    fn report(&mut self, status: &StatusFrame);
}

/// Logs server errors
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&mut self, status: &StatusFrame) {
        error!("{}", ClientError::Server(status.clone()));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub connections_opened: u64,
    pub requests_sent: u64,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
    pub keepalives: u64,
    pub server_errors: u64,
    pub stale_events: u64,
    pub last_audio: Option<Instant>,
}

pub struct Session<C: Connector, F: SinkFactory, R: ErrorReporter> {
    connector: C,
    sinks: F,
    reporter: R,
    format: AudioFormat,
    phase: Phase,
    next_id: u64,
    connection: Option<(ConnectionId, C::Connection)>,
    sink: Option<F::Sink>,
    /// Frame waiting for the current connection to open
    pending: Option<String>,
    stats: SessionStats,
}

impl<C: Connector, F: SinkFactory, R: ErrorReporter> Session<C, F, R> {
    pub fn new(connector: C, sinks: F, reporter: R, format: AudioFormat) -> Self {
        Self {
            connector,
            sinks,
            reporter,
            format,
            phase: Phase::Idle,
            next_id: 0,
            connection: None,
            sink: None,
            pending: None,
            stats: SessionStats::default(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|(id, _)| *id)
    }

    /// Send `request` now if the connection is open, otherwise replace any
    /// existing connection with a new one and send once it opens.
    ///
    /// A request submitted while a connection attempt is in flight
    /// supersedes that attempt: only the latest request is sent.
    pub fn submit(&mut self, request: &SynthesisRequest) -> Result<(), ClientError> {
        let frame = request.to_frame()?;

        if self.phase == Phase::Open {
            if let Some((id, connection)) = self.connection.as_mut() {
                debug!(connection = %id, chars = request.text().len(), "Sending request");
                if connection.send(frame.clone()) {
                    self.stats.requests_sent += 1;
                    return Ok(());
                }
                // Its close report is still on the way
                warn!(connection = %id, "Connection is gone, reopening");
            }
        }

        self.reconnect(frame)
    }

    fn reconnect(&mut self, frame: String) -> Result<(), ClientError> {
        // Build the sink first so a failed create leaves the old state intact
        let sink = self.sinks.create(self.format)?;
        self.teardown();
        self.sink = Some(sink);

        self.next_id += 1;
        let id = ConnectionId(self.next_id);
        info!(connection = %id, "Opening connection");
        let connection = self.connector.open(id);
        self.connection = Some((id, connection));
        self.pending = Some(frame);
        self.stats.connections_opened += 1;
        self.set_phase(Phase::Connecting);
        Ok(())
    }

    /// Drop the current connection without waiting for its close report
    fn teardown(&mut self) {
        self.pending = None;
        if let Some((id, mut connection)) = self.connection.take() {
            debug!(connection = %id, "Discarding connection");
            connection.close();
        }
    }

    /// Begin an explicit close of the live connection
    pub fn close(&mut self) {
        match self.phase {
            Phase::Connecting | Phase::Open => {
                self.pending = None;
                if let Some((id, connection)) = self.connection.as_mut() {
                    info!(connection = %id, "Closing connection");
                    connection.close();
                }
                self.set_phase(Phase::Closing);
            }
            Phase::Idle | Phase::Closing | Phase::Closed => {}
        }
    }

    /// Close everything and let the sink play out what it holds
    pub fn shutdown(&mut self) {
        self.teardown();
        if self.phase != Phase::Idle {
            self.set_phase(Phase::Closed);
        }
        if let Some(mut sink) = self.sink.take() {
            sink.finish();
        }
    }

    pub fn handle(&mut self, event: SessionEvent) {
        let id = event.connection();
        if self.current_connection() != Some(id) {
            self.stats.stale_events += 1;
            trace!(connection = %id, "Ignoring event from stale connection");
            return;
        }

        match event {
            SessionEvent::Opened(_) => self.on_open(id),
            SessionEvent::Frame(_, frame) => self.on_frame(id, frame),
            SessionEvent::Closed(_, reason) => self.on_closed(id, reason),
        }
    }

    fn on_open(&mut self, id: ConnectionId) {
        if self.phase != Phase::Connecting {
            return;
        }
        info!(connection = %id, "Connection open");
        self.set_phase(Phase::Open);

        if let (Some(frame), Some((_, connection))) = (self.pending.take(), self.connection.as_mut()) {
            if connection.send(frame) {
                self.stats.requests_sent += 1;
            }
        }
    }

    fn on_frame(&mut self, id: ConnectionId, frame: InboundFrame) {
        if self.phase != Phase::Open {
            trace!(connection = %id, phase = ?self.phase, "Dropping frame outside open phase");
            return;
        }

        match frame {
            InboundFrame::AudioChunk(pcm) => {
                self.stats.audio_chunks += 1;
                self.stats.audio_bytes += pcm.len() as u64;
                self.stats.last_audio = Some(Instant::now());
                trace!(connection = %id, bytes = pcm.len(), "Audio chunk");
                if let Some(sink) = self.sink.as_mut() {
                    sink.feed(pcm);
                }
            }
            InboundFrame::StatusOk => debug!(connection = %id, "Request acknowledged"),
            InboundFrame::StatusError(status) => {
                self.stats.server_errors += 1;
                self.reporter.report(&status);
            }
            InboundFrame::EmptyFrame => {
                self.stats.keepalives += 1;
            }
        }
    }

    fn on_closed(&mut self, id: ConnectionId, reason: Option<String>) {
        self.connection = None;
        self.pending = None;
        match reason {
            Some(reason) if self.phase != Phase::Closing => {
                warn!(connection = %id, "{}", ClientError::TransportFailure(reason));
            }
            _ => info!(connection = %id, "Connection closed"),
        }
        self.set_phase(Phase::Closed);
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            debug!(from = ?self.phase, to = ?phase, "Session phase");
            self.phase = phase;
        }
    }
}
