//! Event loop around [`Session`].
//!
//! A [`StreamingClient`] owns the session and is the only code that touches
//! it. User commands and transport events are both channel messages, and the
//! loop handles one at a time, so the session never needs a lock.
//! Collaborators keep a cloneable [`ClientHandle`].

use std::time::{Duration, Instant};

use paroli_protocol::{RequestBuilder, SynthesisRequest};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

use crate::audio::SinkFactory;
use crate::config::ClientConfig;
use crate::session::{Connector, ErrorReporter, Phase, Session, SessionEvent};
use crate::transport::WsConnector;
use crate::ClientError;

#[derive(Debug)]
enum Command {
    Submit(SynthesisRequest),
    Close,
    Shutdown,
}

/// Snapshot published after every handled message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientStatus {
    pub phase: Phase,
    pub connections_opened: u64,
    pub requests_sent: u64,
    pub audio_chunks: u64,
    pub audio_bytes: u64,
    pub server_errors: u64,
    pub last_audio: Option<Instant>,
    /// Last local failure (for example no audio device)
    pub last_error: Option<String>,
}

#[derive(Clone)]
pub struct ClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<ClientStatus>,
}

impl ClientHandle {
    pub fn submit(&self, request: SynthesisRequest) -> Result<(), ClientError> {
        self.commands
            .send(Command::Submit(request))
            .map_err(|_| ClientError::Stopped)
    }

    /// Validate and submit; invalid input never reaches the session
    pub fn speak(&self, builder: RequestBuilder) -> Result<(), ClientError> {
        let request = builder.build()?;
        self.submit(request)
    }

    pub fn close(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Close)
            .map_err(|_| ClientError::Stopped)
    }

    /// Stop the event loop; [`StreamingClient::run`] then returns the session
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.commands
            .send(Command::Shutdown)
            .map_err(|_| ClientError::Stopped)
    }

    pub fn status(&self) -> ClientStatus {
        self.status.borrow().clone()
    }

    /// Wait until the published status satisfies `predicate`
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&ClientStatus) -> bool,
    ) -> Result<ClientStatus, ClientError> {
        let mut status = self.status.clone();
        let matched = status
            .wait_for(predicate)
            .await
            .map_err(|_| ClientError::Stopped)?;
        Ok(matched.clone())
    }

    /// Wait for audio to start, then until `idle` passes without a new
    /// chunk. Returns early once the session closes or reports an error.
    pub async fn wait_until_idle(
        &self,
        first_audio: Duration,
        idle: Duration,
    ) -> Result<ClientStatus, ClientError> {
        let baseline = self.status();
        let finished = |s: &ClientStatus| {
            s.phase == Phase::Closed
                || s.server_errors > baseline.server_errors
                || s.last_error != baseline.last_error
        };

        let started = self.wait_for(|s| s.audio_chunks > baseline.audio_chunks || finished(s));
        let mut status = match tokio::time::timeout(first_audio, started).await {
            Ok(status) => status?,
            Err(_) => {
                warn!("No audio received after {:?}", first_audio);
                return Ok(self.status());
            }
        };

        while !finished(&status) {
            let chunks = status.audio_chunks;
            let next = self.wait_for(|s| s.audio_chunks != chunks || finished(s));
            match tokio::time::timeout(idle, next).await {
                Ok(next) => status = next?,
                Err(_) => break,
            }
        }
        Ok(status)
    }
}

pub struct StreamingClient<C: Connector, F: SinkFactory, R: ErrorReporter> {
    session: Session<C, F, R>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    commands: mpsc::UnboundedReceiver<Command>,
    status: watch::Sender<ClientStatus>,
    last_error: Option<String>,
}

impl<F: SinkFactory, R: ErrorReporter> StreamingClient<WsConnector, F, R> {
    /// Client talking to the websocket endpoint described by `config`
    pub fn websocket(config: &ClientConfig, sinks: F, reporter: R) -> (Self, ClientHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(
            config.server.stream_url(),
            config.server.auth_token.clone(),
            events_tx,
        );
        let session = Session::new(connector, sinks, reporter, config.audio.format());
        Self::new(session, events_rx)
    }
}

impl<C: Connector, F: SinkFactory, R: ErrorReporter> StreamingClient<C, F, R> {
    /// `events` must be the receiving end of the channel the session's
    /// connector reports to
    pub fn new(
        session: Session<C, F, R>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> (Self, ClientHandle) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ClientStatus::default());
        let client = Self {
            session,
            events,
            commands: commands_rx,
            status: status_tx,
            last_error: None,
        };
        let handle = ClientHandle {
            commands: commands_tx,
            status: status_rx,
        };
        (client, handle)
    }

    /// Process messages until shut down or every handle is dropped.
    ///
    /// Returns the session so the caller can call [`Session::shutdown`],
    /// which may block while the sink drains.
    pub async fn run(mut self) -> Session<C, F, R> {
        loop {
            tokio::select! {
                // Transport events first, so a request never lands on a
                // connection whose close is already queued
                biased;

                Some(event) = self.events.recv() => self.session.handle(event),

                command = self.commands.recv() => match command {
                    Some(Command::Submit(request)) => {
                        if let Err(e) = self.session.submit(&request) {
                            error!("Request failed: {}", e);
                            self.last_error = Some(e.to_string());
                        }
                    }
                    Some(Command::Close) => self.session.close(),
                    Some(Command::Shutdown) | None => break,
                },
            }
            self.publish();
        }

        debug!("Client loop stopped");
        self.publish();
        self.session
    }

    fn publish(&self) {
        let stats = self.session.stats();
        let status = ClientStatus {
            phase: self.session.phase(),
            connections_opened: stats.connections_opened,
            requests_sent: stats.requests_sent,
            audio_chunks: stats.audio_chunks,
            audio_bytes: stats.audio_bytes,
            server_errors: stats.server_errors,
            last_audio: stats.last_audio,
            last_error: self.last_error.clone(),
        };
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
