//! Paroli streaming TTS client.
//!
//! Turns user-triggered synthesis requests into continuous audio over a
//! single persistent websocket:
//!
//! ```no_run
//! use paroli_client::audio::SpeakerSinkFactory;
//! use paroli_client::config::ClientConfig;
//! use paroli_client::session::TracingReporter;
//! use paroli_client::StreamingClient;
//! use paroli_protocol::RequestBuilder;
//!
//! # async fn demo() -> Result<(), paroli_client::ClientError> {
//! let config = ClientConfig::default();
//! let sinks = SpeakerSinkFactory::new(config.audio.flush_interval());
//! let (client, handle) = StreamingClient::websocket(&config, sinks, TracingReporter);
//! tokio::spawn(client.run());
//!
//! handle.speak(RequestBuilder::new("Hello world"))?;
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod client;
pub mod config;
pub mod directory;
mod error;
pub mod session;
pub mod transport;

pub use client::{ClientHandle, ClientStatus, StreamingClient};
pub use error::ClientError;
pub use session::{Phase, Session, SessionEvent};
