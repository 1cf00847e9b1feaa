//! Speaker directory lookup.
//!
//! A plain HTTP GET, fetched once at startup to populate voice selection.

use std::time::Duration;

use paroli_protocol::SpeakerDirectory;
use reqwest::Client;

use crate::config::ServerConfig;
use crate::ClientError;

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

pub struct VoiceDirectory {
    client: Client,
    url: String,
}

impl VoiceDirectory {
    pub fn new(server: &ServerConfig) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(LOOKUP_TIMEOUT)
            .build()
            .map_err(|e| ClientError::Directory(e.to_string()))?;

        Ok(Self {
            client,
            url: server.speakers_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn fetch(&self) -> Result<SpeakerDirectory, ClientError> {
        tracing::debug!(url = %self.url, "Fetching speaker directory");

        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ClientError::Directory(format!("cannot reach {}: {}", self.url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Directory(format!("HTTP {}: {}", status, body)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| ClientError::Directory(e.to_string()))?;
        let directory = SpeakerDirectory::from_json(&body)?;

        tracing::info!(speakers = directory.len(), "Speaker directory loaded");
        Ok(directory)
    }
}

/// What the voice picker shows after the directory lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceSelection {
    /// Single-voice model; requests always use speaker 0
    Disabled,
    Enabled { speaker_id: i64 },
}

impl VoiceSelection {
    /// Initial selection: `requested` (a name or id) if given, otherwise the
    /// directory's default speaker
    pub fn initial(
        directory: &SpeakerDirectory,
        requested: Option<&str>,
    ) -> Result<Self, ClientError> {
        if directory.is_single_voice() {
            if let Some(requested) = requested {
                tracing::warn!(
                    "Ignoring speaker `{}`: the server has a single voice",
                    requested
                );
            }
            return Ok(Self::Disabled);
        }

        match requested {
            Some(requested) => Self::Disabled.select(directory, requested),
            None => Ok(Self::Enabled {
                speaker_id: directory.default_speaker().map(|(_, id)| id).unwrap_or(0),
            }),
        }
    }

    /// Switch to `selector`, a speaker name or advertised id
    pub fn select(&self, directory: &SpeakerDirectory, selector: &str) -> Result<Self, ClientError> {
        if directory.is_single_voice() {
            return Err(ClientError::InvalidRequest(
                "speaker selection is disabled for single speaker models".to_string(),
            ));
        }
        directory
            .resolve(selector)
            .map(|speaker_id| Self::Enabled { speaker_id })
            .ok_or_else(|| ClientError::InvalidRequest(format!("unknown speaker `{}`", selector)))
    }

    /// Selector value handed to the request builder
    pub fn voice(&self) -> String {
        match self {
            Self::Disabled => String::new(),
            Self::Enabled { speaker_id } => speaker_id.to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}
