//! Configuration Loader
//!
//! Merges defaults, an optional TOML file and `PAROLI_` environment variables.

use std::path::Path;

use config::{Config, ConfigError as ConfigCrateError, Environment, File};
use thiserror::Error;

use super::types::ClientConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigCrateError> for ConfigError {
    fn from(err: ConfigCrateError) -> Self {
        ConfigError::LoadError(err.to_string())
    }
}

const CONFIG_FILE_NAMES: &[&str] = &["paroli", "paroli.local"];

/// Load configuration from the default search path.
///
/// # Environment examples
/// - `PAROLI_SERVER__URL=http://tts-box:8848`
/// - `PAROLI_SERVER__AUTH_TOKEN=secret`
/// - `PAROLI_AUDIO__SAMPLE_RATE=22500`
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(None)
}

/// Load configuration, reading `config_path` instead of the default files
pub fn load_config_from_path(config_path: Option<&Path>) -> Result<ClientConfig, ConfigError> {
    let mut builder = Config::builder()
        .set_default("server.url", "http://127.0.0.1:8848")?
        .set_default("audio.sample_rate", i64::from(paroli_protocol::SAMPLE_RATE))?
        .set_default("audio.flush_ms", 100)?
        .set_default("audio.format", "pcm")?
        .set_default("log.level", "info")?;

    if let Some(path) = config_path {
        builder = builder.add_source(File::from(path).required(true));
    } else {
        for name in CONFIG_FILE_NAMES {
            builder = builder.add_source(File::with_name(name).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("PAROLI")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let client_config: ClientConfig = config
        .try_deserialize()
        .map_err(|e| ConfigError::ParseError(format!("Failed to deserialize config: {}", e)))?;

    validate_config(&client_config)?;

    Ok(client_config)
}

pub fn validate_config(config: &ClientConfig) -> Result<(), ConfigError> {
    let url = config.server.url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::ValidationError(format!(
            "Server URL must be http(s), got `{}`",
            url
        )));
    }

    if config.audio.sample_rate == 0 {
        return Err(ConfigError::ValidationError(
            "Sample rate cannot be 0".to_string(),
        ));
    }

    if config.audio.flush_ms == 0 {
        return Err(ConfigError::ValidationError(
            "Flush interval cannot be 0".to_string(),
        ));
    }

    // Sinks only understand raw PCM
    match config.audio.encoding() {
        Ok(None) | Ok(Some(paroli_protocol::AudioEncoding::Pcm)) => {}
        Ok(Some(other)) => {
            return Err(ConfigError::ValidationError(format!(
                "Audio format `{}` cannot be played, use `pcm`",
                other
            )))
        }
        Err(e) => return Err(ConfigError::ValidationError(e.to_string())),
    }

    Ok(())
}

pub fn print_config(config: &ClientConfig) {
    tracing::info!("Server: {}", config.server.url);
    tracing::info!("Stream endpoint: {}", config.server.stream_url());
    tracing::info!(
        "Audio: {} Hz, flush every {} ms, format {:?}",
        config.audio.sample_rate,
        config.audio.flush_ms,
        config.audio.format
    );
    tracing::info!(
        "Auth token: {}",
        if config.server.auth_token.is_some() { "set" } else { "not set" }
    );
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert_eq!(config.server.url, "http://127.0.0.1:8848");
        assert_eq!(config.audio.flush_ms, 100);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[server]\nurl = \"http://tts.local:9000\"\nauth_token = \"secret\"\n\n[audio]\nsample_rate = 22500\n\n[synthesis]\nspeaker = \"alice\"\nlength_scale = 1.1"
        )
        .unwrap();

        let config = load_config_from_path(Some(file.path())).unwrap();
        assert_eq!(config.server.url, "http://tts.local:9000");
        assert_eq!(config.server.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.audio.sample_rate, 22500);
        assert_eq!(config.audio.flush_ms, 100);
        assert_eq!(config.synthesis.speaker.as_deref(), Some("alice"));
        assert_eq!(config.synthesis.length_scale, Some(1.1));
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let result = load_config_from_path(Some(Path::new("/nonexistent/paroli.toml")));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_validation_error_for_ws_url() {
        let mut config = ClientConfig::default();
        config.server.url = "ws://localhost:8848".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_sample_rate() {
        let mut config = ClientConfig::default();
        config.audio.sample_rate = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_error_for_zero_flush() {
        let mut config = ClientConfig::default();
        config.audio.flush_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_opus() {
        let mut config = ClientConfig::default();
        config.audio.format = "opus".to_string();
        assert!(validate_config(&config).is_err());
    }
}
