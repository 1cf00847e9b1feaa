//! Paroli stub server
//!
//! Usage:
//!   cargo run -p paroli-stub-server
//!
//! Listens on 127.0.0.1:8848 by default, like a real Paroli server.
//!
//! Environment:
//!   PAROLI_STUB_ADDR       listen address
//!   PAROLI_STUB_SPEAKERS   comma separated speaker names (default: single voice)
//!   PAROLI_STUB_TOKEN      required bearer token

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use paroli_stub_server::StubConfig;

const DEFAULT_ADDR: &str = "127.0.0.1:8848";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("paroli_stub_server=info".parse()?)
                .add_directive("axum=warn".parse()?),
        )
        .init();

    let addr = std::env::var("PAROLI_STUB_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
    let speakers = std::env::var("PAROLI_STUB_SPEAKERS")
        .map(|s| {
            s.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let config = StubConfig {
        speakers,
        auth_token: std::env::var("PAROLI_STUB_TOKEN").ok(),
        ..StubConfig::default()
    };

    let listener = TcpListener::bind(&addr).await?;
    info!("Paroli stub server listening on http://{}", addr);
    info!("Speakers: {:?}", config.directory());

    paroli_stub_server::serve(listener, Arc::new(config)).await?;

    Ok(())
}
