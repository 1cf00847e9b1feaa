//! Client configuration
//!
//! Sources, highest priority first:
//! - command line flags (applied by the binary)
//! - environment variables (`PAROLI_` prefix)
//! - config file (`paroli.toml`)
//! - defaults

mod loader;
mod types;

pub use loader::{load_config, load_config_from_path, print_config, validate_config, ConfigError};
pub use types::{AudioConfig, ClientConfig, LogConfig, ServerConfig, SynthesisConfig};
