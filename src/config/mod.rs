//! Configuration module for the voice relay server
//!
//! This module handles server configuration from various sources: .env files, YAML files,
//! and environment variables. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//!
//! # Example
//! ```rust,no_run
//! use voice_relay::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config_path = PathBuf::from("config.yaml");
//! let config = ServerConfig::from_file(&config_path)?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;

mod env;
mod merge;
mod validation;
mod yaml;

use crate::core::realtime::RealtimeConfig;
use crate::core::realtime::openai::{
    DEFAULT_REALTIME_MODEL, DEFAULT_REALTIME_VOICE, DEFAULT_TRANSCRIPTION_MODEL,
    OPENAI_REALTIME_URL,
};
use crate::core::relay::{DEFAULT_GREETING, SessionSettings};

/// TLS configuration for HTTPS and WSS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// Path to the TLS certificate file (PEM format)
    pub cert_path: PathBuf,
    /// Path to the TLS private key file (PEM format)
    pub key_path: PathBuf,
}

/// Upstream and per-session settings shared by every relay session.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayConfig {
    /// Upstream provider name (default: "openai")
    pub provider: String,
    /// Realtime model requested from the upstream
    pub model: String,
    /// Output voice
    pub voice: String,
    /// System instructions for the assistant
    pub instructions: Option<String>,
    /// Greeting carried by the `connected` control message
    pub greeting: String,
    /// Model used to transcribe user speech
    pub transcription_model: String,
    /// Upstream WebSocket endpoint (ws:// or wss://)
    pub upstream_url: String,
    /// How long to wait for the upstream to acknowledge session parameters
    pub configure_timeout_seconds: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: DEFAULT_REALTIME_MODEL.to_string(),
            voice: DEFAULT_REALTIME_VOICE.to_string(),
            instructions: None,
            greeting: DEFAULT_GREETING.to_string(),
            transcription_model: DEFAULT_TRANSCRIPTION_MODEL.to_string(),
            upstream_url: OPENAI_REALTIME_URL.to_string(),
            configure_timeout_seconds: 10,
        }
    }
}

/// Server configuration
///
/// Contains all configuration needed to run the relay server, including:
/// - Server settings (host, port, TLS)
/// - Upstream API key
/// - Relay session settings
/// - Security settings (CORS, rate limiting, connection limits)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // TLS configuration (optional)
    pub tls: Option<TlsConfig>,

    /// OpenAI API key for the Realtime API
    pub openai_api_key: Option<String>,

    pub relay: RelayConfig,

    // Security configuration
    /// CORS allowed origins (comma-separated list or "*" for all)
    /// Default: None (CORS disabled, same-origin only)
    pub cors_allowed_origins: Option<String>,

    // Rate limiting configuration
    /// Maximum requests per second per IP address
    /// Default: 60
    pub rate_limit_requests_per_second: u32,
    /// Maximum burst size for rate limiting
    /// Default: 10
    pub rate_limit_burst_size: u32,

    // Connection limits
    /// Maximum concurrent WebSocket connections
    /// Default: None (unlimited)
    pub max_websocket_connections: Option<usize>,
    /// Maximum connections per IP address
    /// Default: 100
    pub max_connections_per_ip: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            tls: None,
            openai_api_key: None,
            relay: RelayConfig::default(),
            cors_allowed_origins: None,
            rate_limit_requests_per_second: 60,
            rate_limit_burst_size: 10,
            max_websocket_connections: None,
            max_connections_per_ip: 100,
        }
    }
}

/// Zeroize the API key when ServerConfig is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only
    ///
    /// The .env file is loaded in main.rs at startup, so its values are
    /// visible here as environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file with environment variable base
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if:
    /// - The YAML file cannot be read or is malformed
    /// - Environment variables have invalid formats
    /// - Configuration validation fails
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_tls(&self.tls)?;
        validation::validate_upstream_url(&self.relay.upstream_url)?;
        validation::check_voice(&self.relay.voice);
        validation::validate_configure_timeout(self.relay.configure_timeout_seconds)?;
        validation::validate_rate_limit(
            self.rate_limit_requests_per_second,
            self.rate_limit_burst_size,
        )?;
        validation::validate_connection_limits(
            self.max_websocket_connections,
            self.max_connections_per_ip,
        )?;
        Ok(())
    }

    /// Get the server address as a string
    ///
    /// Returns the address in the format "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if TLS is enabled
    pub fn is_tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    /// Connection settings for one upstream client.
    ///
    /// A missing API key yields an empty key; the upstream client rejects it
    /// when a session starts.
    pub fn realtime_config(&self) -> RealtimeConfig {
        RealtimeConfig {
            api_key: self.openai_api_key.clone().unwrap_or_default(),
            model: self.relay.model.clone(),
            url: Some(self.relay.upstream_url.clone()),
            configure_timeout_ms: Some(self.relay.configure_timeout_seconds.saturating_mul(1000)),
        }
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            greeting: self.relay.greeting.clone(),
            voice: self.relay.voice.clone(),
            instructions: self.relay.instructions.clone(),
            transcription_model: self.relay.transcription_model.clone(),
        }
    }
}
