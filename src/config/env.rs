//! Environment variable loading.
//!
//! Every setting falls back to its default when the variable is unset or
//! empty. A variable that is set but cannot be parsed is an error.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use super::{RelayConfig, ServerConfig, TlsConfig};

/// Read a variable, treating an empty value as unset.
pub(super) fn env_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a variable, returning `None` when it is unset.
pub(super) fn parse_env<T>(name: &str) -> Result<Option<T>, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_var(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| format!("Invalid value for {name}: '{raw}' ({e})").into()),
        None => Ok(None),
    }
}

fn load_tls() -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    match (env_var("TLS_CERT_PATH"), env_var("TLS_KEY_PATH")) {
        (Some(cert), Some(key)) => Ok(Some(TlsConfig {
            cert_path: PathBuf::from(cert),
            key_path: PathBuf::from(key),
        })),
        (None, None) => Ok(None),
        _ => Err("Both TLS_CERT_PATH and TLS_KEY_PATH must be set to enable TLS".into()),
    }
}

/// Load configuration from environment variables, with defaults.
pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let defaults = RelayConfig::default();

    let relay = RelayConfig {
        provider: env_var("REALTIME_PROVIDER").unwrap_or(defaults.provider.clone()),
        model: env_var("REALTIME_MODEL").unwrap_or(defaults.model.clone()),
        voice: env_var("REALTIME_VOICE").unwrap_or(defaults.voice.clone()),
        instructions: env_var("REALTIME_INSTRUCTIONS"),
        greeting: env_var("RELAY_GREETING").unwrap_or(defaults.greeting.clone()),
        transcription_model: env_var("REALTIME_TRANSCRIPTION_MODEL")
            .unwrap_or(defaults.transcription_model.clone()),
        upstream_url: env_var("OPENAI_REALTIME_URL").unwrap_or(defaults.upstream_url.clone()),
        configure_timeout_seconds: parse_env("REALTIME_CONFIGURE_TIMEOUT_SECONDS")?
            .unwrap_or(defaults.configure_timeout_seconds),
    };

    let mut config = ServerConfig::default();
    config.host = env_var("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
    config.port = parse_env("PORT")?.unwrap_or(3001);
    config.tls = load_tls()?;
    config.openai_api_key = env_var("OPENAI_API_KEY");
    config.relay = relay;
    config.cors_allowed_origins = env_var("CORS_ALLOWED_ORIGINS");
    config.rate_limit_requests_per_second =
        parse_env("RATE_LIMIT_REQUESTS_PER_SECOND")?.unwrap_or(60);
    config.rate_limit_burst_size = parse_env("RATE_LIMIT_BURST_SIZE")?.unwrap_or(10);
    config.max_websocket_connections = parse_env("MAX_WEBSOCKET_CONNECTIONS")?;
    config.max_connections_per_ip = parse_env("MAX_CONNECTIONS_PER_IP")?.unwrap_or(100);

    Ok(config)
}
