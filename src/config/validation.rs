//! Configuration validation logic.

use tracing::warn;
use url::Url;

use super::TlsConfig;
use crate::core::realtime::openai::is_known_voice;

/// Both TLS files must exist when TLS is enabled.
pub(super) fn validate_tls(tls: &Option<TlsConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(tls) = tls else {
        return Ok(());
    };

    if !tls.cert_path.exists() {
        return Err(format!(
            "TLS certificate file not found: {}",
            tls.cert_path.display()
        )
        .into());
    }
    if !tls.key_path.exists() {
        return Err(format!("TLS private key file not found: {}", tls.key_path.display()).into());
    }
    Ok(())
}

pub(super) fn validate_upstream_url(url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = Url::parse(url).map_err(|e| format!("Invalid upstream URL '{url}': {e}"))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(format!(
            "Invalid upstream URL '{url}': scheme must be ws or wss, got {other}"
        )
        .into()),
    }
}

/// Warn about a voice the provider is not known to accept.
///
/// Never fails: the voice is still sent as configured.
pub(super) fn check_voice(voice: &str) -> bool {
    let known = is_known_voice(voice);
    if !known {
        warn!(voice = %voice, "Configured voice is not a known OpenAI Realtime voice");
    }
    known
}

pub(super) fn validate_configure_timeout(seconds: u64) -> Result<(), Box<dyn std::error::Error>> {
    if seconds == 0 {
        return Err("configure_timeout_seconds must be greater than 0".into());
    }
    Ok(())
}

pub(super) fn validate_rate_limit(
    requests_per_second: u32,
    burst_size: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if requests_per_second == 0 {
        return Err("rate_limit_requests_per_second must be greater than 0".into());
    }
    if burst_size == 0 {
        return Err("rate_limit_burst_size must be greater than 0".into());
    }
    Ok(())
}

pub(super) fn validate_connection_limits(
    max_websocket_connections: Option<usize>,
    max_connections_per_ip: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    if max_websocket_connections == Some(0) {
        return Err("max_websocket_connections must be greater than 0 when set".into());
    }
    if max_connections_per_ip == 0 {
        return Err("max_connections_per_ip must be greater than 0".into());
    }
    Ok(())
}
