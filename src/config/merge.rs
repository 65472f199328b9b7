//! Merging YAML overrides onto the environment-derived configuration.

use std::path::PathBuf;

use super::env::load_from_env;
use super::yaml::{TlsYaml, YamlConfig};
use super::{ServerConfig, TlsConfig};

/// Build the final configuration: environment (with defaults) first, then
/// any value present in `yaml` on top.
pub(super) fn merge_config(
    yaml: Option<YamlConfig>,
) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    if let Some(server) = yaml.server {
        if let Some(host) = server.host {
            config.host = host;
        }
        if let Some(port) = server.port {
            config.port = port;
        }
        if let Some(tls) = server.tls {
            config.tls = merge_tls(config.tls.take(), tls)?;
        }
    }

    if let Some(providers) = yaml.providers
        && let Some(key) = providers.openai_api_key
    {
        config.openai_api_key = Some(key);
    }

    if let Some(relay) = yaml.relay {
        let target = &mut config.relay;
        if let Some(provider) = relay.provider {
            target.provider = provider;
        }
        if let Some(model) = relay.model {
            target.model = model;
        }
        if let Some(voice) = relay.voice {
            target.voice = voice;
        }
        if let Some(instructions) = relay.instructions {
            target.instructions = Some(instructions);
        }
        if let Some(greeting) = relay.greeting {
            target.greeting = greeting;
        }
        if let Some(model) = relay.transcription_model {
            target.transcription_model = model;
        }
        if let Some(url) = relay.upstream_url {
            target.upstream_url = url;
        }
        if let Some(timeout) = relay.configure_timeout_seconds {
            target.configure_timeout_seconds = timeout;
        }
    }

    if let Some(security) = yaml.security {
        if let Some(origins) = security.cors_allowed_origins {
            config.cors_allowed_origins = Some(origins);
        }
        if let Some(rps) = security.rate_limit_requests_per_second {
            config.rate_limit_requests_per_second = rps;
        }
        if let Some(burst) = security.rate_limit_burst_size {
            config.rate_limit_burst_size = burst;
        }
        if let Some(max) = security.max_websocket_connections {
            config.max_websocket_connections = Some(max);
        }
        if let Some(per_ip) = security.max_connections_per_ip {
            config.max_connections_per_ip = per_ip;
        }
    }

    Ok(config)
}

/// `enabled: false` turns TLS off even when the environment configured it.
/// Otherwise YAML paths override environment paths one by one.
fn merge_tls(
    env_tls: Option<TlsConfig>,
    yaml: TlsYaml,
) -> Result<Option<TlsConfig>, Box<dyn std::error::Error>> {
    if yaml.enabled == Some(false) {
        return Ok(None);
    }

    let cert_path = yaml
        .cert_path
        .map(PathBuf::from)
        .or_else(|| env_tls.as_ref().map(|t| t.cert_path.clone()));
    let key_path = yaml
        .key_path
        .map(PathBuf::from)
        .or_else(|| env_tls.as_ref().map(|t| t.key_path.clone()));

    match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Ok(Some(TlsConfig {
            cert_path,
            key_path,
        })),
        (None, None) if yaml.enabled.is_none() => Ok(None),
        _ => Err("TLS requires both cert_path and key_path".into()),
    }
}
