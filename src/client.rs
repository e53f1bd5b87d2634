use std::fs;
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::ConfigError;
use crate::config_merge::ConfigDefaults;

/// Connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum idle connections to keep per host
    pub max_idle_per_host: usize,

    /// How long idle connections stay in the pool before cleanup
    pub idle_timeout: Duration,

    /// TCP keepalive duration
    pub tcp_keepalive: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: ConfigDefaults::pool_max_idle_per_host(),
            idle_timeout: ConfigDefaults::pool_idle_timeout(),
            tcp_keepalive: Some(ConfigDefaults::tcp_keepalive()),
        }
    }
}

impl PoolConfig {
    /// Apply this configuration to a reqwest ClientBuilder.
    pub fn apply_to_builder(&self, builder: reqwest::ClientBuilder) -> reqwest::ClientBuilder {
        let mut builder = builder
            .pool_max_idle_per_host(self.max_idle_per_host)
            .pool_idle_timeout(self.idle_timeout);

        if let Some(keepalive) = self.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        builder
    }
}

/// Configuration for building the HTTP client.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub skip_tls_verify: bool,
    pub resolve_target_addr: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub pool: PoolConfig,
}

/// Builds the shared reqwest client every virtual user sends through.
pub fn build_client(config: &ClientConfig) -> Result<reqwest::Client, ConfigError> {
    let mut client_builder = reqwest::Client::builder()
        .user_agent(concat!("rampload/", env!("CARGO_PKG_VERSION")));

    if let Some(ref resolve_str) = config.resolve_target_addr {
        if !resolve_str.is_empty() {
            client_builder = configure_dns_override(client_builder, resolve_str)?;
        } else {
            warn!("DNS override is set but empty, no override will be applied");
        }
    }

    client_builder = configure_mtls(
        client_builder,
        config.client_cert_path.as_deref(),
        config.client_key_path.as_deref(),
    )?;

    client_builder = config.pool.apply_to_builder(client_builder);
    info!(
        max_idle_per_host = config.pool.max_idle_per_host,
        idle_timeout = ?config.pool.idle_timeout,
        tcp_keepalive = ?config.pool.tcp_keepalive,
        "Connection pool configured"
    );

    if config.skip_tls_verify {
        warn!("Skipping TLS certificate verification");
        client_builder = client_builder
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true);
    }

    client_builder
        .build()
        .map_err(|e| ConfigError::Client(format!("Failed to build HTTP client: {}", e)))
}

/// Parses a `hostname:ip:port` override into the host and the address it
/// should resolve to.
pub fn parse_resolve_override(resolve_str: &str) -> Result<(String, SocketAddr), ConfigError> {
    let parts: Vec<&str> = resolve_str.split(':').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(ConfigError::Client(format!(
            "DNS override '{}' is not in the expected format 'hostname:ip:port'",
            resolve_str
        )));
    }

    let (hostname, ip, port) = (parts[0], parts[1], parts[2]);
    for (name, value) in [("hostname", hostname), ("IP address", ip), ("port", port)] {
        if value.is_empty() {
            return Err(ConfigError::Client(format!(
                "DNS override: {} part cannot be empty. Format: 'hostname:ip:port'",
                name
            )));
        }
    }

    let port: u16 = port.parse().map_err(|e| {
        ConfigError::Client(format!(
            "Failed to parse port '{}' in DNS override: {}",
            port, e
        ))
    })?;

    let socket_addr: SocketAddr = format!("{}:{}", ip, port).parse().map_err(|e| {
        ConfigError::Client(format!(
            "Failed to parse '{}:{}' as a socket address for DNS override: {}",
            ip, port, e
        ))
    })?;

    Ok((hostname.to_string(), socket_addr))
}

fn configure_dns_override(
    client_builder: reqwest::ClientBuilder,
    resolve_str: &str,
) -> Result<reqwest::ClientBuilder, ConfigError> {
    let (hostname, socket_addr) = parse_resolve_override(resolve_str)?;
    info!(
        host = %hostname,
        addr = %socket_addr,
        "Configured DNS override"
    );
    Ok(client_builder.resolve(&hostname, socket_addr))
}

fn read_pem(path: &str, what: &str) -> Result<Vec<u8>, ConfigError> {
    fs::read(path).map_err(|e| {
        ConfigError::Client(format!("Failed to read {} file '{}': {}", what, path, e))
    })
}

fn configure_mtls(
    client_builder: reqwest::ClientBuilder,
    cert_path: Option<&str>,
    key_path: Option<&str>,
) -> Result<reqwest::ClientBuilder, ConfigError> {
    let (cert_path, key_path) = match (cert_path, key_path) {
        (Some(cert), Some(key)) => (cert, key),
        (None, None) => return Ok(client_builder),
        (Some(_), None) => {
            return Err(ConfigError::Client(
                "clientCert is set, but clientKey is missing for mTLS".to_string(),
            ))
        }
        (None, Some(_)) => {
            return Err(ConfigError::Client(
                "clientKey is set, but clientCert is missing for mTLS".to_string(),
            ))
        }
    };

    let cert_pem = read_pem(cert_path, "client certificate")?;
    let key_pem = read_pem(key_path, "client key")?;

    let certs: Vec<_> = rustls_pemfile::certs(&mut cert_pem.as_slice()).collect();
    if certs.is_empty() {
        return Err(ConfigError::Client(format!(
            "No PEM certificates found in '{}'",
            cert_path
        )));
    }
    if let Some(Err(e)) = certs.into_iter().find(|c| c.is_err()) {
        return Err(ConfigError::Client(format!(
            "Failed to parse PEM certificates from '{}': {}",
            cert_path, e
        )));
    }

    // reqwest's rustls identity accepts PKCS#8 keys only.
    let keys: Vec<_> = rustls_pemfile::pkcs8_private_keys(&mut key_pem.as_slice()).collect();
    if keys.is_empty() {
        return Err(ConfigError::Client(format!(
            "No PKCS#8 private keys found in '{}'",
            key_path
        )));
    }
    if let Some(Err(e)) = keys.into_iter().find(|k| k.is_err()) {
        return Err(ConfigError::Client(format!(
            "Failed to parse private key from '{}' as PKCS#8: {}",
            key_path, e
        )));
    }

    let mut combined = cert_pem;
    if !combined.ends_with(b"\n") && !key_pem.starts_with(b"\n") {
        combined.push(b'\n');
    }
    combined.extend_from_slice(&key_pem);

    let identity = reqwest::Identity::from_pem(&combined).map_err(|e| {
        ConfigError::Client(format!(
            "Failed to create client identity from PEM (cert+key): {}",
            e
        ))
    })?;

    info!(cert = cert_path, key = key_path, "Configured mTLS client identity");
    Ok(client_builder.identity(identity))
}
