//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;

use guichet_shared::constants;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// Filesystem path of the SQLite database. When unset the platform
    /// data directory is used.
    /// Env: `DATABASE_PATH`
    pub database_path: Option<PathBuf>,

    /// Ed25519 seed used to sign session and verification tokens
    /// (hex-encoded, 64 chars).
    /// Env: `SESSION_SIGNING_KEY`
    /// Default: none (an ephemeral key is generated at startup; sessions
    /// do not survive a restart).
    pub session_signing_key: Option<[u8; constants::SECRET_KEY_SIZE]>,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Guichet"`
    pub instance_name: String,

    /// Base URL clients use to reach this server, embedded in
    /// verification links.
    /// Env: `PUBLIC_URL`
    /// Default: `http://localhost:8080`
    pub public_url: String,

    /// Whether new accounts can sign up.
    /// Env: `REGISTRATION_OPEN` (true/false)
    /// Default: `true`
    pub registration_open: bool,

    /// Seconds between dispatcher scans for due campaigns and
    /// workflow enrollments.
    /// Env: `DISPATCH_TICK_SECS`
    /// Default: `30`
    pub dispatch_tick_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], constants::DEFAULT_HTTP_PORT).into(),
            database_path: None,
            session_signing_key: None,
            instance_name: constants::APP_NAME.to_string(),
            public_url: format!("http://localhost:{}", constants::DEFAULT_HTTP_PORT),
            registration_open: true,
            dispatch_tick_secs: constants::DISPATCH_TICK_SECS,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HTTP_ADDR, using default"
                );
            }
        }

        if let Ok(path) = std::env::var("DATABASE_PATH") {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Ok(hex_key) = std::env::var("SESSION_SIGNING_KEY") {
            match parse_hex_seed(&hex_key) {
                Ok(seed) => config.session_signing_key = Some(seed),
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        "Invalid SESSION_SIGNING_KEY, generating an ephemeral key"
                    );
                }
            }
        }

        if let Ok(name) = std::env::var("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Ok(url) = std::env::var("PUBLIC_URL") {
            config.public_url = url.trim_end_matches('/').to_string();
        }

        if let Ok(val) = std::env::var("REGISTRATION_OPEN") {
            config.registration_open = val != "false" && val != "0";
        }

        if let Ok(val) = std::env::var("DISPATCH_TICK_SECS") {
            if let Ok(n) = val.parse::<u64>() {
                config.dispatch_tick_secs = n.max(1);
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Parse a 64-character hex string into a 32-byte seed.
fn parse_hex_seed(hex: &str) -> Result<[u8; constants::SECRET_KEY_SIZE], String> {
    let hex = hex.trim();
    if hex.len() != constants::SECRET_KEY_SIZE * 2 {
        return Err(format!(
            "expected {} hex chars, got {}",
            constants::SECRET_KEY_SIZE * 2,
            hex.len()
        ));
    }

    let bytes = hex::decode(hex).map_err(|e| format!("invalid hex: {e}"))?;
    let mut seed = [0u8; constants::SECRET_KEY_SIZE];
    seed.copy_from_slice(&bytes);
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.session_signing_key.is_none());
        assert!(config.registration_open);
    }

    #[test]
    fn test_parse_hex_seed() {
        let hex = "ab".repeat(32);
        let seed = parse_hex_seed(&hex).unwrap();
        assert_eq!(seed, [0xab; 32]);
    }

    #[test]
    fn test_parse_hex_seed_wrong_length() {
        assert!(parse_hex_seed("abcd").is_err());
    }
}
