//! Client configuration.

use std::time::Duration;

/// Where the client connects and how long it waits.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the API server, without a trailing slash.
    /// Self-hosted users point this at their own instance.
    pub server_url: String,

    /// Per-request timeout.  The event stream is exempt; it stays open.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        let mut server_url = server_url.into();
        while server_url.ends_with('/') {
            server_url.pop();
        }
        Self {
            server_url,
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Reads `GUICHET_SERVER_URL`, falling back to a local instance.
    pub fn from_env() -> Self {
        let url = std::env::var("GUICHET_SERVER_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string());
        Self::new(url)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("http://localhost:8080")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trailing_slashes_are_stripped() {
        let config = ClientConfig::new("https://guichet.example.com//");
        assert_eq!(config.server_url, "https://guichet.example.com");
    }
}
