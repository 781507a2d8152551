//! HTTP front configuration.

use std::time::Duration;

/// Bind address and transport settings for the HTTP front.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Bind address for the server.
    pub host: String,
    /// Port to listen on. 0 means OS-assigned.
    pub port: u16,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
    /// Hard cap on one HTTP request. Keep it above the purchase wait timeout
    /// so callers see a typed outcome rather than a bare 408.
    pub request_timeout: Duration,
    /// How long shutdown waits for in-flight requests.
    pub drain_timeout: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(30),
        }
    }
}
