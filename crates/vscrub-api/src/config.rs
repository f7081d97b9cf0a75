//! API configuration.

use std::time::Duration;

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout: Duration,
    /// Upper bound on a submit request body. Submissions carry a blob
    /// reference, never media bytes.
    pub max_submit_bytes: usize,
    /// Serve `/metrics`
    pub metrics_enabled: bool,
    /// Run a worker pool inside the API process
    pub embedded_workers: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_submit_bytes: 64 * 1024,
            metrics_enabled: true,
            embedded_workers: false,
        }
    }
}

impl ApiConfig {
    /// Read `API_*` variables, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(defaults.cors_origins),
            request_timeout: Duration::from_secs(env_parse(
                "API_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            max_submit_bytes: env_parse("API_MAX_SUBMIT_BYTES", defaults.max_submit_bytes),
            metrics_enabled: env_flag("METRICS_ENABLED", defaults.metrics_enabled),
            embedded_workers: env_flag("API_EMBEDDED_WORKERS", defaults.embedded_workers),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
