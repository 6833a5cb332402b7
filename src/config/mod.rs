use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::{Result, ServiceError};
use crate::observability::TracingConfig;
use crate::rate_limit::store::BruteForceLimits;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Environment variable prefix for overrides (`SENTINEL__STORE__URL`)
pub const ENV_PREFIX: &str = "SENTINEL";

/// Main service configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub jwt: JwtConfig,
    /// Optional OpenTelemetry export and log format
    #[serde(default)]
    pub telemetry: Option<TracingConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

/// Backing store for limiter and lockout state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Redis,
    /// Process-local; only for tests and single-instance deployments
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Redis connection URL, may carry credentials
    #[serde(default = "default_store_url")]
    pub url: Secret<String>,
    /// Connection retries at startup
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,
}

/// Limit and duration of one window. Either being zero disables the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub duration_secs: u64,
}

impl WindowConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BruteForceConfig {
    /// Failed attempts allowed before the pair is locked
    #[serde(default = "default_brute_force_limit")]
    pub limit: u32,
    /// Window in which failures are counted
    #[serde(default = "default_brute_force_duration")]
    pub duration_secs: u64,
    #[serde(default = "default_lockout")]
    pub lockout_secs: u64,
}

impl BruteForceConfig {
    pub fn limits(&self) -> BruteForceLimits {
        BruteForceLimits {
            max_attempts: self.limit,
            window_ms: self.duration_secs.saturating_mul(1000),
            lockout_ms: self.lockout_secs.saturating_mul(1000),
        }
    }
}

/// Defaults shared by every limiter policy
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RateLimitingConfig {
    /// Header carrying the tenant identifier
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,
    /// `service` label on limiter metrics
    #[serde(default = "default_metric_tag")]
    pub metric_tag: String,
    #[serde(default = "default_fixed_window")]
    pub fixed_window: WindowConfig,
    #[serde(default = "default_sliding_window")]
    pub sliding_window: WindowConfig,
    #[serde(default)]
    pub brute_force: BruteForceConfig,
}

/// Access and refresh token settings
#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    /// HS256 signing secret
    #[serde(default = "empty_secret")]
    pub secret: Secret<String>,
    pub issuer: Option<String>,
    #[serde(default = "default_access_ttl")]
    pub access_token_ttl_secs: u64,
    #[serde(default = "default_refresh_ttl")]
    pub refresh_token_ttl_secs: u64,
}

impl JwtConfig {
    pub fn access_token_ttl(&self) -> Duration {
        Duration::from_secs(self.access_token_ttl_secs)
    }

    pub fn refresh_token_ttl(&self) -> Duration {
        Duration::from_secs(self.refresh_token_ttl_secs)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_store_url() -> Secret<String> {
    Secret::new("redis://127.0.0.1:6379".to_string())
}

fn default_connect_retries() -> u32 {
    3
}

fn default_tenant_header() -> String {
    "X-Tenant-ID".to_string()
}

fn default_metric_tag() -> String {
    "authservice".to_string()
}

fn default_fixed_window() -> WindowConfig {
    WindowConfig {
        limit: 5,
        duration_secs: 60,
    }
}

fn default_sliding_window() -> WindowConfig {
    WindowConfig {
        limit: 10,
        duration_secs: 300,
    }
}

fn default_brute_force_limit() -> u32 {
    3
}

fn default_brute_force_duration() -> u64 {
    300
}

fn default_lockout() -> u64 {
    900
}

fn empty_secret() -> Secret<String> {
    Secret::new(String::new())
}

fn default_access_ttl() -> u64 {
    900
}

fn default_refresh_ttl() -> u64 {
    604_800
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_store_url(),
            connect_retries: default_connect_retries(),
        }
    }
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            limit: default_brute_force_limit(),
            duration_secs: default_brute_force_duration(),
            lockout_secs: default_lockout(),
        }
    }
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            tenant_header: default_tenant_header(),
            metric_tag: default_metric_tag(),
            fixed_window: default_fixed_window(),
            sliding_window: default_sliding_window(),
            brute_force: BruteForceConfig::default(),
        }
    }
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: empty_secret(),
            issuer: None,
            access_token_ttl_secs: default_access_ttl(),
            refresh_token_ttl_secs: default_refresh_ttl(),
        }
    }
}

impl ServiceConfig {
    /// Load a YAML file layered with `SENTINEL__SECTION__KEY` environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ServiceError::Config(format!("Failed to load config: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| ServiceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from a YAML file, without environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ServiceError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| ServiceError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(ServiceError::Config("Server port must be > 0".to_string()));
        }

        let rate_limiting = &self.rate_limiting;
        if rate_limiting.tenant_header.trim().is_empty() {
            return Err(ServiceError::Config(
                "Tenant header cannot be empty".to_string(),
            ));
        }

        // Zero limits on the request windows are legal and disable the window
        let brute_force = &rate_limiting.brute_force;
        if brute_force.limit == 0 {
            return Err(ServiceError::Config(
                "Brute-force limit must be > 0".to_string(),
            ));
        }
        if brute_force.duration_secs == 0 || brute_force.lockout_secs == 0 {
            return Err(ServiceError::Config(
                "Brute-force duration and lockout must be > 0".to_string(),
            ));
        }

        if self.circuit_breaker.call_timeout_ms == 0 {
            return Err(ServiceError::Config(
                "Circuit breaker call timeout must be > 0".to_string(),
            ));
        }

        if self.jwt.secret.expose_secret().trim().is_empty() {
            return Err(ServiceError::Config("JWT secret cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid() -> ServiceConfig {
        ServiceConfig {
            jwt: JwtConfig {
                secret: Secret::new("test-secret".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090

store:
  backend: memory

rate_limiting:
  tenant_header: "X-Org"
  fixed_window:
    limit: 20
    duration_secs: 10
  brute_force:
    limit: 5

circuit_breaker:
  failure_threshold: 10

jwt:
  secret: "s3cret"
  issuer: "sentinel"
"#;

        let config = ServiceConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.rate_limiting.tenant_header, "X-Org");
        assert_eq!(config.rate_limiting.fixed_window.limit, 20);
        assert_eq!(config.rate_limiting.fixed_window.duration(), Duration::from_secs(10));
        assert_eq!(config.rate_limiting.brute_force.limit, 5);
        assert_eq!(config.rate_limiting.brute_force.lockout_secs, 900);
        assert_eq!(config.circuit_breaker.failure_threshold, 10);
        assert_eq!(config.circuit_breaker.call_timeout_ms, 500);
        assert_eq!(config.jwt.secret.expose_secret(), "s3cret");
        assert_eq!(config.jwt.issuer.as_deref(), Some("sentinel"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let config = ServiceConfig::from_yaml("{}").unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.url.expose_secret(), "redis://127.0.0.1:6379");
        assert_eq!(config.store.connect_retries, 3);
        assert_eq!(config.rate_limiting, RateLimitingConfig::default());
        assert_eq!(config.rate_limiting.metric_tag, "authservice");
        assert_eq!(config.rate_limiting.sliding_window.limit, 10);
        assert_eq!(config.rate_limiting.sliding_window.duration_secs, 300);
        assert_eq!(config.jwt.access_token_ttl_secs, 900);
        assert_eq!(config.jwt.refresh_token_ttl_secs, 604_800);
        assert!(config.telemetry.is_none());
    }

    #[test]
    fn test_brute_force_limits_in_millis() {
        let limits = BruteForceConfig::default().limits();
        assert_eq!(limits.max_attempts, 3);
        assert_eq!(limits.window_ms, 300_000);
        assert_eq!(limits.lockout_ms, 900_000);
    }

    #[test]
    fn test_validate_requires_jwt_secret() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_err());
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_window_is_allowed() {
        let mut config = valid();
        config.rate_limiting.fixed_window.limit = 0;
        config.rate_limiting.sliding_window.duration_secs = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_invalid_values() {
        let mut config = valid();
        config.rate_limiting.brute_force.limit = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.rate_limiting.brute_force.lockout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.circuit_breaker.call_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.rate_limiting.tenant_header = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = valid();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let yaml = r#"
store:
  backend: etcd
"#;
        assert!(ServiceConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 7070\nstore:\n  backend: memory\njwt:\n  secret: from-file"
        )
        .unwrap();

        let config = ServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.jwt.secret.expose_secret(), "from-file");

        let config = ServiceConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 7070);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = ServiceConfig::from_file("/nonexistent/sentinel.yaml");
        assert!(matches!(result, Err(ServiceError::Config(_))));
    }
}
