//! Configuration management for Gatekeeper.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{GatekeeperError, Result};
use crate::ratelimit::RoutePolicies;

/// Prefix for environment variable overrides, e.g.
/// `GATEKEEPER__SERVER__HTTP_ADDR=0.0.0.0:8080`.
pub const ENV_PREFIX: &str = "GATEKEEPER";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Export cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Path to a separate route policy file; overrides `policies` when set
    #[serde(default)]
    pub policies_path: Option<String>,

    /// Per-route-class limits
    #[serde(default)]
    pub policies: RoutePolicies,

    /// How often expired counters are purged, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            policies_path: None,
            policies: RoutePolicies::default(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

impl RateLimitingConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Export cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum bytes per stored chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Time-to-live for cached values in seconds
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,

    /// How often expired values are purged, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            ttl_secs: default_ttl(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

fn default_chunk_size() -> usize {
    64 * 1024
}

fn default_ttl() -> u64 {
    300
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl ServiceConfig {
    /// Load configuration from an optional YAML file layered under
    /// `GATEKEEPER__*` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            info!(path = %path, "Loading configuration file");
            builder = builder.add_source(
                ::config::File::with_name(path)
                    .format(::config::FileFormat::Yaml)
                    .required(true),
            );
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: ServiceConfig = builder
            .build()
            .and_then(|c| c.try_deserialize::<ServiceConfig>())
            .map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.finalize()
    }

    /// Load configuration from a YAML file without environment overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ServiceConfig =
            serde_yaml::from_str(yaml).map_err(|e| GatekeeperError::Config(e.to_string()))?;
        config.finalize()
    }

    /// Resolve the external policy file, if any, and validate everything.
    fn finalize(mut self) -> Result<Self> {
        if let Some(path) = &self.rate_limiting.policies_path {
            self.rate_limiting.policies = RoutePolicies::from_file(Path::new(path))?;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        self.rate_limiting.policies.validate()?;
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "rate_limiting.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.cache.chunk_size == 0 {
            return Err(GatekeeperError::Config(
                "cache.chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(GatekeeperError::Config(
                "cache.sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateLimitConfig, RouteClass};
    use std::env;
    use std::path::PathBuf;
    use std::sync::Mutex;

    // `load` reads the process environment; tests that call it hold this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard {
        key: &'static str,
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            env::remove_var(self.key);
        }
    }

    fn set_env(key: &'static str, value: &str) -> EnvGuard {
        env::set_var(key, value);
        EnvGuard { key }
    }

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("gatekeeper-{}-{}", std::process::id(), name));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.server.http_addr, "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.rate_limiting.sweep_interval_secs, 60);
        assert_eq!(config.cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.cache.sweep_interval(), Duration::from_secs(60));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_with_inline_policies() {
        let yaml = r#"
server:
  http_addr: "0.0.0.0:9000"
rate_limiting:
  sweep_interval_secs: 15
  policies:
    auth:
      max_requests: 2
      window_ms: 10000
cache:
  chunk_size: 1024
"#;
        let config = ServiceConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.server.http_addr.port(), 9000);
        assert_eq!(config.rate_limiting.sweep_interval(), Duration::from_secs(15));
        assert_eq!(
            config.rate_limiting.policies.get(RouteClass::Auth),
            RateLimitConfig::new(2, 10_000)
        );
        assert_eq!(config.cache.chunk_size, 1024);
        assert_eq!(config.cache.ttl_secs, 300);
    }

    #[test]
    fn test_invalid_policy_rejected_at_load() {
        let yaml = r#"
rate_limiting:
  policies:
    export:
      max_requests: 0
      window_ms: 60000
"#;
        assert!(matches!(
            ServiceConfig::from_yaml(yaml),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let yaml = "rate_limiting:\n  sweep_interval_secs: 0\n";
        assert!(ServiceConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_policies_path_overrides_inline_policies() {
        let policies = temp_file(
            "policies.yaml",
            "search:\n  max_requests: 7\n  window_ms: 1000\n",
        );
        let yaml = format!(
            "rate_limiting:\n  policies_path: \"{}\"\n",
            policies.display()
        );

        let config = ServiceConfig::from_yaml(&yaml).unwrap();
        assert_eq!(
            config.rate_limiting.policies.get(RouteClass::Search),
            RateLimitConfig::new(7, 1_000)
        );

        std::fs::remove_file(policies).ok();
    }

    #[test]
    fn test_load_from_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let path = temp_file(
            "service.yaml",
            "server:\n  http_addr: \"127.0.0.1:18080\"\ncache:\n  ttl_secs: 30\n",
        );

        let config = ServiceConfig::load(path.to_str()).unwrap();
        assert_eq!(config.server.http_addr.port(), 18080);
        assert_eq!(config.cache.ttl_secs, 30);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_environment_overrides_file() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let path = temp_file(
            "layered.yaml",
            r#"
rate_limiting:
  sweep_interval_secs: 15
  policies:
    auth:
      max_requests: 2
      window_ms: 10000
cache:
  ttl_secs: 30
"#,
        );
        let _sweep = set_env("GATEKEEPER__RATE_LIMITING__SWEEP_INTERVAL_SECS", "45");
        let _auth = set_env("GATEKEEPER__RATE_LIMITING__POLICIES__AUTH__MAX_REQUESTS", "9");
        let _addr = set_env("GATEKEEPER__SERVER__HTTP_ADDR", "127.0.0.1:18181");

        let config = ServiceConfig::load(path.to_str()).unwrap();

        assert_eq!(config.rate_limiting.sweep_interval_secs, 45);
        assert_eq!(
            config.rate_limiting.policies.get(RouteClass::Auth),
            RateLimitConfig::new(9, 10_000)
        );
        assert_eq!(config.server.http_addr.port(), 18181);
        assert_eq!(config.cache.ttl_secs, 30);

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_environment_value_is_validated() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let _sweep = set_env("GATEKEEPER__CACHE__SWEEP_INTERVAL_SECS", "0");

        assert!(matches!(
            ServiceConfig::load(None),
            Err(GatekeeperError::Config(_))
        ));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        assert!(ServiceConfig::load(Some("/nonexistent/gatekeeper.yaml")).is_err());
    }
}
