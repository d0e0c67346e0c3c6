//! Route classes and their rate limit policies.
//!
//! Every protected route belongs to one [`RouteClass`]. The class is resolved
//! to a [`RateLimitConfig`] when the router is built, so a misspelled class
//! name is caught by the compiler (in code) or by the loader (in YAML)
//! rather than at request time.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{GatekeeperError, Result};

const ONE_MINUTE_MS: u64 = 60_000;

/// Limit and window for one route class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u64,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl RateLimitConfig {
    pub const fn new(max_requests: u64, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    /// `max_requests` per one-minute window.
    pub const fn per_minute(max_requests: u64) -> Self {
        Self::new(max_requests, ONE_MINUTE_MS)
    }

    /// Reject limits that would deny all traffic or never expire.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max_requests == 0 {
            return Err(GatekeeperError::Config(format!(
                "rate limit '{}': max_requests must be greater than zero",
                name
            )));
        }
        if self.window_ms == 0 {
            return Err(GatekeeperError::Config(format!(
                "rate limit '{}': window_ms must be greater than zero",
                name
            )));
        }
        Ok(())
    }
}

/// A category of API endpoints sharing one rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteClass {
    /// Sign-in and credential endpoints
    Auth,
    /// General API reads and writes
    Api,
    /// File uploads
    Upload,
    /// Search queries
    Search,
    /// PDF and document exports
    Export,
}

impl RouteClass {
    pub const ALL: [RouteClass; 5] = [
        RouteClass::Auth,
        RouteClass::Api,
        RouteClass::Upload,
        RouteClass::Search,
        RouteClass::Export,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::Api => "api",
            RouteClass::Upload => "upload",
            RouteClass::Search => "search",
            RouteClass::Export => "export",
        }
    }
}

impl std::fmt::Display for RouteClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The rate limit policy table, one entry per route class.
///
/// Classes missing from a YAML document keep their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoutePolicies {
    #[serde(default = "default_auth")]
    pub auth: RateLimitConfig,
    #[serde(default = "default_api")]
    pub api: RateLimitConfig,
    #[serde(default = "default_upload")]
    pub upload: RateLimitConfig,
    #[serde(default = "default_search")]
    pub search: RateLimitConfig,
    #[serde(default = "default_export")]
    pub export: RateLimitConfig,
}

fn default_auth() -> RateLimitConfig {
    RateLimitConfig::per_minute(5)
}

fn default_api() -> RateLimitConfig {
    RateLimitConfig::per_minute(100)
}

fn default_upload() -> RateLimitConfig {
    RateLimitConfig::per_minute(10)
}

fn default_search() -> RateLimitConfig {
    RateLimitConfig::per_minute(30)
}

fn default_export() -> RateLimitConfig {
    RateLimitConfig::per_minute(5)
}

impl Default for RoutePolicies {
    fn default() -> Self {
        Self {
            auth: default_auth(),
            api: default_api(),
            upload: default_upload(),
            search: default_search(),
            export: default_export(),
        }
    }
}

impl RoutePolicies {
    /// Load and validate policies from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading rate limit policies");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load and validate policies from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let policies: RoutePolicies = serde_yaml::from_str(yaml).map_err(|e| {
            GatekeeperError::Config(format!("Failed to parse rate limit policies: {}", e))
        })?;
        policies.validate()?;
        Ok(policies)
    }

    /// The configured limit for a route class.
    pub fn get(&self, class: RouteClass) -> RateLimitConfig {
        match class {
            RouteClass::Auth => self.auth,
            RouteClass::Api => self.api,
            RouteClass::Upload => self.upload,
            RouteClass::Search => self.search,
            RouteClass::Export => self.export,
        }
    }

    pub fn validate(&self) -> Result<()> {
        for class in RouteClass::ALL {
            self.get(class).validate(class.as_str())?;
        }
        Ok(())
    }
}
