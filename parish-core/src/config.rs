//! Service configuration.
//!
//! Loaded from `parish.toml`, then overridden from the environment. Every
//! section is optional; durations are human strings such as `"250ms"`,
//! `"30s"` or `"5m"`.
//!
//! ```toml
//! [registry]
//! url = "sqlite://registry.sqlite3"
//!
//! [storage]
//! data_dir = "data/tenants"
//!
//! [pool]
//! capacity = 64
//! idle_timeout = "5m"
//!
//! [auth]
//! jwt_secret = "change-me-to-at-least-32-characters"
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::CacheConfig;
use crate::coordinator::CoordinatorConfig;
use crate::error::{TenantError, TenantResult};
use crate::tenant::{PoolConfig, ProvisionConfig};

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "parish.toml";

/// Shortest accepted JWT signing secret, in bytes.
pub const MIN_JWT_SECRET_LEN: usize = 32;

/// Source for environment variables.
pub trait EnvSource: Send + Sync {
    /// Get an environment variable value.
    fn get(&self, name: &str) -> Option<String>;
}

/// Environment source using `std::env`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

/// Environment source backed by a map.
#[derive(Debug, Clone, Default)]
pub struct MapEnvSource {
    vars: HashMap<String, String>,
}

impl MapEnvSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable.
    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl EnvSource for MapEnvSource {
    fn get(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParishConfig {
    pub registry: RegistrySection,
    pub storage: StorageSection,
    pub pool: PoolSection,
    pub cache: CacheSection,
    pub provisioning: ProvisioningSection,
    pub server: ServerSection,
    pub auth: AuthSection,
}

/// `[registry]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySection {
    /// Location of the registry store.
    pub url: String,
}

impl Default for RegistrySection {
    fn default() -> Self {
        Self {
            url: "sqlite://parish-registry.sqlite3".to_string(),
        }
    }
}

/// `[storage]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Directory holding tenant store files.
    pub data_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/tenants"),
        }
    }
}

/// `[pool]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub capacity: usize,
    pub max_per_tenant: usize,
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub query_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub disconnect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
}

impl Default for PoolSection {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            capacity: pool.capacity,
            max_per_tenant: pool.max_per_tenant,
            acquire_timeout: pool.acquire_timeout,
            connect_timeout: pool.connect_timeout,
            query_timeout: Duration::from_secs(30),
            idle_timeout: pool.idle_timeout,
            disconnect_timeout: pool.disconnect_timeout,
            sweep_interval: pool.sweep_interval,
        }
    }
}

/// `[cache]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub enabled: bool,
    pub max_entries: usize,
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    pub invalidation_retries: u32,
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
}

impl Default for CacheSection {
    fn default() -> Self {
        let coordinator = CoordinatorConfig::default();
        Self {
            enabled: true,
            max_entries: 10_000,
            ttl: CacheConfig::default().ttl,
            invalidation_retries: coordinator.invalidation_retries,
            retry_backoff: coordinator.retry_backoff,
        }
    }
}

/// `[provisioning]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSection {
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub orphan_grace: Duration,
}

impl Default for ProvisioningSection {
    fn default() -> Self {
        let defaults = ProvisionConfig::default();
        Self {
            timeout: defaults.timeout,
            orphan_grace: defaults.orphan_grace,
        }
    }
}

/// `[server]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3000".to_string(),
        }
    }
}

/// `[auth]`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    /// HS256 signing secret for access tokens.
    pub jwt_secret: Option<String>,
    #[serde(with = "humantime_serde")]
    pub token_ttl: Duration,
    pub issuer: String,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_ttl: Duration::from_secs(24 * 60 * 60),
            issuer: "parish".to_string(),
        }
    }
}

impl ParishConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> TenantResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TenantError::config(format!("cannot read {}: {}", path.display(), e)).with_source(e)
        })?;
        Self::from_toml(&content)
    }

    /// Parse TOML text.
    pub fn from_toml(content: &str) -> TenantResult<Self> {
        toml::from_str(content)
            .map_err(|e| TenantError::config(format!("invalid configuration: {}", e)))
    }

    /// Load `path` if given, else `parish.toml` if present, else defaults;
    /// then apply environment overrides and validate.
    pub fn resolve(path: Option<&Path>, env: &impl EnvSource) -> TenantResult<Self> {
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| env.get("PARISH_CONFIG").map(PathBuf::from));
        let mut config = match explicit {
            Some(path) => Self::load(&path)?,
            None if Path::new(CONFIG_FILE_NAME).exists() => {
                Self::load(Path::new(CONFIG_FILE_NAME))?
            }
            None => Self::default(),
        };
        config.apply_env(env)?;
        Ok(config)
    }

    /// Apply environment overrides.
    pub fn apply_env(&mut self, env: &impl EnvSource) -> TenantResult<()> {
        if let Some(url) = env.get("DATABASE_URL") {
            self.registry.url = url;
        }
        if let Some(dir) = env.get("PARISH_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        if let Some(bind) = env.get("PARISH_BIND") {
            self.server.bind = bind;
        }
        if let Some(secret) = env.get("PARISH_JWT_SECRET") {
            self.auth.jwt_secret = Some(secret);
        }
        if let Some(capacity) = env.get("PARISH_POOL_CAPACITY") {
            self.pool.capacity = capacity.parse().map_err(|_| {
                TenantError::config(format!(
                    "PARISH_POOL_CAPACITY must be a positive integer, got '{}'",
                    capacity
                ))
            })?;
        }
        Ok(())
    }

    /// Check invariants across sections.
    pub fn validate(&self) -> TenantResult<()> {
        if self.pool.capacity == 0 {
            return Err(TenantError::config("pool.capacity must be at least 1"));
        }
        if self.pool.max_per_tenant == 0 {
            return Err(TenantError::config("pool.max_per_tenant must be at least 1"));
        }
        if self.pool.max_per_tenant > self.pool.capacity {
            return Err(TenantError::config(format!(
                "pool.max_per_tenant ({}) exceeds pool.capacity ({})",
                self.pool.max_per_tenant, self.pool.capacity
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(TenantError::config("cache.max_entries must be at least 1"));
        }
        if self.registry.url.trim().is_empty() {
            return Err(TenantError::config("registry.url is required")
                .with_suggestion("Set DATABASE_URL or [registry] url"));
        }
        match self.auth.jwt_secret.as_deref() {
            None | Some("") => {
                return Err(TenantError::config("auth.jwt_secret is required")
                    .with_suggestion("Set PARISH_JWT_SECRET or [auth] jwt_secret"));
            }
            Some(secret) if secret.len() < MIN_JWT_SECRET_LEN => {
                return Err(TenantError::config(format!(
                    "auth.jwt_secret must be at least {} bytes",
                    MIN_JWT_SECRET_LEN
                )));
            }
            Some(_) => {}
        }
        Ok(())
    }

    pub fn to_pool_config(&self) -> PoolConfig {
        PoolConfig::builder()
            .capacity(self.pool.capacity)
            .max_per_tenant(self.pool.max_per_tenant)
            .acquire_timeout(self.pool.acquire_timeout)
            .connect_timeout(self.pool.connect_timeout)
            .idle_timeout(self.pool.idle_timeout)
            .disconnect_timeout(self.pool.disconnect_timeout)
            .sweep_interval(self.pool.sweep_interval)
            .build()
    }

    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            enabled: self.cache.enabled,
            ttl: self.cache.ttl,
            max_scopes: self.cache.max_entries,
        }
    }

    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            invalidation_retries: self.cache.invalidation_retries,
            retry_backoff: self.cache.retry_backoff,
            settle_timeout: self.pool.query_timeout,
        }
    }

    pub fn to_provision_config(&self) -> ProvisionConfig {
        ProvisionConfig {
            timeout: self.provisioning.timeout,
            orphan_grace: self.provisioning.orphan_grace,
        }
    }
}

/// Parse a human duration such as `"5s"` or `"250ms"`.
pub fn parse_duration(s: &str) -> TenantResult<Duration> {
    humantime::parse_duration(s.trim())
        .map_err(|e| TenantError::config(format!("invalid duration '{}': {}", s, e)))
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer, de};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(s.trim()).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[test]
    fn test_defaults() {
        let config = ParishConfig::default();
        assert_eq!(config.pool.capacity, 64);
        assert_eq!(config.pool.max_per_tenant, 4);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.pool.query_timeout, Duration::from_secs(30));
        assert_eq!(config.cache.retry_backoff, Duration::from_millis(25));
        assert_eq!(config.provisioning.timeout, Duration::from_secs(90));
        assert_eq!(config.server.bind, "0.0.0.0:3000");
    }

    #[test]
    fn test_parse_toml_sections() {
        let config = ParishConfig::from_toml(
            r#"
            [pool]
            capacity = 8
            idle_timeout = "90s"

            [cache]
            retry_backoff = "5ms"

            [auth]
            token_ttl = "1h"
            "#,
        )
        .unwrap();
        assert_eq!(config.pool.capacity, 8);
        assert_eq!(config.pool.idle_timeout, Duration::from_secs(90));
        assert_eq!(config.pool.max_per_tenant, 4);
        assert_eq!(config.cache.retry_backoff, Duration::from_millis(5));
        assert_eq!(config.auth.token_ttl, Duration::from_secs(3600));
    }

    #[test]
    fn test_bad_duration_rejected() {
        let err = ParishConfig::from_toml("[pool]\nidle_timeout = \"soon\"\n").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::InvalidConfiguration);
    }

    #[test]
    fn test_env_overrides() {
        let env = MapEnvSource::new()
            .set("DATABASE_URL", "sqlite:///tmp/reg.sqlite3")
            .set("PARISH_DATA_DIR", "/tmp/tenants")
            .set("PARISH_POOL_CAPACITY", "16")
            .set("PARISH_JWT_SECRET", SECRET);
        let mut config = ParishConfig::default();
        config.apply_env(&env).unwrap();

        assert_eq!(config.registry.url, "sqlite:///tmp/reg.sqlite3");
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/tenants"));
        assert_eq!(config.pool.capacity, 16);
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_capacity_env() {
        let env = MapEnvSource::new().set("PARISH_POOL_CAPACITY", "lots");
        assert!(ParishConfig::default().apply_env(&env).is_err());
    }

    #[test]
    fn test_validate() {
        let mut config = ParishConfig::default();
        assert!(config.validate().is_err());

        config.auth.jwt_secret = Some("short".into());
        assert!(config.validate().is_err());

        config.auth.jwt_secret = Some(SECRET.into());
        config.validate().unwrap();

        config.pool.max_per_tenant = 100;
        assert!(config.validate().is_err());

        config.pool.max_per_tenant = 4;
        config.pool.capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1:8080\"\n").unwrap();

        let env = MapEnvSource::new();
        let config = ParishConfig::resolve(Some(&path), &env).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:8080");
    }

    #[test]
    fn test_converts_to_component_configs() {
        let mut config = ParishConfig::default();
        config.pool.capacity = 3;
        config.cache.invalidation_retries = 7;
        assert_eq!(config.to_pool_config().capacity, 3);
        assert_eq!(config.to_coordinator_config().invalidation_retries, 7);
        assert_eq!(parse_duration("250ms").unwrap(), Duration::from_millis(250));
        assert!(parse_duration("nope").is_err());
    }
}
