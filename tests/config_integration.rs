//! Integration tests for configuration parsing and handling.

use std::time::Duration;

use parish::ParishConfig;
use parish::config::{CONFIG_FILE_NAME, MapEnvSource};
use pretty_assertions::assert_eq;

const SECRET: &str = "0123456789abcdef0123456789abcdef";

/// Test minimal configuration
#[test]
fn test_config_minimal() {
    let config = ParishConfig::from_toml(
        r#"
        [auth]
        jwt_secret = "0123456789abcdef0123456789abcdef"
    "#,
    )
    .expect("Failed to parse config");

    assert_eq!(config.pool.capacity, 64);
    assert_eq!(config.pool.max_per_tenant, 4);
    assert_eq!(config.pool.acquire_timeout, Duration::from_secs(5));
    assert!(config.cache.enabled);
    assert!(config.validate().is_ok());
}

/// Test full configuration with all options
#[test]
fn test_config_full() {
    let config = ParishConfig::from_toml(
        r#"
        [registry]
        url = "sqlite:///var/lib/parish/registry.sqlite3"

        [storage]
        data_dir = "/var/lib/parish/tenants"

        [pool]
        capacity = 128
        max_per_tenant = 8
        acquire_timeout = "2s"
        connect_timeout = "3s"
        query_timeout = "15s"
        idle_timeout = "10m"
        disconnect_timeout = "500ms"
        sweep_interval = "1m"

        [cache]
        enabled = false
        max_entries = 500
        ttl = "30s"
        invalidation_retries = 5
        retry_backoff = "10ms"

        [provisioning]
        timeout = "2m"
        orphan_grace = "1h"

        [server]
        bind = "127.0.0.1:8080"

        [auth]
        jwt_secret = "0123456789abcdef0123456789abcdef"
        token_ttl = "12h"
        issuer = "parish-test"
    "#,
    )
    .expect("Failed to parse config");

    assert_eq!(config.registry.url, "sqlite:///var/lib/parish/registry.sqlite3");
    assert_eq!(config.pool.capacity, 128);
    assert_eq!(config.pool.idle_timeout, Duration::from_secs(600));
    assert_eq!(config.pool.disconnect_timeout, Duration::from_millis(500));
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.invalidation_retries, 5);
    assert_eq!(config.provisioning.orphan_grace, Duration::from_secs(3600));
    assert_eq!(config.server.bind, "127.0.0.1:8080");
    assert_eq!(config.auth.token_ttl, Duration::from_secs(12 * 3600));

    let pool = config.to_pool_config();
    assert_eq!(pool.capacity, 128);
    assert_eq!(pool.max_per_tenant, 8);
    assert_eq!(config.to_coordinator_config().retry_backoff, Duration::from_millis(10));
    assert!(config.validate().is_ok());
}

/// Environment overrides win over the file
#[test]
fn test_config_env_overrides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "[pool]\ncapacity = 16\n").unwrap();

    let env = MapEnvSource::new()
        .set("DATABASE_URL", "sqlite::memory:")
        .set("PARISH_POOL_CAPACITY", "32")
        .set("PARISH_JWT_SECRET", SECRET)
        .set("PARISH_BIND", "127.0.0.1:0");
    let config = ParishConfig::resolve(Some(&path), &env).unwrap();

    assert_eq!(config.registry.url, "sqlite::memory:");
    assert_eq!(config.pool.capacity, 32);
    assert_eq!(config.server.bind, "127.0.0.1:0");
    assert!(config.validate().is_ok());
}

/// Invalid values are rejected with a configuration error
#[test]
fn test_config_invalid() {
    let err = ParishConfig::from_toml("[pool]\nidle_timeout = \"soon\"\n").unwrap_err();
    assert_eq!(err.code.code(), "T7001");

    let mut config = ParishConfig::from_toml("[pool]\ncapacity = 2\nmax_per_tenant = 4\n").unwrap();
    config.auth.jwt_secret = Some(SECRET.into());
    assert!(config.validate().is_err());

    let mut config = ParishConfig::default();
    config.auth.jwt_secret = Some("short".into());
    assert!(config.validate().is_err());

    let env = MapEnvSource::new().set("PARISH_POOL_CAPACITY", "lots");
    assert!(ParishConfig::default().apply_env(&env).is_err());

    let missing = std::path::Path::new("/nonexistent/parish.toml");
    assert!(ParishConfig::resolve(Some(missing), &MapEnvSource::new()).is_err());
}
