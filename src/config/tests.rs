//! Tests for Configuration Module

use super::*;
use crate::update::verify::tests::trusted_key_base64;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;

fn test_config() -> UpdaterConfig {
    UpdaterConfig::new(
        Url::parse("https://updates.example.com/latest.json").unwrap(),
        trusted_key_base64(),
    )
}

#[test]
fn test_default_policy() {
    let config = test_config();
    assert_eq!(config.check_interval(), Duration::from_secs(86400));
    assert_eq!(config.fetch_timeout(), Duration::from_secs(10));
    assert_eq!(config.download_timeout(), Duration::from_secs(60));
    assert_eq!(config.max_manifest_bytes, 1024 * 1024);
    assert!(config.automatic_checks_enabled);
    assert!(!config.automatic_install);
    assert!(!config.allow_prereleases);
    assert!(config.validate().is_ok());
}

#[test]
fn test_builder_methods() {
    let config = test_config()
        .with_check_interval(Duration::from_secs(3600))
        .with_automatic_checks(false)
        .with_automatic_install(true)
        .with_prereleases(true)
        .with_download_dir("/tmp/updates");

    assert_eq!(config.check_interval_ms, 3_600_000);
    assert!(!config.automatic_checks_enabled);
    assert!(config.automatic_install);
    assert!(config.allow_prereleases);
    assert_eq!(
        config.resolve_download_dir("app"),
        std::path::PathBuf::from("/tmp/updates")
    );
}

#[test]
fn test_default_download_dir() {
    let dir = test_config().resolve_download_dir("demo-app");
    assert!(dir.ends_with("updates"));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_zero_interval_rejected() {
    let config = test_config().with_check_interval(Duration::ZERO);
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_zero_timeout_rejected() {
    let config = test_config().with_download_timeout(Duration::ZERO);
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_sub_second_durations_kept() {
    let config = test_config()
        .with_fetch_timeout(Duration::from_millis(500))
        .with_download_timeout(Duration::from_millis(1500))
        .with_check_interval(Duration::from_millis(250));

    assert_eq!(config.fetch_timeout(), Duration::from_millis(500));
    assert_eq!(config.download_timeout(), Duration::from_millis(1500));
    assert_eq!(config.check_interval(), Duration::from_millis(250));
    assert!(config.validate().is_ok());
}

#[test]
fn test_oversized_interval_rejected() {
    let config = test_config().with_check_interval(Duration::from_secs(u64::MAX));
    assert_eq!(config.check_interval_ms, u64::MAX);
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let config = test_config().with_check_interval(MAX_CHECK_INTERVAL);
    assert!(config.validate().is_ok());

    let config = test_config().with_check_interval(MAX_CHECK_INTERVAL + Duration::from_millis(1));
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
}

#[test]
fn test_plain_http_feed() {
    let mut config = test_config();
    config.feed_url = Url::parse("http://updates.example.com/latest.json").unwrap();
    assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

    let config = config.with_insecure_transport(true);
    assert!(config.validate().is_ok());
}

#[test]
fn test_bad_key_rejected() {
    let mut config = test_config();
    config.trusted_public_key = "not base64!".to_string();
    assert!(matches!(config.validate(), Err(ConfigError::InvalidKey(_))));

    config.trusted_public_key = "AAAA".to_string();
    assert!(matches!(config.trusted_key(), Err(ConfigError::InvalidKey(_))));
}

// ============================================================================
// Loading
// ============================================================================

#[test]
fn test_deserialize_with_defaults() {
    let json = serde_json::json!({
        "feed_url": "https://updates.example.com/latest.json",
        "trusted_public_key": trusted_key_base64(),
    });
    let config: UpdaterConfig = serde_json::from_value(json).unwrap();
    assert_eq!(config, test_config());
}

#[test]
fn test_load_config_from_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("updater.json");
    let json = serde_json::json!({
        "feed_url": "https://updates.example.com/latest.json",
        "trusted_public_key": trusted_key_base64(),
        "check_interval_ms": 7_200_000,
        "allow_prereleases": true,
    });
    std::fs::write(&path, json.to_string()).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.check_interval(), Duration::from_secs(7200));
    assert!(config.allow_prereleases);
    assert!(config.validate().is_ok());
}

#[test]
fn test_load_config_env_override() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("updater.toml");
    std::fs::write(
        &path,
        format!(
            "feed_url = \"https://updates.example.com/latest.json\"\n\
             trusted_public_key = \"{}\"\n\
             max_manifest_bytes = 2048\n",
            trusted_key_base64()
        ),
    )
    .unwrap();

    std::env::set_var("UPDATER__MAX_MANIFEST_BYTES", "4096");
    let config = load_config(&path);
    std::env::remove_var("UPDATER__MAX_MANIFEST_BYTES");

    assert_eq!(config.unwrap().max_manifest_bytes, 4096);
}

#[test]
fn test_load_missing_file() {
    let temp = TempDir::new().unwrap();
    let result = load_config(&temp.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}
