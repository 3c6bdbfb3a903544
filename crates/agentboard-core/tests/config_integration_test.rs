use agentboard_core::{CacheBackendKind, ConfigManager, Settings};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_configuration() {
    let settings = Settings::default();
    assert!(settings.validate().is_ok());
    assert_eq!(settings.cache.backend, CacheBackendKind::Memory);
    assert_eq!(settings.server.cors_origins.len(), 4);
}

#[test]
fn test_missing_directory_falls_back_to_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist");

    let manager = ConfigManager::load(Some(missing), Some("test".into())).unwrap();
    let settings = manager.settings();
    assert_eq!(settings.server.port, 8000);
    assert_eq!(settings.cosmos.database, "research-analytics-db");
    assert_eq!(manager.env(), "test");
}

#[test]
fn test_local_file_overrides_environment_file() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("production.toml"),
        "[cache]\nbackend = \"redis\"\nttl_seconds = 600\n",
    )
    .unwrap();
    fs::write(
        temp_dir.path().join("local.toml"),
        "[cache]\nttl_seconds = 90\n\n[logging]\nformat = \"json\"\n",
    )
    .unwrap();

    let manager =
        ConfigManager::load(Some(temp_dir.path().to_path_buf()), Some("production".into()))
            .unwrap();
    let settings = manager.settings();
    assert_eq!(settings.cache.backend, CacheBackendKind::Redis);
    assert_eq!(settings.cache.ttl_seconds, 90);
    assert_eq!(settings.logging.format, "json");
}

#[test]
fn test_invalid_file_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("default.toml"),
        "[graph]\ncontainers = []\n",
    )
    .unwrap();

    let result = ConfigManager::load(Some(temp_dir.path().to_path_buf()), Some("dev".into()));
    assert!(result.is_err());
}

#[test]
fn test_cosmos_key_is_not_serialized() {
    let temp_dir = TempDir::new().unwrap();
    fs::write(
        temp_dir.path().join("default.toml"),
        "[cosmos]\nendpoint = \"https://example.documents.azure.com:443/\"\nkey = \"c2VjcmV0\"\n",
    )
    .unwrap();

    let manager =
        ConfigManager::load(Some(temp_dir.path().to_path_buf()), Some("dev".into())).unwrap();
    let settings = manager.settings();
    assert!(settings.cosmos.is_configured());

    let rendered = serde_json::to_string(settings.as_ref()).unwrap();
    assert!(!rendered.contains("c2VjcmV0"));
}
