use std::{
    collections::HashMap,
    env,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "ServerConfig::default_host")]
    pub host: String,
    #[serde(default = "ServerConfig::default_port")]
    pub port: u16,
    /// Origins allowed by the CORS layer. Empty means any origin.
    #[serde(default = "ServerConfig::default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl ServerConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_port() -> u16 {
        8000
    }

    fn default_cors_origins() -> Vec<String> {
        [
            "http://localhost:8000",
            "http://localhost:8080",
            "http://localhost:3000",
            "http://localhost:5173",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            port: Self::default_port(),
            cors_origins: Self::default_cors_origins(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmosConfig {
    /// Account endpoint, e.g. `https://account.documents.azure.com:443/`
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Master key; deserialized from config/env only.
    #[serde(default, skip_serializing)]
    pub key: Option<SecretString>,
    #[serde(default = "CosmosConfig::default_database")]
    pub database: String,
    #[serde(default = "CosmosConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl CosmosConfig {
    fn default_database() -> String {
        "research-analytics-db".to_string()
    }

    fn default_request_timeout() -> u64 {
        30
    }

    /// True when both endpoint and key are present.
    pub fn is_configured(&self) -> bool {
        self.endpoint
            .as_deref()
            .map(|e| !e.trim().is_empty())
            .unwrap_or(false)
            && self.key.is_some()
    }
}

impl Default for CosmosConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            key: None,
            database: Self::default_database(),
            request_timeout_secs: Self::default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "CacheSettings::default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub backend: CacheBackendKind,
    #[serde(default = "CacheSettings::default_redis_url")]
    pub redis_url: String,
    #[serde(default = "CacheSettings::default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "CacheSettings::default_ttl")]
    pub ttl_seconds: u64,
    /// Per-namespace TTL, in seconds.
    #[serde(default = "CacheSettings::default_ttl_overrides")]
    pub ttl_overrides: HashMap<String, u64>,
    #[serde(default = "CacheSettings::default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl CacheSettings {
    fn default_enabled() -> bool {
        true
    }

    fn default_redis_url() -> String {
        "redis://localhost:6379/0".to_string()
    }

    fn default_key_prefix() -> String {
        "agentboard".to_string()
    }

    fn default_ttl() -> u64 {
        300
    }

    fn default_ttl_overrides() -> HashMap<String, u64> {
        HashMap::from([
            ("agents".to_string(), 30),
            ("agent_details".to_string(), 60),
            ("documents".to_string(), 60),
        ])
    }

    fn default_cleanup_interval() -> u64 {
        60
    }

    pub fn default_ttl_duration(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            backend: CacheBackendKind::default(),
            redis_url: Self::default_redis_url(),
            key_prefix: Self::default_key_prefix(),
            ttl_seconds: Self::default_ttl(),
            ttl_overrides: Self::default_ttl_overrides(),
            cleanup_interval_secs: Self::default_cleanup_interval(),
        }
    }
}

/// Override for a container's partition strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PartitionSetting {
    pub field: String,
    #[serde(default)]
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSettings {
    #[serde(default = "GraphSettings::default_containers")]
    pub containers: Vec<String>,
    #[serde(default = "GraphSettings::default_scan_limit")]
    pub scan_limit: usize,
    #[serde(default = "GraphSettings::default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl GraphSettings {
    fn default_containers() -> Vec<String> {
        [
            "agent_session_logs",
            "system_inbox",
            "identity_cards",
            "working_contexts",
            "journal_entries",
            "memory_contexts",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn default_scan_limit() -> usize {
        200
    }

    fn default_refresh_interval() -> u64 {
        120
    }
}

impl Default for GraphSettings {
    fn default() -> Self {
        Self {
            containers: Self::default_containers(),
            scan_limit: Self::default_scan_limit(),
            refresh_interval_secs: Self::default_refresh_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
    /// `plain` or `json`
    #[serde(default = "LoggingConfig::default_format")]
    pub format: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }

    fn default_format() -> String {
        "plain".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            format: Self::default_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cosmos: CosmosConfig,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub partitions: HashMap<String, PartitionSetting>,
    #[serde(default)]
    pub graph: GraphSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            server: ServerConfig::default(),
            cosmos: CosmosConfig::default(),
            cache: CacheSettings::default(),
            partitions: HashMap::new(),
            graph: GraphSettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("APP_ENV")
            .ok()
            .or_else(|| env::var("RUST_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.server.host.trim().is_empty(),
            "server.host cannot be empty"
        );
        anyhow::ensure!(self.server.port > 0, "server.port must be > 0");
        anyhow::ensure!(
            !self.cosmos.database.trim().is_empty(),
            "cosmos.database cannot be empty"
        );
        anyhow::ensure!(self.cache.ttl_seconds > 0, "cache.ttl_seconds must be > 0");
        for (namespace, ttl) in &self.cache.ttl_overrides {
            anyhow::ensure!(*ttl > 0, "cache.ttl_overrides.{namespace} must be > 0");
        }
        anyhow::ensure!(
            self.cache.cleanup_interval_secs > 0,
            "cache.cleanup_interval_secs must be > 0"
        );
        for (container, setting) in &self.partitions {
            anyhow::ensure!(
                !setting.field.trim().is_empty(),
                "partitions.{container}.field cannot be empty"
            );
        }
        anyhow::ensure!(
            !self.graph.containers.is_empty(),
            "graph.containers cannot be empty"
        );
        anyhow::ensure!(self.graph.scan_limit > 0, "graph.scan_limit must be > 0");
        anyhow::ensure!(
            matches!(self.logging.format.as_str(), "plain" | "json"),
            "logging.format must be 'plain' or 'json'"
        );
        Ok(())
    }
}

/// Loads [`Settings`] from layered sources and keeps the resolved result.
pub struct ConfigManager {
    settings: Arc<Settings>,
    config_dir: PathBuf,
    env: String,
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigManager")
            .field("config_dir", &self.config_dir)
            .field("env", &self.env)
            .finish()
    }
}

impl ConfigManager {
    /// Load settings from `config_dir` (or the default directory) for `env_override`
    /// (or the environment named by `APP_ENV`/`RUST_ENV`).
    pub fn load(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Self> {
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let config_dir = config_dir.unwrap_or_else(Self::default_config_dir);
        let mut settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.env = env_name.clone();
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            config_dir,
            env: env_name,
        })
    }

    /// Wrap already-built settings, e.g. in tests.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let env = settings.env.clone();
        Ok(Self {
            settings: Arc::new(settings),
            config_dir: PathBuf::from("."),
            env,
        })
    }

    /// Apply command-line overrides for the listen address.
    pub fn override_server(self, host: Option<String>, port: Option<u16>) -> Result<Self> {
        if host.is_none() && port.is_none() {
            return Ok(self);
        }
        let mut settings = (*self.settings).clone();
        if let Some(host) = host {
            settings.server.host = host;
        }
        if let Some(port) = port {
            settings.server.port = port;
        }
        settings.validate()?;
        Ok(Self {
            settings: Arc::new(settings),
            ..self
        })
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.settings.clone()
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn env(&self) -> &str {
        &self.env
    }

    /// `./config` when it exists, otherwise the working directory.
    pub fn default_config_dir() -> PathBuf {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }
        info!("Using config directory: {:?}", cwd);
        cwd
    }

    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        let settings: Settings = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.yaml")).required(false))
            .add_source(cfg::File::from(config_dir.join("default.json")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.yaml", env_name))).required(false),
            )
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.json", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                cfg::Environment::with_prefix("AGENTBOARD")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .with_list_parse_key("graph.containers"),
            )
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.cache.ttl_overrides.get("agents"), Some(&30));
        assert_eq!(settings.graph.containers.len(), 6);
        assert!(!settings.cosmos.is_configured());
    }

    #[test]
    fn rejects_bad_log_format() {
        let mut settings = Settings::default();
        settings.logging.format = "xml".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn server_overrides_are_validated() {
        let manager = ConfigManager::from_settings(Settings::default()).unwrap();
        let manager = manager
            .override_server(Some("127.0.0.1".into()), Some(9100))
            .unwrap();
        assert_eq!(manager.settings().server.host, "127.0.0.1");
        assert_eq!(manager.settings().server.port, 9100);
        assert!(manager.override_server(None, Some(0)).is_err());
    }

    #[test]
    fn rejects_zero_ttl_override() {
        let mut settings = Settings::default();
        settings.cache.ttl_overrides.insert("documents".into(), 0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn loads_layered_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("default.toml"),
            r#"
            [server]
            port = 9100

            [cache]
            ttl_seconds = 120

            [partitions.system_inbox]
            field = "to"
            "#,
        )
        .unwrap();
        fs::write(
            dir.path().join("staging.toml"),
            r#"
            [server]
            port = 9200
            "#,
        )
        .unwrap();

        let manager =
            ConfigManager::load(Some(dir.path().to_path_buf()), Some("staging".into())).unwrap();
        let settings = manager.settings();
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.cache.ttl_seconds, 120);
        assert_eq!(settings.env, "staging");
        let inbox = settings.partitions.get("system_inbox").unwrap();
        assert_eq!(inbox.field, "to");
        assert_eq!(inbox.default_value, None);
    }
}
