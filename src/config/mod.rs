//! Configuration management
//!
//! This module handles loading and parsing configuration for the Agora forum.
//! Configuration can be loaded from:
//! - config.yml file
//! - Environment variables (override file settings)
//!
//! Missing optional values are filled with sensible defaults.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Cache configuration
    #[serde(default)]
    pub cache: CacheConfig,
    /// Site-wide settings (main URL, cookie secret)
    #[serde(default)]
    pub site: SiteConfig,
    /// View template configuration
    #[serde(default)]
    pub views: ViewsConfig,
    /// DNS blocklist configuration
    #[serde(default)]
    pub dnsbl: DnsblConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS allowed origin
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,
    /// Reverse proxies whose `X-Forwarded-For` / `X-Real-IP` headers are believed
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origin: default_cors_origin(),
            trusted_proxies: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Parsed proxy addresses; invalid entries are rejected by `Config::validate`
    pub fn trusted_proxy_addrs(&self) -> Vec<IpAddr> {
        self.trusted_proxies
            .iter()
            .filter_map(|p| p.trim().parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical())
            .collect()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:8080".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database path or `sqlite:` URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// Maximum pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits for a locked database, in milliseconds
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

fn default_database_url() -> String {
    "data/agora.db".to_string()
}

fn default_max_connections() -> u32 {
    16
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache TTL in seconds
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
    /// Maximum number of cached entries
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl(),
            max_capacity: default_max_capacity(),
        }
    }
}

fn default_ttl() -> u64 {
    300
}

fn default_max_capacity() -> u64 {
    10_000
}

/// Site configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Public base URL, always ending with `/`
    #[serde(default = "default_main_url")]
    pub main_url: String,
    /// Secret mixed into remember-me cookies and flood tokens
    #[serde(default = "default_secret")]
    pub secret: String,
    /// Session lifetime in days
    #[serde(default = "default_session_days")]
    pub session_days: i64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            main_url: default_main_url(),
            secret: default_secret(),
            session_days: default_session_days(),
        }
    }
}

fn default_main_url() -> String {
    "http://localhost:8080/".to_string()
}

/// Placeholder secret shipped in the defaults
pub const DEFAULT_SECRET: &str = "change-me";

fn default_secret() -> String {
    DEFAULT_SECRET.to_string()
}

fn default_session_days() -> i64 {
    7
}

impl SiteConfig {
    /// Whether the cookie secret is still the shipped placeholder
    pub fn uses_default_secret(&self) -> bool {
        self.secret == DEFAULT_SECRET
    }

    /// Main URL switched to https
    pub fn secure_main_url(&self) -> String {
        match self.main_url.strip_prefix("http://") {
            Some(rest) => format!("https://{}", rest),
            None => self.main_url.clone(),
        }
    }
}

/// View template configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewsConfig {
    /// Directory with template overrides; embedded templates are used otherwise
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// DNS blocklist configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsblConfig {
    /// Whether posting addresses are checked against the blocklist
    #[serde(default)]
    pub enabled: bool,
    /// Blocklist zone
    #[serde(default = "default_dnsbl_zone")]
    pub zone: String,
    /// Lookup timeout in milliseconds
    #[serde(default = "default_dnsbl_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for DnsblConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            zone: default_dnsbl_zone(),
            timeout_ms: default_dnsbl_timeout_ms(),
        }
    }
}

fn default_dnsbl_zone() -> String {
    "tor.ahbl.org".to_string()
}

fn default_dnsbl_timeout_ms() -> u64 {
    2000
}

/// Error type for configuration parsing
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    FileRead {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse config file '{path}': {message}")]
    ParseError {
        path: String,
        message: String,
    },
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl Config {
    /// Load configuration from file
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If the file exists but is invalid YAML, returns an error with details.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = serde_yaml::from_str(&content).map_err(|e| {
            ConfigError::ParseError {
                path: path.display().to_string(),
                message: format_yaml_error(&e),
            }
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from file with environment variable overrides
    ///
    /// Environment variables follow the pattern:
    /// - AGORA_SERVER_HOST
    /// - AGORA_SERVER_PORT
    /// - AGORA_SERVER_TRUSTED_PROXIES (comma-separated)
    /// - AGORA_DATABASE_URL
    /// - AGORA_CACHE_TTL_SECONDS
    /// - AGORA_SITE_MAIN_URL
    /// - AGORA_SITE_SECRET
    /// - AGORA_VIEWS_PATH
    /// - AGORA_DNSBL_ENABLED
    /// - AGORA_DNSBL_ZONE
    pub fn load_with_env(path: &std::path::Path) -> anyhow::Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the rest of the system cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.site.main_url.ends_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "site.main_url must end with '/': {}",
                self.site.main_url
            )));
        }
        if self.site.secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "site.secret must not be empty".to_string(),
            ));
        }
        if let Some(bad) = self
            .server
            .trusted_proxies
            .iter()
            .find(|p| p.trim().parse::<IpAddr>().is_err())
        {
            return Err(ConfigError::ValidationError(format!(
                "server.trusted_proxies contains an invalid address: {}",
                bad
            )));
        }
        if self.site.session_days <= 0 {
            return Err(ConfigError::ValidationError(
                "site.session_days must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("AGORA_SERVER_HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("AGORA_SERVER_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            }
        }
        if let Ok(cors_origin) = std::env::var("AGORA_SERVER_CORS_ORIGIN") {
            self.server.cors_origin = cors_origin;
        }
        if let Ok(proxies) = std::env::var("AGORA_SERVER_TRUSTED_PROXIES") {
            self.server.trusted_proxies = proxies
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect();
        }

        if let Ok(url) = std::env::var("AGORA_DATABASE_URL") {
            self.database.url = url;
        }

        if let Ok(ttl) = std::env::var("AGORA_CACHE_TTL_SECONDS") {
            if let Ok(ttl) = ttl.parse::<u64>() {
                self.cache.ttl_seconds = ttl;
            }
        }

        if let Ok(main_url) = std::env::var("AGORA_SITE_MAIN_URL") {
            self.site.main_url = main_url;
        }
        if let Ok(secret) = std::env::var("AGORA_SITE_SECRET") {
            self.site.secret = secret;
        }

        if let Ok(path) = std::env::var("AGORA_VIEWS_PATH") {
            self.views.path = Some(PathBuf::from(path));
        }

        if let Ok(enabled) = std::env::var("AGORA_DNSBL_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.dnsbl.enabled = true,
                "0" | "false" | "no" => self.dnsbl.enabled = false,
                _ => {} // Ignore invalid values
            }
        }
        if let Ok(zone) = std::env::var("AGORA_DNSBL_ZONE") {
            self.dnsbl.zone = zone;
        }
    }
}

/// Format YAML parsing error with location and context
fn format_yaml_error(e: &serde_yaml::Error) -> String {
    if let Some(location) = e.location() {
        format!(
            "at line {}, column {}: {}",
            location.line(),
            location.column(),
            e
        )
    } else {
        e.to_string()
    }
}

// Tests that touch process environment share this lock.
#[cfg(test)]
static CONFIG_ENV_MUTEX: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        super::CONFIG_ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let path = std::path::Path::new("nonexistent_config.yml");
        let config = Config::load(path).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, "data/agora.db");
        assert_eq!(config.cache.ttl_seconds, 300);
        assert_eq!(config.site.main_url, "http://localhost:8080/");
        assert!(config.views.path.is_none());
        assert!(!config.dnsbl.enabled);
        assert_eq!(config.dnsbl.zone, "tor.ahbl.org");
    }

    #[test]
    fn test_load_empty_file_returns_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_partial_config_fills_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: 3000\n").unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.site.session_days, 7);
    }

    #[test]
    fn test_load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"
server:
  host: "127.0.0.1"
  port: 9000
database:
  url: "sqlite:/var/lib/agora/forum.db"
  max_connections: 4
cache:
  ttl_seconds: 60
site:
  main_url: "https://forum.example.org/"
  secret: "s3cr3t"
views:
  path: "custom_views"
dnsbl:
  enabled: true
  zone: "dnsbl.example.org"
"#).unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.database.url, "sqlite:/var/lib/agora/forum.db");
        assert_eq!(config.database.max_connections, 4);
        assert_eq!(config.cache.ttl_seconds, 60);
        assert_eq!(config.site.main_url, "https://forum.example.org/");
        assert_eq!(config.site.secret, "s3cr3t");
        assert_eq!(config.views.path, Some(PathBuf::from("custom_views")));
        assert!(config.dnsbl.enabled);
        assert_eq!(config.dnsbl.zone, "dnsbl.example.org");
    }

    #[test]
    fn test_load_invalid_yaml_returns_error() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  port: not_a_number\n").unwrap();

        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_main_url_without_trailing_slash_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "site:\n  main_url: \"http://example.org\"\n").unwrap();

        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("main_url"));
    }

    #[test]
    fn test_secure_main_url() {
        let site = SiteConfig {
            main_url: "http://forum.example.org/".to_string(),
            ..SiteConfig::default()
        };
        assert_eq!(site.secure_main_url(), "https://forum.example.org/");
    }

    #[test]
    fn test_default_secret_is_flagged() {
        assert!(SiteConfig::default().uses_default_secret());

        let site = SiteConfig {
            secret: "s3cr3t".to_string(),
            ..SiteConfig::default()
        };
        assert!(!site.uses_default_secret());
    }

    #[test]
    fn test_trusted_proxies() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  trusted_proxies: [\"127.0.0.1\", \"::ffff:10.0.0.1\"]\n").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(
            config.server.trusted_proxy_addrs(),
            vec![
                "127.0.0.1".parse::<IpAddr>().unwrap(),
                "10.0.0.1".parse::<IpAddr>().unwrap(),
            ]
        );
        assert!(Config::default().server.trusted_proxy_addrs().is_empty());
    }

    #[test]
    fn test_invalid_trusted_proxy_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "server:\n  trusted_proxies: [\"proxy.local\"]\n").unwrap();

        let err = Config::load(file.path()).unwrap_err().to_string();
        assert!(err.contains("trusted_proxies"));
    }

    #[test]
    fn test_env_override_server_and_site() {
        let _guard = lock_env();
        std::env::set_var("AGORA_SERVER_PORT", "9999");
        std::env::set_var("AGORA_SITE_MAIN_URL", "http://env.example.org/");
        std::env::set_var("AGORA_DNSBL_ENABLED", "true");

        let config = Config::load_with_env(std::path::Path::new("nonexistent.yml")).unwrap();

        std::env::remove_var("AGORA_SERVER_PORT");
        std::env::remove_var("AGORA_SITE_MAIN_URL");
        std::env::remove_var("AGORA_DNSBL_ENABLED");

        assert_eq!(config.server.port, 9999);
        assert_eq!(config.site.main_url, "http://env.example.org/");
        assert!(config.dnsbl.enabled);
    }

    #[test]
    fn test_env_override_invalid_port_ignored() {
        let _guard = lock_env();
        std::env::set_var("AGORA_SERVER_PORT", "not-a-port");

        let config = Config::load_with_env(std::path::Path::new("nonexistent.yml")).unwrap();

        std::env::remove_var("AGORA_SERVER_PORT");

        assert_eq!(config.server.port, 8080);
    }
}
