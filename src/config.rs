//! # Configuration Management
//!
//! This module handles loading and managing application configuration from
//! multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment environment variables (HOST, PORT, UPLOAD_DIR,
//!    MAX_UPLOAD_BYTES, ALLOWED_EXTENSIONS)
//! 2. Environment variables with the APP_ prefix
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Upload storage settings.
///
/// ## Fields:
/// - `upload_dir`: Root of the on-disk upload tree. In containers this
///   should be a mounted volume (the default assumes `/data/uploads`).
/// - `max_upload_bytes`: Byte ceiling enforced while streaming a payload
///   to disk. First line of defense against disk exhaustion.
/// - `allowed_extensions`: Lowercase filename extensions the service will
///   accept. Uploads without any extension are stored as `.bin`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub max_upload_bytes: u64,
    pub allowed_extensions: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            storage: StorageConfig {
                upload_dir: "/data/uploads".to_string(),
                max_upload_bytes: 50 * 1024 * 1024, // 50 MiB
                allowed_extensions: vec![
                    "wav".to_string(),
                    "mp3".to_string(),
                    "m4a".to_string(),
                    "ogg".to_string(),
                    "webm".to_string(),
                ],
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// The deployment-facing knobs keep their historical un-prefixed
    /// environment names (`UPLOAD_DIR`, `MAX_UPLOAD_BYTES`,
    /// `ALLOWED_EXTENSIONS`, plus the platform-conventional `HOST` and
    /// `PORT`), handled as explicit overrides on top of the generic
    /// `APP_*` source.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(dir) = env::var("UPLOAD_DIR") {
            settings = settings.set_override("storage.upload_dir", dir)?;
        }

        if let Ok(max_bytes) = env::var("MAX_UPLOAD_BYTES") {
            settings = settings.set_override("storage.max_upload_bytes", max_bytes)?;
        }

        if let Ok(extensions) = env::var("ALLOWED_EXTENSIONS") {
            let list: Vec<String> = extensions
                .split(',')
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect();
            settings = settings.set_override("storage.allowed_extensions", list)?;
        }

        let mut config: AppConfig = settings.build()?.try_deserialize()?;
        config.normalize();
        Ok(config)
    }

    /// Lowercase the extension allowlist so membership checks never
    /// depend on how the operator typed the entries.
    fn normalize(&mut self) {
        for ext in &mut self.storage.allowed_extensions {
            *ext = ext.trim().trim_start_matches('.').to_lowercase();
        }
        self.storage.allowed_extensions.retain(|e| !e.is_empty());
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.storage.max_upload_bytes == 0 {
            return Err(anyhow::anyhow!("Max upload bytes must be greater than 0"));
        }

        if self.storage.upload_dir.trim().is_empty() {
            return Err(anyhow::anyhow!("Upload directory cannot be empty"));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config
    /// updates through the API).
    ///
    /// Only the fields present in the JSON are touched, so a partial body
    /// like `{"storage": {"max_upload_bytes": 1048576}}` changes nothing
    /// else. The updated configuration is re-validated before it is
    /// accepted.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(storage) = partial_config.get("storage") {
            if let Some(dir) = storage.get("upload_dir").and_then(|v| v.as_str()) {
                self.storage.upload_dir = dir.to_string();
            }
            if let Some(max_bytes) = storage.get("max_upload_bytes").and_then(|v| v.as_u64()) {
                self.storage.max_upload_bytes = max_bytes;
            }
            if let Some(extensions) = storage.get("allowed_extensions").and_then(|v| v.as_array()) {
                self.storage.allowed_extensions = extensions
                    .iter()
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect();
            }
        }

        self.normalize();
        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(
            config.storage.allowed_extensions,
            vec!["wav", "mp3", "m4a", "ogg", "webm"]
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.storage.max_upload_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"storage": {"max_upload_bytes": 1048576}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.storage.max_upload_bytes, 1048576);
        // Other fields should remain unchanged
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.storage.upload_dir, "/data/uploads");
    }

    #[test]
    fn test_allowlist_normalization() {
        let mut config = AppConfig::default();
        let json = r#"{"storage": {"allowed_extensions": [".WAV", "Mp3", " ", ""]}}"#;
        config.update_from_json(json).unwrap();
        assert_eq!(config.storage.allowed_extensions, vec!["wav", "mp3"]);
    }

    #[test]
    fn test_update_rejects_invalid_result() {
        let mut config = AppConfig::default();
        let json = r#"{"storage": {"max_upload_bytes": 0}}"#;
        assert!(config.update_from_json(json).is_err());
    }
}
