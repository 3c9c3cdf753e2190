//! Configuration loading for the backup tool
//!
//! Settings are read from `mailvault.json` in the mailvault config
//! directory. Every field is optional; missing fields take their defaults.
//! The `MAILVAULT_PASSWORD` environment variable, when set, takes priority
//! over the configured credential source.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::credentials::{CredentialProvider, CredentialSource, EnvProvider, PASSWORD_ENV};
use crate::imap::{Security, ServerSettings};
use crate::ingest::FetchFailurePolicy;

/// Config filename in the mailvault config directory
pub const CONFIG_FILE: &str = "mailvault.json";

/// Database filename in the mailvault data directory
pub const DATABASE_FILE: &str = "mailvault.sqlite";

/// User settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailvaultConfig {
    /// SQLite database location, defaults to the data directory
    pub database_path: Option<PathBuf>,
    pub security: Security,
    /// Port override, defaults to 993 for TLS and 143 for plain
    pub port: Option<u16>,
    /// Mailbox to back up, defaults to INBOX
    pub mailbox: Option<String>,
    /// Connect and socket I/O timeout in seconds, defaults to 60
    pub timeout_secs: Option<u64>,
    pub credential: CredentialSource,
    pub on_fetch_error: FetchFailurePolicy,
}

impl MailvaultConfig {
    /// Load `mailvault.json` from the config directory, or defaults if absent
    pub fn load() -> Result<Self> {
        if config::config_exists(CONFIG_FILE) {
            return config::load_json(CONFIG_FILE);
        }
        Ok(Self::default())
    }

    /// Load settings from a specific JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        config::load_json_file(path)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse mailvault config")
    }

    /// Resolved database location
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        config::data_path(DATABASE_FILE).context("Could not determine data directory")
    }

    /// Connection settings for `host`
    pub fn server(&self, host: &str) -> ServerSettings {
        let mut settings = ServerSettings::new(host, self.security);
        if let Some(port) = self.port {
            settings.port = port;
        }
        if let Some(mailbox) = &self.mailbox {
            settings.mailbox = mailbox.clone();
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout = Duration::from_secs(secs);
        }
        settings
    }

    /// Credential provider to use, honouring the environment override
    pub fn credential_provider(&self) -> Box<dyn CredentialProvider> {
        if std::env::var_os(PASSWORD_ENV).is_some() {
            return Box::new(EnvProvider {
                var: PASSWORD_ENV.to_string(),
            });
        }
        self.credential.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_json_gives_defaults() {
        let config = MailvaultConfig::from_json("{}").unwrap();
        assert_eq!(config, MailvaultConfig::default());

        let server = config.server("imap.example.com");
        assert_eq!(server.host, "imap.example.com");
        assert_eq!(server.port, 993);
        assert_eq!(server.security, Security::Tls);
        assert_eq!(server.mailbox, "INBOX");
        assert_eq!(server.timeout, crate::imap::DEFAULT_TIMEOUT);
        assert_eq!(config.on_fetch_error, FetchFailurePolicy::Abort);
    }

    #[test]
    fn test_full_config() {
        let json = r#"{
            "database_path": "/var/backups/mail.sqlite",
            "security": "plain",
            "port": 1143,
            "mailbox": "Archive",
            "timeout_secs": 15,
            "credential": {"source": "env", "var": "IMAP_PASS"},
            "on_fetch_error": "skip"
        }"#;
        let config = MailvaultConfig::from_json(json).unwrap();

        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/var/backups/mail.sqlite")
        );
        assert_eq!(
            config.credential,
            CredentialSource::Env {
                var: "IMAP_PASS".to_string()
            }
        );
        assert_eq!(config.on_fetch_error, FetchFailurePolicy::Skip);

        let server = config.server("localhost");
        assert_eq!(server.port, 1143);
        assert_eq!(server.security, Security::Plain);
        assert_eq!(server.mailbox, "Archive");
        assert_eq!(server.timeout, Duration::from_secs(15));
    }

    #[test]
    fn test_plain_security_uses_plain_port() {
        let config = MailvaultConfig::from_json(r#"{"security": "plain"}"#).unwrap();
        assert_eq!(config.server("localhost").port, 143);
    }

    #[test]
    fn test_invalid_json() {
        assert!(MailvaultConfig::from_json(r#"{"security": "ssl"}"#).is_err());
        assert!(MailvaultConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"mailbox": "Sent"}"#).unwrap();

        let config = MailvaultConfig::from_file(&path).unwrap();
        assert_eq!(config.mailbox.as_deref(), Some("Sent"));
    }
}
