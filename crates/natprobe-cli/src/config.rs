//! Configuration system for the natprobe CLI.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use natprobe_stun::ServerEndpoint;

/// natprobe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// STUN server endpoints
    #[serde(default)]
    pub servers: ServersConfig,
    /// Per-probe timeout in seconds
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Primary and secondary STUN servers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServersConfig {
    /// Server used by Tests I, II, III, and the TCP variant of Test I
    #[serde(default = "default_primary")]
    pub primary: ServerConfig,
    /// Independent server used by Test IV
    #[serde(default = "default_secondary")]
    pub secondary: ServerConfig,
}

/// One STUN server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname or IP address
    pub host: String,
    /// Port
    pub port: u16,
    /// RFC 5389 strictness flag
    #[serde(default = "default_true")]
    pub strict: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log file path; stderr when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Default values

fn default_timeout_seconds() -> u64 {
    3
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_primary() -> ServerConfig {
    ServerConfig {
        host: "stun.l.google.com".to_string(),
        port: 19302,
        strict: true,
    }
}

fn default_secondary() -> ServerConfig {
    ServerConfig {
        host: "stun.xten.com".to_string(),
        port: 3478,
        strict: false,
    }
}

impl Default for ServersConfig {
    fn default() -> Self {
        Self {
            primary: default_primary(),
            secondary: default_secondary(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            servers: ServersConfig::default(),
            default_timeout_seconds: default_timeout_seconds(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from the default path, falling back to defaults when the
    /// file does not exist
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Default configuration file path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("natprobe/config.toml")
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error when a server entry is unusable or when the
    /// primary and secondary servers are not distinct (Test IV compares
    /// mappings across two independent servers).
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, server) in [
            ("primary", &self.servers.primary),
            ("secondary", &self.servers.secondary),
        ] {
            if server.host.is_empty() {
                anyhow::bail!("{name} server host must not be empty");
            }
            if server.port == 0 {
                anyhow::bail!("{name} server port must not be 0");
            }
        }
        if self.servers.primary.host == self.servers.secondary.host
            && self.servers.primary.port == self.servers.secondary.port
        {
            anyhow::bail!("primary and secondary STUN servers must be distinct");
        }
        if self.default_timeout_seconds == 0 {
            anyhow::bail!("default_timeout_seconds must be at least 1");
        }
        Ok(())
    }

    /// Endpoint for Tests I-III
    #[must_use]
    pub fn primary_endpoint(&self) -> ServerEndpoint {
        self.endpoint(&self.servers.primary)
    }

    /// Endpoint for Test IV
    #[must_use]
    pub fn secondary_endpoint(&self) -> ServerEndpoint {
        self.endpoint(&self.servers.secondary)
    }

    fn endpoint(&self, server: &ServerConfig) -> ServerEndpoint {
        ServerEndpoint {
            host: server.host.clone(),
            port: server.port,
            timeout: Duration::from_secs(self.default_timeout_seconds),
            strict: server.strict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.servers.primary.host, "stun.l.google.com");
        assert_eq!(config.servers.primary.port, 19302);
        assert!(config.servers.primary.strict);
        assert_eq!(config.servers.secondary.host, "stun.xten.com");
        assert!(!config.servers.secondary.strict);
        assert_eq!(config.default_timeout_seconds, 3);
        assert_eq!(config.logging.level, "info");
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
default_timeout_seconds = 5

[servers.primary]
host = "stun.example.net"
port = 3478

[servers.secondary]
host = "stun2.example.net"
port = 3478
strict = false

[logging]
level = "debug"
file = "/tmp/natprobe.log"
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.servers.primary.host, "stun.example.net");
        assert!(config.servers.primary.strict);
        assert!(!config.servers.secondary.strict);
        assert_eq!(config.default_timeout_seconds, 5);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.file.as_deref(),
            Some(Path::new("/tmp/natprobe.log"))
        );

        let endpoint = config.primary_endpoint();
        assert_eq!(endpoint.timeout, Duration::from_secs(5));
        assert_eq!(endpoint.authority(), "stun.example.net:3478");
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[servers.primary]
host = "stun.example.net"
port = 3478
"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.servers.secondary.host, "stun.xten.com");
        assert_eq!(config.default_timeout_seconds, 3);
    }

    #[test]
    fn test_validate_rejects_identical_servers() {
        let mut config = Config::default();
        config.servers.secondary = config.servers.primary.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_host_and_zero_port() {
        let mut config = Config::default();
        config.servers.primary.host = String::new();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.servers.secondary.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = Config {
            default_timeout_seconds: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
