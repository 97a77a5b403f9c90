//! Chat configuration loaded from TOML.

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub listen: ListenConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for the passive (listening) side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

/// Settings for the active (initiating) side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_port() -> u16 {
    1501
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("port = 1501"));
        assert!(toml_str.contains("host = \"localhost\""));
    }

    #[test]
    fn parse_example_config() {
        let toml_str = r#"
[listen]
port = 5000
bind = "127.0.0.1"

[remote]
host = "chat.example.net"
port = 6000

[logging]
level = "debug"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.listen.port, 5000);
        assert_eq!(config.listen.bind, "127.0.0.1");
        assert_eq!(config.remote.host, "chat.example.net");
        assert_eq!(config.remote.port, 6000);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config: Config = toml::from_str("[remote]\nhost = \"peer\"\n").unwrap();
        assert_eq!(config.remote.host, "peer");
        assert_eq!(config.remote.port, 1501);
        assert_eq!(config.listen.port, 1501);
        assert_eq!(config.listen.bind, "0.0.0.0");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let parsed: Result<Config, _> = toml::from_str("[listen]\nport = 70000\n");
        assert!(parsed.is_err());
    }
}
