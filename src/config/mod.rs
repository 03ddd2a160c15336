//! Configuration Module
//!
//! Provides YAML-based configuration for the bridge with support for:
//! - MQTT broker, authentication, client and subscription settings
//! - Kafka broker, security and consumer-group settings
//! - Bridge behavior: topic mapping, direction flags, dead-letter queue
//! - Environment variable overrides (GOM2K__* prefix)

use std::path::{Path, PathBuf};

use config::{Environment, File, FileFormat};
use regex::Regex;
use serde::Deserialize;

// Re-export per-section config types
pub use bridge::{
    BridgeConfig, BridgeKafkaConfig, DeadLetterConfig, FeaturesConfig, LoggingConfig,
    MappingConfig, RetryConfig,
};
pub use kafka::{
    KafkaConfig, KafkaConsumerConfig, KafkaKeystoreConfig, KafkaSecurityConfig, KafkaSslConfig,
    KafkaTruststoreConfig,
};
pub use mqtt::{MqttAuthConfig, MqttBrokerConfig, MqttClientConfig, MqttConfig, MqttTopicsConfig};

mod bridge;
mod kafka;
mod mqtt;

#[cfg(test)]
mod tests;

/// Directory roots from which SSL keystore material may be loaded
const SSL_ALLOWED_DIRS: &[&str] = &["/etc/ssl", "/opt/kafka/ssl", "./ssl", "./certs", "./config/ssl"];

/// Substitute environment variables in a string.
/// Supports `${VAR}` and `${VAR:-default}` syntax.
fn substitute_env_vars(content: &str) -> String {
    let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap();
    re.replace_all(content, |caps: &regex::Captures| {
        let var_name = &caps[1];
        let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        std::env::var(var_name).unwrap_or_else(|_| default.to_string())
    })
    .to_string()
}

/// Configuration error types
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// Config crate error (parse or deserialize)
    Config(config::ConfigError),
    /// Validation error
    Validation(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Config(e) => write!(f, "Config error: {}", e),
            ConfigError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<config::ConfigError> for ConfigError {
    fn from(e: config::ConfigError) -> Self {
        ConfigError::Config(e)
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// MQTT broker connection and subscription settings
    pub mqtt: MqttConfig,
    /// Kafka cluster connection and security settings
    pub kafka: KafkaConfig,
    /// Bridge operation and mapping settings
    pub bridge: BridgeConfig,
}

/// Resolve the configuration file path.
///
/// Precedence: `CONFIG_FILE` env var, then `$CONFIGS_DIR/config.yaml`,
/// then `./configs/config.yaml`.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("CONFIG_FILE") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Ok(dir) = std::env::var("CONFIGS_DIR") {
        if !dir.is_empty() {
            return Path::new(&dir).join("config.yaml");
        }
    }
    PathBuf::from("./configs/config.yaml")
}

impl Config {
    /// Load configuration from a YAML file with environment variable overrides.
    ///
    /// Supports two forms of environment variable usage:
    /// 1. In-file substitution: `${VAR}` or `${VAR:-default}` syntax
    /// 2. Override via env vars: `GOM2K__` prefix with double underscores for
    ///    nesting, e.g. `GOM2K__MQTT__BROKER__HOST=broker.example.com`
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_inner(path, false)
    }

    /// Load configuration for connectivity test modes. Skips the SSL path
    /// validation so tests can point at fixture material.
    pub fn load_for_testing<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Self::load_inner(path, true)
    }

    fn load_inner<P: AsRef<Path>>(path: P, test_mode: bool) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Validation(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let substituted = substitute_env_vars(&content);

        let cfg = config::Config::builder()
            .add_source(File::from_str(&substituted, FileFormat::Yaml))
            .add_source(
                Environment::with_prefix("GOM2K")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = cfg.try_deserialize()?;
        config.validate(test_mode)?;
        Ok(config)
    }

    /// Parse configuration from a YAML string (for testing, no env overrides)
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let cfg = config::Config::builder()
            .add_source(File::from_str(content, FileFormat::Yaml))
            .build()?;
        let config: Config = cfg.try_deserialize()?;
        config.validate(true)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// `test_mode` skips the SSL path allowlist so connectivity tests can
    /// run against fixture certificates.
    pub fn validate(&self, test_mode: bool) -> Result<(), ConfigError> {
        if self.mqtt.broker.host.is_empty() {
            return Err(ConfigError::Validation(
                "MQTT broker host is required".to_string(),
            ));
        }
        if self.mqtt.broker.port == 0 {
            return Err(ConfigError::Validation(
                "MQTT broker port is required".to_string(),
            ));
        }
        if self.mqtt.client.qos > 2 {
            return Err(ConfigError::Validation(
                "MQTT QoS must be 0, 1 or 2".to_string(),
            ));
        }

        if self.kafka.brokers.is_empty() {
            return Err(ConfigError::Validation(
                "at least one Kafka broker is required".to_string(),
            ));
        }
        for broker in &self.kafka.brokers {
            validate_broker_address(broker)?;
        }

        if self.kafka.security.uses_ssl() && !test_mode {
            let keystore = &self.kafka.security.ssl.keystore.location;
            if !keystore.is_empty() {
                validate_ssl_path(keystore)?;
            }
            let truststore = &self.kafka.security.ssl.truststore.location;
            if !truststore.is_empty() {
                validate_ssl_path(truststore)?;
            }
        }

        if !self.bridge.features.mqtt_to_kafka && !self.bridge.features.kafka_to_mqtt {
            return Err(ConfigError::Validation(
                "at least one bridge direction must be enabled".to_string(),
            ));
        }

        Ok(())
    }
}

/// Check that a Kafka broker address has the `host:port` shape
fn validate_broker_address(broker: &str) -> Result<(), ConfigError> {
    let (host, port) = broker.rsplit_once(':').ok_or_else(|| {
        ConfigError::Validation(format!(
            "invalid Kafka broker address '{}': expected host:port",
            broker
        ))
    })?;
    if host.is_empty() {
        return Err(ConfigError::Validation(format!(
            "invalid Kafka broker address '{}': empty host",
            broker
        )));
    }
    if port.parse::<u16>().map(|p| p == 0).unwrap_or(true) {
        return Err(ConfigError::Validation(format!(
            "invalid Kafka broker address '{}': bad port",
            broker
        )));
    }
    Ok(())
}

/// Check that an SSL material path sits under one of the allowed roots
fn validate_ssl_path(path: &str) -> Result<(), ConfigError> {
    let mut allowed: Vec<String> = SSL_ALLOWED_DIRS.iter().map(|d| d.to_string()).collect();
    if let Ok(home) = std::env::var("HOME") {
        allowed.push(format!("{}/.kafka/ssl", home));
        allowed.push(format!("{}/.ssl", home));
    }
    if path.contains("..") {
        return Err(ConfigError::Validation(format!(
            "SSL file path '{}' must not contain '..'",
            path
        )));
    }
    if allowed.iter().any(|dir| path.starts_with(dir.as_str())) {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!(
            "SSL file path '{}' is outside the allowed directories",
            path
        )))
    }
}
