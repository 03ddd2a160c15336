//! Kafka Configuration
//!
//! Broker list, security and consumer-group settings for the Kafka side
//! of the bridge.

use serde::Deserialize;

/// Truststore holding the CA material for broker verification
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KafkaTruststoreConfig {
    pub location: String,
    pub password: String,
}

/// Keystore holding the client certificate and key for mutual TLS
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KafkaKeystoreConfig {
    pub location: String,
    pub password: String,
    #[serde(default)]
    pub key_password: String,
}

/// SSL material locations
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KafkaSslConfig {
    pub truststore: KafkaTruststoreConfig,
    pub keystore: KafkaKeystoreConfig,
}

/// Security settings. `protocol` is `PLAINTEXT` or `SSL`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaSecurityConfig {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub ssl: KafkaSslConfig,
}

fn default_protocol() -> String {
    "PLAINTEXT".to_string()
}

impl Default for KafkaSecurityConfig {
    fn default() -> Self {
        Self {
            protocol: default_protocol(),
            ssl: KafkaSslConfig::default(),
        }
    }
}

impl KafkaSecurityConfig {
    /// Whether the configured protocol requires TLS material
    pub fn uses_ssl(&self) -> bool {
        self.protocol.eq_ignore_ascii_case("SSL")
    }
}

/// Consumer-group settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConsumerConfig {
    #[serde(default = "default_group_id")]
    pub group_id: String,
}

fn default_group_id() -> String {
    "gom2k-bridge".to_string()
}

impl Default for KafkaConsumerConfig {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
        }
    }
}

/// Complete Kafka-side configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KafkaConfig {
    /// Bootstrap brokers as `host:port` entries
    pub brokers: Vec<String>,
    pub security: KafkaSecurityConfig,
    pub consumer: KafkaConsumerConfig,
}

impl KafkaConfig {
    /// Comma-joined bootstrap server list in the form librdkafka expects
    pub fn bootstrap_servers(&self) -> String {
        self.brokers.join(",")
    }
}
