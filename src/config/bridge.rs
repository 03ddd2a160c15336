//! Bridge Configuration
//!
//! Settings that govern bridge behavior: topic mapping, direction feature
//! flags, topic auto-creation, the dead-letter queue and retry timing.

use std::time::Duration;

use serde::Deserialize;

/// Topic mapping settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MappingConfig {
    /// Prefix prepended to every derived Kafka topic
    #[serde(default = "default_kafka_prefix")]
    pub kafka_prefix: String,
    /// Maximum number of MQTT topic levels carried into the Kafka topic
    #[serde(default = "default_max_topic_levels")]
    pub max_topic_levels: usize,
}

fn default_kafka_prefix() -> String {
    "gom2k".to_string()
}

fn default_max_topic_levels() -> usize {
    3
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            kafka_prefix: default_kafka_prefix(),
            max_topic_levels: default_max_topic_levels(),
        }
    }
}

/// Direction feature flags. At least one must be enabled.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct FeaturesConfig {
    pub mqtt_to_kafka: bool,
    pub kafka_to_mqtt: bool,
}

/// Kafka topic lifecycle settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct BridgeKafkaConfig {
    /// Attempt to create missing topics when a produce fails
    pub auto_create_topics: bool,
    /// Partition count for auto-created topics
    #[serde(default = "default_partitions")]
    pub default_partitions: i32,
    /// Replication factor for auto-created topics
    #[serde(default = "default_replication_factor")]
    pub replication_factor: i32,
}

fn default_partitions() -> i32 {
    3
}

fn default_replication_factor() -> i32 {
    1
}

impl Default for BridgeKafkaConfig {
    fn default() -> Self {
        Self {
            auto_create_topics: false,
            default_partitions: default_partitions(),
            replication_factor: default_replication_factor(),
        }
    }
}

/// Dead-letter queue settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeadLetterConfig {
    /// Track and retry failed messages; when false, failures are logged
    /// and discarded
    pub enabled: bool,
    /// Kafka topic receiving exhausted records (empty disables the sink)
    pub kafka_topic: String,
    /// MQTT topic receiving exhausted records (empty disables the sink)
    pub mqtt_topic: String,
    /// Retry budget per failed message
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Seconds between retry sweeps (fractional values allowed)
    #[serde(default = "default_retry_interval")]
    pub retry_interval: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_interval() -> f64 {
    30.0
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kafka_topic: String::new(),
            mqtt_topic: String::new(),
            max_retries: default_max_retries(),
            retry_interval: default_retry_interval(),
        }
    }
}

impl DeadLetterConfig {
    /// Retry interval as a Duration
    pub fn retry_interval_duration(&self) -> Duration {
        Duration::from_secs_f64(self.retry_interval.max(0.0))
    }
}

/// Connection retry settings
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Seconds to wait for initial connections
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,
}

fn default_connection_timeout() -> u64 {
    30
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl RetryConfig {
    /// Connection timeout as a Duration
    pub fn connection_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

/// Logging settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete bridge behavior configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub mapping: MappingConfig,
    pub features: FeaturesConfig,
    pub kafka: BridgeKafkaConfig,
    pub dead_letter: DeadLetterConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mapping_defaults() {
        let mapping = MappingConfig::default();
        assert_eq!(mapping.kafka_prefix, "gom2k");
        assert_eq!(mapping.max_topic_levels, 3);
    }

    #[test]
    fn test_kafka_lifecycle_defaults() {
        let kafka = BridgeKafkaConfig::default();
        assert!(!kafka.auto_create_topics);
        assert_eq!(kafka.default_partitions, 3);
        assert_eq!(kafka.replication_factor, 1);
    }

    #[test]
    fn test_dead_letter_interval_supports_subsecond_values() {
        let dead_letter = DeadLetterConfig {
            retry_interval: 0.05,
            ..Default::default()
        };
        assert_eq!(
            dead_letter.retry_interval_duration(),
            Duration::from_millis(50)
        );
    }

    #[test]
    fn test_features_default_to_disabled() {
        let features = FeaturesConfig::default();
        assert!(!features.mqtt_to_kafka);
        assert!(!features.kafka_to_mqtt);
    }
}
