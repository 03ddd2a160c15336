//! Bridge Module
//!
//! The message-forwarding engine between MQTT and Kafka. Each direction is
//! an independent pipeline with its own clients; the bidirectional bridge
//! orchestrates their lifecycle based on the configured feature flags.
//!
//! # Loop Prevention
//!
//! The return path refuses to republish broker-internal `$SYS/` topics and
//! the bridge's own `gom2k/` diagnostic topics. The `gom2k/` check is a
//! literal: operators running a different `kafka_prefix` do not get
//! equivalent protection.

use serde::Serialize;

use crate::kafka::KafkaError;
use crate::mqtt::MqttError;

mod bidirectional;
mod deadletter;
pub mod envelope;
mod kafka_to_mqtt;
mod mqtt_to_kafka;
pub mod topic_map;


pub use bidirectional::{BidirectionalBridge, BridgeStatus, DirectionStatus};
pub use deadletter::{DeadLetterQueue, FailedMessage, FailedSource};
pub use kafka_to_mqtt::{should_skip_topic, KafkaToMqttBridge};
pub use mqtt_to_kafka::MqttToKafkaBridge;

/// Capacity of the per-direction error report channel
pub const ERROR_CHANNEL_CAPACITY: usize = 100;

/// Direction of a message flow through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Direction {
    #[serde(rename = "mqtt→kafka")]
    MqttToKafka,
    #[serde(rename = "kafka→mqtt")]
    KafkaToMqtt,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::MqttToKafka => write!(f, "mqtt→kafka"),
            Direction::KafkaToMqtt => write!(f, "kafka→mqtt"),
        }
    }
}

/// Error type for bridge operations
#[derive(Debug)]
pub enum BridgeError {
    /// Invalid or contradictory configuration
    Config(String),
    /// MQTT client failure
    Mqtt(MqttError),
    /// Kafka client failure
    Kafka(KafkaError),
    /// Envelope encode/decode failure
    Conversion(String),
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BridgeError::Config(msg) => write!(f, "Configuration error: {}", msg),
            BridgeError::Mqtt(e) => write!(f, "MQTT error: {}", e),
            BridgeError::Kafka(e) => write!(f, "Kafka error: {}", e),
            BridgeError::Conversion(msg) => write!(f, "Conversion error: {}", msg),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<MqttError> for BridgeError {
    fn from(e: MqttError) -> Self {
        BridgeError::Mqtt(e)
    }
}

impl From<KafkaError> for BridgeError {
    fn from(e: KafkaError) -> Self {
        BridgeError::Kafka(e)
    }
}
