//! gom2k - Bidirectional MQTT ↔ Kafka bridge
//!
//! Subscribes to configured MQTT topic filters and forwards each
//! publication to a deterministically-derived Kafka topic as a JSON
//! envelope; on the return path, consumes prefix-matching Kafka topics and
//! republishes the original MQTT publications. Built for IoT and telemetry
//! workloads where MQTT is the edge protocol and Kafka is the durable
//! fan-out substrate.

pub mod bridge;
pub mod config;
pub mod kafka;
pub mod mqtt;

pub use bridge::{
    BidirectionalBridge, BridgeError, BridgeStatus, DeadLetterQueue, Direction, DirectionStatus,
    KafkaToMqttBridge, MqttToKafkaBridge,
};
pub use config::{Config, ConfigError};
pub use kafka::{KafkaConsumer, KafkaError, KafkaProducer, KafkaRecord};
pub use mqtt::{MqttClient, MqttError, MqttMessage};
