//! Bidirectional Bridge
//!
//! Orchestrates both directions based on the configured feature flags:
//! starts each enabled pipeline, tracks its lifecycle state and tears both
//! down on stop.

use parking_lot::RwLock;
use serde::Serialize;
use tracing::{error, info};

use crate::config::Config;

use super::kafka_to_mqtt::KafkaToMqttBridge;
use super::mqtt_to_kafka::MqttToKafkaBridge;
use super::BridgeError;

/// Lifecycle state of one bridge direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectionStatus {
    /// Disabled in configuration; never started
    Off,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Operational snapshot of the bidirectional bridge
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStatus {
    pub mqtt_to_kafka_enabled: bool,
    pub kafka_to_mqtt_enabled: bool,
    pub mqtt_to_kafka: DirectionStatus,
    pub kafka_to_mqtt: DirectionStatus,
    pub is_running: bool,
}

/// Supervises the MQTT→Kafka and Kafka→MQTT pipelines.
pub struct BidirectionalBridge {
    config: Config,
    mqtt_to_kafka: MqttToKafkaBridge,
    kafka_to_mqtt: KafkaToMqttBridge,
    mqtt_to_kafka_status: RwLock<DirectionStatus>,
    kafka_to_mqtt_status: RwLock<DirectionStatus>,
}

impl BidirectionalBridge {
    pub fn new(config: &Config) -> Self {
        Self {
            config: config.clone(),
            mqtt_to_kafka: MqttToKafkaBridge::new(config),
            kafka_to_mqtt: KafkaToMqttBridge::new(config),
            mqtt_to_kafka_status: RwLock::new(DirectionStatus::Off),
            kafka_to_mqtt_status: RwLock::new(DirectionStatus::Off),
        }
    }

    /// Start every enabled direction. Fails without touching the network
    /// when both directions are disabled; a direction that fails to start
    /// fails the whole bridge.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        let features = self.config.bridge.features;
        if !features.mqtt_to_kafka && !features.kafka_to_mqtt {
            return Err(BridgeError::Config(
                "no bridge directions enabled - check configuration".to_string(),
            ));
        }

        info!("Starting bidirectional MQTT-Kafka bridge");

        if features.mqtt_to_kafka {
            *self.mqtt_to_kafka_status.write() = DirectionStatus::Starting;
            self.mqtt_to_kafka.start().await.map_err(|e| {
                error!("Failed to start MQTT→Kafka bridge: {}", e);
                *self.mqtt_to_kafka_status.write() = DirectionStatus::Stopped;
                e
            })?;
            *self.mqtt_to_kafka_status.write() = DirectionStatus::Running;
            info!("MQTT→Kafka bridge enabled");
        } else {
            info!("MQTT→Kafka bridge disabled");
        }

        if features.kafka_to_mqtt {
            *self.kafka_to_mqtt_status.write() = DirectionStatus::Starting;
            self.kafka_to_mqtt.start().await.map_err(|e| {
                error!("Failed to start Kafka→MQTT bridge: {}", e);
                *self.kafka_to_mqtt_status.write() = DirectionStatus::Stopped;
                e
            })?;
            *self.kafka_to_mqtt_status.write() = DirectionStatus::Running;
            info!("Kafka→MQTT bridge enabled");
        } else {
            info!("Kafka→MQTT bridge disabled");
        }

        info!("Bidirectional bridge started");
        Ok(())
    }

    /// Stop both directions and return the first error encountered.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        info!("Stopping bidirectional bridge");

        let mut first_error = None;

        if *self.mqtt_to_kafka_status.read() == DirectionStatus::Running {
            *self.mqtt_to_kafka_status.write() = DirectionStatus::Stopping;
            if let Err(e) = self.mqtt_to_kafka.stop().await {
                error!("Error stopping MQTT→Kafka bridge: {}", e);
                first_error.get_or_insert(e);
            }
            *self.mqtt_to_kafka_status.write() = DirectionStatus::Stopped;
        }

        if *self.kafka_to_mqtt_status.read() == DirectionStatus::Running {
            *self.kafka_to_mqtt_status.write() = DirectionStatus::Stopping;
            if let Err(e) = self.kafka_to_mqtt.stop().await {
                error!("Error stopping Kafka→MQTT bridge: {}", e);
                first_error.get_or_insert(e);
            }
            *self.kafka_to_mqtt_status.write() = DirectionStatus::Stopped;
        }

        info!("Bidirectional bridge stopped");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Current operational status of both directions
    pub fn status(&self) -> BridgeStatus {
        let mqtt_to_kafka = *self.mqtt_to_kafka_status.read();
        let kafka_to_mqtt = *self.kafka_to_mqtt_status.read();
        BridgeStatus {
            mqtt_to_kafka_enabled: self.config.bridge.features.mqtt_to_kafka,
            kafka_to_mqtt_enabled: self.config.bridge.features.kafka_to_mqtt,
            mqtt_to_kafka,
            kafka_to_mqtt,
            is_running: mqtt_to_kafka == DirectionStatus::Running
                || kafka_to_mqtt == DirectionStatus::Running,
        }
    }

    /// The MQTT→Kafka pipeline, for counters and error observation
    pub fn mqtt_to_kafka(&self) -> &MqttToKafkaBridge {
        &self.mqtt_to_kafka
    }

    /// The Kafka→MQTT pipeline, for counters and error observation
    pub fn kafka_to_mqtt(&self) -> &KafkaToMqttBridge {
        &self.kafka_to_mqtt
    }
}
