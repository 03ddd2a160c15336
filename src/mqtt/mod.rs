//! MQTT Client Module
//!
//! Wraps the rumqttc client for bridge use: connection management with
//! reconnect backoff, subscription restoration, publishing and a single
//! callback for received publications.

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

mod client;

pub use client::{expand_client_id, map_qos, qos_to_u8, MessageCallback, MqttClient};

/// An MQTT publication as received from or destined for the broker.
/// Created on reception and immutable thereafter.
#[derive(Debug, Clone, Serialize)]
pub struct MqttMessage {
    #[serde(rename = "mqtt_topic")]
    pub topic: String,
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
    pub qos: u8,
    pub retained: bool,
    pub timestamp: DateTime<Utc>,
}

fn serialize_payload<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

/// Error type for MQTT client operations
#[derive(Debug)]
pub enum MqttError {
    /// Connection to the broker failed or was lost
    Connection(String),
    /// Operation timed out
    Timeout,
    /// Broker rejected the operation
    Rejected(String),
    /// Publish failed
    Publish(String),
    /// Subscribe failed
    Subscribe(String),
}

impl std::fmt::Display for MqttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MqttError::Connection(msg) => write!(f, "Connection error: {}", msg),
            MqttError::Timeout => write!(f, "Operation timed out"),
            MqttError::Rejected(msg) => write!(f, "Rejected: {}", msg),
            MqttError::Publish(msg) => write!(f, "Publish failed: {}", msg),
            MqttError::Subscribe(msg) => write!(f, "Subscribe failed: {}", msg),
        }
    }
}

impl std::error::Error for MqttError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_serializes_with_envelope_field_names() {
        let msg = MqttMessage {
            topic: "sensor/room/temp".to_string(),
            payload: b"23.5".to_vec(),
            qos: 1,
            retained: true,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["mqtt_topic"], "sensor/room/temp");
        assert_eq!(json["payload"], "23.5");
        assert_eq!(json["qos"], 1);
        assert_eq!(json["retained"], true);
        assert!(json["timestamp"].is_string());
    }
}
