//! Kafka Client Module
//!
//! Producer and consumer wrappers over rdkafka, with lazy topic creation
//! on the produce path and prefix-based topic discovery on the consume
//! path.

use serde::{Serialize, Serializer};

mod consumer;
mod producer;

pub use consumer::KafkaConsumer;
pub use producer::KafkaProducer;

/// A Kafka record as produced or consumed by the bridge. The key is the
/// UTF-8 encoding of the original MQTT topic and the value carries the
/// JSON envelope.
#[derive(Debug, Clone, Serialize)]
pub struct KafkaRecord {
    pub topic: String,
    pub key: String,
    #[serde(serialize_with = "serialize_value")]
    pub value: Vec<u8>,
}

fn serialize_value<S: Serializer>(value: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(value))
}

/// Error type for Kafka client operations
#[derive(Debug)]
pub enum KafkaError {
    /// Client construction or connection failed
    Connect(String),
    /// Producing a record failed
    Produce(String),
    /// Consuming a record failed
    Consume(String),
    /// Admin operation (metadata, topic creation) failed
    Admin(String),
}

impl std::fmt::Display for KafkaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KafkaError::Connect(msg) => write!(f, "Connect error: {}", msg),
            KafkaError::Produce(msg) => write!(f, "Produce error: {}", msg),
            KafkaError::Consume(msg) => write!(f, "Consume error: {}", msg),
            KafkaError::Admin(msg) => write!(f, "Admin error: {}", msg),
        }
    }
}

impl std::error::Error for KafkaError {}
