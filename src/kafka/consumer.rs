//! Kafka Consumer
//!
//! Discovers topics carrying the configured bridge prefix and reads from
//! the first one through a consumer-group reader starting at the latest
//! offset. Topics created after startup are not picked up; rediscovery
//! requires a restart.

use std::collections::BTreeSet;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::Message;
use tracing::{info, warn};

use crate::config::{BridgeConfig, KafkaConfig};

use super::producer::apply_security;
use super::{KafkaError, KafkaRecord};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Kafka consumer bound to a single prefix-matching topic.
pub struct KafkaConsumer {
    kafka: KafkaConfig,
    bridge: BridgeConfig,
    consumer: Option<StreamConsumer>,
    topics: Vec<String>,
}

impl KafkaConsumer {
    /// Create a new consumer; no connection is made until `connect`.
    pub fn new(kafka: &KafkaConfig, bridge: &BridgeConfig) -> Self {
        Self {
            kafka: kafka.clone(),
            bridge: bridge.clone(),
            consumer: None,
            topics: Vec::new(),
        }
    }

    /// Discover prefix-matching topics and open a group reader against the
    /// first one.
    pub fn connect(&mut self) -> Result<(), KafkaError> {
        info!(
            "Connecting Kafka consumer with brokers: {:?}",
            self.kafka.brokers
        );

        let mut discovered = self.discover_topics()?;
        let prefix = &self.bridge.mapping.kafka_prefix;

        if discovered.is_empty() {
            warn!(
                "No existing Kafka topics found with prefix '{}'; this is normal \
                 for a new deployment",
                prefix
            );
            // Placeholder so startup succeeds before any topic exists
            discovered = vec![format!("{}.sensor", prefix)];
        }

        // The reader consumes a single topic; the rest of the discovery
        // list is kept for status reporting only.
        let topic_to_consume = discovered[0].clone();
        self.topics = discovered;

        info!(
            "Discovered {} Kafka topic(s) with prefix '{}', consuming from: {}",
            self.topics.len(),
            prefix,
            topic_to_consume
        );

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", self.kafka.bootstrap_servers());
        client_config.set("group.id", &self.kafka.consumer.group_id);
        client_config.set("auto.offset.reset", "latest");
        client_config.set("fetch.min.bytes", "1");
        client_config.set("fetch.max.bytes", "10485760");
        client_config.set("fetch.wait.max.ms", "1000");
        apply_security(&mut client_config, &self.kafka);

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| KafkaError::Connect(format!("failed to create consumer: {}", e)))?;
        consumer
            .subscribe(&[topic_to_consume.as_str()])
            .map_err(|e| {
                KafkaError::Connect(format!("failed to subscribe to {}: {}", topic_to_consume, e))
            })?;

        self.consumer = Some(consumer);
        info!("Kafka consumer connected");
        Ok(())
    }

    /// Block until the next record is available. Cancellation-safe; the
    /// caller races this against its shutdown signal.
    pub async fn read(&self) -> Result<KafkaRecord, KafkaError> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| KafkaError::Connect("consumer not connected".to_string()))?;

        let message = consumer
            .recv()
            .await
            .map_err(|e| KafkaError::Consume(format!("failed to read message: {}", e)))?;

        Ok(KafkaRecord {
            topic: message.topic().to_string(),
            key: message
                .key()
                .map(|k| String::from_utf8_lossy(k).into_owned())
                .unwrap_or_default(),
            value: message.payload().map(|p| p.to_vec()).unwrap_or_default(),
        })
    }

    /// Release the reader.
    pub fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            info!("Closing Kafka consumer");
            consumer.unsubscribe();
        }
    }

    /// Topics discovered at connect time (the reader consumes the first).
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Fetch cluster metadata through a short-lived admin connection and
    /// return the topic names carrying the bridge prefix.
    fn discover_topics(&self) -> Result<Vec<String>, KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", self.kafka.bootstrap_servers());
        apply_security(&mut client_config, &self.kafka);

        let probe: BaseConsumer = client_config.create().map_err(|e| {
            KafkaError::Admin(format!("failed to create discovery connection: {}", e))
        })?;

        let metadata = probe
            .fetch_metadata(None, METADATA_TIMEOUT)
            .map_err(|e| KafkaError::Admin(format!("failed to read partitions: {}", e)))?;

        let prefix = &self.bridge.mapping.kafka_prefix;
        let names: BTreeSet<String> = metadata
            .topics()
            .iter()
            .map(|t| t.name().to_string())
            .filter(|name| name.starts_with(prefix.as_str()))
            .collect();

        for name in &names {
            info!("  discovered topic: {}", name);
        }
        Ok(names.into_iter().collect())
    }
}

impl std::fmt::Debug for KafkaConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaConsumer")
            .field("brokers", &self.kafka.brokers)
            .field("group_id", &self.kafka.consumer.group_id)
            .field("topics", &self.topics)
            .finish()
    }
}
