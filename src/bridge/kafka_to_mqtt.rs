//! Kafka → MQTT Pipeline
//!
//! Drains the prefix-matching Kafka topic, reconstructs the original MQTT
//! publication from each envelope and republishes it to the broker. A loop
//! guard keeps broker-internal and bridge-originated topics from being
//! re-injected.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::kafka::{KafkaConsumer, KafkaProducer, KafkaRecord};
use crate::mqtt::MqttClient;

use super::deadletter::{DeadLetterQueue, FailedSource};
use super::{envelope, BridgeError, Direction, ERROR_CHANNEL_CAPACITY};

/// Topic prefixes the return path refuses to republish. `$SYS/` covers
/// broker-internal topics; `gom2k/` covers the bridge's own diagnostic
/// topics. The latter is a literal and does not track the configured
/// prefix.
const LOOP_GUARD_PREFIXES: &[&str] = &["$SYS/", "gom2k/"];

/// Whether a reconstructed MQTT topic must be skipped to prevent a
/// message loop.
pub fn should_skip_topic(mqtt_topic: &str) -> bool {
    LOOP_GUARD_PREFIXES
        .iter()
        .any(|prefix| mqtt_topic.starts_with(prefix))
}

/// The Kafka → MQTT direction of the bridge.
pub struct KafkaToMqttBridge {
    config: Config,
    mqtt_client: Option<Arc<MqttClient>>,
    dead_letter: Option<Arc<DeadLetterQueue>>,
    dlq_producer: Option<Arc<KafkaProducer>>,
    error_tx: broadcast::Sender<String>,
    error_count: Arc<AtomicU64>,
    shutdown_tx: Option<watch::Sender<bool>>,
    worker_handle: Option<JoinHandle<()>>,
}

impl KafkaToMqttBridge {
    pub fn new(config: &Config) -> Self {
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            config: config.clone(),
            mqtt_client: None,
            dead_letter: None,
            dlq_producer: None,
            error_tx,
            error_count: Arc::new(AtomicU64::new(0)),
            shutdown_tx: None,
            worker_handle: None,
        }
    }

    /// Connect the consumer and MQTT client, then spawn the worker loop.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        let mut consumer = KafkaConsumer::new(&self.config.kafka, &self.config.bridge);
        consumer.connect()?;

        let mqtt_client = Arc::new(MqttClient::new(&self.config.mqtt));
        mqtt_client.connect().await?;

        // The dead-letter Kafka sink needs its own producer on this path
        let dead_letter_cfg = &self.config.bridge.dead_letter;
        let dlq_producer = if dead_letter_cfg.enabled && !dead_letter_cfg.kafka_topic.is_empty() {
            let producer = Arc::new(KafkaProducer::new(&self.config.kafka, &self.config.bridge));
            producer.connect()?;
            Some(producer)
        } else {
            None
        };

        let dead_letter = Arc::new(DeadLetterQueue::new(
            dead_letter_cfg,
            dlq_producer.clone(),
            Some(mqtt_client.clone()),
        ));
        dead_letter.start();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.worker_handle = Some(tokio::spawn(run_worker(
            consumer,
            mqtt_client.clone(),
            dead_letter.clone(),
            ErrorReporter {
                tx: self.error_tx.clone(),
                count: self.error_count.clone(),
            },
            shutdown_rx,
        )));
        self.shutdown_tx = Some(shutdown_tx);

        self.mqtt_client = Some(mqtt_client);
        self.dead_letter = Some(dead_letter);
        self.dlq_producer = dlq_producer;

        info!("Kafka to MQTT bridge started");
        Ok(())
    }

    /// Stop the pipeline: cancel the worker and wait for it, then stop the
    /// dead-letter queue and release the clients.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        info!("Stopping Kafka to MQTT bridge");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.worker_handle.take() {
            let _ = handle.await;
        }

        if let Some(dead_letter) = self.dead_letter.take() {
            dead_letter.stop().await;
        }
        if let Some(mqtt_client) = self.mqtt_client.take() {
            mqtt_client.disconnect().await;
        }
        if let Some(producer) = self.dlq_producer.take() {
            producer.close()?;
        }
        Ok(())
    }

    /// Total number of failed conversions and publishes since start
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Observe error reports as they happen
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }
}

#[derive(Clone)]
struct ErrorReporter {
    tx: broadcast::Sender<String>,
    count: Arc<AtomicU64>,
}

impl ErrorReporter {
    fn report(&self, error: String) {
        self.count.fetch_add(1, Ordering::Relaxed);
        warn!("Kafka to MQTT bridge error: {}", error);
        let _ = self.tx.send(error);
    }
}

/// Read records until cancelled, forwarding each to the broker. The
/// consumer is owned by the worker and released when it exits.
async fn run_worker(
    mut consumer: KafkaConsumer,
    mqtt_client: Arc<MqttClient>,
    dead_letter: Arc<DeadLetterQueue>,
    reporter: ErrorReporter,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    info!("Starting Kafka message consumption");

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("Kafka consumer stopping");
                break;
            }
            result = consumer.read() => match result {
                Ok(record) => {
                    if let Err(reason) =
                        handle_record(&record, &mqtt_client, &dead_letter).await
                    {
                        reporter.report(reason);
                    }
                }
                Err(e) => {
                    reporter.report(format!("error reading from Kafka: {}", e));
                }
            }
        }
    }

    consumer.close();
    info!("Kafka consumer worker stopped");
}

/// Decode one record and republish it. A `Some` error string means the
/// record failed; loop-guard skips are not errors.
async fn handle_record(
    record: &KafkaRecord,
    mqtt_client: &Arc<MqttClient>,
    dead_letter: &Arc<DeadLetterQueue>,
) -> Result<(), String> {
    let message = match envelope::decode(record) {
        Ok(message) => message,
        Err(e) => {
            let reason = format!("failed to convert Kafka message: {}", e);
            dead_letter.handle_failed(
                FailedSource::Kafka(record.clone()),
                &reason,
                Direction::KafkaToMqtt,
                &record.topic,
                "",
            );
            return Err(reason);
        }
    };

    if message.topic.is_empty() {
        let reason = "empty MQTT topic from Kafka message".to_string();
        dead_letter.handle_failed(
            FailedSource::Kafka(record.clone()),
            &reason,
            Direction::KafkaToMqtt,
            &record.topic,
            "",
        );
        return Err(reason);
    }

    if should_skip_topic(&message.topic) {
        info!("Skipping topic to prevent loop: {}", message.topic);
        return Ok(());
    }

    if let Err(e) = mqtt_client
        .publish(&message.topic, &message.payload, message.qos, message.retained)
        .await
    {
        let reason = format!("failed to publish to MQTT: {}", e);
        dead_letter.handle_failed(
            FailedSource::Kafka(record.clone()),
            &reason,
            Direction::KafkaToMqtt,
            &record.topic,
            &message.topic,
        );
        return Err(reason);
    }

    debug!("Forwarded Kafka message: {} -> {}", record.topic, message.topic);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_for_topic(mqtt_topic: &str) -> KafkaRecord {
        KafkaRecord {
            topic: "gom2k.test".to_string(),
            key: mqtt_topic.to_string(),
            value: serde_json::to_vec(&json!({
                "mqtt_topic": mqtt_topic,
                "payload": "data",
                "qos": 0,
                "retained": false,
            }))
            .unwrap(),
        }
    }

    #[test]
    fn test_loop_guard_prefixes() {
        assert!(should_skip_topic("$SYS/broker/uptime"));
        assert!(should_skip_topic("gom2k/internal/status"));
        assert!(!should_skip_topic("sensor/room/temp"));
        assert!(!should_skip_topic("gom2k-adjacent/topic"));
        assert!(!should_skip_topic("sys/lowercase"));
    }

    #[tokio::test]
    async fn test_guarded_record_is_skipped_without_error() {
        let mqtt_client = Arc::new(MqttClient::new(&crate::config::MqttConfig::default()));
        let dead_letter = Arc::new(DeadLetterQueue::new(
            &crate::config::DeadLetterConfig::default(),
            None,
            None,
        ));

        let record = record_for_topic("gom2k/internal/status");
        // Skip happens before any publish attempt, so the unconnected
        // client is never touched
        let result = handle_record(&record, &mqtt_client, &dead_letter).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_undecodable_record_goes_to_dead_letter() {
        let mqtt_client = Arc::new(MqttClient::new(&crate::config::MqttConfig::default()));
        let dead_letter = Arc::new(DeadLetterQueue::new(
            &crate::config::DeadLetterConfig {
                enabled: true,
                max_retries: 5,
                retry_interval: 30.0,
                ..Default::default()
            },
            None,
            None,
        ));

        let record = KafkaRecord {
            topic: "gom2k.test".to_string(),
            key: "k".to_string(),
            value: b"not json".to_vec(),
        };
        let result = handle_record(&record, &mqtt_client, &dead_letter).await;
        assert!(result.is_err());
        assert_eq!(dead_letter.failed_message_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_goes_to_dead_letter_with_both_topics() {
        let mqtt_client = Arc::new(MqttClient::new(&crate::config::MqttConfig::default()));
        let dead_letter = Arc::new(DeadLetterQueue::new(
            &crate::config::DeadLetterConfig {
                enabled: true,
                max_retries: 5,
                retry_interval: 30.0,
                ..Default::default()
            },
            None,
            None,
        ));

        // The client is not connected, so the publish fails
        let record = record_for_topic("sensor/room/temp");
        let result = handle_record(&record, &mqtt_client, &dead_letter).await;
        assert!(result.is_err());
        assert_eq!(dead_letter.failed_message_count(), 1);
    }
}
