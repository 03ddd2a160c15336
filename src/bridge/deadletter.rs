//! Dead-Letter Queue
//!
//! Tracks messages that failed processing, retries them on a ticker along
//! their recorded direction, and emits them to the configured Kafka/MQTT
//! sinks once the retry budget is exhausted. When disabled, failures are
//! logged and discarded.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::DeadLetterConfig;
use crate::kafka::{KafkaProducer, KafkaRecord};
use crate::mqtt::{MqttClient, MqttMessage};

use super::{envelope, Direction};

/// The message that originally failed, in whichever shape it entered the
/// failing pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum FailedSource {
    Mqtt(MqttMessage),
    Kafka(KafkaRecord),
}

/// Bookkeeping for one failed message awaiting retry.
#[derive(Debug, Clone, Serialize)]
pub struct FailedMessage {
    pub original: FailedSource,
    pub reason: String,
    pub attempts: u32,
    pub first_failed_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub direction: Direction,
    pub source_topic: String,
    pub target_topic: String,
}

/// State shared between the queue handle and its retry task.
struct Inner {
    config: DeadLetterConfig,
    kafka_producer: Option<Arc<KafkaProducer>>,
    mqtt_client: Option<Arc<MqttClient>>,
    failed: Mutex<HashMap<String, FailedMessage>>,
}

/// Dead-letter queue shared by a pipeline and its retry task.
///
/// A record exists in the map exactly while its attempt count is below
/// `max_retries`; reaching the cap emits the record to the sinks and
/// removes it.
pub struct DeadLetterQueue {
    inner: Arc<Inner>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    retry_handle: Mutex<Option<JoinHandle<()>>>,
}

impl DeadLetterQueue {
    /// Create a queue. The producer and client are the sinks and retry
    /// transports; either may be absent.
    pub fn new(
        config: &DeadLetterConfig,
        kafka_producer: Option<Arc<KafkaProducer>>,
        mqtt_client: Option<Arc<MqttClient>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                kafka_producer,
                mqtt_client,
                failed: Mutex::new(HashMap::new()),
            }),
            shutdown_tx: Mutex::new(None),
            retry_handle: Mutex::new(None),
        }
    }

    /// Start the retry ticker. Does nothing when the queue is disabled.
    pub fn start(&self) {
        if !self.inner.config.enabled {
            return;
        }

        info!(
            "Starting dead letter queue with retry interval: {:?}",
            self.inner.config.retry_interval_duration()
        );

        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.shutdown_tx.lock() = Some(shutdown_tx);

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(inner.config.retry_interval_duration());
            // The first tick completes immediately; skip it so retries
            // honor the full interval.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = ticker.tick() => inner.retry_sweep().await,
                }
            }
        });
        *self.retry_handle.lock() = Some(handle);
    }

    /// Stop the retry ticker and wait for it to exit.
    pub async fn stop(&self) {
        let shutdown_tx = self.shutdown_tx.lock().take();
        let handle = self.retry_handle.lock().take();
        if shutdown_tx.is_none() && handle.is_none() {
            return;
        }

        info!("Stopping dead letter queue");
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Record a processing failure.
    ///
    /// Inserts a new entry on first failure, otherwise increments the
    /// attempt count and refreshes the reason. When the count reaches
    /// `max_retries` the record is emitted to the sinks and removed.
    pub fn handle_failed(
        &self,
        original: FailedSource,
        reason: &str,
        direction: Direction,
        source_topic: &str,
        target_topic: &str,
    ) {
        if !self.inner.config.enabled {
            warn!(
                "Message failed processing (DLQ disabled): {} -> {}: {}",
                source_topic, target_topic, reason
            );
            return;
        }

        if let Some(message) =
            self.inner
                .record_failure(original, reason, direction, source_topic, target_topic)
        {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.send_to_sinks(&message).await;
            });
        }
    }

    /// Number of messages currently awaiting retry
    pub fn failed_message_count(&self) -> usize {
        self.inner.failed.lock().len()
    }
}

impl Inner {
    /// Insert or bump the failure entry. Returns the record when the
    /// retry budget is exhausted; the caller emits it.
    fn record_failure(
        &self,
        original: FailedSource,
        reason: &str,
        direction: Direction,
        source_topic: &str,
        target_topic: &str,
    ) -> Option<FailedMessage> {
        let key = message_key(&original, direction, source_topic);
        let now = Utc::now();

        let exhausted = {
            let mut failed = self.failed.lock();
            let entry = failed.entry(key.clone()).or_insert_with(|| FailedMessage {
                original,
                reason: reason.to_string(),
                attempts: 0,
                first_failed_at: now,
                last_attempt_at: now,
                direction,
                source_topic: source_topic.to_string(),
                target_topic: target_topic.to_string(),
            });
            entry.attempts += 1;
            entry.last_attempt_at = now;
            entry.reason = reason.to_string();

            if entry.attempts >= self.config.max_retries {
                failed.remove(&key)
            } else {
                debug!(
                    "Message queued for retry (attempt {}/{}): {}",
                    entry.attempts, self.config.max_retries, reason
                );
                None
            }
        };

        if exhausted.is_some() {
            warn!(
                "Message exceeded max retries, sending to dead letter queue: {}",
                reason
            );
        }
        exhausted
    }

    /// Retry every tracked message whose last attempt is at least one
    /// retry interval old.
    async fn retry_sweep(&self) {
        let due: Vec<(String, FailedMessage)> = {
            let failed = self.failed.lock();
            let interval = self.config.retry_interval_duration();
            failed
                .iter()
                .filter(|(_, msg)| {
                    Utc::now()
                        .signed_duration_since(msg.last_attempt_at)
                        .to_std()
                        .map(|age| age >= interval)
                        .unwrap_or(false)
                })
                .map(|(k, msg)| (k.clone(), msg.clone()))
                .collect()
        };

        for (key, message) in due {
            self.retry_message(&key, message).await;
        }
    }

    async fn retry_message(&self, key: &str, message: FailedMessage) {
        debug!(
            "Retrying failed message (attempt {}): {} -> {}",
            message.attempts + 1,
            message.source_topic,
            message.target_topic
        );

        let result = match message.direction {
            Direction::MqttToKafka => self.retry_mqtt_to_kafka(&message).await,
            Direction::KafkaToMqtt => self.retry_kafka_to_mqtt(&message).await,
        };

        match result {
            Ok(()) => {
                self.failed.lock().remove(key);
                info!(
                    "Retry successful: {} -> {}",
                    message.source_topic, message.target_topic
                );
            }
            Err(reason) => {
                // The retry task is already async, so an exhausted record
                // is emitted inline rather than spawned.
                if let Some(exhausted) = self.record_failure(
                    message.original,
                    &reason,
                    message.direction,
                    &message.source_topic,
                    &message.target_topic,
                ) {
                    self.send_to_sinks(&exhausted).await;
                }
            }
        }
    }

    async fn retry_mqtt_to_kafka(&self, message: &FailedMessage) -> Result<(), String> {
        let FailedSource::Mqtt(original) = &message.original else {
            return Err("invalid message type for mqtt→kafka retry".to_string());
        };
        let producer = self
            .kafka_producer
            .as_ref()
            .ok_or_else(|| "no Kafka producer available for retry".to_string())?;

        let record = envelope::encode(original, &message.target_topic)
            .map_err(|e| format!("retry conversion failed: {}", e))?;
        producer
            .write(&record)
            .await
            .map_err(|e| format!("retry produce failed: {}", e))
    }

    async fn retry_kafka_to_mqtt(&self, message: &FailedMessage) -> Result<(), String> {
        let FailedSource::Kafka(original) = &message.original else {
            return Err("invalid message type for kafka→mqtt retry".to_string());
        };
        let client = self
            .mqtt_client
            .as_ref()
            .ok_or_else(|| "no MQTT client available for retry".to_string())?;

        let restored = envelope::decode(original)
            .map_err(|e| format!("retry conversion failed: {}", e))?;
        client
            .publish(
                &restored.topic,
                &restored.payload,
                restored.qos,
                restored.retained,
            )
            .await
            .map_err(|e| format!("retry publish failed: {}", e))
    }

    /// Serialize an exhausted record and emit it to whichever sinks are
    /// configured. Sink errors are logged, never rethrown.
    async fn send_to_sinks(&self, message: &FailedMessage) {
        let payload = match serde_json::to_vec(message) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize dead letter record: {}", e);
                return;
            }
        };

        if !self.config.kafka_topic.is_empty() {
            if let Some(producer) = &self.kafka_producer {
                let record = KafkaRecord {
                    topic: self.config.kafka_topic.clone(),
                    key: format!("dlq-{}-{}", message.direction, Utc::now().timestamp()),
                    value: payload.clone(),
                };
                match producer.write(&record).await {
                    Ok(()) => info!("Sent failed message to Kafka DLQ: {}", record.topic),
                    Err(e) => warn!("Error sending failed message to Kafka DLQ: {}", e),
                }
            }
        }

        if !self.config.mqtt_topic.is_empty() {
            if let Some(client) = &self.mqtt_client {
                match client
                    .publish(&self.config.mqtt_topic, &payload, 1, false)
                    .await
                {
                    Ok(()) => info!("Sent failed message to MQTT DLQ: {}", self.config.mqtt_topic),
                    Err(e) => warn!("Error sending failed message to MQTT DLQ: {}", e),
                }
            }
        }

        if self.config.kafka_topic.is_empty() && self.config.mqtt_topic.is_empty() {
            warn!(
                "No dead letter sink configured; dropping record for {} -> {}",
                message.source_topic, message.target_topic
            );
        }
    }
}

/// Key a failure by direction, source topic and message identity: the
/// reception timestamp for MQTT sources, the record key for Kafka sources.
fn message_key(original: &FailedSource, direction: Direction, source_topic: &str) -> String {
    match original {
        FailedSource::Mqtt(msg) => {
            format!("{}-{}-{}", direction, source_topic, msg.timestamp.timestamp())
        }
        FailedSource::Kafka(record) => format!("{}-{}-{}", direction, source_topic, record.key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_mqtt_message() -> MqttMessage {
        MqttMessage {
            topic: "test/topic".to_string(),
            payload: b"test payload".to_vec(),
            qos: 0,
            retained: false,
            timestamp: Utc::now(),
        }
    }

    fn enabled_config(max_retries: u32, retry_interval: f64) -> DeadLetterConfig {
        DeadLetterConfig {
            enabled: true,
            max_retries,
            retry_interval,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_queue_retains_nothing() {
        let dlq = DeadLetterQueue::new(&DeadLetterConfig::default(), None, None);
        dlq.handle_failed(
            FailedSource::Mqtt(test_mqtt_message()),
            "test error",
            Direction::MqttToKafka,
            "test/topic",
            "gom2k.test.topic",
        );
        assert_eq!(dlq.failed_message_count(), 0);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let dlq = DeadLetterQueue::new(&enabled_config(2, 0.1), None, None);
        dlq.start();
        dlq.stop().await;
        // A second stop is a no-op
        dlq.stop().await;
    }

    #[tokio::test]
    async fn test_handle_failed_tracks_then_exhausts() {
        let dlq = DeadLetterQueue::new(&enabled_config(2, 0.05), None, None);
        let message = test_mqtt_message();

        dlq.handle_failed(
            FailedSource::Mqtt(message.clone()),
            "test error",
            Direction::MqttToKafka,
            "test/topic",
            "gom2k.test.topic",
        );
        assert_eq!(dlq.failed_message_count(), 1);

        // Second failure reaches the cap: emitted (no sinks here) and removed
        dlq.handle_failed(
            FailedSource::Mqtt(message),
            "test error 2",
            Direction::MqttToKafka,
            "test/topic",
            "gom2k.test.topic",
        );
        assert_eq!(dlq.failed_message_count(), 0);
    }

    #[tokio::test]
    async fn test_distinct_identities_track_separately() {
        let dlq = DeadLetterQueue::new(&enabled_config(5, 30.0), None, None);
        let mut first = test_mqtt_message();
        first.timestamp = Utc::now() - chrono::Duration::seconds(10);
        let second = test_mqtt_message();

        for message in [first, second] {
            dlq.handle_failed(
                FailedSource::Mqtt(message),
                "err",
                Direction::MqttToKafka,
                "test/topic",
                "gom2k.test.topic",
            );
        }
        assert_eq!(dlq.failed_message_count(), 2);
    }

    #[tokio::test]
    async fn test_kafka_sources_key_by_record_key() {
        let dlq = DeadLetterQueue::new(&enabled_config(5, 30.0), None, None);
        let record = KafkaRecord {
            topic: "gom2k.test".to_string(),
            key: "sensor/temp".to_string(),
            value: b"{}".to_vec(),
        };

        // Same record twice collapses onto one entry
        for _ in 0..2 {
            dlq.handle_failed(
                FailedSource::Kafka(record.clone()),
                "err",
                Direction::KafkaToMqtt,
                "gom2k.test",
                "",
            );
        }
        assert_eq!(dlq.failed_message_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_without_transport_exhausts_the_record() {
        // No producer is attached, so every retry fails and the attempt
        // count climbs until the record is emitted and dropped.
        let dlq = DeadLetterQueue::new(&enabled_config(2, 0.05), None, None);
        dlq.start();

        dlq.handle_failed(
            FailedSource::Mqtt(test_mqtt_message()),
            "initial failure",
            Direction::MqttToKafka,
            "test/topic",
            "gom2k.test.topic",
        );
        assert_eq!(dlq.failed_message_count(), 1);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(dlq.failed_message_count(), 0);

        dlq.stop().await;
    }

    #[test]
    fn test_failed_message_serializes_direction_arrow() {
        let message = FailedMessage {
            original: FailedSource::Mqtt(test_mqtt_message()),
            reason: "boom".to_string(),
            attempts: 2,
            first_failed_at: Utc::now(),
            last_attempt_at: Utc::now(),
            direction: Direction::MqttToKafka,
            source_topic: "test/topic".to_string(),
            target_topic: "gom2k.test.topic".to_string(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["direction"], "mqtt→kafka");
        assert_eq!(json["attempts"], 2);
        assert_eq!(json["original"]["mqtt_topic"], "test/topic");
    }
}
