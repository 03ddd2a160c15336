//! MQTT → Kafka Pipeline
//!
//! Subscribes to the configured MQTT filters and forwards each received
//! publication to Kafka: map the topic, encode the envelope, produce.
//! Failures are handed to the dead-letter queue and reported on a bounded
//! error channel drained by a monitor task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::kafka::KafkaProducer;
use crate::mqtt::{MessageCallback, MqttClient, MqttMessage};

use super::deadletter::{DeadLetterQueue, FailedSource};
use super::{envelope, topic_map, BridgeError, Direction, ERROR_CHANNEL_CAPACITY};

/// Cumulative error count past which the monitor starts warning
const HIGH_ERROR_THRESHOLD: u64 = 100;

/// Reports pipeline errors without ever blocking the delivery path.
///
/// The channel keeps the most recent `ERROR_CHANNEL_CAPACITY` reports;
/// when the monitor falls behind, the oldest reports are dropped and the
/// drop is logged.
#[derive(Clone)]
struct ErrorReporter {
    tx: broadcast::Sender<String>,
    count: Arc<AtomicU64>,
}

impl ErrorReporter {
    fn report(&self, error: String) {
        let n = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        warn!("Bridge error #{}: {}", n, error);
        let _ = self.tx.send(error);
    }
}

/// The MQTT → Kafka direction of the bridge.
pub struct MqttToKafkaBridge {
    config: Config,
    mqtt_client: Option<Arc<MqttClient>>,
    producer: Option<Arc<KafkaProducer>>,
    dead_letter: Option<Arc<DeadLetterQueue>>,
    error_tx: broadcast::Sender<String>,
    error_count: Arc<AtomicU64>,
    monitor_shutdown: Option<watch::Sender<bool>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl MqttToKafkaBridge {
    pub fn new(config: &Config) -> Self {
        let (error_tx, _) = broadcast::channel(ERROR_CHANNEL_CAPACITY);
        Self {
            config: config.clone(),
            mqtt_client: None,
            producer: None,
            dead_letter: None,
            error_tx,
            error_count: Arc::new(AtomicU64::new(0)),
            monitor_shutdown: None,
            monitor_handle: None,
        }
    }

    /// Connect the clients, install the forwarding callback and subscribe.
    pub async fn start(&mut self) -> Result<(), BridgeError> {
        let mqtt_client = Arc::new(MqttClient::new(&self.config.mqtt));

        let producer = Arc::new(KafkaProducer::new(&self.config.kafka, &self.config.bridge));
        producer.connect()?;

        let dead_letter = Arc::new(DeadLetterQueue::new(
            &self.config.bridge.dead_letter,
            Some(producer.clone()),
            Some(mqtt_client.clone()),
        ));
        dead_letter.start();

        mqtt_client.set_message_callback(self.make_callback(&producer, &dead_letter));
        mqtt_client.connect().await?;
        mqtt_client.subscribe().await?;

        let (monitor_shutdown, shutdown_rx) = watch::channel(false);
        self.monitor_handle = Some(tokio::spawn(monitor_errors(
            self.error_tx.subscribe(),
            self.error_count.clone(),
            shutdown_rx,
        )));
        self.monitor_shutdown = Some(monitor_shutdown);

        self.mqtt_client = Some(mqtt_client);
        self.producer = Some(producer);
        self.dead_letter = Some(dead_letter);

        info!("MQTT to Kafka bridge started");
        Ok(())
    }

    /// Stop the pipeline: dead-letter queue first, then the MQTT client,
    /// then the producer.
    pub async fn stop(&mut self) -> Result<(), BridgeError> {
        info!("Stopping MQTT to Kafka bridge");

        if let Some(dead_letter) = self.dead_letter.take() {
            dead_letter.stop().await;
        }
        if let Some(mqtt_client) = self.mqtt_client.take() {
            mqtt_client.disconnect().await;
        }

        if let Some(tx) = self.monitor_shutdown.take() {
            let _ = tx.send(true);
        }
        if let Some(handle) = self.monitor_handle.take() {
            let _ = handle.await;
        }

        if let Some(producer) = self.producer.take() {
            producer.close()?;
        }
        Ok(())
    }

    /// Total number of failed forwards since start
    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    /// Observe error reports as they happen
    pub fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    /// Build the per-publication callback. The callback runs on the MQTT
    /// delivery task, so the actual forwarding is spawned off it.
    fn make_callback(
        &self,
        producer: &Arc<KafkaProducer>,
        dead_letter: &Arc<DeadLetterQueue>,
    ) -> MessageCallback {
        let prefix = self.config.bridge.mapping.kafka_prefix.clone();
        let max_levels = self.config.bridge.mapping.max_topic_levels;
        let producer = producer.clone();
        let dead_letter = dead_letter.clone();
        let reporter = ErrorReporter {
            tx: self.error_tx.clone(),
            count: self.error_count.clone(),
        };

        Arc::new(move |message: MqttMessage| {
            let prefix = prefix.clone();
            let producer = producer.clone();
            let dead_letter = dead_letter.clone();
            let reporter = reporter.clone();
            tokio::spawn(async move {
                forward_message(message, &prefix, max_levels, &producer, &dead_letter, &reporter)
                    .await;
            });
        })
    }
}

async fn forward_message(
    message: MqttMessage,
    prefix: &str,
    max_levels: usize,
    producer: &Arc<KafkaProducer>,
    dead_letter: &Arc<DeadLetterQueue>,
    reporter: &ErrorReporter,
) {
    let kafka_topic = topic_map::map_topic(&message.topic, prefix, max_levels);

    let record = match envelope::encode(&message, &kafka_topic) {
        Ok(record) => record,
        Err(e) => {
            let reason = format!(
                "failed to convert MQTT message from topic {}: {}",
                message.topic, e
            );
            reporter.report(reason.clone());
            let source_topic = message.topic.clone();
            dead_letter.handle_failed(
                FailedSource::Mqtt(message),
                &reason,
                Direction::MqttToKafka,
                &source_topic,
                &kafka_topic,
            );
            return;
        }
    };

    if let Err(e) = producer.write(&record).await {
        let reason = format!("failed to send message to Kafka topic {}: {}", kafka_topic, e);
        reporter.report(reason.clone());
        let source_topic = message.topic.clone();
        dead_letter.handle_failed(
            FailedSource::Mqtt(message),
            &reason,
            Direction::MqttToKafka,
            &source_topic,
            &kafka_topic,
        );
        return;
    }

    debug!("Forwarded MQTT message: {} -> {}", message.topic, kafka_topic);
}

/// Drain the error channel for observability. Dropped reports surface as
/// lag notices; a high cumulative count produces a standing warning.
async fn monitor_errors(
    mut rx: broadcast::Receiver<String>,
    count: Arc<AtomicU64>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            result = rx.recv() => match result {
                Ok(error) => {
                    debug!("Error monitoring: {}", error);
                    let total = count.load(Ordering::Relaxed);
                    if total > HIGH_ERROR_THRESHOLD {
                        warn!(
                            "High error count ({}), consider investigating",
                            total
                        );
                    }
                }
                Err(broadcast::error::RecvError::Lagged(dropped)) => {
                    warn!("Error channel full, dropped {} report(s)", dropped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }
}
