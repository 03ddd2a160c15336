//! Kafka Producer
//!
//! Wraps an rdkafka `FutureProducer` with hash-of-key partitioning so
//! records for the same MQTT topic land on the same partition. When topic
//! auto-creation is enabled, a failed produce triggers a one-shot creation
//! attempt through a short-lived admin client followed by a single retry.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::RwLock;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::{BridgeConfig, KafkaConfig};

use super::{KafkaError, KafkaRecord};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);
const ADMIN_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);
/// Delay for topic metadata to propagate after a create, and before the
/// post-create produce retry.
const TOPIC_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Kafka producer with lazy topic creation.
///
/// All operations take `&self` so the producer can be shared behind an
/// `Arc` between a pipeline and the dead-letter queue, and it is safe for
/// concurrent `write` calls. The set of topics this producer has already
/// attempted to create is process-local and never persisted.
pub struct KafkaProducer {
    kafka: KafkaConfig,
    bridge: BridgeConfig,
    producer: RwLock<Option<FutureProducer>>,
    created_topics: RwLock<HashSet<String>>,
    create_lock: Mutex<()>,
}

impl KafkaProducer {
    /// Create a new producer; no connection is made until `connect`.
    pub fn new(kafka: &KafkaConfig, bridge: &BridgeConfig) -> Self {
        Self {
            kafka: kafka.clone(),
            bridge: bridge.clone(),
            producer: RwLock::new(None),
            created_topics: RwLock::new(HashSet::new()),
            create_lock: Mutex::new(()),
        }
    }

    /// Initialize the underlying producer.
    pub fn connect(&self) -> Result<(), KafkaError> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", self.kafka.bootstrap_servers());
        // Java-compatible hash partitioning keyed on the MQTT topic
        client_config.set("partitioner", "murmur2_random");
        client_config.set("message.timeout.ms", "30000");
        apply_security(&mut client_config, &self.kafka);

        let producer: FutureProducer = client_config
            .create()
            .map_err(|e| KafkaError::Connect(format!("failed to create producer: {}", e)))?;
        *self.producer.write() = Some(producer);

        info!(
            "Kafka producer initialized with brokers: {:?}",
            self.kafka.brokers
        );
        Ok(())
    }

    /// Produce a single record.
    ///
    /// On failure with auto-creation enabled, attempts the topic-creation
    /// fallback and retries exactly once after a settle delay. The most
    /// recent error is propagated.
    pub async fn write(&self, record: &KafkaRecord) -> Result<(), KafkaError> {
        let producer = self.producer()?;

        let first_err = match self.send_once(&producer, record).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        if !self.bridge.kafka.auto_create_topics {
            return Err(first_err);
        }

        self.create_topic_if_needed(&record.topic).await?;
        sleep(TOPIC_SETTLE_DELAY).await;
        self.send_once(&producer, record).await
    }

    /// Produce a batch of records. No topic-creation fallback is applied;
    /// the first failure aborts the batch.
    pub async fn write_batch(&self, records: &[KafkaRecord]) -> Result<(), KafkaError> {
        let producer = self.producer()?;
        for record in records {
            self.send_once(&producer, record).await?;
        }
        Ok(())
    }

    /// Flush outstanding deliveries and release the producer.
    pub fn close(&self) -> Result<(), KafkaError> {
        let producer = self.producer.write().take();
        if let Some(producer) = producer {
            info!("Closing Kafka producer");
            producer
                .flush(Timeout::After(FLUSH_TIMEOUT))
                .map_err(|e| KafkaError::Produce(format!("flush failed: {}", e)))?;
        }
        Ok(())
    }

    /// Whether this producer would attempt creation for the given topic
    /// (i.e. it has not been marked as created yet).
    pub fn topic_is_marked_created(&self, topic: &str) -> bool {
        self.created_topics.read().contains(topic)
    }

    fn producer(&self) -> Result<FutureProducer, KafkaError> {
        self.producer
            .read()
            .clone()
            .ok_or_else(|| KafkaError::Connect("producer not connected".to_string()))
    }

    async fn send_once(
        &self,
        producer: &FutureProducer,
        record: &KafkaRecord,
    ) -> Result<(), KafkaError> {
        let future_record = FutureRecord::to(&record.topic)
            .key(record.key.as_bytes())
            .payload(&record.value);

        producer
            .send(future_record, Timeout::After(DELIVERY_TIMEOUT))
            .await
            .map(|_| ())
            .map_err(|(err, _)| {
                KafkaError::Produce(format!("topic {}: {}", record.topic, err))
            })
    }

    /// Create a topic unless this producer has already attempted it.
    ///
    /// The topic is marked as created regardless of the broker's answer:
    /// already-exists and success both count as done, and any other create
    /// error will resurface through the subsequent produce retry.
    async fn create_topic_if_needed(&self, topic: &str) -> Result<(), KafkaError> {
        let _guard = self.create_lock.lock().await;

        if self.created_topics.read().contains(topic) {
            return Ok(());
        }

        let admin = self.create_admin_client()?;
        let new_topic = NewTopic::new(
            topic,
            self.bridge.kafka.default_partitions,
            TopicReplication::Fixed(self.bridge.kafka.replication_factor),
        );
        let options = AdminOptions::new().operation_timeout(Some(ADMIN_TIMEOUT));

        info!(
            "Creating Kafka topic: {} (partitions: {}, replication: {})",
            topic, self.bridge.kafka.default_partitions, self.bridge.kafka.replication_factor
        );

        match admin.create_topics(&[new_topic], &options).await {
            Ok(results) => {
                for result in results {
                    match result {
                        Ok(name) => info!("Created Kafka topic: {}", name),
                        Err((name, err)) => {
                            debug!("Topic creation attempted for {}: {}", name, err)
                        }
                    }
                }
            }
            Err(e) => warn!("Topic creation request for {} failed: {}", topic, e),
        }

        self.created_topics.write().insert(topic.to_string());
        sleep(TOPIC_SETTLE_DELAY).await;
        Ok(())
    }

    /// Short-lived admin client against the first configured broker.
    fn create_admin_client(&self) -> Result<AdminClient<DefaultClientContext>, KafkaError> {
        let broker = self
            .kafka
            .brokers
            .first()
            .ok_or_else(|| KafkaError::Admin("no Kafka brokers configured".to_string()))?;

        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", broker);
        apply_security(&mut client_config, &self.kafka);

        client_config
            .create()
            .map_err(|e| KafkaError::Admin(format!("failed to create admin client: {}", e)))
    }
}

impl std::fmt::Debug for KafkaProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaProducer")
            .field("brokers", &self.kafka.brokers)
            .field("security_protocol", &self.kafka.security.protocol)
            .field("auto_create_topics", &self.bridge.kafka.auto_create_topics)
            .finish()
    }
}

/// Apply the configured security protocol and keystore locations. The
/// keystore material itself is loaded by librdkafka.
pub(crate) fn apply_security(client_config: &mut ClientConfig, kafka: &KafkaConfig) {
    if !kafka.security.uses_ssl() {
        return;
    }
    client_config.set("security.protocol", "SSL");

    let ssl = &kafka.security.ssl;
    if !ssl.keystore.location.is_empty() {
        client_config.set("ssl.keystore.location", &ssl.keystore.location);
        if !ssl.keystore.password.is_empty() {
            client_config.set("ssl.keystore.password", &ssl.keystore.password);
        }
        if !ssl.keystore.key_password.is_empty() {
            client_config.set("ssl.key.password", &ssl.keystore.key_password);
        }
    }
    if !ssl.truststore.location.is_empty() {
        client_config.set("ssl.ca.location", &ssl.truststore.location);
    }
    client_config.set("ssl.endpoint.identification.algorithm", "https");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ssl_kafka_config() -> KafkaConfig {
        let yaml = r#"
brokers:
  - kafka1:9093
security:
  protocol: SSL
  ssl:
    truststore:
      location: ./certs/truststore.p12
      password: trustpass
    keystore:
      location: ./certs/keystore.p12
      password: keypass
      key_password: innerpass
"#;
        parse_kafka_config(yaml)
    }

    fn parse_kafka_config(yaml: &str) -> KafkaConfig {
        let cfg = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()
            .unwrap();
        cfg.try_deserialize().unwrap()
    }

    #[test]
    fn test_apply_security_plaintext_sets_nothing() {
        let kafka = KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            ..Default::default()
        };
        let mut client_config = ClientConfig::new();
        apply_security(&mut client_config, &kafka);
        assert!(client_config.get("security.protocol").is_none());
    }

    #[test]
    fn test_apply_security_ssl_passes_store_locations() {
        let kafka = ssl_kafka_config();
        let mut client_config = ClientConfig::new();
        apply_security(&mut client_config, &kafka);
        assert_eq!(client_config.get("security.protocol"), Some("SSL"));
        assert_eq!(
            client_config.get("ssl.keystore.location"),
            Some("./certs/keystore.p12")
        );
        assert_eq!(client_config.get("ssl.keystore.password"), Some("keypass"));
        assert_eq!(client_config.get("ssl.key.password"), Some("innerpass"));
        assert_eq!(
            client_config.get("ssl.ca.location"),
            Some("./certs/truststore.p12")
        );
    }

    #[test]
    fn test_created_topic_marker_starts_empty() {
        let kafka = KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            ..Default::default()
        };
        let producer = KafkaProducer::new(&kafka, &BridgeConfig::default());
        assert!(!producer.topic_is_marked_created("gom2k.sensor"));
    }

    #[test]
    fn test_write_requires_connect() {
        let kafka = KafkaConfig {
            brokers: vec!["localhost:9092".to_string()],
            ..Default::default()
        };
        let producer = KafkaProducer::new(&kafka, &BridgeConfig::default());
        let record = KafkaRecord {
            topic: "gom2k.test".to_string(),
            key: "test".to_string(),
            value: b"{}".to_vec(),
        };
        let err = futures_executor_block_on(producer.write(&record));
        assert!(matches!(err, Err(KafkaError::Connect(_))));
    }

    // Minimal block_on so sync tests can exercise the not-connected path
    // without a full runtime.
    fn futures_executor_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
