//! gom2k - Bidirectional MQTT ↔ Kafka bridge
//!
//! Usage:
//!   gom2k [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>    Configuration file path (YAML)
//!   -l, --log-level        Log level (error, warn, info, debug, trace)
//!   --test-mqtt            Connect, subscribe and print a few publications
//!   --test-kafka           Connect and produce a single test record
//!   --test-topics          Produce to a fresh topic, exercising auto-creation
//!   -h, --help             Print help
//!   -V, --version          Print version
//!
//! Without a test flag the bridge runs until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use clap::{Parser, ValueEnum};
use tokio::time::sleep;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use gom2k::bridge::BidirectionalBridge;
use gom2k::config::{self, Config};
use gom2k::kafka::{KafkaProducer, KafkaRecord};
use gom2k::mqtt::{MqttClient, MqttMessage};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// gom2k - Bidirectional MQTT-Kafka bridge
#[derive(Parser, Debug)]
#[command(name = "gom2k")]
#[command(version = "0.1.0")]
#[command(about = "Bidirectional MQTT-Kafka bridge")]
struct Args {
    /// Configuration file path (YAML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,

    /// Test MQTT connectivity: subscribe and print up to 3 publications
    #[arg(long)]
    test_mqtt: bool,

    /// Test Kafka connectivity: produce a single record to gom2k.test
    #[arg(long)]
    test_kafka: bool,

    /// Test topic auto-creation: produce to gom2k.test.autocreate
    #[arg(long)]
    test_topics: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::config_path);

    let test_mode = args.test_mqtt || args.test_kafka || args.test_topics;
    let load_result = if test_mode {
        Config::load_for_testing(&config_path)
    } else {
        Config::load(&config_path)
    };
    let config = match load_result {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration from {:?}: {}", config_path, e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides the default (info)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.bridge.logging.level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
        std::process::exit(1);
    }

    info!("Loaded configuration from {:?}", config_path);

    let result = if args.test_mqtt {
        test_mqtt_connectivity(&config).await
    } else if args.test_kafka {
        test_kafka_connectivity(&config).await
    } else if args.test_topics {
        test_topic_creation(&config).await
    } else {
        run_bridge(&config).await
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Run the bridge until SIGINT or SIGTERM.
async fn run_bridge(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "MQTT: {}:{}, Kafka: {:?}",
        config.mqtt.broker.host, config.mqtt.broker.port, config.kafka.brokers
    );
    info!(
        "Bridge features: MQTT→Kafka={}, Kafka→MQTT={}",
        config.bridge.features.mqtt_to_kafka, config.bridge.features.kafka_to_mqtt
    );
    info!(
        "Topic mapping: prefix='{}', max levels={}",
        config.bridge.mapping.kafka_prefix, config.bridge.mapping.max_topic_levels
    );

    let mut bridge = BidirectionalBridge::new(config);
    bridge.start().await?;
    info!("Bridge started successfully");

    wait_for_shutdown_signal().await;
    info!("Received shutdown signal");

    bridge.stop().await?;
    info!("Bridge stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Connect, subscribe and print up to 3 received publications, with a
/// 30 second overall timeout.
async fn test_mqtt_connectivity(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    const MAX_MESSAGES: usize = 3;

    info!("Testing MQTT connectivity");
    info!(
        "MQTT config: host={}, port={}, TLS={}, auth={}",
        config.mqtt.broker.host,
        config.mqtt.broker.port,
        config.mqtt.broker.use_tls,
        config.mqtt.auth.username
    );

    let message_count = Arc::new(AtomicUsize::new(0));
    let client = MqttClient::new(&config.mqtt);

    let counter = message_count.clone();
    client.set_message_callback(Arc::new(move |msg: MqttMessage| {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        println!("Message {}:", n);
        println!("  Topic: {}", msg.topic);
        println!("  Payload: {}", String::from_utf8_lossy(&msg.payload));
        println!("  QoS: {}, Retained: {}", msg.qos, msg.retained);
        println!(
            "  Timestamp: {}",
            msg.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        println!("---");
    }));

    client.connect().await?;
    client.subscribe().await?;
    info!(
        "Connected. Waiting for {} messages (30 second timeout)",
        MAX_MESSAGES
    );

    let wait = async {
        while message_count.load(Ordering::SeqCst) < MAX_MESSAGES {
            sleep(Duration::from_secs(1)).await;
        }
    };
    match tokio::time::timeout(Duration::from_secs(30), wait).await {
        Ok(()) => info!("Received {} messages, disconnecting", MAX_MESSAGES),
        Err(_) => info!(
            "Timeout reached after {} message(s)",
            message_count.load(Ordering::SeqCst)
        ),
    }

    client.disconnect().await;
    Ok(())
}

/// Connect and produce a single record to `gom2k.test`.
async fn test_kafka_connectivity(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Testing Kafka connectivity");
    info!("Kafka brokers: {:?}", config.kafka.brokers);
    info!("Security protocol: {}", config.kafka.security.protocol);

    let producer = KafkaProducer::new(&config.kafka, &config.bridge);
    producer.connect()?;
    info!("Kafka producer created");

    let record = KafkaRecord {
        topic: "gom2k.test".to_string(),
        key: "test-key".to_string(),
        value: format!(
            r#"{{"test": "message", "timestamp": "{}"}}"#,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .into_bytes(),
    };

    info!("Sending test message to topic: {}", record.topic);
    producer.write(&record).await?;

    info!("Successfully sent test message to Kafka");
    info!("Message: key={}, topic={}", record.key, record.topic);
    producer.close()?;
    Ok(())
}

/// Produce to a topic that does not exist yet, with auto-creation forced
/// on, exercising the create fallback.
async fn test_topic_creation(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    info!("Testing auto-topic creation");

    let mut bridge_config = config.bridge.clone();
    bridge_config.kafka.auto_create_topics = true;
    bridge_config.kafka.default_partitions = 3;
    bridge_config.kafka.replication_factor = 1;

    let producer = KafkaProducer::new(&config.kafka, &bridge_config);
    producer.connect()?;

    let record = KafkaRecord {
        topic: "gom2k.test.autocreate".to_string(),
        key: "test-key".to_string(),
        value: format!(
            r#"{{"test": "auto-topic-creation", "timestamp": "{}"}}"#,
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
        )
        .into_bytes(),
    };

    info!("Sending test message to new topic: {}", record.topic);
    producer.write(&record).await?;

    info!("Successfully sent message with auto-topic creation");
    info!(
        "Topic {} should now exist with {} partitions",
        record.topic, bridge_config.kafka.default_partitions
    );
    producer.close()?;
    Ok(())
}
