//! Config module tests

use super::*;

fn minimal_yaml() -> &'static str {
    r#"
mqtt:
  broker:
    host: localhost
    port: 1883
kafka:
  brokers:
    - localhost:9092
bridge:
  features:
    mqtt_to_kafka: true
"#
}

#[test]
fn test_substitute_env_vars_simple() {
    std::env::set_var("GOM2K_TEST_VAR_SIMPLE", "hello");
    let result = substitute_env_vars("host: ${GOM2K_TEST_VAR_SIMPLE}");
    assert_eq!(result, "host: hello");
    std::env::remove_var("GOM2K_TEST_VAR_SIMPLE");
}

#[test]
fn test_substitute_env_vars_with_default() {
    std::env::remove_var("GOM2K_TEST_VAR_UNSET");
    let result = substitute_env_vars("host: ${GOM2K_TEST_VAR_UNSET:-fallback}");
    assert_eq!(result, "host: fallback");

    std::env::set_var("GOM2K_TEST_VAR_SET", "env_value");
    let result = substitute_env_vars("host: ${GOM2K_TEST_VAR_SET:-fallback}");
    assert_eq!(result, "host: env_value");
    std::env::remove_var("GOM2K_TEST_VAR_SET");
}

#[test]
fn test_substitute_env_vars_missing_no_default() {
    std::env::remove_var("GOM2K_TEST_VAR_MISSING");
    let result = substitute_env_vars("host: ${GOM2K_TEST_VAR_MISSING}");
    assert_eq!(result, "host: ");
}

#[test]
fn test_parse_minimal_config() {
    let config = Config::parse(minimal_yaml()).unwrap();
    assert_eq!(config.mqtt.broker.host, "localhost");
    assert_eq!(config.mqtt.broker.port, 1883);
    assert_eq!(config.kafka.brokers, vec!["localhost:9092".to_string()]);
    assert!(config.bridge.features.mqtt_to_kafka);
    assert!(!config.bridge.features.kafka_to_mqtt);
}

#[test]
fn test_parse_applies_defaults() {
    let config = Config::parse(minimal_yaml()).unwrap();
    assert_eq!(config.bridge.mapping.kafka_prefix, "gom2k");
    assert_eq!(config.bridge.mapping.max_topic_levels, 3);
    assert_eq!(config.bridge.kafka.default_partitions, 3);
    assert_eq!(config.bridge.kafka.replication_factor, 1);
    assert_eq!(config.kafka.consumer.group_id, "gom2k-bridge");
    assert_eq!(config.bridge.logging.level, "info");
    assert!(!config.bridge.dead_letter.enabled);
}

#[test]
fn test_parse_full_config() {
    let yaml = r#"
mqtt:
  broker:
    host: broker.example.com
    port: 8883
    use_tls: true
    use_os_certs: true
  auth:
    username: bridge
    password: secret
  client:
    client_id: "gom2k-{random}"
    qos: 1
  topics:
    subscribe:
      - "sensors/#"
      - "home/+/status"
    retain_only: true
kafka:
  brokers:
    - kafka1:9092
    - kafka2:9092
  security:
    protocol: SSL
    ssl:
      truststore:
        location: ./certs/truststore.p12
        password: trustpass
      keystore:
        location: ./certs/keystore.p12
        password: keypass
  consumer:
    group_id: gom2k-1
bridge:
  mapping:
    kafka_prefix: edge
    max_topic_levels: 5
  features:
    mqtt_to_kafka: true
    kafka_to_mqtt: true
  kafka:
    auto_create_topics: true
    default_partitions: 6
    replication_factor: 2
  dead_letter:
    enabled: true
    kafka_topic: edge.dlq
    mqtt_topic: edge/dlq
    max_retries: 5
    retry_interval: 10
  retry:
    connection_timeout: 15
  logging:
    level: debug
"#;
    let config = Config::parse(yaml).unwrap();
    assert!(config.mqtt.broker.use_tls);
    assert_eq!(config.mqtt.auth.username, "bridge");
    assert_eq!(config.mqtt.client.qos, 1);
    assert_eq!(config.mqtt.topics.subscribe.len(), 2);
    assert!(config.mqtt.topics.retain_only);
    assert!(config.kafka.security.uses_ssl());
    assert_eq!(config.kafka.consumer.group_id, "gom2k-1");
    assert_eq!(config.bridge.mapping.kafka_prefix, "edge");
    assert_eq!(config.bridge.mapping.max_topic_levels, 5);
    assert!(config.bridge.kafka.auto_create_topics);
    assert_eq!(config.bridge.kafka.default_partitions, 6);
    assert!(config.bridge.dead_letter.enabled);
    assert_eq!(config.bridge.dead_letter.max_retries, 5);
    assert_eq!(config.bridge.retry.connection_timeout, 15);
    assert_eq!(config.bridge.logging.level, "debug");
}

#[test]
fn test_validation_requires_mqtt_host() {
    let yaml = r#"
mqtt:
  broker:
    port: 1883
kafka:
  brokers:
    - localhost:9092
bridge:
  features:
    mqtt_to_kafka: true
"#;
    let err = Config::parse(yaml).unwrap_err();
    assert!(matches!(err, ConfigError::Validation(_)));
    assert!(err.to_string().contains("host"));
}

#[test]
fn test_validation_requires_kafka_brokers() {
    let yaml = r#"
mqtt:
  broker:
    host: localhost
    port: 1883
bridge:
  features:
    mqtt_to_kafka: true
"#;
    let err = Config::parse(yaml).unwrap_err();
    assert!(err.to_string().contains("Kafka broker"));
}

#[test]
fn test_validation_rejects_bad_broker_address() {
    let yaml = r#"
mqtt:
  broker:
    host: localhost
    port: 1883
kafka:
  brokers:
    - not-an-address
bridge:
  features:
    mqtt_to_kafka: true
"#;
    let err = Config::parse(yaml).unwrap_err();
    assert!(err.to_string().contains("host:port"));
}

#[test]
fn test_validation_requires_one_direction() {
    let yaml = r#"
mqtt:
  broker:
    host: localhost
    port: 1883
kafka:
  brokers:
    - localhost:9092
"#;
    let err = Config::parse(yaml).unwrap_err();
    assert!(err
        .to_string()
        .contains("at least one bridge direction must be enabled"));
}

#[test]
fn test_validation_rejects_qos_out_of_range() {
    let yaml = r#"
mqtt:
  broker:
    host: localhost
    port: 1883
  client:
    qos: 3
kafka:
  brokers:
    - localhost:9092
bridge:
  features:
    mqtt_to_kafka: true
"#;
    let err = Config::parse(yaml).unwrap_err();
    assert!(err.to_string().contains("QoS"));
}

#[test]
fn test_ssl_path_allowlist() {
    assert!(validate_ssl_path("./certs/keystore.p12").is_ok());
    assert!(validate_ssl_path("/etc/ssl/kafka/keystore.p12").is_ok());
    assert!(validate_ssl_path("/tmp/keystore.p12").is_err());
    assert!(validate_ssl_path("./certs/../secrets/keystore.p12").is_err());
}

#[test]
fn test_load_config_with_env_substitution() {
    let temp_dir = std::env::temp_dir();
    let config_path = temp_dir.join("gom2k_test_config.yaml");

    std::env::set_var("GOM2K_TEST_MQTT_HOST", "10.0.0.5");

    let content = r#"
mqtt:
  broker:
    host: ${GOM2K_TEST_MQTT_HOST}
    port: ${GOM2K_TEST_MQTT_PORT:-1883}
kafka:
  brokers:
    - localhost:9092
bridge:
  features:
    kafka_to_mqtt: true
"#;
    std::fs::write(&config_path, content).unwrap();

    let config = Config::load(&config_path).unwrap();
    assert_eq!(config.mqtt.broker.host, "10.0.0.5");
    assert_eq!(config.mqtt.broker.port, 1883);

    std::fs::remove_file(&config_path).ok();
    std::env::remove_var("GOM2K_TEST_MQTT_HOST");
}

#[test]
fn test_load_missing_file_is_an_error() {
    let err = Config::load("/nonexistent/gom2k/config.yaml").unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
fn test_config_path_resolution() {
    std::env::remove_var("CONFIG_FILE");
    std::env::remove_var("CONFIGS_DIR");
    assert_eq!(config_path(), PathBuf::from("./configs/config.yaml"));

    std::env::set_var("CONFIGS_DIR", "/opt/gom2k");
    assert_eq!(config_path(), PathBuf::from("/opt/gom2k/config.yaml"));

    std::env::set_var("CONFIG_FILE", "/etc/gom2k.yaml");
    assert_eq!(config_path(), PathBuf::from("/etc/gom2k.yaml"));

    std::env::remove_var("CONFIG_FILE");
    std::env::remove_var("CONFIGS_DIR");
}
