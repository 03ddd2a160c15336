//! Envelope Codec
//!
//! An MQTT publication crosses Kafka as a JSON envelope carrying the
//! payload, timestamp, QoS, retain flag and the authoritative original
//! topic. The Kafka record key is the MQTT topic (used for partitioning)
//! but is never consulted when decoding: a record without a usable
//! `mqtt_topic` field fails conversion.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::kafka::KafkaRecord;
use crate::mqtt::MqttMessage;

use super::BridgeError;

/// Encode an MQTT publication into a Kafka record bound for `kafka_topic`.
///
/// The payload is rendered as UTF-8; invalid sequences are replaced, since
/// a JSON string field cannot carry arbitrary bytes.
pub fn encode(message: &MqttMessage, kafka_topic: &str) -> Result<KafkaRecord, BridgeError> {
    let envelope = json!({
        "payload": String::from_utf8_lossy(&message.payload),
        "timestamp": message.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "qos": message.qos,
        "retained": message.retained,
        "mqtt_topic": message.topic,
    });

    let value = serde_json::to_vec(&envelope)
        .map_err(|e| BridgeError::Conversion(format!("failed to serialize envelope: {}", e)))?;

    Ok(KafkaRecord {
        topic: kafka_topic.to_string(),
        key: message.topic.clone(),
        value,
    })
}

/// Decode a Kafka record back into the MQTT publication it carries.
///
/// Decoding is tolerant: `qos` may arrive as an integer or a float and is
/// confined to 0–2, `retained` defaults to false and a missing or
/// unparseable `timestamp` defaults to the current instant. `mqtt_topic`
/// and `payload` are required.
pub fn decode(record: &KafkaRecord) -> Result<MqttMessage, BridgeError> {
    let envelope: Value = serde_json::from_slice(&record.value)
        .map_err(|e| BridgeError::Conversion(format!("failed to parse envelope: {}", e)))?;
    let fields = envelope
        .as_object()
        .ok_or_else(|| BridgeError::Conversion("envelope is not a JSON object".to_string()))?;

    let topic = fields
        .get("mqtt_topic")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if topic.is_empty() {
        return Err(BridgeError::Conversion(
            "missing mqtt_topic in envelope".to_string(),
        ));
    }

    let payload = fields
        .get("payload")
        .and_then(Value::as_str)
        .ok_or_else(|| BridgeError::Conversion("invalid payload in envelope".to_string()))?;

    let qos = fields
        .get("qos")
        .and_then(Value::as_f64)
        .map(|q| (q.max(0.0) as u8).min(2))
        .unwrap_or(0);

    let retained = fields
        .get("retained")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let timestamp = fields
        .get("timestamp")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);

    Ok(MqttMessage {
        topic: topic.to_string(),
        payload: payload.as_bytes().to_vec(),
        qos,
        retained,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_message() -> MqttMessage {
        MqttMessage {
            topic: "sensor/room/temp".to_string(),
            payload: b"23.5".to_vec(),
            qos: 0,
            retained: false,
            timestamp: Utc::now(),
        }
    }

    fn record_with_envelope(envelope: Value, key: &str) -> KafkaRecord {
        KafkaRecord {
            topic: "gom2k.sensor.room".to_string(),
            key: key.to_string(),
            value: serde_json::to_vec(&envelope).unwrap(),
        }
    }

    #[test]
    fn test_encode_structure() {
        let record = encode(&sample_message(), "gom2k.sensor.room.temp").unwrap();
        assert_eq!(record.topic, "gom2k.sensor.room.temp");
        assert_eq!(record.key, "sensor/room/temp");

        let envelope: Value = serde_json::from_slice(&record.value).unwrap();
        assert_eq!(envelope["mqtt_topic"], "sensor/room/temp");
        assert_eq!(envelope["payload"], "23.5");
        assert_eq!(envelope["qos"], 0);
        assert_eq!(envelope["retained"], false);
        assert!(envelope["timestamp"].is_string());
    }

    #[test]
    fn test_round_trip_preserves_message() {
        let mut original = sample_message();
        original.qos = 1;
        original.retained = true;

        let record = encode(&original, "gom2k.sensor.room").unwrap();
        let restored = decode(&record).unwrap();

        assert_eq!(restored.topic, original.topic);
        assert_eq!(restored.payload, original.payload);
        assert_eq!(restored.qos, original.qos);
        assert_eq!(restored.retained, original.retained);
        // Timestamps survive at microsecond resolution
        assert_eq!(
            restored.timestamp.timestamp_micros(),
            original.timestamp.timestamp_micros()
        );
    }

    #[test]
    fn test_decode_requires_mqtt_topic() {
        let record = record_with_envelope(
            json!({"payload": "test-data", "qos": 0, "retained": false}),
            "test/topic",
        );
        let err = decode(&record).unwrap_err();
        assert!(err.to_string().contains("missing mqtt_topic"));
    }

    #[test]
    fn test_decode_rejects_empty_mqtt_topic() {
        let record = record_with_envelope(
            json!({"mqtt_topic": "", "payload": "test-data"}),
            "test/topic",
        );
        assert!(decode(&record).is_err());
    }

    #[test]
    fn test_decode_never_falls_back_to_the_kafka_key() {
        // A well-formed key must not mask a missing topic field
        let record = record_with_envelope(json!({"payload": "test-data"}), "sensors/room1/temp");
        assert!(decode(&record).is_err());
    }

    #[test]
    fn test_decode_reconstructs_full_topic_from_truncated_record() {
        let original_topic = "azeroth/eastern-kingdoms/stormwind/elwynn-forest/deadmines/\
                              instance-42/van-cleef-hideout/defias-brotherhood/edwin-vancleef/\
                              loot-table/rare-drops/cruel-barb/stats/damage/min-max/enchantments/\
                              current";
        let record = KafkaRecord {
            // Kafka-side topic was truncated by the mapper
            topic: "gom2k.azeroth.eastern-kingdoms.stormwind".to_string(),
            key: "wrong-key".to_string(),
            value: serde_json::to_vec(&json!({
                "mqtt_topic": original_topic,
                "payload": "42",
                "qos": 0,
                "retained": false,
            }))
            .unwrap(),
        };
        let restored = decode(&record).unwrap();
        assert_eq!(restored.topic, original_topic);
    }

    #[test]
    fn test_decode_accepts_integer_and_float_qos() {
        let int_record =
            record_with_envelope(json!({"mqtt_topic": "t", "payload": "p", "qos": 2}), "t");
        assert_eq!(decode(&int_record).unwrap().qos, 2);

        let float_record =
            record_with_envelope(json!({"mqtt_topic": "t", "payload": "p", "qos": 1.0}), "t");
        assert_eq!(decode(&float_record).unwrap().qos, 1);
    }

    #[test]
    fn test_decode_confines_qos() {
        let record =
            record_with_envelope(json!({"mqtt_topic": "t", "payload": "p", "qos": 9}), "t");
        assert_eq!(decode(&record).unwrap().qos, 2);
    }

    #[test]
    fn test_decode_defaults() {
        let record = record_with_envelope(json!({"mqtt_topic": "t", "payload": "p"}), "t");
        let message = decode(&record).unwrap();
        assert_eq!(message.qos, 0);
        assert!(!message.retained);
        // Timestamp defaulted to roughly now
        let age = Utc::now()
            .signed_duration_since(message.timestamp)
            .num_seconds();
        assert!(age >= 0 && age < 5);
    }

    #[test]
    fn test_decode_ignores_unparseable_timestamp() {
        let record = record_with_envelope(
            json!({"mqtt_topic": "t", "payload": "p", "timestamp": "not-a-time"}),
            "t",
        );
        assert!(decode(&record).is_ok());
    }

    #[test]
    fn test_decode_rejects_non_string_payload() {
        let record =
            record_with_envelope(json!({"mqtt_topic": "t", "payload": 42}), "t");
        let err = decode(&record).unwrap_err();
        assert!(err.to_string().contains("invalid payload"));
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        let record = KafkaRecord {
            topic: "gom2k.test".to_string(),
            key: "t".to_string(),
            value: b"not json".to_vec(),
        };
        assert!(decode(&record).is_err());
    }

    #[test]
    fn test_encode_replaces_invalid_utf8() {
        let mut message = sample_message();
        message.payload = vec![0xff, 0xfe, b'o', b'k'];
        let record = encode(&message, "gom2k.sensor").unwrap();
        let envelope: Value = serde_json::from_slice(&record.value).unwrap();
        let payload = envelope["payload"].as_str().unwrap();
        assert!(payload.ends_with("ok"));
        assert!(payload.contains('\u{fffd}'));
    }
}
