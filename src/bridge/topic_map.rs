//! Topic Mapping
//!
//! Derives a Kafka topic name from an MQTT topic: the configured prefix,
//! then up to `max_levels` MQTT levels joined with dots, bounded by the
//! Kafka topic name limit. The mapping is lossy; the envelope carries the
//! authoritative original topic.

/// Maximum length of a Kafka topic name in bytes
pub const MAX_KAFKA_TOPIC_LEN: usize = 249;

/// Map an MQTT topic to a Kafka topic name.
///
/// Empty levels are preserved: leading, trailing and repeated `/` each
/// contribute an empty inter-dot region, and each counts against
/// `max_levels`. Lengths are measured in bytes; non-ASCII content passes
/// through unchanged.
pub fn map_topic(mqtt_topic: &str, prefix: &str, max_levels: usize) -> String {
    if mqtt_topic.is_empty() {
        return prefix.to_string();
    }

    let mut kafka_topic = String::with_capacity(prefix.len() + mqtt_topic.len() + 8);
    kafka_topic.push_str(prefix);
    for level in mqtt_topic.split('/').take(max_levels) {
        kafka_topic.push('.');
        kafka_topic.push_str(level);
    }

    if kafka_topic.len() > MAX_KAFKA_TOPIC_LEN {
        let mut cut = MAX_KAFKA_TOPIC_LEN;
        while !kafka_topic.is_char_boundary(cut) {
            cut -= 1;
        }
        kafka_topic.truncate(cut);
        if kafka_topic.ends_with('.') {
            kafka_topic.pop();
        }
    }

    kafka_topic
}
