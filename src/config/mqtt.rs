//! MQTT Configuration
//!
//! Connection, authentication, client and subscription settings for the
//! MQTT side of the bridge.

use serde::Deserialize;

/// MQTT broker connection settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MqttBrokerConfig {
    /// Broker hostname
    pub host: String,
    /// Broker port
    pub port: u16,
    /// Connect over TLS instead of plain TCP
    pub use_tls: bool,
    /// Trust the operating system certificate store when TLS is enabled
    pub use_os_certs: bool,
}

/// MQTT authentication settings. Authentication is applied when the
/// username is non-empty.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MqttAuthConfig {
    pub username: String,
    pub password: String,
}

/// MQTT client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttClientConfig {
    /// Client identifier. A `{random}` token expands to a four-digit
    /// decimal suffix at connect time.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// QoS level used for subscriptions (0, 1 or 2)
    #[serde(default)]
    pub qos: u8,
}

fn default_client_id() -> String {
    "gom2k-bridge-{random}".to_string()
}

impl Default for MqttClientConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            qos: 0,
        }
    }
}

/// MQTT topic subscription settings
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MqttTopicsConfig {
    /// Topic filters to subscribe to
    pub subscribe: Vec<String>,
    /// Drop publications that do not carry the retain flag
    pub retain_only: bool,
}

/// Complete MQTT-side configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct MqttConfig {
    pub broker: MqttBrokerConfig,
    pub auth: MqttAuthConfig,
    pub client: MqttClientConfig,
    pub topics: MqttTopicsConfig,
}
