//! MQTT Client Wrapper
//!
//! Owns a rumqttc `AsyncClient` and drives its event loop from a spawned
//! task. Incoming publications are handed to a single installed callback;
//! the callback runs on the event-loop task and must not block it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::config::MqttConfig;

use super::{MqttError, MqttMessage};

/// Callback invoked for every received publication
pub type MessageCallback = Arc<dyn Fn(MqttMessage) + Send + Sync>;

const KEEP_ALIVE: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const INITIAL_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);
const MAX_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
const DISCONNECT_DRAIN: Duration = Duration::from_millis(250);

/// MQTT client for bridge use.
///
/// All operations take `&self` so the client can be shared behind an `Arc`
/// between a pipeline and the dead-letter queue. Subscriptions are restored
/// automatically after a reconnect once `subscribe` has been called.
pub struct MqttClient {
    config: MqttConfig,
    client: RwLock<Option<AsyncClient>>,
    callback: RwLock<Option<MessageCallback>>,
    connected: Arc<AtomicBool>,
    subscribed: Arc<AtomicBool>,
    last_error: Arc<RwLock<Option<String>>>,
    shutdown_tx: Mutex<Option<watch::Sender<bool>>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttClient {
    /// Create a new client; no connection is made until `connect`.
    pub fn new(config: &MqttConfig) -> Self {
        Self {
            config: config.clone(),
            client: RwLock::new(None),
            callback: RwLock::new(None),
            connected: Arc::new(AtomicBool::new(false)),
            subscribed: Arc::new(AtomicBool::new(false)),
            last_error: Arc::new(RwLock::new(None)),
            shutdown_tx: Mutex::new(None),
            event_loop_handle: Mutex::new(None),
        }
    }

    /// Install the callback for incoming publications. Must be called
    /// before `connect` for the callback to see any messages.
    pub fn set_message_callback(&self, callback: MessageCallback) {
        *self.callback.write() = Some(callback);
    }

    /// Connect to the broker and wait for the session to be established.
    pub async fn connect(&self) -> Result<(), MqttError> {
        let client_id = expand_client_id(&self.config.client.client_id);
        let host = self.config.broker.host.clone();
        let port = self.config.broker.port;

        let mut options = MqttOptions::new(client_id, host.clone(), port);
        options.set_keep_alive(KEEP_ALIVE);
        if !self.config.auth.username.is_empty() {
            options.set_credentials(
                self.config.auth.username.clone(),
                self.config.auth.password.clone(),
            );
        }
        if self.config.broker.use_tls {
            // The default TLS configuration verifies against the OS trust
            // store, covering both use_os_certs settings.
            options.set_transport(Transport::tls_with_default_config());
        }

        let (client, event_loop) = AsyncClient::new(options, 64);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (connect_tx, mut connect_rx) = watch::channel(false);

        let handle = tokio::spawn(run_event_loop(EventLoopContext {
            event_loop,
            client: client.clone(),
            filters: self.config.topics.subscribe.clone(),
            sub_qos: map_qos(self.config.client.qos)?,
            retain_only: self.config.topics.retain_only,
            callback: self.callback.read().clone(),
            connected: self.connected.clone(),
            subscribed: self.subscribed.clone(),
            last_error: self.last_error.clone(),
            connect_tx,
            shutdown_rx,
        }));

        *self.client.write() = Some(client);
        *self.shutdown_tx.lock() = Some(shutdown_tx);
        *self.event_loop_handle.lock() = Some(handle);

        info!(
            "Connecting to MQTT broker {}:{} (TLS: {})",
            host, port, self.config.broker.use_tls
        );

        let wait = async {
            while !*connect_rx.borrow() {
                if connect_rx.changed().await.is_err() {
                    break;
                }
            }
        };
        if timeout(CONNECT_TIMEOUT, wait).await.is_err() {
            let detail = self.last_error.read().clone();
            return Err(MqttError::Connection(
                detail.unwrap_or_else(|| "connect timed out".to_string()),
            ));
        }
        if !self.connected.load(Ordering::Acquire) {
            let detail = self.last_error.read().clone();
            return Err(MqttError::Connection(
                detail.unwrap_or_else(|| "connection closed during handshake".to_string()),
            ));
        }

        info!("Connected to MQTT broker");
        Ok(())
    }

    /// Subscribe to every configured topic filter at the configured QoS.
    /// Subscriptions are re-issued by the event loop after a reconnect.
    pub async fn subscribe(&self) -> Result<(), MqttError> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| MqttError::Connection("not connected".to_string()))?;
        let qos = map_qos(self.config.client.qos)?;

        for filter in &self.config.topics.subscribe {
            info!("Subscribing to MQTT topic: {}", filter);
            client
                .subscribe(filter.clone(), qos)
                .await
                .map_err(|e| MqttError::Subscribe(format!("{}: {}", filter, e)))?;
        }
        self.subscribed.store(true, Ordering::Release);
        Ok(())
    }

    /// Publish a message and wait for the client to accept it.
    pub async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: u8,
        retained: bool,
    ) -> Result<(), MqttError> {
        let client = self
            .client
            .read()
            .clone()
            .ok_or_else(|| MqttError::Connection("not connected".to_string()))?;
        if !self.connected.load(Ordering::Acquire) {
            let detail = self.last_error.read().clone();
            return Err(MqttError::Connection(
                detail.unwrap_or_else(|| "mqtt not connected".to_string()),
            ));
        }

        client
            .publish(topic.to_string(), map_qos(qos)?, retained, payload.to_vec())
            .await
            .map_err(|e| MqttError::Publish(format!("{}: {}", topic, e)))
    }

    /// Issue a clean disconnect with a short drain window, then stop the
    /// event-loop task.
    pub async fn disconnect(&self) {
        let client = self.client.write().take();
        if let Some(client) = client {
            info!("Disconnecting from MQTT broker");
            let _ = client.disconnect().await;
            sleep(DISCONNECT_DRAIN).await;
        }
        let shutdown_tx = self.shutdown_tx.lock().take();
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(true);
        }
        let handle = self.event_loop_handle.lock().take();
        if let Some(handle) = handle {
            handle.abort();
        }
        self.connected.store(false, Ordering::Release);
    }

    /// Whether the session is currently established
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

struct EventLoopContext {
    event_loop: EventLoop,
    client: AsyncClient,
    filters: Vec<String>,
    sub_qos: QoS,
    retain_only: bool,
    callback: Option<MessageCallback>,
    connected: Arc<AtomicBool>,
    subscribed: Arc<AtomicBool>,
    last_error: Arc<RwLock<Option<String>>>,
    connect_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

async fn run_event_loop(mut ctx: EventLoopContext) {
    let mut backoff = INITIAL_RECONNECT_INTERVAL;

    loop {
        tokio::select! {
            _ = ctx.shutdown_rx.changed() => break,
            event = ctx.event_loop.poll() => match event {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        ctx.connected.store(true, Ordering::Release);
                        *ctx.last_error.write() = None;
                        backoff = INITIAL_RECONNECT_INTERVAL;
                        let _ = ctx.connect_tx.send(true);
                        // Restore subscriptions after a reconnect
                        if ctx.subscribed.load(Ordering::Acquire) {
                            for filter in &ctx.filters {
                                let _ = ctx.client.subscribe(filter.clone(), ctx.sub_qos).await;
                            }
                        }
                    } else {
                        *ctx.last_error.write() =
                            Some(format!("connection rejected: {:?}", ack.code));
                        warn!("MQTT connection rejected: {:?}", ack.code);
                    }
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    if ctx.retain_only && !publish.retain {
                        continue;
                    }
                    let message = MqttMessage {
                        topic: publish.topic.clone(),
                        payload: publish.payload.to_vec(),
                        qos: qos_to_u8(publish.qos),
                        retained: publish.retain,
                        timestamp: Utc::now(),
                    };
                    if let Some(callback) = &ctx.callback {
                        callback(message);
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    ctx.connected.store(false, Ordering::Release);
                    *ctx.last_error.write() = Some("broker disconnected".to_string());
                    warn!("MQTT broker disconnected; reconnecting");
                }
                Ok(_) => {}
                Err(ConnectionError::RequestsDone) => {
                    debug!("MQTT request stream closed");
                    break;
                }
                Err(err) => {
                    ctx.connected.store(false, Ordering::Release);
                    *ctx.last_error.write() = Some(err.to_string());
                    warn!("MQTT connection error: {}; retrying in {:?}", err, backoff);
                    sleep(backoff).await;
                    backoff = std::cmp::min(backoff * 2, MAX_RECONNECT_INTERVAL);
                }
            }
        }
    }

    ctx.connected.store(false, Ordering::Release);
}

/// Expand a `{random}` token in a client id into a four-digit decimal
/// suffix derived from the wall clock.
pub fn expand_client_id(client_id: &str) -> String {
    if !client_id.contains("{random}") {
        return client_id.to_string();
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    client_id.replace("{random}", &format!("{:04}", nanos % 10_000))
}

/// Map a numeric QoS level onto the rumqttc enum
pub fn map_qos(qos: u8) -> Result<QoS, MqttError> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttError::Rejected(format!(
            "unsupported MQTT QoS level: {}",
            other
        ))),
    }
}

/// Map a rumqttc QoS back onto its numeric level
pub fn qos_to_u8(qos: QoS) -> u8 {
    match qos {
        QoS::AtMostOnce => 0,
        QoS::AtLeastOnce => 1,
        QoS::ExactlyOnce => 2,
    }
}
