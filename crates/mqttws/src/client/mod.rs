//! Session controller: the public client API.
//!
//! [`MqttSession`] is a cheap-to-clone handle over shared state. One reader
//! task consumes inbound packets, a keep-alive task paces pings, and a
//! supervisor task drives reconnection; none of them hold locks across
//! writes, so concurrent operations from multiple handles are safe.

pub(crate) mod inner;
pub(crate) mod keepalive;
pub(crate) mod reader;
pub(crate) mod reconnect;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};

use crate::callback::CallbackManager;
use crate::credentials::{Credentials, CredentialsProvider, StaticProvider};
use crate::endpoint::{self, Endpoint};
use crate::error::{ConnectError, Result, SessionError};
use crate::events::{ConnectionEvent, EventDispatcher};
use crate::packet::{Packet, PublishPacket, SubscribePacket, UnsubscribePacket};
use crate::packet_id::PacketIdAllocator;
use crate::session::{ConnectionState, SessionState, Subscription};
use crate::topic::{is_valid_topic_filter, is_valid_topic_name};
use crate::transport::{
    HeaderSigner, TransportType, UpgradeSigner, WebSocketConfig, WebSocketTransport,
};
use crate::types::{ConnectResult, QoS, SessionOptions};

use inner::{PendingSubscribe, PendingUnsubscribe, SessionInner, SessionTasks};

/// Produces an established transport for a connection attempt.
///
/// The session calls this on the initial connect and again on every
/// reconnect attempt, so implementations must mint a fresh transport each
/// time. Swapping the connector is how tests drive the session over
/// in-memory pipes.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> std::result::Result<TransportType, ConnectError>;
}

/// Default connector: TLS WebSocket with a signed upgrade.
pub struct WebSocketConnector {
    config: WebSocketConfig,
    signer: Arc<dyn UpgradeSigner>,
}

impl WebSocketConnector {
    pub fn new(config: WebSocketConfig, signer: Arc<dyn UpgradeSigner>) -> Self {
        Self { config, signer }
    }
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(WebSocketConfig::default(), Arc::new(HeaderSigner::new()))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials,
    ) -> std::result::Result<TransportType, ConnectError> {
        let transport =
            WebSocketTransport::connect(endpoint, &self.config, self.signer.as_ref(), credentials)
                .await?;
        Ok(TransportType::WebSocket(Box::new(transport)))
    }
}

/// Configures and builds an [`MqttSession`].
pub struct MqttSessionBuilder {
    options: SessionOptions,
    credentials_provider: Arc<dyn CredentialsProvider>,
    connector: Option<Arc<dyn Connector>>,
    websocket_config: WebSocketConfig,
    signer: Arc<dyn UpgradeSigner>,
}

impl MqttSessionBuilder {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            options,
            credentials_provider: Arc::new(StaticProvider::anonymous()),
            connector: None,
            websocket_config: WebSocketConfig::default(),
            signer: Arc::new(HeaderSigner::new()),
        }
    }

    #[must_use]
    pub fn credentials_provider(mut self, provider: Arc<dyn CredentialsProvider>) -> Self {
        self.credentials_provider = provider;
        self
    }

    /// Replaces the transport factory. Overrides any WebSocket settings.
    #[must_use]
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    #[must_use]
    pub fn websocket_config(mut self, config: WebSocketConfig) -> Self {
        self.websocket_config = config;
        self
    }

    #[must_use]
    pub fn signer(mut self, signer: Arc<dyn UpgradeSigner>) -> Self {
        self.signer = signer;
        self
    }

    pub fn build(self) -> MqttSession {
        let connector = self.connector.unwrap_or_else(|| {
            Arc::new(WebSocketConnector::new(self.websocket_config, self.signer))
        });
        MqttSession {
            inner: Arc::new(SessionInner {
                options: self.options,
                state: SessionState::new(),
                connected: AtomicBool::new(false),
                writer: AsyncMutex::new(None),
                pending_subscribes: Mutex::new(HashMap::new()),
                pending_unsubscribes: Mutex::new(HashMap::new()),
                pending_publishes: Mutex::new(HashMap::new()),
                replay: Mutex::new(HashMap::new()),
                packet_ids: PacketIdAllocator::new(),
                callbacks: CallbackManager::new(),
                events: EventDispatcher::new(),
                endpoint: Mutex::new(None),
                credentials_provider: self.credentials_provider,
                connector,
                keepalive: keepalive::KeepAliveTracker::new(),
                close_notify: Notify::new(),
                tasks: Mutex::new(SessionTasks::default()),
            }),
        }
    }
}

/// Handle to one managed MQTT-over-WebSocket session.
#[derive(Clone)]
pub struct MqttSession {
    inner: Arc<SessionInner>,
}

impl MqttSession {
    pub fn new(options: SessionOptions) -> Self {
        MqttSessionBuilder::new(options).build()
    }

    pub fn builder(options: SessionOptions) -> MqttSessionBuilder {
        MqttSessionBuilder::new(options)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.connection_state()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Current subscription table, including pending and rejected entries.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.inner.state.subscriptions()
    }

    /// Registers a callback for connection lifecycle events.
    pub fn on_event<F>(&self, callback: F)
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.inner.events.add_callback(callback);
    }

    /// Ordered stream of connection lifecycle events.
    pub fn event_stream(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Connects to the broker at `uri` and starts the session.
    ///
    /// Resolves the endpoint, obtains credentials, establishes the transport
    /// and completes the CONNECT/CONNACK exchange. The whole sequence is
    /// bounded by the configured connect timeout and can be cancelled by
    /// [`close`](Self::close); on any failure the session returns to the
    /// disconnected state.
    ///
    /// # Errors
    ///
    /// [`SessionError::AlreadyConnected`] when the session is not currently
    /// disconnected, otherwise the error of the failing connect stage.
    pub async fn connect(&self, uri: &str) -> Result<ConnectResult> {
        let inner = &self.inner;
        if inner.state.connection_state() != ConnectionState::Disconnected {
            return Err(SessionError::AlreadyConnected);
        }
        inner.state.transition(ConnectionState::Connecting)?;

        let endpoint = match endpoint::resolve(uri) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                let _ = inner.state.transition(ConnectionState::Disconnected);
                return Err(err.into());
            }
        };
        *inner.endpoint.lock() = Some(endpoint.clone());
        tracing::info!(host = endpoint.host(), port = endpoint.port(), "connecting");

        let result = tokio::select! {
            result = inner.establish(&endpoint) => result,
            () = inner.close_notify.notified() => Err(ConnectError::Cancelled.into()),
        };

        let (session_present, link_rx) = match result {
            Ok(established) => established,
            Err(err) => {
                inner.tasks.lock().abort_io();
                *inner.writer.lock().await = None;
                let _ = inner.state.transition(ConnectionState::Disconnected);
                return Err(err);
            }
        };

        inner.state.transition(ConnectionState::Connected)?;
        inner.connected.store(true, Ordering::SeqCst);
        tracing::info!(session_present, "connected");
        inner
            .events
            .dispatch(&ConnectionEvent::Connected { session_present });

        let supervisor = tokio::spawn(reconnect::supervise(inner.clone(), link_rx));
        inner.tasks.lock().supervisor = Some(supervisor);

        Ok(ConnectResult { session_present })
    }

    /// Subscribes to `filter` and registers `callback` for matching messages.
    ///
    /// Resolves with the granted QoS once the SUBACK arrives. If the link is
    /// interrupted first, the operation stays pending and is resent after the
    /// session resumes.
    ///
    /// # Errors
    ///
    /// [`SessionError::SubscriptionRejected`] when the broker refuses the
    /// filter, [`SessionError::NotConnected`] when the session has not been
    /// connected.
    pub async fn subscribe<F>(
        &self,
        filter: impl Into<String>,
        qos: QoS,
        callback: F,
    ) -> Result<QoS>
    where
        F: Fn(crate::packet::publish::Message) + Send + Sync + 'static,
    {
        let filter = filter.into();
        if !is_valid_topic_filter(&filter) {
            return Err(SessionError::InvalidTopicFilter(filter));
        }
        if qos == QoS::ExactlyOnce {
            return Err(SessionError::Configuration(
                "QoS 2 subscriptions are not supported".to_string(),
            ));
        }
        self.require_active()?;

        let inner = &self.inner;
        let id = inner.packet_ids.acquire()?;
        let packet = SubscribePacket::new(id).add_filter(filter.clone(), qos);

        inner.state.track_subscription(&filter, qos);
        inner.callbacks.register(&filter, Arc::new(callback));

        let (tx, rx) = oneshot::channel();
        inner.pending_subscribes.lock().insert(
            id,
            PendingSubscribe {
                filters: vec![filter.clone()],
                tx: Some(tx),
            },
        );
        inner
            .replay
            .lock()
            .insert(id, Packet::Subscribe(packet.clone()));

        // A send failure here means the link just dropped; the pending entry
        // is replayed after resume.
        if let Err(err) = inner.send_packet(&Packet::Subscribe(packet)).await {
            tracing::debug!(filter = %filter, error = %err, "subscribe send deferred to replay");
        }

        let ack = rx.await.map_err(|_| SessionError::Cancelled)??;
        match ack.return_codes.first() {
            Some(code) if code.is_failure() => Err(SessionError::SubscriptionRejected {
                filter,
                code: *code,
            }),
            Some(crate::packet::SubAckReturnCode::Granted(granted)) => Ok(*granted),
            _ => Err(SessionError::Protocol(
                "SUBACK carried no return code".to_string(),
            )),
        }
    }

    /// Removes the subscription for `filter`.
    ///
    /// Resolves once the UNSUBACK arrives; the callback stops receiving
    /// messages at that point.
    pub async fn unsubscribe(&self, filter: impl Into<String>) -> Result<()> {
        let filter = filter.into();
        self.require_active()?;

        let inner = &self.inner;
        let id = inner.packet_ids.acquire()?;
        let packet = UnsubscribePacket::new(id).add_filter(filter.clone());

        let (tx, rx) = oneshot::channel();
        inner.pending_unsubscribes.lock().insert(
            id,
            PendingUnsubscribe {
                filters: vec![filter.clone()],
                tx,
            },
        );
        inner
            .replay
            .lock()
            .insert(id, Packet::Unsubscribe(packet.clone()));

        if let Err(err) = inner.send_packet(&Packet::Unsubscribe(packet)).await {
            tracing::debug!(filter = %filter, error = %err, "unsubscribe send deferred to replay");
        }

        rx.await.map_err(|_| SessionError::Cancelled)?
    }

    /// Publishes at QoS 0: fire and forget.
    pub async fn publish(
        &self,
        topic: impl Into<String>,
        payload: impl AsRef<[u8]>,
    ) -> Result<()> {
        self.publish_qos(topic, payload, QoS::AtMostOnce).await
    }

    /// Publishes at the given QoS. A QoS 1 publish resolves when the PUBACK
    /// arrives, surviving interruptions like subscribes do.
    ///
    /// # Errors
    ///
    /// [`SessionError::Configuration`] for QoS 2, which this client does not
    /// implement.
    pub async fn publish_qos(
        &self,
        topic: impl Into<String>,
        payload: impl AsRef<[u8]>,
        qos: QoS,
    ) -> Result<()> {
        let topic = topic.into();
        if !is_valid_topic_name(&topic) {
            return Err(SessionError::InvalidTopicName(topic));
        }
        let payload = Bytes::copy_from_slice(payload.as_ref());
        let inner = &self.inner;

        match qos {
            QoS::AtMostOnce => {
                if !self.is_connected() {
                    return Err(SessionError::NotConnected);
                }
                let packet = PublishPacket::new(topic, payload);
                inner.send_packet(&Packet::Publish(packet)).await
            }
            QoS::AtLeastOnce => {
                self.require_active()?;
                let id = inner.packet_ids.acquire()?;
                let packet = PublishPacket::new(topic, payload).with_qos(qos, id);

                let (tx, rx) = oneshot::channel();
                inner.pending_publishes.lock().insert(id, tx);
                inner
                    .replay
                    .lock()
                    .insert(id, Packet::Publish(packet.clone()));

                if let Err(err) = inner.send_packet(&Packet::Publish(packet)).await {
                    tracing::debug!(error = %err, "publish send deferred to replay");
                }

                rx.await.map_err(|_| SessionError::Cancelled)?
            }
            QoS::ExactlyOnce => Err(SessionError::Configuration(
                "QoS 2 publishes are not supported".to_string(),
            )),
        }
    }

    /// Closes the session deliberately.
    ///
    /// Cancels any in-flight connect, stops all background tasks, sends a
    /// best-effort DISCONNECT, fails every pending operation with
    /// [`SessionError::Cancelled`] and emits [`ConnectionEvent::Closed`].
    /// Idempotent: closing a disconnected session is a no-op.
    pub async fn close(&self) -> Result<()> {
        let inner = &self.inner;
        if inner.state.connection_state() == ConnectionState::Disconnected {
            return Ok(());
        }
        inner.state.transition(ConnectionState::Closing)?;
        inner.connected.store(false, Ordering::SeqCst);
        inner.close_notify.notify_waiters();
        inner.tasks.lock().abort_all();

        let mut writer = inner.writer.lock().await;
        if let Some(writer) = writer.as_mut() {
            let _ = writer.write_packet(&Packet::Disconnect).await;
            let _ = writer.close().await;
        }
        *writer = None;
        drop(writer);

        inner.drain_pending(&SessionError::Cancelled);
        inner.state.clear_subscriptions();
        inner.callbacks.clear();
        inner.state.transition(ConnectionState::Disconnected)?;
        tracing::info!("session closed");
        inner.events.dispatch(&ConnectionEvent::Closed);
        Ok(())
    }

    /// Operations are accepted while connected or riding out an interruption.
    fn require_active(&self) -> Result<()> {
        match self.inner.state.connection_state() {
            ConnectionState::Connected | ConnectionState::Interrupted => Ok(()),
            _ => Err(SessionError::NotConnected),
        }
    }
}
