//! Shared session state and the connection establishment sequence.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::callback::CallbackManager;
use crate::client::{keepalive, reader, Connector};
use crate::credentials::CredentialsProvider;
use crate::endpoint::Endpoint;
use crate::error::{ConnectError, Result, SessionError};
use crate::events::EventDispatcher;
use crate::packet::{ConnectPacket, Packet, SubAckPacket, SubscribePacket};
use crate::packet_id::PacketIdAllocator;
use crate::session::SessionState;
use crate::transport::PacketWriter;
use crate::types::SessionOptions;

/// A subscribe awaiting its SUBACK.
///
/// `tx` is absent for subscriptions reissued automatically on resume.
pub(crate) struct PendingSubscribe {
    pub filters: Vec<String>,
    pub tx: Option<oneshot::Sender<Result<SubAckPacket>>>,
}

/// An unsubscribe awaiting its UNSUBACK.
pub(crate) struct PendingUnsubscribe {
    pub filters: Vec<String>,
    pub tx: oneshot::Sender<Result<()>>,
}

#[derive(Default)]
pub(crate) struct SessionTasks {
    pub reader: Option<JoinHandle<()>>,
    pub keepalive: Option<JoinHandle<()>>,
    pub supervisor: Option<JoinHandle<()>>,
}

impl SessionTasks {
    pub(crate) fn abort_io(&mut self) {
        if let Some(handle) = self.reader.take() {
            handle.abort();
        }
        if let Some(handle) = self.keepalive.take() {
            handle.abort();
        }
    }

    pub(crate) fn abort_all(&mut self) {
        self.abort_io();
        if let Some(handle) = self.supervisor.take() {
            handle.abort();
        }
    }
}

pub(crate) struct SessionInner {
    pub options: SessionOptions,
    pub state: SessionState,
    pub connected: AtomicBool,
    pub writer: AsyncMutex<Option<PacketWriter>>,
    pub pending_subscribes: Mutex<HashMap<u16, PendingSubscribe>>,
    pub pending_unsubscribes: Mutex<HashMap<u16, PendingUnsubscribe>>,
    pub pending_publishes: Mutex<HashMap<u16, oneshot::Sender<Result<()>>>>,
    /// Packets to resend after a resume, keyed by packet id.
    pub replay: Mutex<HashMap<u16, Packet>>,
    pub packet_ids: PacketIdAllocator,
    pub callbacks: CallbackManager,
    pub events: EventDispatcher,
    pub endpoint: Mutex<Option<Endpoint>>,
    pub credentials_provider: Arc<dyn CredentialsProvider>,
    pub connector: Arc<dyn Connector>,
    pub keepalive: keepalive::KeepAliveTracker,
    /// Signalled by `close()` to cancel in-flight connects and backoff waits.
    pub close_notify: Notify,
    pub tasks: Mutex<SessionTasks>,
}

impl SessionInner {
    /// Writes one packet through the current transport.
    pub(crate) async fn send_packet(&self, packet: &Packet) -> Result<()> {
        let mut writer = self.writer.lock().await;
        let Some(writer) = writer.as_mut() else {
            return Err(SessionError::NotConnected);
        };
        writer.write_packet(packet).await?;
        self.keepalive.record_sent();
        Ok(())
    }

    /// Runs the transport connect plus the MQTT CONNECT/CONNACK exchange,
    /// then starts the reader and keep-alive tasks.
    ///
    /// Returns the broker's session-present flag and the channel on which the
    /// I/O tasks report link loss.
    pub(crate) async fn establish(
        self: &Arc<Self>,
        endpoint: &Endpoint,
    ) -> Result<(bool, mpsc::UnboundedReceiver<String>)> {
        let credentials = self.credentials_provider.credentials().await?;

        let transport = match self.connector.connect(endpoint, &credentials).await {
            Ok(transport) => transport,
            Err(err) => {
                // An auth rejection means the credentials are stale; force a
                // re-resolve before the next attempt.
                if let ConnectError::UpgradeRejected { status: 401 | 403 } = err {
                    self.credentials_provider.invalidate();
                }
                return Err(err.into());
            }
        };

        let (mut packet_reader, mut packet_writer) = transport.into_split();

        let mut connect = ConnectPacket::new(self.options.client_id.clone())
            .with_clean_session(self.options.clean_session)
            .with_keep_alive(self.options.keep_alive_secs());
        connect.username = self.options.username.clone();
        connect.password = self.options.password.clone();

        packet_writer
            .write_packet(&Packet::Connect(Box::new(connect)))
            .await?;

        let connack = timeout(self.options.connect_timeout, packet_reader.read_packet())
            .await
            .map_err(|_| SessionError::Connect(ConnectError::TimeoutExceeded))??;
        let connack = match connack {
            Packet::ConnAck(ack) => ack,
            other => {
                return Err(SessionError::Protocol(format!(
                    "expected CONNACK, got {:?}",
                    other.packet_type()
                )));
            }
        };
        if !connack.return_code.is_success() {
            return Err(SessionError::ConnectionRefused(connack.return_code));
        }

        *self.writer.lock().await = Some(packet_writer);
        self.keepalive.reset();

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let reader_handle = tokio::spawn(reader::run(
            self.clone(),
            packet_reader,
            link_tx.clone(),
        ));
        let keepalive_handle = tokio::spawn(keepalive::run(self.clone(), link_tx));
        {
            let mut tasks = self.tasks.lock();
            tasks.reader = Some(reader_handle);
            tasks.keepalive = Some(keepalive_handle);
        }

        Ok((connack.session_present, link_rx))
    }

    /// Reconciles session state after a resume and resends outstanding
    /// operations.
    pub(crate) async fn restore_session(self: &Arc<Self>, session_present: bool) {
        // Snapshot before the resubscribes below add their own entries.
        let mut outstanding: Vec<(u16, Packet)> = {
            let replay = self.replay.lock();
            replay.iter().map(|(id, p)| (*id, p.clone())).collect()
        };
        outstanding.sort_by_key(|(id, _)| *id);

        if self.options.clean_session {
            // The broker started a fresh session: granted subscriptions are
            // gone. Operations still awaiting an ack stay tracked.
            let pending: HashSet<String> = self
                .pending_subscribes
                .lock()
                .values()
                .flat_map(|p| p.filters.iter().cloned())
                .collect();
            self.state.retain_subscriptions(&pending);
            self.callbacks.retain(&pending);
        } else if !session_present {
            self.reissue_subscriptions().await;
        }

        for (id, mut packet) in outstanding {
            if let Packet::Publish(publish) = &mut packet {
                publish.dup = true;
            }
            if let Err(err) = self.send_packet(&packet).await {
                tracing::warn!(packet_id = id, error = %err, "replay failed");
                return;
            }
        }
    }

    /// Re-sends SUBSCRIBE for every granted subscription. Used when the
    /// broker reports no session state on a persistent-session resume.
    async fn reissue_subscriptions(self: &Arc<Self>) {
        for sub in self.state.granted_subscriptions() {
            let id = match self.packet_ids.acquire() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(filter = %sub.topic_filter, error = %err, "cannot reissue subscription");
                    continue;
                }
            };
            let packet = SubscribePacket::new(id).add_filter(sub.topic_filter.clone(), sub.qos);
            self.state.track_subscription(&sub.topic_filter, sub.qos);
            self.pending_subscribes.lock().insert(
                id,
                PendingSubscribe {
                    filters: vec![sub.topic_filter.clone()],
                    tx: None,
                },
            );
            self.replay
                .lock()
                .insert(id, Packet::Subscribe(packet.clone()));
            if let Err(err) = self.send_packet(&Packet::Subscribe(packet)).await {
                tracing::warn!(filter = %sub.topic_filter, error = %err, "resubscribe send failed");
            }
        }
    }

    /// Fails every pending operation with `err` and releases their packet ids.
    pub(crate) fn drain_pending(&self, err: &SessionError) {
        let subscribes: Vec<_> = self.pending_subscribes.lock().drain().collect();
        for (id, pending) in subscribes {
            self.packet_ids.release(id);
            if let Some(tx) = pending.tx {
                let _ = tx.send(Err(err.clone()));
            }
        }

        let unsubscribes: Vec<_> = self.pending_unsubscribes.lock().drain().collect();
        for (id, pending) in unsubscribes {
            self.packet_ids.release(id);
            let _ = pending.tx.send(Err(err.clone()));
        }

        let publishes: Vec<_> = self.pending_publishes.lock().drain().collect();
        for (id, tx) in publishes {
            self.packet_ids.release(id);
            let _ = tx.send(Err(err.clone()));
        }

        self.replay.lock().clear();
    }
}
