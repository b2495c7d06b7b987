//! In-process broker scaffolding for exercising sessions without a network.
//!
//! [`TestConnector`] plugs into [`crate::client::MqttSessionBuilder::connector`]
//! and hands the broker side of each connection attempt to the test as a
//! [`BrokerLink`]. A link can be driven packet by packet for protocol-level
//! assertions, or left to [`BrokerLink::serve`] to acknowledge everything.
//!
//! Helpers in this module panic on unexpected packets; they are meant to be
//! called from tests only.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::client::Connector;
use crate::credentials::Credentials;
use crate::endpoint::Endpoint;
use crate::error::ConnectError;
use crate::packet::{
    ConnAckPacket, ConnectPacket, Packet, PubAckPacket, SubAckPacket, SubAckReturnCode,
    SubscribePacket, UnsubAckPacket,
};
use crate::transport::{InMemoryTransport, PacketReader, PacketWriter, TransportType};

/// Connector that mints an in-memory pipe per connection attempt.
pub struct TestConnector {
    links: Mutex<mpsc::UnboundedSender<BrokerLink>>,
    failures: Mutex<Vec<ConnectError>>,
}

impl TestConnector {
    /// Returns the connector and the stream of broker-side link halves, one
    /// per connection attempt.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<BrokerLink>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                links: Mutex::new(tx),
                failures: Mutex::new(Vec::new()),
            }),
            rx,
        )
    }

    /// Queues an error to return from the next connection attempt instead of
    /// producing a link.
    pub fn fail_next(&self, error: ConnectError) {
        self.failures.lock().push(error);
    }
}

#[async_trait]
impl Connector for TestConnector {
    async fn connect(
        &self,
        _endpoint: &Endpoint,
        _credentials: &Credentials,
    ) -> std::result::Result<TransportType, ConnectError> {
        if let Some(error) = {
            let mut failures = self.failures.lock();
            if failures.is_empty() {
                None
            } else {
                Some(failures.remove(0))
            }
        } {
            return Err(error);
        }

        let (client, broker) = InMemoryTransport::pair();
        let (reader, writer) = TransportType::InMemory(broker).into_split();
        self.links
            .lock()
            .send(BrokerLink { reader, writer })
            .map_err(|_| ConnectError::TcpFailure("test broker dropped".to_string()))?;
        Ok(TransportType::InMemory(client))
    }
}

/// Broker side of one in-memory connection.
pub struct BrokerLink {
    pub reader: PacketReader,
    pub writer: PacketWriter,
}

impl BrokerLink {
    /// Reads the next packet, panicking on transport failure.
    pub async fn recv(&mut self) -> Packet {
        match self.reader.read_packet().await {
            Ok(packet) => packet,
            Err(err) => panic!("broker read failed: {err}"),
        }
    }

    pub async fn send(&mut self, packet: Packet) {
        if let Err(err) = self.writer.write_packet(&packet).await {
            panic!("broker write failed: {err}");
        }
    }

    /// Expects a CONNECT and answers with an accepting CONNACK.
    pub async fn accept_connect(&mut self, session_present: bool) -> ConnectPacket {
        match self.recv().await {
            Packet::Connect(connect) => {
                self.send(Packet::ConnAck(ConnAckPacket::accepted(session_present)))
                    .await;
                *connect
            }
            other => panic!("expected CONNECT, got {:?}", other.packet_type()),
        }
    }

    /// Expects a SUBSCRIBE and returns it unacknowledged, for tests that
    /// resolve acks out of order.
    pub async fn expect_subscribe(&mut self) -> SubscribePacket {
        match self.recv().await {
            Packet::Subscribe(subscribe) => subscribe,
            other => panic!("expected SUBSCRIBE, got {:?}", other.packet_type()),
        }
    }

    /// Grants every filter of `subscribe` at its requested QoS.
    pub async fn grant(&mut self, subscribe: &SubscribePacket) {
        let codes = subscribe
            .filters
            .iter()
            .map(|f| SubAckReturnCode::Granted(f.qos))
            .collect();
        self.send(Packet::SubAck(SubAckPacket::new(subscribe.packet_id, codes)))
            .await;
    }

    /// Drops the link, simulating a transport interruption.
    pub fn interrupt(self) {
        drop(self);
    }

    /// Spawns a task that acknowledges everything until the link drops:
    /// SUBSCRIBE granted as requested, UNSUBSCRIBE and QoS 1 PUBLISH acked,
    /// PINGREQ answered.
    pub fn serve(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let packet = match self.reader.read_packet().await {
                    Ok(packet) => packet,
                    Err(_) => return,
                };
                let reply = match packet {
                    Packet::Subscribe(subscribe) => {
                        let codes = subscribe
                            .filters
                            .iter()
                            .map(|f| SubAckReturnCode::Granted(f.qos))
                            .collect();
                        Some(Packet::SubAck(SubAckPacket::new(subscribe.packet_id, codes)))
                    }
                    Packet::Unsubscribe(unsubscribe) => {
                        Some(Packet::UnsubAck(UnsubAckPacket::new(unsubscribe.packet_id)))
                    }
                    Packet::Publish(publish) => publish
                        .packet_id
                        .map(|id| Packet::PubAck(PubAckPacket::new(id))),
                    Packet::PingReq => Some(Packet::PingResp),
                    Packet::Disconnect => return,
                    _ => None,
                };
                if let Some(reply) = reply {
                    if self.writer.write_packet(&reply).await.is_err() {
                        return;
                    }
                }
            }
        })
    }
}
