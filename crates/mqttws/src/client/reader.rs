//! Reader task: the single consumer of the transport's read half.
//!
//! All inbound acknowledgements are matched here, so ack handling is
//! naturally serialized in arrival order. On a read failure the task reports
//! link loss and exits; pending operations are left untouched for the
//! reconnect supervisor to replay.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::client::inner::SessionInner;
use crate::error::Result;
use crate::packet::publish::Message;
use crate::packet::{
    Packet, PubAckPacket, PublishPacket, SubAckPacket, UnsubAckPacket,
};
use crate::session::SubscriptionStatus;
use crate::transport::PacketReader;
use crate::types::QoS;

pub(crate) async fn run(
    inner: Arc<SessionInner>,
    mut reader: PacketReader,
    link_tx: mpsc::UnboundedSender<String>,
) {
    loop {
        match reader.read_packet().await {
            Ok(packet) => {
                inner.keepalive.record_received();
                if let Err(err) = handle_packet(&inner, packet).await {
                    tracing::warn!(error = %err, "failed to handle inbound packet");
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "reader task stopping");
                let _ = link_tx.send(err.to_string());
                return;
            }
        }
    }
}

async fn handle_packet(inner: &Arc<SessionInner>, packet: Packet) -> Result<()> {
    match packet {
        Packet::Publish(publish) => handle_publish(inner, publish).await,
        Packet::PubAck(ack) => {
            handle_puback(inner, &ack);
            Ok(())
        }
        Packet::SubAck(ack) => {
            handle_suback(inner, ack);
            Ok(())
        }
        Packet::UnsubAck(ack) => {
            handle_unsuback(inner, &ack);
            Ok(())
        }
        Packet::PingResp => {
            tracing::trace!("PINGRESP received");
            Ok(())
        }
        other => {
            tracing::warn!(packet_type = ?other.packet_type(), "unexpected inbound packet");
            Ok(())
        }
    }
}

/// Acknowledges before delivering, so a crash mid-callback never leaves the
/// broker redelivering a message the application already saw half of.
async fn handle_publish(inner: &Arc<SessionInner>, publish: PublishPacket) -> Result<()> {
    match publish.qos {
        QoS::AtMostOnce => {}
        QoS::AtLeastOnce => {
            if let Some(id) = publish.packet_id {
                inner
                    .send_packet(&Packet::PubAck(PubAckPacket::new(id)))
                    .await?;
            }
        }
        QoS::ExactlyOnce => {
            tracing::warn!(topic = %publish.topic, "dropping QoS 2 publish, flow not supported");
            return Ok(());
        }
    }

    let message = Message::from(&publish);
    tracing::debug!(topic = %message.topic, len = message.payload.len(), "message received");
    inner.callbacks.dispatch(&message);
    Ok(())
}

fn handle_puback(inner: &Arc<SessionInner>, ack: &PubAckPacket) {
    let Some(tx) = inner.pending_publishes.lock().remove(&ack.packet_id) else {
        tracing::warn!(packet_id = ack.packet_id, "unmatched PUBACK discarded");
        return;
    };
    inner.replay.lock().remove(&ack.packet_id);
    inner.packet_ids.release(ack.packet_id);
    let _ = tx.send(Ok(()));
}

fn handle_suback(inner: &Arc<SessionInner>, ack: SubAckPacket) {
    let Some(pending) = inner.pending_subscribes.lock().remove(&ack.packet_id) else {
        tracing::warn!(packet_id = ack.packet_id, "unmatched SUBACK discarded");
        return;
    };
    inner.replay.lock().remove(&ack.packet_id);
    inner.packet_ids.release(ack.packet_id);

    if pending.filters.len() != ack.return_codes.len() {
        tracing::warn!(
            packet_id = ack.packet_id,
            expected = pending.filters.len(),
            got = ack.return_codes.len(),
            "SUBACK return code count mismatch"
        );
    }

    for (filter, code) in pending.filters.iter().zip(&ack.return_codes) {
        if code.is_failure() {
            tracing::warn!(filter = %filter, "subscription rejected by broker");
            inner
                .state
                .resolve_subscription(filter, SubscriptionStatus::Rejected);
            inner.callbacks.remove(filter);
        } else {
            inner
                .state
                .resolve_subscription(filter, SubscriptionStatus::Granted);
        }
    }

    if let Some(tx) = pending.tx {
        let _ = tx.send(Ok(ack));
    }
}

fn handle_unsuback(inner: &Arc<SessionInner>, ack: &UnsubAckPacket) {
    let Some(pending) = inner.pending_unsubscribes.lock().remove(&ack.packet_id) else {
        tracing::warn!(packet_id = ack.packet_id, "unmatched UNSUBACK discarded");
        return;
    };
    inner.replay.lock().remove(&ack.packet_id);
    inner.packet_ids.release(ack.packet_id);

    for filter in &pending.filters {
        inner.state.remove_subscription(filter);
        inner.callbacks.remove(filter);
    }
    let _ = pending.tx.send(Ok(()));
}
