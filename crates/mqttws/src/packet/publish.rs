use bytes::{Buf, BufMut, Bytes};

use crate::error::{Result, SessionError};
use crate::packet::encoding::{decode_string, encode_string};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;

/// An application message as delivered to subscription callbacks.
#[derive(Debug, Clone)]
pub struct Message {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl From<&PublishPacket> for Message {
    fn from(packet: &PublishPacket) -> Self {
        Self {
            topic: packet.topic.clone(),
            payload: packet.payload.clone(),
            qos: packet.qos,
            retain: packet.retain,
            dup: packet.dup,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PublishPacket {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    /// Present iff `qos > 0`.
    pub packet_id: Option<u16>,
}

impl PublishPacket {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            dup: false,
            packet_id: None,
        }
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QoS, packet_id: u16) -> Self {
        self.qos = qos;
        self.packet_id = Some(packet_id);
        self
    }

    #[must_use]
    pub fn with_retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }
}

impl MqttPacket for PublishPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Publish
    }

    fn flags(&self) -> u8 {
        (u8::from(self.dup) << 3) | (self.qos.as_u8() << 1) | u8::from(self.retain)
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, &self.topic)?;
        if self.qos != QoS::AtMostOnce {
            let packet_id = self.packet_id.ok_or_else(|| {
                SessionError::MalformedPacket(
                    "PUBLISH with QoS > 0 requires a packet identifier".to_string(),
                )
            })?;
            buf.put_u16(packet_id);
        }
        buf.put_slice(&self.payload);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        let dup = fixed_header.flags & 0x08 != 0;
        let qos = QoS::try_from((fixed_header.flags >> 1) & 0x03)?;
        let retain = fixed_header.flags & 0x01 != 0;

        let topic = decode_string(buf)?;
        let packet_id = if qos == QoS::AtMostOnce {
            None
        } else {
            if buf.remaining() < 2 {
                return Err(SessionError::MalformedPacket(
                    "PUBLISH missing packet identifier".to_string(),
                ));
            }
            let id = buf.get_u16();
            if id == 0 {
                return Err(SessionError::MalformedPacket(
                    "PUBLISH packet identifier must be nonzero".to_string(),
                ));
            }
            Some(id)
        };

        let mut payload = vec![0u8; buf.remaining()];
        buf.copy_to_slice(&mut payload);

        Ok(Self {
            topic,
            payload: Bytes::from(payload),
            qos,
            retain,
            dup,
            packet_id,
        })
    }
}
