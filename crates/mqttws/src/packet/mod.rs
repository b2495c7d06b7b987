//! Minimal MQTT 3.1.1 packet codec.
//!
//! Covers exactly the packets the session layer exchanges: CONNECT, CONNACK,
//! PUBLISH, PUBACK, SUBSCRIBE, SUBACK, UNSUBSCRIBE, UNSUBACK, PINGREQ,
//! PINGRESP and DISCONNECT. The QoS 2 acknowledgement packets are recognized
//! by type but not decoded; this client never opens a QoS 2 flow.

pub mod connack;
pub mod connect;
pub mod encoding;
pub mod puback;
pub mod publish;
pub mod suback;
pub mod subscribe;
pub mod unsuback;
pub mod unsubscribe;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, SessionError};
use encoding::{decode_remaining_length, encode_remaining_length};

pub use connack::{ConnAckPacket, ConnectReturnCode};
pub use connect::ConnectPacket;
pub use puback::PubAckPacket;
pub use publish::{Message, PublishPacket};
pub use suback::{SubAckPacket, SubAckReturnCode};
pub use subscribe::{SubscribePacket, TopicFilter};
pub use unsuback::UnsubAckPacket;
pub use unsubscribe::UnsubscribePacket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl TryFrom<u8> for PacketType {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::Connect),
            2 => Ok(PacketType::ConnAck),
            3 => Ok(PacketType::Publish),
            4 => Ok(PacketType::PubAck),
            5 => Ok(PacketType::PubRec),
            6 => Ok(PacketType::PubRel),
            7 => Ok(PacketType::PubComp),
            8 => Ok(PacketType::Subscribe),
            9 => Ok(PacketType::SubAck),
            10 => Ok(PacketType::Unsubscribe),
            11 => Ok(PacketType::UnsubAck),
            12 => Ok(PacketType::PingReq),
            13 => Ok(PacketType::PingResp),
            14 => Ok(PacketType::Disconnect),
            other => Err(SessionError::MalformedPacket(format!(
                "invalid packet type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: usize,
}

impl FixedHeader {
    pub fn new(packet_type: PacketType, flags: u8, remaining_length: usize) -> Self {
        Self {
            packet_type,
            flags,
            remaining_length,
        }
    }

    pub fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(((self.packet_type as u8) << 4) | (self.flags & 0x0F));
        encode_remaining_length(buf, self.remaining_length)?;
        Ok(())
    }

    /// Parses a fixed header from the front of `data` without consuming it.
    ///
    /// Returns the header and its encoded length, or `None` when more bytes
    /// are needed.
    pub fn peek(data: &[u8]) -> Result<Option<(FixedHeader, usize)>> {
        if data.is_empty() {
            return Ok(None);
        }
        let first = data[0];
        let packet_type = PacketType::try_from(first >> 4)?;
        let flags = first & 0x0F;

        match decode_remaining_length(&data[1..])? {
            Some((remaining_length, varint_len)) => Ok(Some((
                FixedHeader::new(packet_type, flags, remaining_length),
                1 + varint_len,
            ))),
            None => Ok(None),
        }
    }
}

/// Encode/decode contract implemented by every packet with a body.
pub trait MqttPacket: Sized {
    fn packet_type(&self) -> PacketType;

    fn flags(&self) -> u8 {
        0
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()>;

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self>;

    fn encode<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        let mut body = BytesMut::new();
        self.encode_body(&mut body)?;
        FixedHeader::new(self.packet_type(), self.flags(), body.len()).encode(buf)?;
        buf.put_slice(&body);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub enum Packet {
    Connect(Box<ConnectPacket>),
    ConnAck(ConnAckPacket),
    Publish(PublishPacket),
    PubAck(PubAckPacket),
    Subscribe(SubscribePacket),
    SubAck(SubAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubAck(UnsubAckPacket),
    PingReq,
    PingResp,
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::PubAck(_) => PacketType::PubAck,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::SubAck(_) => PacketType::SubAck,
            Packet::Unsubscribe(_) => PacketType::Unsubscribe,
            Packet::UnsubAck(_) => PacketType::UnsubAck,
            Packet::PingReq => PacketType::PingReq,
            Packet::PingResp => PacketType::PingResp,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        match self {
            Packet::Connect(p) => p.encode(buf),
            Packet::ConnAck(p) => p.encode(buf),
            Packet::Publish(p) => p.encode(buf),
            Packet::PubAck(p) => p.encode(buf),
            Packet::Subscribe(p) => p.encode(buf),
            Packet::SubAck(p) => p.encode(buf),
            Packet::Unsubscribe(p) => p.encode(buf),
            Packet::UnsubAck(p) => p.encode(buf),
            Packet::PingReq => encode_empty(buf, PacketType::PingReq),
            Packet::PingResp => encode_empty(buf, PacketType::PingResp),
            Packet::Disconnect => encode_empty(buf, PacketType::Disconnect),
        }
    }

    /// Decodes one packet from the front of a streaming read buffer.
    ///
    /// Returns `Ok(None)` when the buffer does not yet hold a complete packet;
    /// nothing is consumed in that case.
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>> {
        let Some((header, header_len)) = FixedHeader::peek(&buf[..])? else {
            return Ok(None);
        };

        let total = header_len + header.remaining_length;
        if buf.len() < total {
            return Ok(None);
        }

        buf.advance(header_len);
        let mut body = buf.split_to(header.remaining_length);

        let packet = match header.packet_type {
            PacketType::Connect => {
                Packet::Connect(Box::new(ConnectPacket::decode_body(&mut body, &header)?))
            }
            PacketType::ConnAck => Packet::ConnAck(ConnAckPacket::decode_body(&mut body, &header)?),
            PacketType::Publish => Packet::Publish(PublishPacket::decode_body(&mut body, &header)?),
            PacketType::PubAck => Packet::PubAck(PubAckPacket::decode_body(&mut body, &header)?),
            PacketType::Subscribe => {
                Packet::Subscribe(SubscribePacket::decode_body(&mut body, &header)?)
            }
            PacketType::SubAck => Packet::SubAck(SubAckPacket::decode_body(&mut body, &header)?),
            PacketType::Unsubscribe => {
                Packet::Unsubscribe(UnsubscribePacket::decode_body(&mut body, &header)?)
            }
            PacketType::UnsubAck => {
                Packet::UnsubAck(UnsubAckPacket::decode_body(&mut body, &header)?)
            }
            PacketType::PingReq => Packet::PingReq,
            PacketType::PingResp => Packet::PingResp,
            PacketType::Disconnect => Packet::Disconnect,
            PacketType::PubRec | PacketType::PubRel | PacketType::PubComp => {
                return Err(SessionError::Protocol(format!(
                    "unexpected QoS 2 packet: {:?}",
                    header.packet_type
                )));
            }
        };

        if body.has_remaining() {
            return Err(SessionError::MalformedPacket(format!(
                "{:?} body has {} trailing bytes",
                header.packet_type,
                body.remaining()
            )));
        }

        Ok(Some(packet))
    }
}

fn encode_empty(buf: &mut BytesMut, packet_type: PacketType) -> Result<()> {
    FixedHeader::new(packet_type, 0, 0).encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_header_round_trip() {
        let header = FixedHeader::new(PacketType::Subscribe, 0x02, 321);
        let mut buf = BytesMut::new();
        header.encode(&mut buf).unwrap();

        let (decoded, len) = FixedHeader::peek(&buf[..]).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert_eq!(len, 3);
    }

    #[test]
    fn test_peek_incomplete_header() {
        assert!(FixedHeader::peek(&[]).unwrap().is_none());
        // Type byte plus a continuation bit with no following byte.
        assert!(FixedHeader::peek(&[0x82, 0x80]).unwrap().is_none());
    }

    #[test]
    fn test_decode_incomplete_packet_consumes_nothing() {
        let mut buf = BytesMut::new();
        Packet::PingResp.encode(&mut buf).unwrap();
        let full = buf.clone();

        let mut partial = BytesMut::from(&full[..1]);
        assert!(Packet::decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), 1);
    }

    #[test]
    fn test_decode_two_packets_from_one_buffer() {
        let mut buf = BytesMut::new();
        Packet::PingReq.encode(&mut buf).unwrap();
        Packet::PingResp.encode(&mut buf).unwrap();

        assert!(matches!(
            Packet::decode(&mut buf).unwrap(),
            Some(Packet::PingReq)
        ));
        assert!(matches!(
            Packet::decode(&mut buf).unwrap(),
            Some(Packet::PingResp)
        ));
        assert!(Packet::decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_invalid_packet_type_rejected() {
        let mut buf = BytesMut::from(&[0x00u8, 0x00][..]);
        assert!(Packet::decode(&mut buf).is_err());
    }

    #[test]
    fn test_qos2_packets_rejected() {
        // PUBREC for packet id 1.
        let mut buf = BytesMut::from(&[0x50u8, 0x02, 0x00, 0x01][..]);
        assert!(matches!(
            Packet::decode(&mut buf),
            Err(SessionError::Protocol(_))
        ));
    }
}
