use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::{FixedHeader, MqttPacket, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PubAckPacket {
    pub packet_id: u16,
}

impl PubAckPacket {
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }
}

impl MqttPacket for PubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::PubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(SessionError::MalformedPacket(
                "PUBACK missing packet identifier".to_string(),
            ));
        }
        Ok(Self {
            packet_id: buf.get_u16(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_puback_round_trip() {
        let packet = PubAckPacket::new(515);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();

        let (header, len) = FixedHeader::peek(&buf[..]).unwrap().unwrap();
        assert_eq!(header.remaining_length, 2);
        buf.advance(len);
        assert_eq!(PubAckPacket::decode_body(&mut buf, &header).unwrap(), packet);
    }

    #[test]
    fn test_puback_truncated() {
        let mut buf = BytesMut::from(&[0x01u8][..]);
        let header = FixedHeader::new(PacketType::PubAck, 0, 1);
        assert!(PubAckPacket::decode_body(&mut buf, &header).is_err());
    }
}
