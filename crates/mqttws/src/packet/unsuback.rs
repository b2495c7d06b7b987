use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::{FixedHeader, MqttPacket, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsubAckPacket {
    pub packet_id: u16,
}

impl UnsubAckPacket {
    pub fn new(packet_id: u16) -> Self {
        Self { packet_id }
    }
}

impl MqttPacket for UnsubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::UnsubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(SessionError::MalformedPacket(
                "UNSUBACK missing packet identifier".to_string(),
            ));
        }
        Ok(Self {
            packet_id: buf.get_u16(),
        })
    }
}
