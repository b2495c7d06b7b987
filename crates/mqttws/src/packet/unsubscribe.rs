use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::encoding::{decode_string, encode_string};
use crate::packet::{FixedHeader, MqttPacket, PacketType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<String>,
}

impl UnsubscribePacket {
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>) -> Self {
        self.filters.push(filter.into());
        self
    }
}

impl MqttPacket for UnsubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Unsubscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(SessionError::MalformedPacket(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }
        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            encode_string(buf, filter)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.flags != 0x02 {
            return Err(SessionError::MalformedPacket(format!(
                "invalid UNSUBSCRIBE flags: expected 0x02, got 0x{:02X}",
                fixed_header.flags
            )));
        }
        if buf.remaining() < 2 {
            return Err(SessionError::MalformedPacket(
                "UNSUBSCRIBE missing packet identifier".to_string(),
            ));
        }
        let packet_id = buf.get_u16();

        let mut filters = Vec::new();
        while buf.has_remaining() {
            filters.push(decode_string(buf)?);
        }
        if filters.is_empty() {
            return Err(SessionError::MalformedPacket(
                "UNSUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        Ok(Self { packet_id, filters })
    }
}
