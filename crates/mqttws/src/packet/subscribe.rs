use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::encoding::{decode_string, encode_string};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    pub filter: String,
    pub qos: QoS,
}

impl TopicFilter {
    pub fn new(filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            filter: filter.into(),
            qos,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribePacket {
    pub packet_id: u16,
    pub filters: Vec<TopicFilter>,
}

impl SubscribePacket {
    pub fn new(packet_id: u16) -> Self {
        Self {
            packet_id,
            filters: Vec::new(),
        }
    }

    #[must_use]
    pub fn add_filter(mut self, filter: impl Into<String>, qos: QoS) -> Self {
        self.filters.push(TopicFilter::new(filter, qos));
        self
    }
}

impl MqttPacket for SubscribePacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Subscribe
    }

    fn flags(&self) -> u8 {
        0x02
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        if self.filters.is_empty() {
            return Err(SessionError::MalformedPacket(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        buf.put_u16(self.packet_id);
        for filter in &self.filters {
            encode_string(buf, &filter.filter)?;
            buf.put_u8(filter.qos.as_u8());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, fixed_header: &FixedHeader) -> Result<Self> {
        if fixed_header.flags != 0x02 {
            return Err(SessionError::MalformedPacket(format!(
                "invalid SUBSCRIBE flags: expected 0x02, got 0x{:02X}",
                fixed_header.flags
            )));
        }
        if buf.remaining() < 2 {
            return Err(SessionError::MalformedPacket(
                "SUBSCRIBE missing packet identifier".to_string(),
            ));
        }
        let packet_id = buf.get_u16();

        let mut filters = Vec::new();
        while buf.has_remaining() {
            let filter = decode_string(buf)?;
            if !buf.has_remaining() {
                return Err(SessionError::MalformedPacket(
                    "SUBSCRIBE topic filter missing requested QoS".to_string(),
                ));
            }
            let qos = QoS::try_from(buf.get_u8())?;
            filters.push(TopicFilter { filter, qos });
        }

        if filters.is_empty() {
            return Err(SessionError::MalformedPacket(
                "SUBSCRIBE must carry at least one topic filter".to_string(),
            ));
        }

        Ok(Self { packet_id, filters })
    }
}
