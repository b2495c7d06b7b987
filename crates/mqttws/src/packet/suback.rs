use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::{FixedHeader, MqttPacket, PacketType};
use crate::types::QoS;

/// Per-filter outcome reported in a SUBACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubAckReturnCode {
    Granted(QoS),
    Failure,
}

impl SubAckReturnCode {
    pub fn is_failure(self) -> bool {
        matches!(self, SubAckReturnCode::Failure)
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SubAckReturnCode::Granted(qos) => qos.as_u8(),
            SubAckReturnCode::Failure => 0x80,
        }
    }
}

impl TryFrom<u8> for SubAckReturnCode {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 | 1 | 2 => Ok(SubAckReturnCode::Granted(QoS::try_from(value)?)),
            0x80 => Ok(SubAckReturnCode::Failure),
            other => Err(SessionError::MalformedPacket(format!(
                "invalid SUBACK return code: 0x{other:02X}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubAckPacket {
    pub packet_id: u16,
    pub return_codes: Vec<SubAckReturnCode>,
}

impl SubAckPacket {
    pub fn new(packet_id: u16, return_codes: Vec<SubAckReturnCode>) -> Self {
        Self {
            packet_id,
            return_codes,
        }
    }

    pub fn granted(packet_id: u16, qos: QoS) -> Self {
        Self::new(packet_id, vec![SubAckReturnCode::Granted(qos)])
    }
}

impl MqttPacket for SubAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::SubAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u16(self.packet_id);
        for code in &self.return_codes {
            buf.put_u8(code.as_u8());
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(SessionError::MalformedPacket(
                "SUBACK missing packet identifier".to_string(),
            ));
        }
        let packet_id = buf.get_u16();

        let mut return_codes = Vec::new();
        while buf.has_remaining() {
            return_codes.push(SubAckReturnCode::try_from(buf.get_u8())?);
        }
        if return_codes.is_empty() {
            return Err(SessionError::MalformedPacket(
                "SUBACK carries no return codes".to_string(),
            ));
        }

        Ok(Self {
            packet_id,
            return_codes,
        })
    }
}
