use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::{FixedHeader, MqttPacket, PacketType};

/// CONNACK return codes defined by MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectReturnCode {
    Accepted = 0,
    UnacceptableProtocolVersion = 1,
    IdentifierRejected = 2,
    ServerUnavailable = 3,
    BadUsernameOrPassword = 4,
    NotAuthorized = 5,
}

impl ConnectReturnCode {
    pub fn is_success(self) -> bool {
        self == ConnectReturnCode::Accepted
    }
}

impl TryFrom<u8> for ConnectReturnCode {
    type Error = SessionError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ConnectReturnCode::Accepted),
            1 => Ok(ConnectReturnCode::UnacceptableProtocolVersion),
            2 => Ok(ConnectReturnCode::IdentifierRejected),
            3 => Ok(ConnectReturnCode::ServerUnavailable),
            4 => Ok(ConnectReturnCode::BadUsernameOrPassword),
            5 => Ok(ConnectReturnCode::NotAuthorized),
            other => Err(SessionError::MalformedPacket(format!(
                "invalid CONNACK return code: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub return_code: ConnectReturnCode,
}

impl ConnAckPacket {
    pub fn accepted(session_present: bool) -> Self {
        Self {
            session_present,
            return_code: ConnectReturnCode::Accepted,
        }
    }

    pub fn refused(return_code: ConnectReturnCode) -> Self {
        Self {
            session_present: false,
            return_code,
        }
    }
}

impl MqttPacket for ConnAckPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::ConnAck
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        buf.put_u8(u8::from(self.session_present));
        buf.put_u8(self.return_code as u8);
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        if buf.remaining() < 2 {
            return Err(SessionError::MalformedPacket(
                "CONNACK body truncated".to_string(),
            ));
        }
        let ack_flags = buf.get_u8();
        if ack_flags & 0xFE != 0 {
            return Err(SessionError::MalformedPacket(format!(
                "invalid CONNACK flags: 0x{ack_flags:02X}"
            )));
        }
        let return_code = ConnectReturnCode::try_from(buf.get_u8())?;

        // [MQTT-3.2.2-1] session present must be zero on refusals.
        let session_present = ack_flags & 0x01 != 0 && return_code.is_success();

        Ok(Self {
            session_present,
            return_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn test_connack_round_trip() {
        let packet = ConnAckPacket::accepted(true);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();

        let (header, len) = FixedHeader::peek(&buf[..]).unwrap().unwrap();
        buf.advance(len);
        let decoded = ConnAckPacket::decode_body(&mut buf, &header).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_connack_refused() {
        let packet = ConnAckPacket::refused(ConnectReturnCode::NotAuthorized);
        let mut buf = BytesMut::new();
        packet.encode(&mut buf).unwrap();

        let (header, len) = FixedHeader::peek(&buf[..]).unwrap().unwrap();
        buf.advance(len);
        let decoded = ConnAckPacket::decode_body(&mut buf, &header).unwrap();
        assert!(!decoded.session_present);
        assert!(!decoded.return_code.is_success());
    }

    #[test]
    fn test_connack_invalid_return_code() {
        let mut buf = BytesMut::from(&[0x00u8, 0x09][..]);
        let header = FixedHeader::new(PacketType::ConnAck, 0, 2);
        assert!(ConnAckPacket::decode_body(&mut buf, &header).is_err());
    }
}
