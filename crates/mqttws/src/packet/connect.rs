use bytes::{Buf, BufMut};

use crate::error::{Result, SessionError};
use crate::packet::encoding::{decode_bytes, decode_string, encode_bytes, encode_string};
use crate::packet::{FixedHeader, MqttPacket, PacketType};

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;

const FLAG_CLEAN_SESSION: u8 = 0x02;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_USERNAME: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectPacket {
    pub client_id: String,
    pub clean_session: bool,
    pub keep_alive_secs: u16,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
}

impl ConnectPacket {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            clean_session: true,
            keep_alive_secs: 60,
            username: None,
            password: None,
        }
    }

    #[must_use]
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    #[must_use]
    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.keep_alive_secs = secs;
        self
    }

    #[must_use]
    pub fn with_credentials(mut self, username: impl Into<String>, password: &[u8]) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.to_vec());
        self
    }
}

impl MqttPacket for ConnectPacket {
    fn packet_type(&self) -> PacketType {
        PacketType::Connect
    }

    fn encode_body<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        encode_string(buf, PROTOCOL_NAME)?;
        buf.put_u8(PROTOCOL_LEVEL);

        let mut flags = 0u8;
        if self.clean_session {
            flags |= FLAG_CLEAN_SESSION;
        }
        if self.username.is_some() {
            flags |= FLAG_USERNAME;
        }
        if self.password.is_some() {
            flags |= FLAG_PASSWORD;
        }
        buf.put_u8(flags);
        buf.put_u16(self.keep_alive_secs);

        encode_string(buf, &self.client_id)?;
        if let Some(username) = &self.username {
            encode_string(buf, username)?;
        }
        if let Some(password) = &self.password {
            encode_bytes(buf, password)?;
        }
        Ok(())
    }

    fn decode_body<B: Buf>(buf: &mut B, _fixed_header: &FixedHeader) -> Result<Self> {
        let protocol_name = decode_string(buf)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(SessionError::MalformedPacket(format!(
                "unexpected protocol name: {protocol_name}"
            )));
        }

        if buf.remaining() < 4 {
            return Err(SessionError::MalformedPacket(
                "CONNECT variable header truncated".to_string(),
            ));
        }
        let level = buf.get_u8();
        if level != PROTOCOL_LEVEL {
            return Err(SessionError::MalformedPacket(format!(
                "unsupported protocol level: {level}"
            )));
        }

        let flags = buf.get_u8();
        if flags & 0x01 != 0 {
            return Err(SessionError::MalformedPacket(
                "CONNECT reserved flag set".to_string(),
            ));
        }
        if flags & 0x04 != 0 {
            return Err(SessionError::MalformedPacket(
                "will messages not supported".to_string(),
            ));
        }
        let keep_alive_secs = buf.get_u16();

        let client_id = decode_string(buf)?;
        let username = if flags & FLAG_USERNAME != 0 {
            Some(decode_string(buf)?)
        } else {
            None
        };
        let password = if flags & FLAG_PASSWORD != 0 {
            Some(decode_bytes(buf)?)
        } else {
            None
        };

        Ok(Self {
            client_id,
            clean_session: flags & FLAG_CLEAN_SESSION != 0,
            keep_alive_secs,
            username,
            password,
        })
    }
}
