use anyhow::{anyhow, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const SIGNATURE: u16 = 0xFFFF;
pub const PROTOCOL_VERSION: u32 = 2;
// signature (2) + command (2) + version (4) + token (4) + ssrc (4)
const HEADER_LEN: usize = 16;

/// Session control commands exchanged on the control and data ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Invitation,
    InvitationAccepted,
    InvitationRejected,
    Exit,
}

impl Command {
    fn code(self) -> [u8; 2] {
        match self {
            Command::Invitation => *b"IN",
            Command::InvitationAccepted => *b"OK",
            Command::InvitationRejected => *b"NO",
            Command::Exit => *b"BY",
        }
    }

    fn from_code(code: [u8; 2]) -> Option<Self> {
        match &code {
            b"IN" => Some(Command::Invitation),
            b"OK" => Some(Command::InvitationAccepted),
            b"NO" => Some(Command::InvitationRejected),
            b"BY" => Some(Command::Exit),
            _ => None,
        }
    }

    fn carries_name(self) -> bool {
        matches!(self, Command::Invitation | Command::InvitationAccepted)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub command: Command,
    pub initiator_token: u32,
    pub ssrc: u32,
    /// Session name, sent with invitations and acceptances only.
    pub name: Option<String>,
}

impl ControlMessage {
    pub fn invitation(initiator_token: u32, ssrc: u32, name: &str) -> Self {
        Self {
            command: Command::Invitation,
            initiator_token,
            ssrc,
            name: Some(name.to_string()),
        }
    }

    pub fn accepted(initiator_token: u32, ssrc: u32, name: &str) -> Self {
        Self {
            command: Command::InvitationAccepted,
            initiator_token,
            ssrc,
            name: Some(name.to_string()),
        }
    }

    pub fn rejected(initiator_token: u32, ssrc: u32) -> Self {
        Self {
            command: Command::InvitationRejected,
            initiator_token,
            ssrc,
            name: None,
        }
    }

    pub fn exit(initiator_token: u32, ssrc: u32) -> Self {
        Self {
            command: Command::Exit,
            initiator_token,
            ssrc,
            name: None,
        }
    }

    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + 64);
        buf.put_u16(SIGNATURE);
        buf.put_slice(&self.command.code());
        buf.put_u32(PROTOCOL_VERSION);
        buf.put_u32(self.initiator_token);
        buf.put_u32(self.ssrc);
        if self.command.carries_name() {
            if let Some(name) = &self.name {
                buf.put_slice(name.as_bytes());
            }
            buf.put_u8(0); // NULL-terminator
        }
        buf.freeze()
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(anyhow!("control message too short: {} bytes", data.len()));
        }
        let mut reader = Bytes::copy_from_slice(data);
        if reader.get_u16() != SIGNATURE {
            return Err(anyhow!("invalid control message signature"));
        }
        let code = [reader.get_u8(), reader.get_u8()];
        let command = Command::from_code(code)
            .ok_or_else(|| anyhow!("unsupported control command {:?}", String::from_utf8_lossy(&code)))?;
        let protocol_version = reader.get_u32();
        if protocol_version != PROTOCOL_VERSION {
            return Err(anyhow!("unsupported protocol version {}", protocol_version));
        }
        let initiator_token = reader.get_u32();
        let ssrc = reader.get_u32();
        let name = if command.carries_name() && reader.has_remaining() {
            let bytes = reader.chunk();
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            Some(String::from_utf8(bytes[..end].to_vec())?)
        } else {
            None
        };
        Ok(Self {
            command,
            initiator_token,
            ssrc,
            name,
        })
    }
}
