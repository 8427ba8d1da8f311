//! The upper-layer message envelope.
//!
//! Spec §6 treats the envelope schema as owned by an external collaborator
//! and this core as a pure byte-pipe that only cares about the correlation
//! ID it routes on. This module gives that collaborator a concrete,
//! minimal shape so the rest of the crate has something to compile and
//! test against: a length-delimited `{correlation_id, kind, payload}`
//! triple. Nothing downstream of [`crate::reassembly::ReassemblyBuffer`]
//! or [`crate::session::Session::deliver`] inspects `payload` itself.

use crate::error::{Result, TunnelError};

/// The envelope's message type. Exhaustive for this crate's purposes; a
/// real upper layer would extend this without touching the tunnel core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    Ping,
    Command,
    Response,
    Data,
}

impl EnvelopeKind {
    fn to_byte(self) -> u8 {
        match self {
            EnvelopeKind::Ping => 0,
            EnvelopeKind::Command => 1,
            EnvelopeKind::Response => 2,
            EnvelopeKind::Data => 3,
        }
    }

    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(EnvelopeKind::Ping),
            1 => Ok(EnvelopeKind::Command),
            2 => Ok(EnvelopeKind::Response),
            3 => Ok(EnvelopeKind::Data),
            _ => Err(TunnelError::DecodeError),
        }
    }
}

/// The plaintext of a completed block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub correlation_id: String,
    pub kind: EnvelopeKind,
    pub payload: Vec<u8>,
}

impl Envelope {
    /// `[kind:1][corr_len:4 LE][corr_id][payload_len:4 LE][payload]`.
    pub fn encode(&self) -> Vec<u8> {
        let corr_bytes = self.correlation_id.as_bytes();
        let mut buf = Vec::with_capacity(1 + 4 + corr_bytes.len() + 4 + self.payload.len());
        buf.push(self.kind.to_byte());
        buf.extend_from_slice(&(corr_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(corr_bytes);
        buf.extend_from_slice(&(self.payload.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(TunnelError::DecodeError);
        }
        let kind = EnvelopeKind::from_byte(bytes[0])?;
        let mut pos = 1;

        let corr_len = read_u32(bytes, pos)? as usize;
        pos += 4;
        let correlation_id = bytes
            .get(pos..pos + corr_len)
            .ok_or(TunnelError::DecodeError)?;
        let correlation_id = String::from_utf8(correlation_id.to_vec()).map_err(|_| TunnelError::DecodeError)?;
        pos += corr_len;

        let payload_len = read_u32(bytes, pos)? as usize;
        pos += 4;
        let payload = bytes
            .get(pos..pos + payload_len)
            .ok_or(TunnelError::DecodeError)?
            .to_vec();
        pos += payload_len;

        if pos != bytes.len() {
            return Err(TunnelError::DecodeError);
        }

        Ok(Self {
            correlation_id,
            kind,
            payload,
        })
    }
}

fn read_u32(bytes: &[u8], pos: usize) -> Result<u32> {
    let slice = bytes.get(pos..pos + 4).ok_or(TunnelError::DecodeError)?;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let envelope = Envelope {
            correlation_id: "abc".to_string(),
            kind: EnvelopeKind::Data,
            payload: b"ping".to_vec(),
        };
        let encoded = envelope.encode();
        let decoded = Envelope::decode(&encoded).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_empty_payload() {
        let envelope = Envelope {
            correlation_id: "x".to_string(),
            kind: EnvelopeKind::Ping,
            payload: Vec::new(),
        };
        let decoded = Envelope::decode(&envelope.encode()).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_envelope_rejects_truncated_bytes() {
        let envelope = Envelope {
            correlation_id: "abc".to_string(),
            kind: EnvelopeKind::Command,
            payload: b"data".to_vec(),
        };
        let mut encoded = envelope.encode();
        encoded.truncate(encoded.len() - 1);
        assert!(Envelope::decode(&encoded).is_err());
    }

    #[test]
    fn test_envelope_rejects_trailing_garbage() {
        let envelope = Envelope {
            correlation_id: "abc".to_string(),
            kind: EnvelopeKind::Command,
            payload: b"data".to_vec(),
        };
        let mut encoded = envelope.encode();
        encoded.push(0xff);
        assert!(Envelope::decode(&encoded).is_err());
    }
}
