//! Pedal Protocol
//!
//! Protocol constants for the pedal's command channel and the wire codec
//! that converts between raw bytes and the transport's base64 text form.

use crate::domain::models::OutboundCommand;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;
use uuid::{uuid, Uuid};

/// Pedal data service UUID
pub const SERVICE_UUID: Uuid = uuid!("03b80e5a-ede8-4b33-a751-6ce34ec4c700");

/// The single characteristic used both for commands and status notifications
pub const PEDAL_CHAR_UUID: Uuid = uuid!("7772e5db-3868-4112-a1a9-f2669d106bf3");

/// Fixed header prepended to every outbound command
pub const COMMAND_HEADER: [u8; 3] = [0x00, 0x00, 0xB0];

/// Header the pedal uses when echoing a button press back to us
pub const ECHO_HEADER: [u8; 3] = [0x80, 0x80, 0xB0];

impl OutboundCommand {
    /// Get the raw bytes for this command
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            Self::NextPatch => &[0x1B, 0x7F],
            Self::PreviousPatch => &[0x1A, 0x00],
        }
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        [Self::NextPatch, Self::PreviousPatch]
            .into_iter()
            .find(|c| c.as_bytes() == bytes)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    InvalidPayload(String),
}

/// Convert raw bytes into the transport's text-safe representation.
pub fn to_wire(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Convert a transport payload back to raw bytes.
pub fn from_wire(payload: &str) -> Result<Vec<u8>, CodecError> {
    STANDARD
        .decode(payload)
        .map_err(|e| CodecError::InvalidPayload(e.to_string()))
}

/// Prefix command bytes with [`COMMAND_HEADER`] and encode for the wire.
pub fn encode_command(bytes: &[u8]) -> String {
    let mut frame = Vec::with_capacity(COMMAND_HEADER.len() + bytes.len());
    frame.extend_from_slice(&COMMAND_HEADER);
    frame.extend_from_slice(bytes);
    to_wire(&frame)
}

/// Decode an inbound notification payload.
pub fn decode_notification(payload: &str) -> Result<Vec<u8>, CodecError> {
    from_wire(payload)
}

/// Recognise a pedal button echo.
///
/// # Echo Packet Structure (5 bytes)
///
/// ```text
/// [0-2] : 0x80 0x80 0xB0
/// [3-4] : command payload (see OutboundCommand::as_bytes)
/// ```
pub fn parse_echo(bytes: &[u8]) -> Option<OutboundCommand> {
    let body = bytes.strip_prefix(&ECHO_HEADER[..])?;
    OutboundCommand::from_bytes(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_bytes() {
        assert_eq!(OutboundCommand::NextPatch.as_bytes(), &[0x1B, 0x7F]);
        assert_eq!(OutboundCommand::PreviousPatch.as_bytes(), &[0x1A, 0x00]);
    }

    #[test]
    fn test_encode_command_prefixes_header() {
        let payload = encode_command(OutboundCommand::NextPatch.as_bytes());
        assert_eq!(
            decode_notification(&payload).unwrap(),
            vec![0x00, 0x00, 0xB0, 0x1B, 0x7F]
        );
        assert_eq!(payload, "AACwG38=");
    }

    #[test]
    fn test_wire_round_trip() {
        // Covers every padding remainder, including the empty payload
        let data: Vec<u8> = (0..=255u8).rev().collect();
        for len in 0..=16 {
            let bytes = &data[..len];
            let text = to_wire(bytes);
            assert_eq!(text.len(), (len + 2) / 3 * 4);
            assert_eq!(from_wire(&text).unwrap(), bytes);
        }
        assert_eq!(from_wire(&to_wire(&data)).unwrap(), data);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_notification("not base64!"),
            Err(CodecError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_parse_echo() {
        let bytes = decode_notification("gICwGgA=").unwrap();
        assert_eq!(parse_echo(&bytes), Some(OutboundCommand::PreviousPatch));
        assert_eq!(
            parse_echo(&[0x80, 0x80, 0xB0, 0x1B, 0x7F]),
            Some(OutboundCommand::NextPatch)
        );
        assert_eq!(parse_echo(b"R"), None);
        assert_eq!(parse_echo(&[0x80, 0x80, 0xB0, 0x01, 0x02]), None);
    }
}
