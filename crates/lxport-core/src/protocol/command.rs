//! Binary frames exchanged on a device's command channel.
//!
//! Wire format (one frame per WebSocket binary message):
//! ```text
//! [opcode:1][payload:N]
//!
//! opcode 0  pair-create    payload = [port:2, little-endian][token bytes]
//! opcode 1  pair-accepted  payload = [token bytes]
//! ```
//!
//! The broker sends pair-create to a device when a client asks for a tunnel to
//! that device.  The device answers with pair-accepted once it has dialed its
//! local port and opened the response leg; the broker only logs it.

use thiserror::Error;

/// Opcode of a broker → device "open a tunnel" request.
pub const OP_PAIR_CREATE: u8 = 0;

/// Opcode of a device → broker "pairing notification accepted" acknowledgement.
pub const OP_PAIR_ACCEPTED: u8 = 1;

/// Length of the pair-create header: opcode (1) + port (2).
const PAIR_CREATE_HEADER_LEN: usize = 3;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame contained no bytes at all.
    #[error("empty command frame")]
    EmptyFrame,

    /// The byte slice is shorter than the minimum required length.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The opcode byte is not a recognized value.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u8),

    /// The payload could not be parsed (empty token, UTF-8 error, etc.).
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A required query parameter was absent or empty.
    #[error("missing query parameter: {0}")]
    MissingParameter(&'static str),

    /// A query parameter had a value that could not be parsed.
    #[error("invalid query parameter {name}: {value:?}")]
    InvalidParameter { name: &'static str, value: String },

    /// The `pt` query parameter named an unknown connection type.
    #[error("unsupported pair type: {0:?}")]
    UnsupportedPairType(String),

    /// The block codec rejected its input.
    #[error("codec error: {0}")]
    Codec(String),
}

/// A decoded command-channel frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFrame {
    /// Ask the device to dial `127.0.0.1:<port>` and open a response leg
    /// carrying `token`.
    PairCreate { port: u16, token: String },
    /// The device has opened the response leg for `token`.
    PairAccepted { token: String },
}

impl CommandFrame {
    /// Returns the opcode byte this frame is encoded with.
    pub fn opcode(&self) -> u8 {
        match self {
            CommandFrame::PairCreate { .. } => OP_PAIR_CREATE,
            CommandFrame::PairAccepted { .. } => OP_PAIR_ACCEPTED,
        }
    }

    /// Encodes the frame into the bytes of one WebSocket binary message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use lxport_core::CommandFrame;
    ///
    /// let frame = CommandFrame::PairCreate { port: 3389, token: "t1".to_string() };
    /// assert_eq!(frame.encode(), vec![0, 0x3D, 0x0D, b't', b'1']);
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        match self {
            CommandFrame::PairCreate { port, token } => {
                let mut buf = Vec::with_capacity(PAIR_CREATE_HEADER_LEN + token.len());
                buf.push(OP_PAIR_CREATE);
                buf.extend_from_slice(&port.to_le_bytes());
                buf.extend_from_slice(token.as_bytes());
                buf
            }
            CommandFrame::PairAccepted { token } => {
                let mut buf = Vec::with_capacity(1 + token.len());
                buf.push(OP_PAIR_ACCEPTED);
                buf.extend_from_slice(token.as_bytes());
                buf
            }
        }
    }

    /// Decodes one frame from the bytes of a WebSocket binary message.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::EmptyFrame`] for an empty message,
    /// [`ProtocolError::UnknownOpcode`] for an opcode outside the table above,
    /// and [`ProtocolError::InsufficientData`] / [`ProtocolError::MalformedPayload`]
    /// for truncated or non-UTF-8 payloads.
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let (&opcode, payload) = bytes.split_first().ok_or(ProtocolError::EmptyFrame)?;

        match opcode {
            OP_PAIR_CREATE => {
                if bytes.len() < PAIR_CREATE_HEADER_LEN {
                    return Err(ProtocolError::InsufficientData {
                        needed: PAIR_CREATE_HEADER_LEN,
                        available: bytes.len(),
                    });
                }
                let port = u16::from_le_bytes([payload[0], payload[1]]);
                let token = decode_token(&payload[2..])?;
                Ok(CommandFrame::PairCreate { port, token })
            }
            OP_PAIR_ACCEPTED => Ok(CommandFrame::PairAccepted {
                token: decode_token(payload)?,
            }),
            other => Err(ProtocolError::UnknownOpcode(other)),
        }
    }
}

fn decode_token(bytes: &[u8]) -> Result<String, ProtocolError> {
    if bytes.is_empty() {
        return Err(ProtocolError::MalformedPayload("empty token".to_string()));
    }
    String::from_utf8(bytes.to_vec())
        .map_err(|e| ProtocolError::MalformedPayload(format!("token is not UTF-8: {e}")))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_create_layout_is_opcode_port_le_token() {
        // Arrange
        let frame = CommandFrame::PairCreate {
            port: 0x1234,
            token: "abc".to_string(),
        };

        // Act
        let bytes = frame.encode();

        // Assert: [0][0x34 0x12]["abc"]
        assert_eq!(bytes, vec![0x00, 0x34, 0x12, b'a', b'b', b'c']);
    }

    #[test]
    fn test_pair_create_frame_length_is_three_plus_token() {
        let token = "6f1c2a9e-8d4b-4f0e-9a51-3c7d2b8e1f00".to_string();
        let frame = CommandFrame::PairCreate {
            port: 3389,
            token: token.clone(),
        };
        assert_eq!(frame.encode().len(), 3 + token.len());
    }

    #[test]
    fn test_decode_pair_create_reads_port_little_endian() {
        let bytes = [0x00, 0x3D, 0x0D, b'x'];
        let frame = CommandFrame::decode(&bytes).unwrap();
        assert_eq!(
            frame,
            CommandFrame::PairCreate {
                port: 3389,
                token: "x".to_string()
            }
        );
    }

    #[test]
    fn test_decode_pair_accepted() {
        let bytes = [0x01, b't', b'o', b'k'];
        let frame = CommandFrame::decode(&bytes).unwrap();
        assert_eq!(
            frame,
            CommandFrame::PairAccepted {
                token: "tok".to_string()
            }
        );
        assert_eq!(frame.opcode(), OP_PAIR_ACCEPTED);
    }

    #[test]
    fn test_decode_empty_frame_is_rejected() {
        assert_eq!(CommandFrame::decode(&[]), Err(ProtocolError::EmptyFrame));
    }

    #[test]
    fn test_decode_truncated_pair_create_returns_insufficient_data() {
        let result = CommandFrame::decode(&[0x00, 0x01]);
        assert_eq!(
            result,
            Err(ProtocolError::InsufficientData {
                needed: 3,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_pair_create_without_token_is_malformed() {
        let result = CommandFrame::decode(&[0x00, 0x01, 0x00]);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert_eq!(
            CommandFrame::decode(&[0x7F, 1, 2, 3]),
            Err(ProtocolError::UnknownOpcode(0x7F))
        );
    }

    #[test]
    fn test_decode_non_utf8_token_is_malformed() {
        let result = CommandFrame::decode(&[0x01, 0xFF, 0xFE]);
        assert!(matches!(result, Err(ProtocolError::MalformedPayload(_))));
    }
}
