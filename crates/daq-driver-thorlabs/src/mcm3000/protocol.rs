//! MCM3000 binary wire protocol.
//!
//! Fixed-length little-endian frames, one command per frame:
//!
//! | Command | Request | Response |
//! |---|---|---|
//! | Get encoder count | `0A 04 ch 00 00 00` | 12 bytes, byte 6 = channel, bytes 8..12 = i32 count |
//! | Zero encoder | `09 04 06 00 00 00` + ch (u16) + 0 (i32) | none |
//! | Move absolute | `53 04 06 00 00 00` + ch (u16) + target (i32) | none |

use daq_core::error::{AppResult, DaqError};

/// Opcode of the get-encoder-count request.
pub const OP_GET_ENCODER: u8 = 0x0A;
/// Opcode of the zero-encoder request.
pub const OP_ZERO_ENCODER: u8 = 0x09;
/// Opcode of the absolute-move request.
pub const OP_MOVE_ABSOLUTE: u8 = 0x53;
/// Opcode of the encoder-count reply.
pub const OP_ENCODER_REPLY: u8 = 0x0B;

/// Length of the get-encoder-count request.
pub const SHORT_FRAME_LEN: usize = 6;
/// Length of the zero-encoder and absolute-move requests.
pub const LONG_FRAME_LEN: usize = 12;
/// Length of the encoder-count reply.
pub const ENCODER_RESPONSE_LEN: usize = 12;

/// Offset of the echoed channel byte in the encoder-count reply.
const RESPONSE_CHANNEL_OFFSET: usize = 6;
/// Offset of the signed count in the encoder-count reply.
const RESPONSE_COUNT_OFFSET: usize = 8;

/// A request the host can send to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Ask for the current encoder count of a channel
    GetEncoderCount {
        /// Channel index
        channel: u8,
    },
    /// Redefine the current physical position of a channel as count 0
    ZeroEncoder {
        /// Channel index
        channel: u8,
    },
    /// Move a channel to an absolute encoder count
    MoveAbsolute {
        /// Channel index
        channel: u8,
        /// Target encoder count
        counts: i32,
    },
}

impl Command {
    /// Encode the command as a wire frame.
    pub fn encode(&self) -> Vec<u8> {
        match *self {
            Command::GetEncoderCount { channel } => {
                vec![OP_GET_ENCODER, 0x04, channel, 0x00, 0x00, 0x00]
            }
            Command::ZeroEncoder { channel } => long_frame(OP_ZERO_ENCODER, channel, 0),
            Command::MoveAbsolute { channel, counts } => {
                long_frame(OP_MOVE_ABSOLUTE, channel, counts)
            }
        }
    }

    /// Number of reply bytes the controller sends for this command.
    pub fn response_len(&self) -> Option<usize> {
        match self {
            Command::GetEncoderCount { .. } => Some(ENCODER_RESPONSE_LEN),
            Command::ZeroEncoder { .. } | Command::MoveAbsolute { .. } => None,
        }
    }

    /// Channel this command addresses.
    pub fn channel(&self) -> u8 {
        match *self {
            Command::GetEncoderCount { channel }
            | Command::ZeroEncoder { channel }
            | Command::MoveAbsolute { channel, .. } => channel,
        }
    }

    /// Total frame length implied by an opcode, if the opcode is known.
    pub fn frame_len(opcode: u8) -> Option<usize> {
        match opcode {
            OP_GET_ENCODER => Some(SHORT_FRAME_LEN),
            OP_ZERO_ENCODER | OP_MOVE_ABSOLUTE => Some(LONG_FRAME_LEN),
            _ => None,
        }
    }

    /// Decode a complete request frame.
    ///
    /// Returns `None` for unknown opcodes or malformed frames.
    pub fn decode(frame: &[u8]) -> Option<Self> {
        let opcode = *frame.first()?;
        if frame.len() != Self::frame_len(opcode)? || frame[1] != 0x04 {
            return None;
        }
        match opcode {
            OP_GET_ENCODER => Some(Command::GetEncoderCount { channel: frame[2] }),
            OP_ZERO_ENCODER => Some(Command::ZeroEncoder { channel: frame[6] }),
            OP_MOVE_ABSOLUTE => {
                let counts = i32::from_le_bytes([frame[8], frame[9], frame[10], frame[11]]);
                Some(Command::MoveAbsolute {
                    channel: frame[6],
                    counts,
                })
            }
            _ => None,
        }
    }
}

fn long_frame(opcode: u8, channel: u8, value: i32) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LONG_FRAME_LEN);
    frame.extend_from_slice(&[opcode, 0x04, 0x06, 0x00, 0x00, 0x00]);
    frame.extend_from_slice(&u16::from(channel).to_le_bytes());
    frame.extend_from_slice(&value.to_le_bytes());
    frame
}

/// Decode an encoder-count reply for `channel`.
///
/// # Errors
///
/// [`DaqError::ProtocolDesync`] if the reply has the wrong length or echoes a
/// different channel.
pub fn decode_encoder_response(channel: u8, response: &[u8]) -> AppResult<i32> {
    if response.len() != ENCODER_RESPONSE_LEN {
        return Err(DaqError::ProtocolDesync(format!(
            "ch{}: encoder reply is {} bytes, expected {}",
            channel,
            response.len(),
            ENCODER_RESPONSE_LEN
        )));
    }
    let echoed = response[RESPONSE_CHANNEL_OFFSET];
    if echoed != channel {
        return Err(DaqError::ProtocolDesync(format!(
            "ch{}: encoder reply echoes channel {}",
            channel, echoed
        )));
    }
    let mut count = [0u8; 4];
    count.copy_from_slice(&response[RESPONSE_COUNT_OFFSET..ENCODER_RESPONSE_LEN]);
    Ok(i32::from_le_bytes(count))
}

/// Encode an encoder-count reply as the controller sends it.
pub fn encode_encoder_response(channel: u8, counts: i32) -> [u8; ENCODER_RESPONSE_LEN] {
    let mut reply = [0u8; ENCODER_RESPONSE_LEN];
    reply[..6].copy_from_slice(&[OP_ENCODER_REPLY, 0x04, 0x06, 0x00, 0x01, 0x50]);
    reply[RESPONSE_CHANNEL_OFFSET] = channel;
    reply[RESPONSE_COUNT_OFFSET..].copy_from_slice(&counts.to_le_bytes());
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_encoder_frame_layout() {
        let frame = Command::GetEncoderCount { channel: 2 }.encode();
        assert_eq!(frame, vec![0x0A, 0x04, 0x02, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn zero_encoder_frame_layout() {
        let frame = Command::ZeroEncoder { channel: 1 }.encode();
        assert_eq!(
            frame,
            vec![0x09, 0x04, 0x06, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn move_absolute_frame_is_little_endian_signed() {
        let frame = Command::MoveAbsolute {
            channel: 0,
            counts: 4724,
        }
        .encode();
        assert_eq!(
            frame,
            vec![0x53, 0x04, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x74, 0x12, 0x00, 0x00]
        );

        let negative = Command::MoveAbsolute {
            channel: 2,
            counts: -2,
        }
        .encode();
        assert_eq!(&negative[6..], &[0x02, 0x00, 0xFE, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn decode_accepts_what_encode_produces() {
        for cmd in [
            Command::GetEncoderCount { channel: 1 },
            Command::ZeroEncoder { channel: 2 },
            Command::MoveAbsolute {
                channel: 0,
                counts: -120_000,
            },
        ] {
            assert_eq!(Command::decode(&cmd.encode()), Some(cmd));
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(Command::decode(&[]), None);
        assert_eq!(Command::decode(&[0xFF, 0x04, 0, 0, 0, 0]), None);
        assert_eq!(Command::decode(&[0x0A, 0x04, 0]), None);
        assert_eq!(Command::decode(&[0x0A, 0x05, 0, 0, 0, 0]), None);
    }

    #[test]
    fn response_lengths() {
        assert_eq!(
            Command::GetEncoderCount { channel: 0 }.response_len(),
            Some(12)
        );
        assert_eq!(Command::ZeroEncoder { channel: 0 }.response_len(), None);
    }

    #[test]
    fn encoder_reply_decodes_signed_count() {
        let reply = encode_encoder_response(1, -4724);
        assert_eq!(decode_encoder_response(1, &reply).unwrap(), -4724);
    }

    #[test]
    fn encoder_reply_with_wrong_channel_is_desync() {
        let reply = encode_encoder_response(2, 10);
        assert!(matches!(
            decode_encoder_response(1, &reply),
            Err(DaqError::ProtocolDesync(_))
        ));
    }

    #[test]
    fn short_encoder_reply_is_desync() {
        assert!(matches!(
            decode_encoder_response(0, &[0x0B, 0x04, 0x06]),
            Err(DaqError::ProtocolDesync(_))
        ));
    }
}
