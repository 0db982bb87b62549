//! Encoding and decoding of wire frames.

use crc::{Crc, CRC_8_DVB_S2};
use thiserror::Error;

use super::frame::{CommandField, Frame, PumpMode, PumpStatus};

/// Synchronization marker opening every frame.
pub const SYNC: u8 = 0xA5;

/// SYNC + LEN; the smallest prefix that tells us how much more to read.
const HEADER_LEN: usize = 2;

/// Protocol-representable bounds, independent of any per-pump configuration.
const FLOW_WIRE_MAX: u8 = 100;
const FREQUENCY_WIRE_MIN: u8 = 1;
const FREQUENCY_WIRE_MAX: u8 = 120;

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_DVB_S2);

/// Decode failures.
///
/// [`CodecError::Incomplete`] is the only recoverable variant: the caller is
/// expected to buffer more bytes and retry. Every other variant means the
/// byte stream is desynchronized and the session must drop the link.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("frame incomplete: need {need} bytes")]
    Incomplete { need: usize },

    #[error("bad sync byte 0x{0:02x}")]
    BadSync(u8),

    #[error("checksum mismatch: computed 0x{computed:02x}, frame carries 0x{received:02x}")]
    ChecksumMismatch { computed: u8, received: u8 },

    #[error("unknown frame type 0x{0:02x}")]
    UnknownType(u8),

    #[error("payload length {got} invalid for frame type 0x{tag:02x}")]
    PayloadLength { tag: u8, got: usize },

    #[error("unknown pump mode value {0}")]
    UnknownMode(u8),

    #[error("unknown command field 0x{0:02x}")]
    UnknownField(u8),

    #[error("{field} value {value} outside protocol range {min}..={max}")]
    OutOfRange { field: &'static str, value: u8, min: u8, max: u8 },
}

impl CodecError {
    /// True for the buffer-and-retry case, false for link desynchronization.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::Incomplete { .. })
    }
}

fn check_flow(value: u8) -> Result<u8, CodecError> {
    if value > FLOW_WIRE_MAX {
        return Err(CodecError::OutOfRange {
            field: "flow",
            value,
            min: 0,
            max: FLOW_WIRE_MAX,
        });
    }
    Ok(value)
}

fn check_frequency(value: u8) -> Result<u8, CodecError> {
    if !(FREQUENCY_WIRE_MIN..=FREQUENCY_WIRE_MAX).contains(&value) {
        return Err(CodecError::OutOfRange {
            field: "frequency",
            value,
            min: FREQUENCY_WIRE_MIN,
            max: FREQUENCY_WIRE_MAX,
        });
    }
    Ok(value)
}

/// Range check for the value byte of a `Command` frame.
///
/// Callers validate against the pump's configured range before building a
/// command; the codec re-checks the wider protocol range anyway so an
/// unvalidated value can never reach the wire.
fn check_command_value(field: CommandField, value: u8) -> Result<u8, CodecError> {
    match field {
        CommandField::Flow => check_flow(value),
        CommandField::Frequency => check_frequency(value),
        CommandField::Mode => {
            PumpMode::from_wire(value).ok_or(CodecError::UnknownMode(value))?;
            Ok(value)
        }
        CommandField::Power | CommandField::Feed => {
            if value > 1 {
                return Err(CodecError::OutOfRange {
                    field: "switch",
                    value,
                    min: 0,
                    max: 1,
                });
            }
            Ok(value)
        }
    }
}

/// Encode a frame to wire bytes.
///
/// Fails only with [`CodecError::OutOfRange`] / [`CodecError::UnknownMode`]
/// when a numeric field cannot be represented.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let mut payload: Vec<u8> = Vec::with_capacity(5);
    match frame {
        Frame::Login { passcode } => payload.extend_from_slice(&passcode.to_be_bytes()),
        Frame::LoginAck { status } => payload.push(*status),
        Frame::StatusQuery => {}
        Frame::StatusPush(status) => {
            payload.push(status.power as u8);
            payload.push(status.feed as u8);
            payload.push(status.mode.wire_value());
            payload.push(check_flow(status.flow)?);
            payload.push(check_frequency(status.frequency)?);
        }
        Frame::Command { token, field, value } => {
            payload.extend_from_slice(&token.to_be_bytes());
            payload.push(field.wire_value());
            payload.push(check_command_value(*field, *value)?);
        }
        Frame::CommandAck { token, status } => {
            payload.extend_from_slice(&token.to_be_bytes());
            payload.push(*status);
        }
        Frame::Error { code } => payload.push(*code),
    }

    let mut out = Vec::with_capacity(payload.len() + 4);
    out.push(SYNC);
    out.push((payload.len() + 1) as u8);
    out.push(frame.type_tag());
    out.extend_from_slice(&payload);
    let crc = CRC8.checksum(&out[2..]);
    out.push(crc);
    Ok(out)
}

/// Decode one frame from the front of `buf`.
///
/// Returns the frame and the number of bytes consumed so the caller can
/// drain its receive buffer.
pub fn decode(buf: &[u8]) -> Result<(Frame, usize), CodecError> {
    if buf.is_empty() {
        return Err(CodecError::Incomplete { need: HEADER_LEN });
    }
    if buf[0] != SYNC {
        return Err(CodecError::BadSync(buf[0]));
    }
    if buf.len() < HEADER_LEN {
        return Err(CodecError::Incomplete { need: HEADER_LEN });
    }

    let len = buf[1] as usize;
    let total = HEADER_LEN + len + 1;
    if len == 0 {
        // Length must at least cover the TYPE byte.
        return Err(CodecError::PayloadLength { tag: 0, got: 0 });
    }
    if buf.len() < total {
        return Err(CodecError::Incomplete { need: total });
    }

    let body = &buf[HEADER_LEN..HEADER_LEN + len];
    let received = buf[HEADER_LEN + len];
    let computed = CRC8.checksum(body);
    if computed != received {
        return Err(CodecError::ChecksumMismatch { computed, received });
    }

    let frame = parse_body(body)?;
    Ok((frame, total))
}

fn parse_body(body: &[u8]) -> Result<Frame, CodecError> {
    let tag = body[0];
    let payload = &body[1..];
    let expect = |want: usize| -> Result<(), CodecError> {
        if payload.len() != want {
            return Err(CodecError::PayloadLength { tag, got: payload.len() });
        }
        Ok(())
    };

    match tag {
        0x01 => {
            expect(4)?;
            let passcode = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
            Ok(Frame::Login { passcode })
        }
        0x02 => {
            expect(1)?;
            Ok(Frame::LoginAck { status: payload[0] })
        }
        0x03 => {
            expect(0)?;
            Ok(Frame::StatusQuery)
        }
        0x04 => {
            expect(5)?;
            let mode = PumpMode::from_wire(payload[2]).ok_or(CodecError::UnknownMode(payload[2]))?;
            Ok(Frame::StatusPush(PumpStatus {
                power: payload[0] != 0,
                feed: payload[1] != 0,
                mode,
                flow: check_flow(payload[3])?,
                frequency: check_frequency(payload[4])?,
            }))
        }
        0x05 => {
            expect(4)?;
            let token = u16::from_be_bytes([payload[0], payload[1]]);
            let field =
                CommandField::from_wire(payload[2]).ok_or(CodecError::UnknownField(payload[2]))?;
            Ok(Frame::Command {
                token,
                field,
                value: check_command_value(field, payload[3])?,
            })
        }
        0x06 => {
            expect(3)?;
            let token = u16::from_be_bytes([payload[0], payload[1]]);
            Ok(Frame::CommandAck { token, status: payload[2] })
        }
        0xEE => {
            expect(1)?;
            Ok(Frame::Error { code: payload[0] })
        }
        other => Err(CodecError::UnknownType(other)),
    }
}
