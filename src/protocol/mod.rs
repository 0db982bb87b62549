//! Wire protocol for the pump's short-range serial link.
//!
//! Every exchange with a pump is one fixed-layout binary frame:
//!
//! ```text
//! ┌────────┬────────┬────────┬───────────────────────┬────────┐
//! │ SYNC   │ LEN    │ TYPE   │ PAYLOAD (LEN-1 bytes) │ CRC8   │
//! │ 0xA5   │ u8     │ u8     │ fixed size per type   │ u8     │
//! └────────┴────────┴────────┴───────────────────────┴────────┘
//! ```
//!
//! `LEN` counts the TYPE byte plus the payload. The trailer is CRC-8/DVB-S2
//! over TYPE and payload. Multi-byte integers are big-endian; this matches
//! the pump firmware and is a fixed constant of the protocol, not an option.
//!
//! The codec is pure and does no I/O. The transport is stream-oriented, so
//! [`codec::decode`] reports [`CodecError::Incomplete`] when the buffer holds
//! fewer bytes than a frame declares — the session buffers and retries.

pub mod codec;
pub mod frame;

pub use codec::{decode, encode, CodecError, SYNC};
pub use frame::{CommandField, Frame, PumpMode, PumpStatus};
