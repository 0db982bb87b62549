//! Frame variants and the values they carry.

use serde::{Deserialize, Serialize};

/// Wave program selected on the pump.
///
/// Wire values are the firmware's own encoding; the gaps (3, 5) are real and
/// must not be "fixed" by renumbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PumpMode {
    ClassicWave,
    CrossFlow,
    SineWave,
    Random,
    Constant,
}

impl PumpMode {
    pub const ALL: [PumpMode; 5] = [
        PumpMode::ClassicWave,
        PumpMode::CrossFlow,
        PumpMode::SineWave,
        PumpMode::Random,
        PumpMode::Constant,
    ];

    pub const fn wire_value(self) -> u8 {
        match self {
            PumpMode::ClassicWave => 0,
            PumpMode::CrossFlow => 1,
            PumpMode::SineWave => 2,
            PumpMode::Random => 4,
            PumpMode::Constant => 6,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0 => Some(PumpMode::ClassicWave),
            1 => Some(PumpMode::CrossFlow),
            2 => Some(PumpMode::SineWave),
            4 => Some(PumpMode::Random),
            6 => Some(PumpMode::Constant),
            _ => None,
        }
    }

    /// Name shown to the automation hub, e.g. in the mode select entity.
    pub const fn display_name(self) -> &'static str {
        match self {
            PumpMode::ClassicWave => "Classic Wave",
            PumpMode::CrossFlow => "Cross-flow",
            PumpMode::SineWave => "Sine Wave",
            PumpMode::Random => "Random",
            PumpMode::Constant => "Constant",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.display_name() == name)
    }
}

/// Controllable field addressed by a `Command` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandField {
    Power,
    Feed,
    Mode,
    Flow,
    Frequency,
}

impl CommandField {
    pub const fn wire_value(self) -> u8 {
        match self {
            CommandField::Power => 0x01,
            CommandField::Feed => 0x02,
            CommandField::Mode => 0x03,
            CommandField::Flow => 0x04,
            CommandField::Frequency => 0x05,
        }
    }

    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(CommandField::Power),
            0x02 => Some(CommandField::Feed),
            0x03 => Some(CommandField::Mode),
            0x04 => Some(CommandField::Flow),
            0x05 => Some(CommandField::Frequency),
            _ => None,
        }
    }
}

/// Full state snapshot as carried by a `StatusPush` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpStatus {
    pub power: bool,
    pub feed: bool,
    pub mode: PumpMode,
    /// Flow strength in percent, 0..=100 on the wire.
    pub flow: u8,
    /// Wave period in seconds.
    pub frequency: u8,
}

/// One wire-protocol message.
///
/// Ack frames keep their raw status byte so that decode(encode(f)) == f holds
/// for every frame the device could legally send; use [`Frame::ACK_OK`] to
/// test for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Login { passcode: u32 },
    LoginAck { status: u8 },
    StatusQuery,
    StatusPush(PumpStatus),
    Command { token: u16, field: CommandField, value: u8 },
    CommandAck { token: u16, status: u8 },
    Error { code: u8 },
}

impl Frame {
    /// Status byte carried by a successful LoginAck or CommandAck.
    pub const ACK_OK: u8 = 0x00;

    pub const fn type_tag(&self) -> u8 {
        match self {
            Frame::Login { .. } => 0x01,
            Frame::LoginAck { .. } => 0x02,
            Frame::StatusQuery => 0x03,
            Frame::StatusPush(_) => 0x04,
            Frame::Command { .. } => 0x05,
            Frame::CommandAck { .. } => 0x06,
            Frame::Error { .. } => 0xEE,
        }
    }

    pub const fn type_name(&self) -> &'static str {
        match self {
            Frame::Login { .. } => "login",
            Frame::LoginAck { .. } => "login-ack",
            Frame::StatusQuery => "status-query",
            Frame::StatusPush(_) => "status-push",
            Frame::Command { .. } => "command",
            Frame::CommandAck { .. } => "command-ack",
            Frame::Error { .. } => "error",
        }
    }
}
