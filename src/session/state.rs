//! Last-known pump state, owned exclusively by the session task.
//!
//! Everything outside the session sees state only as the immutable snapshots
//! carried by [`StateEvent`]s; nothing else ever writes to it.

use chrono::{DateTime, Utc};

use crate::protocol::{PumpMode, PumpStatus};

use super::handle::FieldCommand;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceState {
    pub power: bool,
    pub feed: bool,
    pub mode: PumpMode,
    pub flow: u8,
    pub frequency: u8,
    pub connected: bool,
    /// When the pump last confirmed its state. `None` until the first
    /// StatusPush after (re)connecting, so stale defaults are never
    /// published as real values.
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            power: false,
            feed: false,
            mode: PumpMode::ClassicWave,
            flow: 50,
            frequency: 8,
            connected: false,
            last_sync: None,
        }
    }
}

impl DeviceState {
    /// True once the pump has reported authoritative state on this link.
    pub fn synced(&self) -> bool {
        self.last_sync.is_some()
    }

    /// Overwrite with a full snapshot pushed by the pump.
    pub(crate) fn apply_status(&mut self, status: &PumpStatus) {
        self.power = status.power;
        self.feed = status.feed;
        self.mode = status.mode;
        self.flow = status.flow;
        self.frequency = status.frequency;
        self.last_sync = Some(Utc::now());
    }

    /// Fold in a single field after the pump acknowledged our command.
    pub(crate) fn apply_command(&mut self, command: &FieldCommand) {
        match command {
            FieldCommand::Power(on) => self.power = *on,
            FieldCommand::Feed(on) => self.feed = *on,
            FieldCommand::Mode(mode) => self.mode = *mode,
            FieldCommand::Flow(percent) => self.flow = *percent,
            FieldCommand::Frequency(seconds) => self.frequency = *seconds,
        }
        self.last_sync = Some(Utc::now());
    }

    /// Link dropped: connectivity is gone and so is our confidence in the
    /// field values.
    pub(crate) fn mark_disconnected(&mut self) {
        self.connected = false;
        self.last_sync = None;
    }
}

/// Snapshot emitted on every observed change, consumed by the topic mapper.
#[derive(Debug, Clone)]
pub struct StateEvent {
    pub pump_id: String,
    pub state: DeviceState,
}
