//! Per-pump connection lifecycle.
//!
//! One session owns one pump: its link, its state machine, its last-known
//! [`DeviceState`]. Sessions run as independent tokio tasks and talk to the
//! rest of the bridge only through channels — commands in, state events out.
//!
//! ```text
//!            CommandRequest (mpsc)            StateEvent (mpsc)
//! mapper ───────────────────────► session ───────────────────► registry
//!                                   │ ▲
//!                                   ▼ │ frames over Link
//!                                  pump
//! ```

pub mod backoff;
pub mod error;
pub mod handle;
pub mod session;
pub mod state;

pub use backoff::Backoff;
pub use error::SessionError;
pub use handle::{CommandRequest, FieldCommand, SessionHandle};
pub use state::{DeviceState, StateEvent};
