//! Translation between pump state and bus topics, in both directions.
//!
//! Pure mapping logic, no I/O: state snapshots become per-field publishes
//! (plus a one-time discovery announcement per pump), and inbound `/set`
//! messages become validated [`FieldCommand`](crate::session::FieldCommand)s.
//! The dispatch loops that move data through these functions live in `main`.
//!
//! Topic convention, bit-exact:
//!
//! ```text
//! {root}/{pump_id}/{field}        outbound state   (power, flow, frequency,
//! {root}/{pump_id}/{field}/set    inbound command   mode, feed, connected)
//! ```

pub mod inbound;
pub mod outbound;
pub mod topics;

pub use inbound::{decode_payload, MapperError};
pub use outbound::{discovery_messages, state_messages, BusMessage};
pub use topics::{
    availability_topic, command_filter, command_topic, parse_command_topic, state_topic,
    InboundCommand, TopicField,
};
