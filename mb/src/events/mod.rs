//! Bridge events
//!
//! Every gate transition, registration outcome, node error and device status
//! change is published on a broadcast bus. Consumers subscribe: device-status
//! nodes render indicators from it and the logger persists it per node.
//!
//! ```text
//!   gates ──┐                      ┌── device-status nodes
//!   nodes ──┼──▶ EventBus ─────────┼── EventLogger ({node}/events.jsonl)
//!   host  ──┘  (broadcast)         └── tests
//! ```

mod bus;
mod logger;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, EventEmitter};
pub use logger::{EventLogger, read_node_events, spawn_event_logger};
pub use types::{BridgeEvent, DeviceState, EventLogEntry, StatusFill, StatusIndicator};
