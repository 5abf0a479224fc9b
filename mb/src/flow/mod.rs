//! Flow definitions
//!
//! A flow is the complete, deployed list of node definitions. Every gate
//! resolves its participants from it at construction, so it is loaded once and
//! shared read-only by all nodes.

mod definition;

pub use definition::{DeviceCategory, DeviceType, FlowDefinition, FlowError, NodeDef, NodeKind};
