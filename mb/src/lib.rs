//! MatterBridge - readiness-gated smart-home bridge
//!
//! Exposes smart-home flow nodes as devices of a commissioning protocol
//! server. A server or aggregator must not start until the nodes that attach
//! to it have registered, so each one sits behind a startup gate that waits
//! for its participants or a timeout, starts the resource exactly once and
//! hands the result to every node that asks, before or after the start.
//!
//! # Modules
//!
//! - [`gate`] - Startup gate, registration map and lifecycle teardown
//! - [`resource`] - Server and aggregator backends behind `ManagedResource`
//! - [`nodes`] - Flow node kinds
//! - [`host`] - Builds and closes a deployed flow
//! - [`events`] - Event bus and per-node JSONL event log
//! - [`flow`] - Flow definitions and validation
//! - [`http`] - Admin HTTP endpoint
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod events;
pub mod flow;
pub mod gate;
pub mod host;
pub mod http;
pub mod nodes;
pub mod resource;

pub use config::Config;
pub use flow::{FlowDefinition, NodeDef, NodeKind};
pub use gate::{GateHandle, StartupGate};
pub use host::Host;
