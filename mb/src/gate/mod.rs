//! Startup gates
//!
//! A gate owns one protocol resource and defers its start until every node
//! that declared itself a participant has registered, or until a deadline.
//! Participants that miss the deadline are told they are unreachable and the
//! resource starts degraded. Whatever happens, the start runs at most once and
//! its outcome is replayed to every subscriber.
//!
//! # Architecture
//!
//! ```text
//!   participants ──register──▶ GateHandle ──mpsc──▶ StartupGate (task)
//!                                                     │  RegistrationMap ─ listener ─▶ Notify
//!                                                     │  deadline (sleep_until)
//!                                                     ▼
//!                                              ManagedResource::start (once)
//!                                                     │
//!                         ResourceWaiter ◀──watch── ResourceBroadcaster
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let participants = ParticipantFilter::server("srv").resolve(&flow.nodes);
//! let (gate, handle) = StartupGate::new("srv", GateConfig::default(), server, participants, emitter);
//! gate.spawn();
//!
//! handle.register_with("lamp", Some(ServerChild::Endpoint(endpoint)), None).await?;
//! let server = handle.started().await?;
//! ```

mod broadcaster;
mod config;
mod core;
mod handle;
mod lifecycle;
mod messages;
mod registry;
mod resolver;

#[cfg(test)]
pub mod mock;

pub use broadcaster::{ResourceBroadcaster, ResourceWaiter};
pub use config::GateConfig;
pub use core::StartupGate;
pub use handle::GateHandle;
pub use lifecycle::{Dependent, Lifecycle, TeardownMode, TeardownReport};
pub use messages::{
    GateError, GateMetrics, GateRequest, GateState, GateStatus, RegistrationOutcome, StartError, StartMode,
    StartTrigger,
};
pub use registry::{ListenerId, RegistrationMap, RegistrationSnapshot, RegistryError, SetOutcome};
pub use resolver::{ParticipantFilter, resolve_participants};
