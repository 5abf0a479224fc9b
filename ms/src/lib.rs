//! MatterStore - per-resource storage namespaces
//!
//! Every protocol resource (server, aggregator, device) persists its pairing
//! state in a namespace of its own. Namespaces are addressed by the owning
//! resource's identifier and never overlap, so erasing one can never touch a
//! sibling even though all of them share a single storage root.
//!
//! # Architecture
//!
//! ```text
//! {root}/
//! ├── servers/
//! │   └── {server_id}/
//! │       └── state.json
//! ├── aggregators/
//! │   └── {aggregator_id}/
//! │       └── state.json
//! └── devices/
//!     └── {device_id}/
//!         └── state.json
//! ```
//!
//! # Example
//!
//! ```ignore
//! use matterstore::{NamespaceKind, StorageRoot};
//!
//! let root = StorageRoot::open("/var/lib/matterbridge")?;
//! let ns = root.namespace(NamespaceKind::Server, "server-1")?;
//! ns.set("commissioned", &true)?;
//! assert_eq!(ns.get::<bool>("commissioned")?, Some(true));
//! ns.destroy()?;
//! ```

mod store;

pub use store::{Namespace, NamespaceKind, StateDocument, StorageRoot, StoreError, validate_id};

/// File name of the key/value document inside a namespace
pub const STATE_FILE: &str = "state.json";

/// File name of the advisory lock inside a namespace
pub const LOCK_FILE: &str = ".lock";
