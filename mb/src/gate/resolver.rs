//! Dependency set resolution
//!
//! Decides, from the complete flow, which nodes a coordinator must wait for
//! before starting its resource.

use std::collections::BTreeSet;

use tracing::debug;

use crate::flow::{DeviceCategory, NodeDef, NodeKind};

/// Collect the ids of every definition matching `predicate`
pub fn resolve_participants<'a, I, P>(defs: I, predicate: P) -> BTreeSet<String>
where
    I: IntoIterator<Item = &'a NodeDef>,
    P: Fn(&NodeDef) -> bool,
{
    defs.into_iter()
        .filter(|def| predicate(*def))
        .map(|def| def.id.clone())
        .collect()
}

/// The participant rules for the two kinds of coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantFilter {
    /// Controllers, aggregators and standalone devices bound to a server
    Server(String),
    /// Aggregated devices bound to an aggregator
    Aggregator(String),
}

impl ParticipantFilter {
    pub fn server(id: impl Into<String>) -> Self {
        Self::Server(id.into())
    }

    pub fn aggregator(id: impl Into<String>) -> Self {
        Self::Aggregator(id.into())
    }

    pub fn matches(&self, def: &NodeDef) -> bool {
        match self {
            Self::Server(id) => {
                def.server.as_deref() == Some(id.as_str())
                    && def.id != *id
                    && match def.kind {
                        NodeKind::Controller | NodeKind::Aggregator => true,
                        NodeKind::Device => def.category == DeviceCategory::Standalone,
                        _ => false,
                    }
            }
            Self::Aggregator(id) => {
                def.aggregator.as_deref() == Some(id.as_str())
                    && def.kind == NodeKind::Device
                    && def.category == DeviceCategory::Aggregated
            }
        }
    }

    pub fn resolve(&self, defs: &[NodeDef]) -> BTreeSet<String> {
        let participants = resolve_participants(defs, |def| self.matches(def));
        debug!(filter = ?self, count = participants.len(), "ParticipantFilter::resolve: resolved");
        participants
    }
}
