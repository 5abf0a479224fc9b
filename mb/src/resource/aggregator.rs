//! Aggregator backend
//!
//! Collects bridged accessories and, once started, turns them into a single
//! commissioning endpoint that the aggregator node publishes on its server.

use std::collections::BTreeMap;

use async_trait::async_trait;
use matterstore::Namespace;
use tracing::{debug, info};

use super::endpoint::{BridgedAccessory, CommissioningEndpoint};
use super::{ManagedResource, ResourceError, ResourceKind};
use crate::flow::{DeviceType, NodeDef};

const ENDPOINT_NUMBERS_KEY: &str = "endpoint-numbers";

/// Endpoint 0 is the root node and 1 the aggregator itself
const FIRST_BRIDGED_ENDPOINT: u16 = 2;

pub struct BridgeAggregator {
    endpoint: CommissioningEndpoint,
    bridged: BTreeMap<String, BridgedAccessory>,
    started: bool,
}

impl BridgeAggregator {
    pub fn new(def: &NodeDef, namespace: Namespace) -> Self {
        debug!(id = %def.id, "BridgeAggregator::new: called");
        let mut endpoint = CommissioningEndpoint::from_def(def, namespace);
        endpoint.device_type = DeviceType::Aggregator;
        Self {
            endpoint,
            bridged: BTreeMap::new(),
            started: false,
        }
    }

    /// Give every accessory an endpoint number, reusing persisted assignments
    fn assign_endpoint_numbers(&mut self) -> Result<(), ResourceError> {
        let namespace = &self.endpoint.namespace;
        let exhausted = || ResourceError::EndpointNumbersExhausted {
            aggregator: self.endpoint.node_id.clone(),
        };
        let mut numbers: BTreeMap<String, u16> = namespace.get(ENDPOINT_NUMBERS_KEY)?.unwrap_or_default();
        // None once the persisted maximum sits at u16::MAX
        let mut next = match numbers.values().max() {
            Some(max) => max.checked_add(1),
            None => Some(FIRST_BRIDGED_ENDPOINT),
        };

        for accessory in self.bridged.values_mut() {
            let number = match numbers.get(&accessory.serial_number) {
                Some(number) => *number,
                None => {
                    let assigned = next.ok_or_else(exhausted)?;
                    next = assigned.checked_add(1);
                    numbers.insert(accessory.serial_number.clone(), assigned);
                    assigned
                }
            };
            accessory.endpoint_number = Some(number);
        }
        namespace.set(ENDPOINT_NUMBERS_KEY, &numbers)?;
        Ok(())
    }
}

#[async_trait]
impl ManagedResource for BridgeAggregator {
    type Child = BridgedAccessory;
    type Handle = CommissioningEndpoint;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Aggregator
    }

    fn attach(&mut self, id: &str, child: BridgedAccessory) -> Result<(), ResourceError> {
        debug!(aggregator = %self.endpoint.node_id, %id, "BridgeAggregator::attach: called");
        if self.started {
            return Err(ResourceError::AlreadyStarted);
        }
        self.bridged.insert(id.to_string(), child);
        Ok(())
    }

    async fn start(&mut self) -> Result<CommissioningEndpoint, ResourceError> {
        if self.started {
            return Err(ResourceError::AlreadyStarted);
        }
        self.assign_endpoint_numbers()?;
        let mut endpoint = self.endpoint.clone();
        endpoint.bridged = self.bridged.values().cloned().collect();
        self.started = true;
        info!(aggregator = %endpoint.node_id, bridged = endpoint.bridged.len(), "Aggregator ready");
        Ok(endpoint)
    }

    async fn stop(&mut self) -> Result<(), ResourceError> {
        debug!(aggregator = %self.endpoint.node_id, "BridgeAggregator::stop: called");
        self.started = false;
        Ok(())
    }

    fn namespace(&self) -> &Namespace {
        &self.endpoint.namespace
    }
}
