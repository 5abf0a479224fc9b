//! Test doubles for gate tests

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use matterstore::{Namespace, NamespaceKind, StorageRoot};

use super::lifecycle::{Dependent, TeardownMode};
use super::messages::GateError;
use crate::resource::{ManagedResource, ResourceError, ResourceKind};

/// Counters that stay observable after the resource moves into a gate
#[derive(Debug, Clone, Default)]
pub struct MockCounters {
    starts: Arc<AtomicU32>,
    stops: Arc<AtomicU32>,
    attached: Arc<Mutex<Vec<String>>>,
}

impl MockCounters {
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn attached(&self) -> Vec<String> {
        self.attached.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle {
    pub id: String,
    pub children: Vec<String>,
}

pub struct MockResource {
    id: String,
    namespace: Namespace,
    counters: MockCounters,
    children: Vec<String>,
    started: bool,
    fail_start: bool,
    fail_stop: bool,
    reject_attach: bool,
    start_delay: Option<Duration>,
    order: Option<Arc<Mutex<Vec<String>>>>,
}

impl MockResource {
    pub fn new(root: &Path, id: &str) -> Self {
        let storage = StorageRoot::open(root).unwrap();
        let namespace = storage.namespace(NamespaceKind::Server, id).unwrap();
        Self {
            id: id.to_string(),
            namespace,
            counters: MockCounters::default(),
            children: Vec::new(),
            started: false,
            fail_start: false,
            fail_stop: false,
            reject_attach: false,
            start_delay: None,
            order: None,
        }
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn rejecting_attach(mut self) -> Self {
        self.reject_attach = true;
        self
    }

    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    pub fn record_stops_into(&mut self, order: Arc<Mutex<Vec<String>>>) {
        self.order = Some(order);
    }

    pub fn counters(&self) -> MockCounters {
        self.counters.clone()
    }

    pub fn stops(&self) -> u32 {
        self.counters.stops()
    }
}

#[async_trait]
impl ManagedResource for MockResource {
    type Child = String;
    type Handle = MockHandle;

    fn kind(&self) -> ResourceKind {
        ResourceKind::Server
    }

    fn attach(&mut self, _id: &str, child: String) -> Result<(), ResourceError> {
        if self.started {
            return Err(ResourceError::AlreadyStarted);
        }
        if self.reject_attach {
            return Err(ResourceError::other(format!("cannot attach {}", child)));
        }
        self.counters.attached.lock().unwrap().push(child.clone());
        self.children.push(child);
        Ok(())
    }

    async fn start(&mut self) -> Result<MockHandle, ResourceError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_start {
            return Err(ResourceError::other("port in use"));
        }
        self.started = true;
        Ok(MockHandle {
            id: self.id.clone(),
            children: self.children.clone(),
        })
    }

    async fn stop(&mut self) -> Result<(), ResourceError> {
        self.counters.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(order) = &self.order {
            order.lock().unwrap().push(format!("{}:stop", self.id));
        }
        self.started = false;
        if self.fail_stop {
            return Err(ResourceError::other("stop failed"));
        }
        Ok(())
    }

    fn namespace(&self) -> &Namespace {
        &self.namespace
    }
}

/// Dependent that records its teardown
pub struct RecordingDependent {
    id: String,
    order: Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl RecordingDependent {
    pub fn new(id: &str, order: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            id: id.to_string(),
            order,
            fail: false,
        }
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl Dependent for RecordingDependent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn teardown(&self, mode: TeardownMode) -> Result<(), GateError> {
        self.order.lock().unwrap().push(format!("{}:{}", self.id, mode));
        if self.fail {
            return Err(GateError::Teardown {
                gate_id: self.id.clone(),
                message: "boom".to_string(),
            });
        }
        Ok(())
    }
}
