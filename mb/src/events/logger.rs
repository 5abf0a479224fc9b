//! Event logger - persists bridge events to per-node JSONL files
//!
//! Events land in `{events_dir}/{node_id}/events.jsonl`.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyre::Context;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use super::bus::EventBus;
use super::types::{BridgeEvent, EventLogEntry};

pub struct EventLogger {
    events_dir: PathBuf,
    writers: HashMap<String, BufWriter<File>>,
}

impl EventLogger {
    pub fn new(events_dir: impl AsRef<Path>) -> Self {
        let events_dir = events_dir.as_ref().to_path_buf();
        debug!(?events_dir, "EventLogger::new: creating logger");
        Self {
            events_dir,
            writers: HashMap::new(),
        }
    }

    /// Append an event to its node's log file
    pub fn write_event(&mut self, event: &BridgeEvent) -> eyre::Result<()> {
        let node_id = event.node_id();
        debug!(%node_id, event_type = event.event_type(), "EventLogger::write_event");

        if !self.writers.contains_key(node_id) {
            matterstore::validate_id(node_id).context("Refusing to log event")?;
            let node_dir = self.events_dir.join(node_id);
            fs::create_dir_all(&node_dir).context(format!("Failed to create {}", node_dir.display()))?;
            let log_path = node_dir.join("events.jsonl");
            debug!(?log_path, "EventLogger: creating new log file");
            let file = OpenOptions::new().create(true).append(true).open(&log_path)?;
            self.writers.insert(node_id.to_string(), BufWriter::new(file));
        }
        let Some(writer) = self.writers.get_mut(node_id) else {
            return Err(eyre::eyre!("No writer for node {}", node_id));
        };

        let json = serde_json::to_string(&EventLogEntry::new(event.clone()))?;
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Drop the writer for a node that has been torn down
    pub fn close_node(&mut self, node_id: &str) {
        debug!(%node_id, "EventLogger::close_node");
        if let Some(mut writer) = self.writers.remove(node_id) {
            let _ = writer.flush();
        }
    }

    /// Consume events from the bus until it closes
    pub async fn run(mut self, event_bus: Arc<EventBus>) {
        debug!("EventLogger::run: starting event logger");
        let rx = event_bus.subscribe();
        drop(event_bus);
        self.consume(rx).await;
    }

    async fn consume(&mut self, mut rx: broadcast::Receiver<BridgeEvent>) {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let node_id = event.node_id().to_string();
                    let torn_down = matches!(event, BridgeEvent::TornDown { .. });
                    if let Err(e) = self.write_event(&event) {
                        error!(%node_id, error = %e, "EventLogger: failed to write event");
                    }
                    if torn_down {
                        self.close_node(&node_id);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "EventLogger: lagged behind, missed events");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("EventLogger: channel closed, shutting down");
                    break;
                }
            }
        }

        for (node_id, mut writer) in self.writers.drain() {
            debug!(%node_id, "EventLogger: flushing writer on shutdown");
            let _ = writer.flush();
        }
    }
}

/// Read back a node's event log
pub fn read_node_events(events_dir: impl AsRef<Path>, node_id: &str) -> eyre::Result<Vec<EventLogEntry>> {
    matterstore::validate_id(node_id)?;
    let log_path = events_dir.as_ref().join(node_id).join("events.jsonl");
    debug!(?log_path, "read_node_events: reading log file");

    if !log_path.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read_to_string(&log_path)?;
    let mut entries = Vec::new();
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str::<EventLogEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!(line, error = %e, "read_node_events: failed to parse line"),
        }
    }
    debug!(count = entries.len(), "read_node_events: loaded entries");
    Ok(entries)
}

/// Spawn the event logger as a background task
pub fn spawn_event_logger(event_bus: Arc<EventBus>, events_dir: &Path) -> eyre::Result<tokio::task::JoinHandle<()>> {
    fs::create_dir_all(events_dir).context(format!("Failed to create {}", events_dir.display()))?;
    let logger = EventLogger::new(events_dir);
    Ok(tokio::spawn(async move {
        logger.run(event_bus).await;
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::TeardownMode;
    use tempfile::tempdir;

    fn error_event(node: &str) -> BridgeEvent {
        BridgeEvent::NodeError {
            node_id: node.to_string(),
            message: "Matter server srv not found".to_string(),
        }
    }

    #[test]
    fn test_write_event_per_node() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());

        logger.write_event(&error_event("lamp")).unwrap();
        logger.write_event(&error_event("lamp")).unwrap();
        logger.write_event(&error_event("plug")).unwrap();

        let lamp = fs::read_to_string(temp.path().join("lamp").join("events.jsonl")).unwrap();
        assert_eq!(lamp.lines().count(), 2);
        assert!(temp.path().join("plug").join("events.jsonl").exists());
    }

    #[test]
    fn test_path_like_node_id_refused() {
        let temp = tempdir().unwrap();
        let events_dir = temp.path().join("events");
        let mut logger = EventLogger::new(&events_dir);

        assert!(logger.write_event(&error_event("../x")).is_err());
        assert!(!temp.path().join("x").exists());
        assert!(logger.writers.is_empty());
        assert!(read_node_events(&events_dir, "../x").is_err());
    }

    #[test]
    fn test_read_node_events() {
        let temp = tempdir().unwrap();
        let mut logger = EventLogger::new(temp.path());
        logger.write_event(&error_event("lamp")).unwrap();
        logger
            .write_event(&BridgeEvent::TornDown {
                node_id: "lamp".to_string(),
                mode: TeardownMode::Stop,
            })
            .unwrap();

        let entries = read_node_events(temp.path(), "lamp").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].event.event_type(), "NodeError");
        assert_eq!(entries[1].event.event_type(), "TornDown");
        assert!(read_node_events(temp.path(), "missing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_closes_on_teardown() {
        let temp = tempdir().unwrap();
        let bus = Arc::new(EventBus::new(16));
        let mut logger = EventLogger::new(temp.path());
        let rx = bus.subscribe();
        let emitter = bus.emitter_for("srv");
        emitter.error("boom");
        emitter.torn_down(TeardownMode::Stop);
        drop(emitter);
        drop(bus);

        logger.consume(rx).await;
        assert!(logger.writers.is_empty());
        assert_eq!(read_node_events(temp.path(), "srv").unwrap().len(), 2);
    }
}
