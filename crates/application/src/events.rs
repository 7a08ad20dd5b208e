//! Diagnostic event hub
//!
//! Single sink for every component that raises events. Events are appended
//! to the store under `event:<ts>:<id>` and fanned out to watchers over a
//! broadcast channel (at-least-once; laggards skip to newest).

use async_trait::async_trait;
use domain::event::{DeviceEvent, EventSink};
use infrastructure::store::{keys, kv::KvStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

pub struct EventHub {
    store: Arc<dyn KvStore>,
    tx: broadcast::Sender<DeviceEvent>,
}

impl EventHub {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { store, tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.tx.subscribe()
    }

    /// Events at or after `since`, oldest first (key order is time order)
    pub async fn history(
        &self,
        since: Option<chrono::DateTime<chrono::Utc>>,
    ) -> anyhow::Result<Vec<DeviceEvent>> {
        let rows = self.store.scan_prefix(keys::EVENT_PREFIX).await?;
        let mut events = Vec::with_capacity(rows.len());
        for (_, raw) in rows {
            match serde_json::from_str::<DeviceEvent>(&raw) {
                Ok(event) => {
                    if since.map_or(true, |s| event.ts >= s) {
                        events.push(event);
                    }
                }
                Err(e) => warn!(error = %e, "Skipping undecodable stored event"),
            }
        }
        Ok(events)
    }
}

#[async_trait]
impl EventSink for EventHub {
    async fn emit(&self, event: DeviceEvent) {
        let key = keys::event(event.ts, &Uuid::new_v4().to_string());
        match serde_json::to_string(&event) {
            Ok(encoded) => {
                if let Err(e) = self.store.put(&key, &encoded).await {
                    warn!(error = %e, event_type = %event.event_type, "Failed to persist event");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode event"),
        }
        let _ = self.tx.send(event);
    }
}
