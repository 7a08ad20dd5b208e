//! Device registry
//!
//! Materialises retained `state`/`attr` and `lwt`-derived presence into an
//! in-memory map, persisted for warm restart. The registry is the single
//! writer per device; everyone else reads snapshots or subscribes to the
//! typed change streams.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::device::{DeviceAttr, DeviceId, DeviceState, Presence, PresenceStatus};
use domain::event::{DeviceEvent, EventSink};
use infrastructure::store::{keys, kv::KvStore};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Everything the registry tracks for one device
#[derive(Debug, Clone, Default)]
pub struct DeviceRecord {
    pub attr: Option<DeviceAttr>,
    pub state: Option<DeviceState>,
    pub presence: Option<Presence>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_topology_ts: Option<DateTime<Utc>>,
}

impl DeviceRecord {
    pub fn is_online(&self) -> bool {
        self.presence.as_ref().is_some_and(|p| p.is_online())
    }
}

/// Delta delivered on the presence stream
#[derive(Debug, Clone)]
pub struct PresenceChange {
    pub device_id: DeviceId,
    pub presence: Presence,
}

/// Delta delivered on the state stream; `None` means the retained state was
/// cleared
#[derive(Debug, Clone)]
pub struct StateChange {
    pub device_id: DeviceId,
    pub state: Option<DeviceState>,
}

/// Lookup filter for `list`
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub online_only: bool,
    pub capability: Option<String>,
}

pub struct DeviceRegistry {
    devices: DashMap<DeviceId, DeviceRecord>,
    store: Arc<dyn KvStore>,
    events: Arc<dyn EventSink>,
    presence_tx: broadcast::Sender<PresenceChange>,
    state_tx: broadcast::Sender<StateChange>,
}

impl DeviceRegistry {
    pub fn new(store: Arc<dyn KvStore>, events: Arc<dyn EventSink>) -> Self {
        let (presence_tx, _) = broadcast::channel(256);
        let (state_tx, _) = broadcast::channel(256);
        Self {
            devices: DashMap::new(),
            store,
            events,
            presence_tx,
            state_tx,
        }
    }

    /// Rehydrate the in-memory map from the store after a restart
    pub async fn warm_start(&self) -> anyhow::Result<usize> {
        let rows = self.store.scan_prefix("device:").await?;
        let mut loaded = 0usize;
        for (key, raw) in rows {
            // device:<id>:<facet>
            let mut parts = key.splitn(3, ':');
            let (_, id, facet) = (parts.next(), parts.next(), parts.next());
            let (Some(id), Some(facet)) = (id, facet) else {
                continue;
            };
            let Ok(device_id) = DeviceId::new(id) else {
                warn!(key = %key, "Skipping record with bad device id");
                continue;
            };

            let mut record = self.devices.entry(device_id).or_default();
            let ok = match facet {
                "state" => serde_json::from_str::<DeviceState>(&raw)
                    .map(|s| record.state = Some(s))
                    .is_ok(),
                "attr" => serde_json::from_str::<DeviceAttr>(&raw)
                    .map(|a| record.attr = Some(a))
                    .is_ok(),
                "presence" => serde_json::from_str::<Presence>(&raw)
                    .map(|p| record.presence = Some(p))
                    .is_ok(),
                _ => false,
            };
            if ok {
                loaded += 1;
            } else {
                warn!(key = %key, "Skipping undecodable device record");
            }
        }
        info!(records = loaded, "Device registry warm start complete");
        Ok(loaded)
    }

    /// Ingest a retained `state` message. `None` clears the state (retained
    /// empty payload). An uptime regression without a restart bump is
    /// accepted but flagged.
    pub async fn apply_state(&self, device_id: &DeviceId, state: Option<DeviceState>) {
        let mut regression: Option<(u64, u64)> = None;
        {
            let mut record = self.devices.entry(device_id.clone()).or_default();
            if let (Some(old), Some(new)) = (&record.state, &state) {
                if old.uptime_regressed_without_restart(new) {
                    regression = Some((old.uptime_s, new.uptime_s));
                }
            }
            record.state = state.clone();
            record.last_seen = Some(Utc::now());
        }

        if let Some((old_uptime, new_uptime)) = regression {
            self.events
                .emit(DeviceEvent::uptime_regression(
                    device_id.clone(),
                    old_uptime,
                    new_uptime,
                ))
                .await;
        }

        let key = keys::device_state(device_id);
        let persisted = match &state {
            Some(s) => match serde_json::to_string(s) {
                Ok(encoded) => self.store.put(&key, &encoded).await,
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Failed to encode state");
                    Ok(())
                }
            },
            None => self.store.delete(&key).await,
        };
        if let Err(e) = persisted {
            warn!(device_id = %device_id, error = %e, "Failed to persist state");
        }

        let _ = self.state_tx.send(StateChange {
            device_id: device_id.clone(),
            state,
        });
    }

    /// Ingest a retained `attr` message; attrs replace atomically
    pub async fn apply_attr(&self, device_id: &DeviceId, attr: DeviceAttr) {
        {
            let mut record = self.devices.entry(device_id.clone()).or_default();
            record.attr = Some(attr.clone());
            record.last_seen = Some(Utc::now());
        }

        if let Err(e) = infrastructure::store::kv::put_json(
            self.store.as_ref(),
            &keys::device_attr(device_id),
            &attr,
        )
        .await
        {
            warn!(device_id = %device_id, error = %e, "Failed to persist attr");
        }

        // The device MAC doubles as its identity record
        if let Err(e) = self
            .store
            .put(&keys::identity(device_id.as_str()), &format!("\"{device_id}\""))
            .await
        {
            warn!(device_id = %device_id, error = %e, "Failed to persist identity");
        }
    }

    /// Ingest a retained `lwt` message
    pub async fn apply_presence(&self, device_id: &DeviceId, presence: Presence) {
        let mut duplicate = false;
        let mut transition: Option<PresenceStatus> = None;
        {
            let mut record = self.devices.entry(device_id.clone()).or_default();
            let was_online = record.is_online();

            match (&record.presence, &presence) {
                // A second online announce with a newer ts while already
                // online means two transport sessions claimed one DeviceId
                (Some(old), new) if old.is_online() && new.is_online() && new.ts > old.ts => {
                    duplicate = true;
                }
                _ => {}
            }

            record.presence = Some(presence.clone());
            record.last_seen = Some(Utc::now());

            let is_online = record.is_online();
            if was_online != is_online {
                transition = Some(presence.status);
            }
        }

        if duplicate {
            self.events
                .emit(DeviceEvent::duplicate_session(device_id.clone()))
                .await;
        }

        match transition {
            Some(PresenceStatus::Online) => {
                self.events
                    .emit(DeviceEvent::presence_online(device_id.clone()))
                    .await;
            }
            Some(PresenceStatus::Offline) => {
                self.events
                    .emit(DeviceEvent::presence_offline(
                        device_id.clone(),
                        presence.reason.clone(),
                    ))
                    .await;
            }
            None => {}
        }

        if let Err(e) = infrastructure::store::kv::put_json(
            self.store.as_ref(),
            &keys::device_presence(device_id),
            &presence,
        )
        .await
        {
            warn!(device_id = %device_id, error = %e, "Failed to persist presence");
        }

        let _ = self.presence_tx.send(PresenceChange {
            device_id: device_id.clone(),
            presence,
        });
    }

    /// Record activity on any topic of the device
    pub fn touch(&self, device_id: &DeviceId) {
        let mut record = self.devices.entry(device_id.clone()).or_default();
        record.last_seen = Some(Utc::now());
    }

    pub fn set_topology_ts(&self, device_id: &DeviceId, ts: DateTime<Utc>) {
        let mut record = self.devices.entry(device_id.clone()).or_default();
        record.last_topology_ts = Some(ts);
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<DeviceRecord> {
        self.devices.get(device_id).map(|r| r.clone())
    }

    pub fn list(&self, filter: &DeviceFilter) -> Vec<(DeviceId, DeviceRecord)> {
        let mut out: Vec<(DeviceId, DeviceRecord)> = self
            .devices
            .iter()
            .filter(|entry| {
                let record = entry.value();
                if filter.online_only && !record.is_online() {
                    return false;
                }
                if let Some(cap) = &filter.capability {
                    if !record.attr.as_ref().is_some_and(|a| a.has_capability(cap)) {
                        return false;
                    }
                }
                true
            })
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
        out
    }

    /// Snapshot-plus-deltas subscription to presence changes
    pub fn watch_presence(&self) -> (Vec<PresenceChange>, broadcast::Receiver<PresenceChange>) {
        let rx = self.presence_tx.subscribe();
        let snapshot = self
            .devices
            .iter()
            .filter_map(|entry| {
                entry.value().presence.clone().map(|presence| PresenceChange {
                    device_id: entry.key().clone(),
                    presence,
                })
            })
            .collect();
        (snapshot, rx)
    }

    /// Snapshot-plus-deltas subscription to state changes
    pub fn watch_state(&self) -> (Vec<StateChange>, broadcast::Receiver<StateChange>) {
        let rx = self.state_tx.subscribe();
        let snapshot = self
            .devices
            .iter()
            .filter_map(|entry| {
                entry.value().state.clone().map(|state| StateChange {
                    device_id: entry.key().clone(),
                    state: Some(state),
                })
            })
            .collect();
        (snapshot, rx)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::event::NullEventSink;
    use infrastructure::store::memory::MemoryKvStore;

    fn dev() -> DeviceId {
        DeviceId::new("aabbccddeeff").unwrap()
    }

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(MemoryKvStore::new()), Arc::new(NullEventSink))
    }

    #[tokio::test]
    async fn test_state_is_latest_wins() {
        let reg = registry();
        let mut s1 = DeviceState::default();
        s1.uptime_s = 100;
        reg.apply_state(&dev(), Some(s1)).await;

        let mut s2 = DeviceState::default();
        s2.uptime_s = 200;
        reg.apply_state(&dev(), Some(s2)).await;

        assert_eq!(reg.get(&dev()).unwrap().state.unwrap().uptime_s, 200);
    }

    #[tokio::test]
    async fn test_empty_retained_state_clears() {
        let reg = registry();
        reg.apply_state(&dev(), Some(DeviceState::default())).await;
        reg.apply_state(&dev(), None).await;
        assert!(reg.get(&dev()).unwrap().state.is_none());
    }

    #[tokio::test]
    async fn test_presence_flip_emits_offline_event() {
        let store = Arc::new(MemoryKvStore::new());
        let hub = Arc::new(crate::events::EventHub::new(store.clone()));
        let reg = DeviceRegistry::new(store, hub.clone());
        let mut rx = hub.subscribe();

        reg.apply_presence(&dev(), Presence::online(Utc::now())).await;
        let online = rx.recv().await.unwrap();
        assert_eq!(online.event_type, "Presence.Online");

        reg.apply_presence(&dev(), Presence::offline(Utc::now(), None))
            .await;
        let offline = rx.recv().await.unwrap();
        assert_eq!(offline.event_type, "Presence.Offline");
        assert!(!reg.get(&dev()).unwrap().is_online());
    }

    #[tokio::test]
    async fn test_duplicate_online_session_flagged() {
        let store = Arc::new(MemoryKvStore::new());
        let hub = Arc::new(crate::events::EventHub::new(store.clone()));
        let reg = DeviceRegistry::new(store, hub.clone());
        let mut rx = hub.subscribe();

        let t0 = Utc::now();
        reg.apply_presence(&dev(), Presence::online(t0)).await;
        let _ = rx.recv().await.unwrap(); // Presence.Online

        reg.apply_presence(&dev(), Presence::online(t0 + chrono::Duration::seconds(5)))
            .await;
        let dup = rx.recv().await.unwrap();
        assert_eq!(dup.event_type, "Duplicate.Session");
    }

    #[tokio::test]
    async fn test_uptime_regression_flagged_but_accepted() {
        let store = Arc::new(MemoryKvStore::new());
        let hub = Arc::new(crate::events::EventHub::new(store.clone()));
        let reg = DeviceRegistry::new(store, hub.clone());
        let mut rx = hub.subscribe();

        let mut s1 = DeviceState::default();
        s1.uptime_s = 5000;
        reg.apply_state(&dev(), Some(s1)).await;

        let mut s2 = DeviceState::default();
        s2.uptime_s = 60;
        reg.apply_state(&dev(), Some(s2)).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "Suspicious.UptimeRegression");
        // Update accepted regardless
        assert_eq!(reg.get(&dev()).unwrap().state.unwrap().uptime_s, 60);
    }

    #[tokio::test]
    async fn test_warm_start_restores_records() {
        let store: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
        {
            let reg = DeviceRegistry::new(store.clone(), Arc::new(NullEventSink));
            let mut s = DeviceState::default();
            s.uptime_s = 42;
            reg.apply_state(&dev(), Some(s)).await;
            reg.apply_presence(&dev(), Presence::online(Utc::now())).await;
        }

        let reg = DeviceRegistry::new(store, Arc::new(NullEventSink));
        assert!(reg.get(&dev()).is_none());
        let loaded = reg.warm_start().await.unwrap();
        assert!(loaded >= 2);
        let record = reg.get(&dev()).unwrap();
        assert!(record.is_online());
        assert_eq!(record.state.unwrap().uptime_s, 42);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let reg = registry();
        let online = dev();
        let offline = DeviceId::new("001122334455").unwrap();

        reg.apply_presence(&online, Presence::online(Utc::now())).await;
        reg.apply_presence(&offline, Presence::offline(Utc::now(), None))
            .await;
        reg.apply_attr(
            &online,
            serde_json::from_value(serde_json::json!({"capabilities": ["wifi"]})).unwrap(),
        )
        .await;

        let all = reg.list(&DeviceFilter::default());
        assert_eq!(all.len(), 2);

        let online_only = reg.list(&DeviceFilter {
            online_only: true,
            ..Default::default()
        });
        assert_eq!(online_only.len(), 1);
        assert_eq!(online_only[0].0, online);

        let wifi = reg.list(&DeviceFilter {
            capability: Some("wifi".into()),
            ..Default::default()
        });
        assert_eq!(wifi.len(), 1);
    }
}
