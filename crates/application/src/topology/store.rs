//! Topology store
//!
//! Appends discovery/connection snapshots and answers point-in-time graph
//! queries, diffs, path traces, and roaming timelines. History is kept per
//! `(tenant, site)` and persisted under the `topology:` prefix.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::device::Scope;
use domain::topology::{
    ConnectionSnapshot, DiscoverySnapshot, RoamingEvent, TopologyDiff, TopologyEdge, TopologyGraph,
    TopologyNode, WifiClientReport,
};
use infrastructure::store::{keys, kv::KvStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::warn;

use super::roaming::{ClientAssociation, RoamingTracker};

const SNAPSHOTS_PER_SITE: usize = 256;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum StoredSnapshot {
    Discovery(DiscoverySnapshot),
    Connections(ConnectionSnapshot),
}

#[derive(Default)]
struct SiteHistory {
    /// Sorted by ts ascending
    discovery: Vec<DiscoverySnapshot>,
    connections: Vec<ConnectionSnapshot>,
}

pub struct TopologyStore {
    sites: DashMap<(String, String), SiteHistory>,
    roaming: RoamingTracker,
    store: Arc<dyn KvStore>,
}

impl TopologyStore {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            sites: DashMap::new(),
            roaming: RoamingTracker::new(),
            store,
        }
    }

    /// Reload snapshot history from the store
    pub async fn warm_start(&self) -> anyhow::Result<usize> {
        let rows = self.store.scan_prefix("topology:").await?;
        let mut loaded = 0usize;
        for (key, raw) in rows {
            // topology:<tenant>:<site>:<ts>
            let mut parts = key.splitn(4, ':');
            let (_, tenant, site) = (parts.next(), parts.next(), parts.next());
            let (Some(tenant), Some(site)) = (tenant, site) else {
                continue;
            };
            match serde_json::from_str::<StoredSnapshot>(&raw) {
                Ok(snapshot) => {
                    let mut history = self
                        .sites
                        .entry((tenant.to_string(), site.to_string()))
                        .or_default();
                    match snapshot {
                        StoredSnapshot::Discovery(s) => history.discovery.push(s),
                        StoredSnapshot::Connections(s) => history.connections.push(s),
                    }
                    loaded += 1;
                }
                Err(e) => warn!(key = %key, error = %e, "Skipping undecodable snapshot"),
            }
        }
        // Key order guarantees ts order within each kind, but interleaving
        // breaks it across kinds
        for mut entry in self.sites.iter_mut() {
            entry.discovery.sort_by_key(|s| s.ts);
            entry.connections.sort_by_key(|s| s.ts);
        }
        Ok(loaded)
    }

    async fn persist(&self, scope: &Scope, ts: DateTime<Utc>, snapshot: &StoredSnapshot) {
        let key = keys::topology(scope.tenant(), scope.site(), ts);
        match serde_json::to_string(snapshot) {
            Ok(encoded) => {
                if let Err(e) = self.store.put(&key, &encoded).await {
                    warn!(key = %key, error = %e, "Failed to persist topology snapshot");
                }
            }
            Err(e) => warn!(error = %e, "Failed to encode topology snapshot"),
        }
    }

    pub async fn ingest_discovery(
        &self,
        scope: &Scope,
        ts: DateTime<Utc>,
        nodes: Vec<TopologyNode>,
    ) {
        let snapshot = DiscoverySnapshot { ts, nodes };
        {
            let mut history = self
                .sites
                .entry((scope.tenant().to_string(), scope.site().to_string()))
                .or_default();
            let pos = history.discovery.partition_point(|s| s.ts <= ts);
            history.discovery.insert(pos, snapshot.clone());
            if history.discovery.len() > SNAPSHOTS_PER_SITE {
                history.discovery.remove(0);
            }
        }
        self.persist(scope, ts, &StoredSnapshot::Discovery(snapshot))
            .await;
    }

    pub async fn ingest_connections(
        &self,
        scope: &Scope,
        ts: DateTime<Utc>,
        edges: Vec<TopologyEdge>,
    ) {
        let snapshot = ConnectionSnapshot { ts, edges };
        {
            let mut history = self
                .sites
                .entry((scope.tenant().to_string(), scope.site().to_string()))
                .or_default();
            let pos = history.connections.partition_point(|s| s.ts <= ts);
            history.connections.insert(pos, snapshot.clone());
            if history.connections.len() > SNAPSHOTS_PER_SITE {
                history.connections.remove(0);
            }
        }
        self.persist(scope, ts, &StoredSnapshot::Connections(snapshot))
            .await;
    }

    /// Roaming inference entry point for `telemetry/wifi_clients`
    pub fn ingest_wifi_clients(
        &self,
        report: &WifiClientReport,
        ts: DateTime<Utc>,
    ) -> Vec<RoamingEvent> {
        self.roaming.ingest(report, ts)
    }

    /// Latest snapshots with `ts <= at` (or the newest overall)
    pub fn graph_at(&self, scope: &Scope, at: Option<DateTime<Utc>>) -> TopologyGraph {
        let Some(history) = self
            .sites
            .get(&(scope.tenant().to_string(), scope.site().to_string()))
        else {
            return TopologyGraph::default();
        };

        let discovery = match at {
            Some(t) => history.discovery.iter().rev().find(|s| s.ts <= t),
            None => history.discovery.last(),
        };
        let connections = match at {
            Some(t) => history.connections.iter().rev().find(|s| s.ts <= t),
            None => history.connections.last(),
        };

        let instant = match (discovery.map(|s| s.ts), connections.map(|s| s.ts)) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };

        TopologyGraph {
            at: instant,
            nodes: discovery.map(|s| s.nodes.clone()).unwrap_or_default(),
            edges: connections.map(|s| s.edges.clone()).unwrap_or_default(),
        }
    }

    /// Id-level difference between the graphs at two instants
    pub fn diff(&self, scope: &Scope, t1: DateTime<Utc>, t2: DateTime<Utc>) -> TopologyDiff {
        let before = self.graph_at(scope, Some(t1));
        let after = self.graph_at(scope, Some(t2));

        let before_nodes: HashSet<&str> = before.nodes.iter().map(|n| n.id.as_str()).collect();
        let after_nodes: HashSet<&str> = after.nodes.iter().map(|n| n.id.as_str()).collect();
        let before_edges: HashSet<&str> = before.edges.iter().map(|e| e.id.as_str()).collect();
        let after_edges: HashSet<&str> = after.edges.iter().map(|e| e.id.as_str()).collect();

        TopologyDiff {
            added_nodes: after_nodes
                .difference(&before_nodes)
                .map(|s| s.to_string())
                .collect(),
            removed_nodes: before_nodes
                .difference(&after_nodes)
                .map(|s| s.to_string())
                .collect(),
            added_edges: after_edges
                .difference(&before_edges)
                .map(|s| s.to_string())
                .collect(),
            removed_edges: before_edges
                .difference(&after_edges)
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Shortest device-to-device path over the undirected edge table
    pub fn path_trace(
        &self,
        scope: &Scope,
        from: &str,
        to: &str,
        at: Option<DateTime<Utc>>,
    ) -> Option<Vec<String>> {
        let graph = self.graph_at(scope, at);
        if from == to {
            return Some(vec![from.to_string()]);
        }

        let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
        for edge in &graph.edges {
            adjacency.entry(&edge.from).or_default().push(&edge.to);
            adjacency.entry(&edge.to).or_default().push(&edge.from);
        }

        let mut prev: HashMap<&str, &str> = HashMap::new();
        let mut visited: HashSet<&str> = HashSet::from([from]);
        let mut queue: VecDeque<&str> = VecDeque::from([from]);

        while let Some(node) = queue.pop_front() {
            let Some(neighbours) = adjacency.get(node) else {
                continue;
            };
            for &next in neighbours {
                if !visited.insert(next) {
                    continue;
                }
                prev.insert(next, node);
                if next == to {
                    let mut path = vec![to.to_string()];
                    let mut cursor = to;
                    while let Some(p) = prev.get(cursor) {
                        path.push(p.to_string());
                        cursor = p;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    pub fn roaming_history(
        &self,
        client_mac: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<RoamingEvent> {
        self.roaming.history(client_mac, from, to)
    }

    pub fn associations(&self) -> Vec<ClientAssociation> {
        self.roaming.associations()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use infrastructure::store::memory::MemoryKvStore;
    use serde_json::Value;

    fn scope() -> Scope {
        Scope::new("acme", "home-1").unwrap()
    }

    fn node(id: &str) -> TopologyNode {
        TopologyNode {
            id: id.to_string(),
            device_id: None,
            role: None,
            interfaces: Vec::new(),
            routing: Value::Null,
            capabilities: Vec::new(),
        }
    }

    fn edge(id: &str, from: &str, to: &str) -> TopologyEdge {
        TopologyEdge {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            kind: None,
            metrics: Value::Null,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_760_000_000 + secs, 0).unwrap()
    }

    fn store() -> TopologyStore {
        TopologyStore::new(Arc::new(MemoryKvStore::new()))
    }

    #[tokio::test]
    async fn test_graph_at_picks_latest_not_after() {
        let s = store();
        s.ingest_discovery(&scope(), at(0), vec![node("a")]).await;
        s.ingest_discovery(&scope(), at(100), vec![node("a"), node("b")])
            .await;

        let early = s.graph_at(&scope(), Some(at(50)));
        assert_eq!(early.nodes.len(), 1);

        let late = s.graph_at(&scope(), Some(at(200)));
        assert_eq!(late.nodes.len(), 2);

        let latest = s.graph_at(&scope(), None);
        assert_eq!(latest.nodes.len(), 2);
    }

    #[tokio::test]
    async fn test_graph_before_first_snapshot_is_empty() {
        let s = store();
        s.ingest_discovery(&scope(), at(100), vec![node("a")]).await;
        let g = s.graph_at(&scope(), Some(at(50)));
        assert!(g.nodes.is_empty());
        assert!(g.at.is_none());
    }

    #[tokio::test]
    async fn test_diff_between_instants() {
        let s = store();
        s.ingest_discovery(&scope(), at(0), vec![node("a"), node("b")])
            .await;
        s.ingest_discovery(&scope(), at(100), vec![node("b"), node("c")])
            .await;
        s.ingest_connections(&scope(), at(0), vec![edge("e1", "a", "b")])
            .await;
        s.ingest_connections(&scope(), at(100), vec![edge("e2", "b", "c")])
            .await;

        let diff = s.diff(&scope(), at(10), at(110));
        assert_eq!(diff.added_nodes, vec!["c".to_string()]);
        assert_eq!(diff.removed_nodes, vec!["a".to_string()]);
        assert_eq!(diff.added_edges, vec!["e2".to_string()]);
        assert_eq!(diff.removed_edges, vec!["e1".to_string()]);
    }

    #[tokio::test]
    async fn test_path_trace_bfs() {
        let s = store();
        s.ingest_connections(
            &scope(),
            at(0),
            vec![
                edge("e1", "router", "ap1"),
                edge("e2", "ap1", "mesh1"),
                edge("e3", "router", "ap2"),
            ],
        )
        .await;

        let path = s.path_trace(&scope(), "router", "mesh1", None).unwrap();
        assert_eq!(path, vec!["router", "ap1", "mesh1"]);

        assert!(s.path_trace(&scope(), "router", "ghost", None).is_none());
        assert_eq!(
            s.path_trace(&scope(), "ap2", "ap2", None).unwrap(),
            vec!["ap2"]
        );
    }

    #[tokio::test]
    async fn test_warm_start_round_trip() {
        let kv: Arc<MemoryKvStore> = Arc::new(MemoryKvStore::new());
        {
            let s = TopologyStore::new(kv.clone());
            s.ingest_discovery(&scope(), at(0), vec![node("a")]).await;
            s.ingest_connections(&scope(), at(1), vec![edge("e1", "a", "b")])
                .await;
        }

        let s = TopologyStore::new(kv);
        let loaded = s.warm_start().await.unwrap();
        assert_eq!(loaded, 2);
        let g = s.graph_at(&scope(), None);
        assert_eq!(g.nodes.len(), 1);
        assert_eq!(g.edges.len(), 1);
    }
}
