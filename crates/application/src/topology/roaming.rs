//! Roaming inference
//!
//! Runs on every `telemetry/wifi_clients` report. Per client MAC the tracker
//! keeps the single current association; a report from a different BSSID
//! within the roam window becomes a RoamingEvent classified smooth, delayed,
//! or flapping. The initial join counts as a transition for the flapping
//! window.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use domain::topology::{RoamQuality, RoamingEvent, WifiClientReport};
use std::collections::VecDeque;
use tracing::debug;

const ROAM_WINDOW_SECS: i64 = 10;
const SMOOTH_JOIN_SECS: i64 = 2;
const SMOOTH_RSSI_GAIN_DB: i32 = 5;
const FLAP_WINDOW_SECS: i64 = 60;
const FLAP_TRANSITIONS: usize = 3;
const HISTORY_PER_CLIENT: usize = 512;
const TRANSITIONS_PER_CLIENT: usize = 64;

/// Current association of one client MAC
#[derive(Debug, Clone, PartialEq)]
pub struct ClientAssociation {
    pub client_mac: String,
    pub bssid: String,
    pub ts: DateTime<Utc>,
    pub rssi: i32,
}

pub struct RoamingTracker {
    current: DashMap<String, ClientAssociation>,
    /// Timestamps of association changes (joins and roams) per client
    transitions: DashMap<String, VecDeque<DateTime<Utc>>>,
    history: DashMap<String, VecDeque<RoamingEvent>>,
}

impl RoamingTracker {
    pub fn new() -> Self {
        Self {
            current: DashMap::new(),
            transitions: DashMap::new(),
            history: DashMap::new(),
        }
    }

    /// Ingest one AP's client report; returns the roaming events inferred
    pub fn ingest(&self, report: &WifiClientReport, ts: DateTime<Utc>) -> Vec<RoamingEvent> {
        let mut inferred = Vec::new();
        for entry in &report.clients {
            if let Some(event) = self.observe(&entry.mac, &report.bssid, entry.rssi, ts) {
                inferred.push(event);
            }
        }
        inferred
    }

    fn record_transition(&self, client_mac: &str, ts: DateTime<Utc>) -> usize {
        let mut ring = self.transitions.entry(client_mac.to_string()).or_default();
        if ring.len() >= TRANSITIONS_PER_CLIENT {
            ring.pop_front();
        }
        ring.push_back(ts);
        let window_start = ts - Duration::seconds(FLAP_WINDOW_SECS);
        ring.iter().filter(|t| **t >= window_start).count()
    }

    fn observe(
        &self,
        client_mac: &str,
        bssid: &str,
        rssi: i32,
        ts: DateTime<Utc>,
    ) -> Option<RoamingEvent> {
        let prev = match self.current.get(client_mac) {
            Some(slot) => slot.clone(),
            None => {
                // First sighting: the join is transition #1
                self.current.insert(
                    client_mac.to_string(),
                    ClientAssociation {
                        client_mac: client_mac.to_string(),
                        bssid: bssid.to_string(),
                        ts,
                        rssi,
                    },
                );
                self.record_transition(client_mac, ts);
                return None;
            }
        };

        if prev.bssid == bssid {
            // Same AP; keep the freshest sample
            if ts >= prev.ts {
                if let Some(mut slot) = self.current.get_mut(client_mac) {
                    slot.ts = ts;
                    slot.rssi = rssi;
                }
            }
            return None;
        }

        // Tie-break for simultaneous reports: later ts wins; equal ts goes to
        // the stronger signal
        if ts < prev.ts || (ts == prev.ts && rssi <= prev.rssi) {
            debug!(client = %client_mac, "Stale wifi_clients sample ignored");
            return None;
        }

        if let Some(mut slot) = self.current.get_mut(client_mac) {
            slot.bssid = bssid.to_string();
            slot.ts = ts;
            slot.rssi = rssi;
        }
        let transitions_in_window = self.record_transition(client_mac, ts);

        let gap = ts - prev.ts;
        if gap > Duration::seconds(ROAM_WINDOW_SECS) {
            // Too far apart to call it a roam; just a reassociation
            return None;
        }

        let quality = if transitions_in_window >= FLAP_TRANSITIONS {
            RoamQuality::Flapping
        } else if gap <= Duration::seconds(SMOOTH_JOIN_SECS)
            && rssi - prev.rssi >= SMOOTH_RSSI_GAIN_DB
        {
            RoamQuality::Smooth
        } else {
            RoamQuality::Delayed
        };

        let event = RoamingEvent {
            client_mac: client_mac.to_string(),
            from_bssid: prev.bssid,
            to_bssid: bssid.to_string(),
            t_leave: prev.ts,
            t_join: ts,
            rssi_before: prev.rssi,
            rssi_after: rssi,
            quality,
        };

        let mut ring = self.history.entry(client_mac.to_string()).or_default();
        if ring.len() >= HISTORY_PER_CLIENT {
            ring.pop_front();
        }
        ring.push_back(event.clone());
        Some(event)
    }

    /// Roaming timeline for a client, ordered by arrival ts
    pub fn history(
        &self,
        client_mac: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<RoamingEvent> {
        self.history
            .get(client_mac)
            .map(|ring| {
                ring.iter()
                    .filter(|e| e.t_join >= from && e.t_join <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current association table (one BSSID per client at any instant)
    pub fn associations(&self) -> Vec<ClientAssociation> {
        let mut out: Vec<ClientAssociation> =
            self.current.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.client_mac.cmp(&b.client_mac));
        out
    }
}

impl Default for RoamingTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::topology::WifiClientEntry;

    const CLIENT: &str = "11:22:33:44:55:66";

    fn report(bssid: &str, rssi: i32) -> WifiClientReport {
        WifiClientReport {
            bssid: bssid.to_string(),
            clients: vec![WifiClientEntry {
                mac: CLIENT.to_string(),
                rssi,
            }],
        }
    }

    fn at(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(1_760_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_smooth_roam() {
        let tracker = RoamingTracker::new();
        assert!(tracker.ingest(&report("ap-a", -75), at(0)).is_empty());

        let events = tracker.ingest(&report("ap-b", -55), at(1_200));
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.from_bssid, "ap-a");
        assert_eq!(e.to_bssid, "ap-b");
        assert_eq!(e.quality, RoamQuality::Smooth);
        assert_eq!(e.rssi_before, -75);
        assert_eq!(e.rssi_after, -55);
    }

    #[test]
    fn test_delayed_roam() {
        let tracker = RoamingTracker::new();
        tracker.ingest(&report("ap-a", -75), at(0));
        let events = tracker.ingest(&report("ap-b", -55), at(5_000));
        assert_eq!(events[0].quality, RoamQuality::Delayed);
    }

    #[test]
    fn test_weak_gain_within_two_seconds_is_delayed() {
        let tracker = RoamingTracker::new();
        tracker.ingest(&report("ap-a", -60), at(0));
        // Fast but only 3 dB better
        let events = tracker.ingest(&report("ap-b", -57), at(1_000));
        assert_eq!(events[0].quality, RoamQuality::Delayed);
    }

    #[test]
    fn test_gap_beyond_window_is_not_a_roam() {
        let tracker = RoamingTracker::new();
        tracker.ingest(&report("ap-a", -75), at(0));
        let events = tracker.ingest(&report("ap-b", -55), at(11_000));
        assert!(events.is_empty());
        // But the association moved
        assert_eq!(tracker.associations()[0].bssid, "ap-b");
    }

    #[test]
    fn test_join_plus_two_roams_in_window_is_flapping() {
        let tracker = RoamingTracker::new();
        // Join at t=0, A -> B smooth at 1.2s, B -> C at 1.5s is the third
        // transition inside the minute
        tracker.ingest(&report("ap-a", -75), at(0));
        let e1 = tracker.ingest(&report("ap-b", -55), at(1_200));
        assert_eq!(e1[0].quality, RoamQuality::Smooth);
        let e2 = tracker.ingest(&report("ap-c", -80), at(1_500));
        assert_eq!(e2[0].quality, RoamQuality::Flapping);
    }

    #[test]
    fn test_old_join_does_not_count_towards_flapping() {
        let tracker = RoamingTracker::new();
        // The join falls out of the 60 s window before the roams happen, so
        // two roams do not reach the flapping threshold
        tracker.ingest(&report("ap-a", -75), at(0));
        tracker.ingest(&report("ap-a", -74), at(64_000));
        let e1 = tracker.ingest(&report("ap-b", -55), at(65_000));
        assert_eq!(e1[0].quality, RoamQuality::Smooth);
        let e2 = tracker.ingest(&report("ap-a", -50), at(66_000));
        assert_eq!(e2[0].quality, RoamQuality::Smooth);
    }

    #[test]
    fn test_simultaneous_reports_tie_break_on_rssi() {
        let tracker = RoamingTracker::new();
        tracker.ingest(&report("ap-a", -75), at(0));
        // Same instant, weaker: ignored
        assert!(tracker.ingest(&report("ap-b", -80), at(0)).is_empty());
        assert_eq!(tracker.associations()[0].bssid, "ap-a");
        // Same instant, stronger: wins
        let events = tracker.ingest(&report("ap-c", -60), at(0));
        assert_eq!(events.len(), 1);
        assert_eq!(tracker.associations()[0].bssid, "ap-c");
    }

    #[test]
    fn test_single_current_bssid_per_client() {
        let tracker = RoamingTracker::new();
        tracker.ingest(&report("ap-a", -75), at(0));
        tracker.ingest(&report("ap-b", -55), at(1_000));
        tracker.ingest(&report("ap-c", -45), at(2_000));
        let assoc = tracker.associations();
        assert_eq!(assoc.len(), 1);
        assert_eq!(assoc[0].bssid, "ap-c");
    }

    #[test]
    fn test_history_range_query() {
        let tracker = RoamingTracker::new();
        tracker.ingest(&report("ap-a", -75), at(0));
        tracker.ingest(&report("ap-b", -55), at(1_000));
        tracker.ingest(&report("ap-a", -50), at(2_000));

        let all = tracker.history(CLIENT, at(0), at(10_000));
        assert_eq!(all.len(), 2);
        assert!(all[0].t_join <= all[1].t_join);

        let late = tracker.history(CLIENT, at(1_500), at(10_000));
        assert_eq!(late.len(), 1);
    }
}
