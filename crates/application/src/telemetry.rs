//! In-memory telemetry retention
//!
//! A bounded ring per (device, metric) keeps the recent series available to
//! tools as evidence and to the API layer. Telemetry is append-only and
//! never retained on the broker, so the ring is the only hot copy.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use domain::device::DeviceId;
use domain::telemetry::TelemetryPoint;
use std::collections::VecDeque;

const DEFAULT_POINTS_PER_SERIES: usize = 512;

pub struct TelemetrySink {
    series: DashMap<(DeviceId, String), VecDeque<TelemetryPoint>>,
    cap: usize,
}

impl TelemetrySink {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POINTS_PER_SERIES)
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self {
            series: DashMap::new(),
            cap: cap.max(1),
        }
    }

    pub fn ingest(&self, point: TelemetryPoint) {
        let key = (point.device_id.clone(), point.metric.clone());
        let mut ring = self.series.entry(key).or_default();
        if ring.len() >= self.cap {
            ring.pop_front();
        }
        ring.push_back(point);
    }

    pub fn latest(&self, device: &DeviceId, metric: &str) -> Option<TelemetryPoint> {
        self.series
            .get(&(device.clone(), metric.to_string()))
            .and_then(|ring| ring.back().cloned())
    }

    pub fn range(
        &self,
        device: &DeviceId,
        metric: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<TelemetryPoint> {
        self.series
            .get(&(device.clone(), metric.to_string()))
            .map(|ring| {
                ring.iter()
                    .filter(|p| p.ts >= from && p.ts <= to)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl Default for TelemetrySink {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dev() -> DeviceId {
        DeviceId::new("aabbccddeeff").unwrap()
    }

    #[test]
    fn test_ring_caps_series() {
        let sink = TelemetrySink::with_capacity(3);
        for i in 0..5 {
            sink.ingest(TelemetryPoint::new(dev(), "rssi", json!(-50 - i), Utc::now()));
        }
        let latest = sink.latest(&dev(), "rssi").unwrap();
        assert_eq!(latest.value, json!(-54));

        let all = sink.range(
            &dev(),
            "rssi",
            Utc::now() - chrono::Duration::hours(1),
            Utc::now() + chrono::Duration::hours(1),
        );
        assert_eq!(all.len(), 3, "oldest points evicted");
    }

    #[test]
    fn test_series_are_isolated() {
        let sink = TelemetrySink::new();
        sink.ingest(TelemetryPoint::new(dev(), "rssi", json!(-50), Utc::now()));
        assert!(sink.latest(&dev(), "cpu").is_none());
    }
}
