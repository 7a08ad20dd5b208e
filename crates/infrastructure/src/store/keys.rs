//! Persisted key layout
//!
//! All keys are ASCII and sort lexicographically; timestamps are encoded as
//! fixed-width ISO-8601 UTC milliseconds so key order equals time order.

use chrono::{DateTime, SecondsFormat, Utc};
use domain::device::DeviceId;

fn ts_key(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn identity(mac: &str) -> String {
    format!("identity:{mac}")
}

pub fn device_state(id: &DeviceId) -> String {
    format!("device:{id}:state")
}

pub fn device_attr(id: &DeviceId) -> String {
    format!("device:{id}:attr")
}

pub fn device_presence(id: &DeviceId) -> String {
    format!("device:{id}:presence")
}

pub fn device_prefix(id: &DeviceId) -> String {
    format!("device:{id}:")
}

pub fn topology(tenant: &str, site: &str, ts: DateTime<Utc>) -> String {
    format!("topology:{tenant}:{site}:{}", ts_key(ts))
}

pub fn topology_prefix(tenant: &str, site: &str) -> String {
    format!("topology:{tenant}:{site}:")
}

pub fn connection(id: &str) -> String {
    format!("connection:{id}")
}

pub fn session(id: &str) -> String {
    format!("session:{id}")
}

pub const SESSION_PREFIX: &str = "session:";

pub fn change_set(id: &str) -> String {
    format!("change_set:{id}")
}

pub const CHANGE_SET_PREFIX: &str = "change_set:";

pub fn event(ts: DateTime<Utc>, id: &str) -> String {
    format!("event:{}:{id}", ts_key(ts))
}

pub const EVENT_PREFIX: &str = "event:";

pub fn mqtt_log(ts: DateTime<Utc>, id: &str) -> String {
    format!("mqtt_log:{}:{id}", ts_key(ts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_keys_sort_chronologically() {
        let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 1).unwrap();
        let t3 = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let k1 = event(t1, "a");
        let k2 = event(t2, "a");
        let k3 = event(t3, "a");
        assert!(k1 < k2 && k2 < k3);
    }

    #[test]
    fn test_device_keys() {
        let id = DeviceId::new("aabbccddeeff").unwrap();
        assert_eq!(device_state(&id), "device:aabbccddeeff:state");
        assert!(device_state(&id).starts_with(&device_prefix(&id)));
    }
}
