//! Topic scheme codec
//!
//! `rtk/v1/{tenant}/{site}/{device_id}/{kind[/subkind]}` — exact segment
//! count, lowercase, hyphenated. Group topics substitute `group/<group_id>`
//! for the device id. Decoding is total: anything that does not match comes
//! back as a typed error carrying the raw string.

use crate::device::{DeviceId, Scope};
use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

pub const TOPIC_ROOT: &str = "rtk";
pub const TOPIC_VERSION: &str = "v1";

/// Command exchange leg
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmdLeg {
    Req,
    Ack,
    Res,
}

impl CmdLeg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Req => "req",
            Self::Ack => "ack",
            Self::Res => "res",
        }
    }
}

/// Topology message channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyChannel {
    Discovery,
    Connections,
}

impl TopologyChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Connections => "connections",
        }
    }
}

/// Recognised topic kinds (the `kind[/subkind]` tail)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    State,
    Attr,
    Lwt,
    Telemetry(String),
    Event(String),
    Topology(TopologyChannel),
    Diagnostics(String),
    Cmd(CmdLeg),
}

impl TopicKind {
    /// Messages on this kind are published with the retain flag
    pub fn retained(&self) -> bool {
        matches!(self, Self::State | Self::Attr | Self::Lwt)
    }

    fn segments(&self) -> (&str, Option<&str>) {
        match self {
            Self::State => ("state", None),
            Self::Attr => ("attr", None),
            Self::Lwt => ("lwt", None),
            Self::Telemetry(metric) => ("telemetry", Some(metric)),
            Self::Event(kind) => ("evt", Some(kind)),
            Self::Topology(ch) => ("topology", Some(ch.as_str())),
            Self::Diagnostics(name) => ("diagnostics", Some(name)),
            Self::Cmd(leg) => ("cmd", Some(leg.as_str())),
        }
    }
}

/// Target of a topic: one device or a device group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Device(DeviceId),
    Group(String),
}

impl Address {
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            Self::Device(id) => Some(id),
            Self::Group(_) => None,
        }
    }
}

/// A fully parsed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub scope: Scope,
    pub address: Address,
    pub kind: TopicKind,
}

fn valid_subkind(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}

impl Topic {
    pub fn device(scope: Scope, device_id: DeviceId, kind: TopicKind) -> Self {
        Self {
            scope,
            address: Address::Device(device_id),
            kind,
        }
    }

    pub fn group(scope: Scope, group_id: impl Into<String>, kind: TopicKind) -> Result<Self> {
        let group_id = group_id.into();
        if !valid_subkind(&group_id) {
            return Err(DomainError::BadGroupId(group_id));
        }
        Ok(Self {
            scope,
            address: Address::Group(group_id),
            kind,
        })
    }

    /// Total decode of a raw topic string
    pub fn parse(raw: &str) -> Result<Self> {
        let bad = || DomainError::BadTopic(raw.to_string());

        if raw.contains('+') || raw.contains('#') {
            // Wildcards belong in subscription patterns, never in publishes
            return Err(bad());
        }

        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() < 6 {
            return Err(bad());
        }
        if segments[0] != TOPIC_ROOT || segments[1] != TOPIC_VERSION {
            return Err(bad());
        }

        let scope = Scope::new(segments[2], segments[3]).map_err(|_| bad())?;

        let (address, kind_segments) = if segments[4] == "group" {
            if segments.len() < 7 {
                return Err(bad());
            }
            let group_id = segments[5];
            if !valid_subkind(group_id) {
                return Err(DomainError::BadGroupId(group_id.to_string()));
            }
            (Address::Group(group_id.to_string()), &segments[6..])
        } else {
            let id = DeviceId::new(segments[4])?;
            (Address::Device(id), &segments[5..])
        };

        let kind = match kind_segments {
            ["state"] => TopicKind::State,
            ["attr"] => TopicKind::Attr,
            ["lwt"] => TopicKind::Lwt,
            ["telemetry", metric] if valid_subkind(metric) => {
                TopicKind::Telemetry((*metric).to_string())
            }
            ["evt", kind] if valid_subkind(kind) => TopicKind::Event((*kind).to_string()),
            ["topology", "discovery"] => TopicKind::Topology(TopologyChannel::Discovery),
            ["topology", "connections"] => TopicKind::Topology(TopologyChannel::Connections),
            ["diagnostics", name] if valid_subkind(name) => {
                TopicKind::Diagnostics((*name).to_string())
            }
            ["cmd", "req"] => TopicKind::Cmd(CmdLeg::Req),
            ["cmd", "ack"] => TopicKind::Cmd(CmdLeg::Ack),
            ["cmd", "res"] => TopicKind::Cmd(CmdLeg::Res),
            _ => return Err(bad()),
        };

        Ok(Self {
            scope,
            address,
            kind,
        })
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{TOPIC_ROOT}/{TOPIC_VERSION}/{}", self.scope)?;
        match &self.address {
            Address::Device(id) => write!(f, "/{id}")?,
            Address::Group(gid) => write!(f, "/group/{gid}")?,
        }
        let (kind, sub) = self.kind.segments();
        write!(f, "/{kind}")?;
        if let Some(sub) = sub {
            write!(f, "/{sub}")?;
        }
        Ok(())
    }
}

/// The controller's default broker subscription set for one scope
///
/// Telemetry fan-in is opt-in per deployment and therefore a parameter.
pub fn subscription_patterns(telemetry: bool) -> Vec<String> {
    let prefix = format!("{TOPIC_ROOT}/{TOPIC_VERSION}/+/+/+");
    let mut patterns = vec![
        format!("{prefix}/state"),
        format!("{prefix}/lwt"),
        format!("{prefix}/attr"),
        format!("{prefix}/evt/#"),
        format!("{prefix}/cmd/ack"),
        format!("{prefix}/cmd/res"),
        format!("{prefix}/topology/#"),
        format!("{prefix}/diagnostics/#"),
    ];
    if telemetry {
        patterns.push(format!("{prefix}/telemetry/#"));
    }
    patterns
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> Scope {
        Scope::new("acme", "home-1").unwrap()
    }

    fn dev() -> DeviceId {
        DeviceId::new("aabbccddeeff").unwrap()
    }

    #[test]
    fn test_encode_simple_kind() {
        let t = Topic::device(scope(), dev(), TopicKind::State);
        assert_eq!(t.to_string(), "rtk/v1/acme/home-1/aabbccddeeff/state");
    }

    #[test]
    fn test_encode_subkind() {
        let t = Topic::device(scope(), dev(), TopicKind::Telemetry("wifi_clients".into()));
        assert_eq!(
            t.to_string(),
            "rtk/v1/acme/home-1/aabbccddeeff/telemetry/wifi_clients"
        );
    }

    #[test]
    fn test_encode_group() {
        let t = Topic::group(scope(), "all-aps", TopicKind::Cmd(CmdLeg::Req)).unwrap();
        assert_eq!(t.to_string(), "rtk/v1/acme/home-1/group/all-aps/cmd/req");
    }

    #[test]
    fn test_round_trip_all_kinds() {
        let kinds = vec![
            TopicKind::State,
            TopicKind::Attr,
            TopicKind::Lwt,
            TopicKind::Telemetry("rssi".into()),
            TopicKind::Event("reboot".into()),
            TopicKind::Topology(TopologyChannel::Discovery),
            TopicKind::Topology(TopologyChannel::Connections),
            TopicKind::Diagnostics("selftest".into()),
            TopicKind::Cmd(CmdLeg::Req),
            TopicKind::Cmd(CmdLeg::Ack),
            TopicKind::Cmd(CmdLeg::Res),
        ];

        for kind in kinds {
            let t = Topic::device(scope(), dev(), kind);
            let encoded = t.to_string();
            let decoded = Topic::parse(&encoded).unwrap();
            assert_eq!(decoded, t, "round trip failed for {encoded}");
            assert_eq!(decoded.to_string(), encoded);
        }
    }

    #[test]
    fn test_parse_rejects_wrong_root() {
        assert!(Topic::parse("mqtt/v1/acme/home-1/aabbccddeeff/state").is_err());
        assert!(Topic::parse("rtk/v2/acme/home-1/aabbccddeeff/state").is_err());
    }

    #[test]
    fn test_parse_rejects_bad_device_id() {
        // 11 and 13 hex digits
        let r = Topic::parse("rtk/v1/acme/home-1/aabbccddeef/state");
        assert!(matches!(r, Err(DomainError::BadDeviceId(_))));
        let r = Topic::parse("rtk/v1/acme/home-1/aabbccddeeff0/state");
        assert!(matches!(r, Err(DomainError::BadDeviceId(_))));
    }

    #[test]
    fn test_parse_rejects_wildcards() {
        assert!(Topic::parse("rtk/v1/acme/home-1/+/state").is_err());
        assert!(Topic::parse("rtk/v1/acme/home-1/aabbccddeeff/evt/#").is_err());
    }

    #[test]
    fn test_parse_rejects_wrong_segment_count() {
        assert!(Topic::parse("rtk/v1/acme/home-1/aabbccddeeff").is_err());
        assert!(Topic::parse("rtk/v1/acme/aabbccddeeff/state").is_err());
        assert!(Topic::parse("rtk/v1/acme/home-1/aabbccddeeff/state/extra").is_err());
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let r = Topic::parse("rtk/v1/acme/home-1/aabbccddeeff/shadow");
        assert!(matches!(r, Err(DomainError::BadTopic(s)) if s.contains("shadow")));
    }

    #[test]
    fn test_parse_rejects_bad_topology_channel() {
        assert!(Topic::parse("rtk/v1/acme/home-1/aabbccddeeff/topology/routes").is_err());
    }

    #[test]
    fn test_retain_policy() {
        assert!(TopicKind::State.retained());
        assert!(TopicKind::Attr.retained());
        assert!(TopicKind::Lwt.retained());
        assert!(!TopicKind::Event("x".into()).retained());
        assert!(!TopicKind::Telemetry("x".into()).retained());
        assert!(!TopicKind::Cmd(CmdLeg::Req).retained());
    }

    #[test]
    fn test_subscription_patterns() {
        let base = subscription_patterns(false);
        assert!(base.contains(&"rtk/v1/+/+/+/state".to_string()));
        assert!(base.contains(&"rtk/v1/+/+/+/cmd/ack".to_string()));
        assert!(!base.iter().any(|p| p.contains("telemetry")));

        let with_tel = subscription_patterns(true);
        assert!(with_tel.contains(&"rtk/v1/+/+/+/telemetry/#".to_string()));
    }
}
