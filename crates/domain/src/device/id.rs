use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

/// Value object representing a device identity
///
/// Rules:
/// - Lowercase hex MAC, exactly 12 hex digits
/// - Immutable; doubles as the device's MQTT client id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Create a new DeviceId with validation
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.len() != 12 {
            return Err(DomainError::BadDeviceId(format!(
                "device id must be 12 hex digits, got {} chars: {id}",
                id.len()
            )));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
        {
            return Err(DomainError::BadDeviceId(format!(
                "device id must be lowercase hex: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for DeviceId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_device_id() {
        let id = DeviceId::new("aabbccddeeff").unwrap();
        assert_eq!(id.as_str(), "aabbccddeeff");
    }

    #[test]
    fn test_device_id_too_short() {
        let result = DeviceId::new("aabbccddeef");
        assert!(matches!(result, Err(DomainError::BadDeviceId(_))));
    }

    #[test]
    fn test_device_id_too_long() {
        let result = DeviceId::new("aabbccddeeff0");
        assert!(matches!(result, Err(DomainError::BadDeviceId(_))));
    }

    #[test]
    fn test_device_id_uppercase_rejected() {
        let result = DeviceId::new("AABBCCDDEEFF");
        assert!(result.is_err());
    }

    #[test]
    fn test_device_id_non_hex_rejected() {
        let result = DeviceId::new("aabbccddeegg");
        assert!(result.is_err());
    }

    #[test]
    fn test_device_id_display() {
        let id = DeviceId::new("001122334455").unwrap();
        assert_eq!(format!("{}", id), "001122334455");
    }

    #[test]
    fn test_device_id_serde_round_trip() {
        let id = DeviceId::new("aabbccddeeff").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"aabbccddeeff\"");
        let back: DeviceId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_device_id_serde_rejects_invalid() {
        let result: std::result::Result<DeviceId, _> = serde_json::from_str("\"not-a-mac\"");
        assert!(result.is_err());
    }
}
