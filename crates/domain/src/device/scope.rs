use crate::error::{DomainError, Result};
use serde::{Deserialize, Serialize};

fn valid_segment(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Addressing scope `(tenant, site)`
///
/// Both segments are mandatory and must match `[a-z0-9-]+`. Together with a
/// DeviceId they form the full addressing tuple used to scope ACLs and
/// subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    tenant: String,
    site: String,
}

impl Scope {
    /// Create a new Scope with validation
    pub fn new(tenant: impl Into<String>, site: impl Into<String>) -> Result<Self> {
        let tenant = tenant.into();
        let site = site.into();

        if !valid_segment(&tenant) {
            return Err(DomainError::BadScope(format!(
                "tenant must match [a-z0-9-]+: {tenant:?}"
            )));
        }
        if !valid_segment(&site) {
            return Err(DomainError::BadScope(format!(
                "site must match [a-z0-9-]+: {site:?}"
            )));
        }

        Ok(Self { tenant, site })
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn site(&self) -> &str {
        &self.site
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.tenant, self.site)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_scope() {
        let scope = Scope::new("acme", "home-01").unwrap();
        assert_eq!(scope.tenant(), "acme");
        assert_eq!(scope.site(), "home-01");
    }

    #[test]
    fn test_empty_tenant_rejected() {
        assert!(Scope::new("", "site").is_err());
    }

    #[test]
    fn test_uppercase_rejected() {
        assert!(Scope::new("Acme", "site").is_err());
    }

    #[test]
    fn test_underscore_rejected() {
        assert!(Scope::new("acme", "site_1").is_err());
    }

    #[test]
    fn test_display() {
        let scope = Scope::new("t1", "s1").unwrap();
        assert_eq!(scope.to_string(), "t1/s1");
    }
}
