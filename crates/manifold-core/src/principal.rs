use serde::{Deserialize, Serialize};

/// The authenticated identity driving a request
///
/// Used for visibility and ownership checks throughout the hub. Where the
/// request carries no identity and anonymous access is configured, the
/// anonymous principal (an admin by policy) is substituted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    /// Opaque principal identifier
    pub id: String,
    /// Human-readable name, defaults to the id
    pub display_name: String,
    /// Admins see every upstream and group regardless of ownership
    pub is_admin: bool,
}

impl Principal {
    /// The anonymous principal used when no authentication is configured
    ///
    /// Anonymous deployments are single-tenant, so the principal carries
    /// admin privilege.
    pub fn anonymous() -> Self {
        Self {
            id: "anonymous".to_string(),
            display_name: "anonymous".to_string(),
            is_admin: true,
        }
    }

    /// A named non-admin principal
    pub fn named(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            is_admin: false,
        }
    }

    /// Whether this principal may see a resource with the given owner
    ///
    /// Admins see everything; others see ownerless (public) resources and
    /// their own.
    pub fn can_see(&self, owner: Option<&str>) -> bool {
        self.is_admin || owner.is_none_or(|o| o == self.id)
    }
}

/// Per-request authentication context handed to the hub by the auth
/// collaborator
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The resolved principal
    pub principal: Principal,
}

impl AuthContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn anonymous() -> Self {
        Self {
            principal: Principal::anonymous(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_is_admin() {
        assert!(Principal::anonymous().is_admin);
    }

    #[test]
    fn admin_sees_everything() {
        let p = Principal::anonymous();
        assert!(p.can_see(None));
        assert!(p.can_see(Some("someone-else")));
    }

    #[test]
    fn non_admin_sees_public_and_own() {
        let p = Principal::named("alice");
        assert!(p.can_see(None));
        assert!(p.can_see(Some("alice")));
        assert!(!p.can_see(Some("bob")));
    }
}
