//! Capability checks consulted before privileged operations.

use std::collections::{HashMap, HashSet};
use std::fmt;

/// Capability required to change connection-wide settings or credentials.
pub const CAP_USE_DB: &str = "use_db";

/// The identity on whose behalf the database object acts.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Principal(String);

impl Principal {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Answers whether a principal holds a named capability.
pub trait CapabilityChecker {
    fn has_capability(&self, principal: &Principal, capability: &str) -> bool;
}

impl<F> CapabilityChecker for F
where
    F: Fn(&Principal, &str) -> bool,
{
    fn has_capability(&self, principal: &Principal, capability: &str) -> bool {
        self(principal, capability)
    }
}

/// Grants every capability to everyone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl CapabilityChecker for AllowAll {
    fn has_capability(&self, _: &Principal, _: &str) -> bool {
        true
    }
}

/// A fixed grant table.
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    grants: HashMap<Principal, HashSet<String>>,
}

impl StaticCapabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant(mut self, principal: &Principal, capability: impl Into<String>) -> Self {
        self.grants
            .entry(principal.clone())
            .or_default()
            .insert(capability.into());
        self
    }
}

impl CapabilityChecker for StaticCapabilities {
    fn has_capability(&self, principal: &Principal, capability: &str) -> bool {
        self.grants
            .get(principal)
            .is_some_and(|caps| caps.contains(capability))
    }
}

/// A principal bundled with the checker that vouches for it.
pub struct Authorizer {
    principal: Principal,
    checker: Box<dyn CapabilityChecker>,
}

impl fmt::Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    pub fn new(principal: Principal, checker: impl CapabilityChecker + 'static) -> Self {
        Self {
            principal,
            checker: Box::new(checker),
        }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn allows(&self, capability: &str) -> bool {
        self.checker.has_capability(&self.principal, capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_capabilities() {
        let admin = Principal::new("admin");
        let guest = Principal::new("guest");
        let caps = StaticCapabilities::new().grant(&admin, CAP_USE_DB);

        assert!(caps.has_capability(&admin, CAP_USE_DB));
        assert!(!caps.has_capability(&admin, "manage_options"));
        assert!(!caps.has_capability(&guest, CAP_USE_DB));
    }

    #[test]
    fn test_closure_checker() {
        let auth = Authorizer::new(Principal::new("svc"), |p: &Principal, cap: &str| {
            p.name() == "svc" && cap == CAP_USE_DB
        });
        assert!(auth.allows(CAP_USE_DB));
        assert!(!auth.allows("other"));
    }

    #[test]
    fn test_allow_all() {
        let auth = Authorizer::new(Principal::new("anyone"), AllowAll);
        assert!(auth.allows(CAP_USE_DB));
    }
}
