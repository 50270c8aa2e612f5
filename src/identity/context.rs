use super::Principal;

/// Per-request authorization binding consulted by the storage layer.
///
/// Exactly one context is bound per store session; contexts are never shared
/// or reused across requests. `acting_user=None` with `is_admin=true` is the
/// system binding used by unauthenticated read paths and internal
/// maintenance, mirroring a connection opened without a user.
#[derive(Debug, Clone)]
pub struct AuthzContext {
    pub acting_user: Option<String>,
    pub is_admin: bool,
}

impl AuthzContext {
    /// Admin-equivalent binding for paths with no authenticated caller.
    pub fn system() -> Self {
        Self { acting_user: None, is_admin: true }
    }

    pub fn for_principal(p: &Principal) -> Self {
        Self { acting_user: Some(p.name.clone()), is_admin: p.is_admin }
    }

    pub fn actor(&self) -> Option<&str> {
        self.acting_user.as_deref()
    }

    /// The row-level predicate: a mutation of a record owned by `owner` is
    /// allowed for admins and for the owner, nobody else.
    pub fn allows_mutation_of(&self, owner: &str) -> bool {
        self.is_admin || self.acting_user.as_deref() == Some(owner)
    }
}
