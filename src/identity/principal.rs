use serde::{Deserialize, Serialize};

/// The trusted identity decoded from a verified token's claims segment.
/// Transient: reconstructed on every request, never persisted.
///
/// Field names map onto the wire claims: `sub` is always `"auth"` for tokens
/// issued by the identity service, `name` is the username, `admin` carries
/// the stored administrative flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    #[serde(rename = "sub")]
    pub subject: String,
    pub name: String,
    #[serde(rename = "admin", default)]
    pub is_admin: bool,
}

impl Principal {
    pub fn new(name: impl Into<String>, is_admin: bool) -> Self {
        Self { subject: "auth".to_string(), name: name.into(), is_admin }
    }
}
