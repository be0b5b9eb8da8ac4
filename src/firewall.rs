use std::net::IpAddr;

use serde::Serialize;
use thiserror::Error;

use crate::database::{AllowlistEntry, FirewallDb, FirewallDbError};

#[derive(Error, Debug)]
pub enum FirewallError {
    #[error("{0}")]
    Validation(&'static str),
    #[error("IP address already exists")]
    AlreadyExists,
    #[error("database error: {0}")]
    Database(#[from] FirewallDbError),
}

#[derive(Serialize, Clone, Copy, PartialEq, Eq, Debug)]
#[serde(rename_all = "snake_case")]
pub enum FirewallMode {
    AllowAll,
    AllowlistActive,
}

#[derive(Serialize)]
pub struct FirewallListData {
    pub mode: FirewallMode,
    pub entries: Vec<AllowlistEntry>,
}

/// Canonicalizes an IP address string. The result is the parser's canonical
/// textual form, so two spellings of the same address always map to the same
/// key. Idempotent on already-canonical input.
pub fn normalize_ip(raw: &str) -> Result<String, FirewallError> {
    let trimmed = raw.trim();

    if trimmed.is_empty() {
        return Err(FirewallError::Validation("IP address is required"));
    }

    trimmed
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .map_err(|_| FirewallError::Validation("Invalid IP address"))
}

/// Allowlist business logic on top of a scoped database handle. Holds no
/// state of its own: the effective mode is derived from the table contents on
/// every call, so a mutation is visible to the very next decision.
pub struct FirewallService {
    db: FirewallDb,
}

impl FirewallService {
    pub fn new(db: FirewallDb) -> Self {
        Self { db }
    }

    pub async fn list_ips(&self) -> Result<FirewallListData, FirewallError> {
        let entries = self.db.allowlist_entries().await?;

        let mode = if entries.is_empty() {
            FirewallMode::AllowAll
        } else {
            FirewallMode::AllowlistActive
        };

        Ok(FirewallListData { mode, entries })
    }

    pub async fn add_ip(&self, raw: &str) -> Result<AllowlistEntry, FirewallError> {
        let normalized = normalize_ip(raw)?;

        // optimization only - the primary key is what actually guarantees
        // uniqueness, two concurrent adds can both pass this check
        if self.db.allowlist_contains(&normalized).await? {
            return Err(FirewallError::AlreadyExists);
        }

        match self.db.insert_allowlist_entry(&normalized).await {
            Ok(entry) => Ok(entry),
            Err(FirewallDbError::Conflict) => Err(FirewallError::AlreadyExists),
            Err(err) => Err(err.into()),
        }
    }

    /// Removes an address, returning whether a row was actually deleted.
    /// Unparsable input is a validation error, not a silent `false`.
    pub async fn remove_ip(&self, raw: &str) -> Result<bool, FirewallError> {
        let normalized = normalize_ip(raw)?;

        Ok(self.db.delete_allowlist_entry(&normalized).await?)
    }

    /// The per-request access decision. An empty allowlist means open mode
    /// and the input is not even inspected. Once any entry exists the check
    /// fails closed: an absent or unparsable address is denied.
    pub async fn is_ip_allowed(&self, ip: Option<&str>) -> Result<bool, FirewallError> {
        let allowlist = self.db.allowlist_ip_addresses().await?;

        if allowlist.is_empty() {
            return Ok(true);
        }

        let Some(ip) = ip else {
            return Ok(false);
        };

        match normalize_ip(ip) {
            Ok(normalized) => Ok(allowlist.contains(&normalized)),
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_accepts_v4_and_v6() {
        assert_eq!(normalize_ip("10.0.0.5").unwrap(), "10.0.0.5");
        assert_eq!(normalize_ip("  10.0.0.5  ").unwrap(), "10.0.0.5");
        assert_eq!(normalize_ip("::1").unwrap(), "::1");
    }

    #[test]
    fn normalize_canonicalizes_v6_spellings() {
        assert_eq!(normalize_ip("2001:0db8::0001").unwrap(), "2001:db8::1");
        assert_eq!(normalize_ip("2001:DB8:0:0:0:0:0:1").unwrap(), "2001:db8::1");
    }

    #[test]
    fn normalize_is_idempotent() {
        for raw in ["10.0.0.5", " 192.168.1.1", "2001:0db8::1", "::FFFF:1.2.3.4"] {
            let once = normalize_ip(raw).unwrap();
            assert_eq!(normalize_ip(&once).unwrap(), once);
        }
    }

    #[test]
    fn normalize_rejects_garbage() {
        for raw in ["", "   ", "\t\n", "not-an-ip", "10.0.0", "10.0.0.256", "1.2.3.4/24"] {
            assert!(
                matches!(normalize_ip(raw), Err(FirewallError::Validation(_))),
                "expected rejection for {raw:?}"
            );
        }
    }
}
