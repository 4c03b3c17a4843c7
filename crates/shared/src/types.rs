//! Types shared across crates

use serde::{Deserialize, Serialize};

/// Normalized email address acting as the entitlement key.
///
/// All entitlement rows (credit batches, quota counters, unlimited grants)
/// are keyed by this value, so normalization must happen exactly once, at
/// the boundary. `"  Jane.Doe@Example.COM "` and `"jane.doe@example.com"`
/// must charge the same ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct Identity(String);

impl Identity {
    /// Normalize a raw email address: trim whitespace and case-fold.
    pub fn normalize(raw: &str) -> Self {
        Self(raw.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the address is empty after normalization.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
