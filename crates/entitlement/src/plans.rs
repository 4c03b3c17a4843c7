//! Credit pack plans
//!
//! The plan → credits table is fixed and deliberately tiny. Anything a
//! webhook carries outside this table is rejected with `UnknownPlan` and
//! never applied to the ledger.

use serde::{Deserialize, Serialize};

use crate::error::EntitlementError;

/// A purchasable credit pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanKind {
    Single,
    Pack5,
    Pack30,
}

impl PlanKind {
    pub const ALL: [PlanKind; 3] = [PlanKind::Single, PlanKind::Pack5, PlanKind::Pack30];

    /// Credits granted per purchase of this plan.
    pub fn credits_granted(self) -> i32 {
        match self {
            PlanKind::Single => 1,
            PlanKind::Pack5 => 5,
            PlanKind::Pack30 => 30,
        }
    }

    /// Stable identifier used on the wire and in `credit_batches.plan_kind`.
    pub fn as_str(self) -> &'static str {
        match self {
            PlanKind::Single => "single",
            PlanKind::Pack5 => "pack5",
            PlanKind::Pack30 => "pack30",
        }
    }
}

impl std::str::FromStr for PlanKind {
    type Err = EntitlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "single" => Ok(PlanKind::Single),
            "pack5" => Ok(PlanKind::Pack5),
            "pack30" => Ok(PlanKind::Pack30),
            other => Err(EntitlementError::UnknownPlan(other.to_string())),
        }
    }
}

impl std::fmt::Display for PlanKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grant_table_is_fixed() {
        assert_eq!(PlanKind::Single.credits_granted(), 1);
        assert_eq!(PlanKind::Pack5.credits_granted(), 5);
        assert_eq!(PlanKind::Pack30.credits_granted(), 30);
    }

    #[test]
    fn wire_names_round_trip() {
        for plan in PlanKind::ALL {
            assert_eq!(plan.as_str().parse::<PlanKind>().unwrap(), plan);
        }
    }

    #[test]
    fn unknown_plan_is_rejected() {
        let err = "pack100".parse::<PlanKind>().unwrap_err();
        assert!(matches!(err, EntitlementError::UnknownPlan(p) if p == "pack100"));
    }

    #[test]
    fn serde_uses_wire_names() {
        assert_eq!(serde_json::to_string(&PlanKind::Pack5).unwrap(), "\"pack5\"");
        let parsed: PlanKind = serde_json::from_str("\"pack30\"").unwrap();
        assert_eq!(parsed, PlanKind::Pack30);
    }
}
