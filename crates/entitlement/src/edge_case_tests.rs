// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement Engine
//!
//! Tests critical boundary conditions in:
//! - Consumption source ordering (ENT-R01 to ENT-R06)
//! - FIFO batch draw-down (ENT-F01 to ENT-F03)
//! - Demo quota limits (ENT-Q01 to ENT-Q03)
//! - Plan grant mapping (ENT-P01 to ENT-P03)

#[cfg(test)]
mod resolver_ordering_tests {
    use crate::ledger::CreditBatch;
    use crate::quota::MAX_DEMO;
    use crate::resolver::{decide, Decision, UnlimitedGrant};
    use lotlens_shared::Identity;
    use time::{Duration, OffsetDateTime};
    use uuid::Uuid;

    fn batch(id: u128, remaining: i32, acquired_at: OffsetDateTime) -> CreditBatch {
        CreditBatch {
            batch_id: Uuid::from_u128(id),
            identity: Identity::normalize("buyer@example.com"),
            plan_kind: "single".to_string(),
            credits_remaining: remaining,
            acquired_at,
        }
    }

    // =========================================================================
    // ENT-R01: Unlimited grant outranks a full wallet and a fresh quota
    // =========================================================================
    #[test]
    fn test_unlimited_outranks_credits_and_quota() {
        let now = OffsetDateTime::now_utc();
        let grant = UnlimitedGrant {
            identity: Identity::normalize("buyer@example.com"),
            active: true,
            valid_until: None,
        };
        let decision = decide(false, Some(&grant), now, &[batch(1, 30, now)], 0);
        assert_eq!(decision, Decision::Unlimited);
    }

    // =========================================================================
    // ENT-R02: Grant expiring exactly now is no longer effective
    // =========================================================================
    #[test]
    fn test_grant_expiring_now_is_not_effective() {
        let now = OffsetDateTime::now_utc();
        let grant = UnlimitedGrant {
            identity: Identity::normalize("buyer@example.com"),
            active: true,
            valid_until: Some(now),
        };
        // valid_until must be strictly in the future
        assert_eq!(decide(false, Some(&grant), now, &[], 0), Decision::DemoQuota);
    }

    // =========================================================================
    // ENT-R03: Bypass identity wins even with an inactive grant and no funds
    // =========================================================================
    #[test]
    fn test_bypass_needs_no_ledger_state() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(decide(true, None, now, &[], MAX_DEMO), Decision::Unlimited);
    }

    // =========================================================================
    // ENT-R04: Paid credit outranks remaining demo quota
    // =========================================================================
    #[test]
    fn test_paid_credit_before_demo_quota() {
        let now = OffsetDateTime::now_utc();
        let decision = decide(false, None, now, &[batch(7, 1, now)], 0);
        assert_eq!(decision, Decision::PaidCredit(Uuid::from_u128(7)));
    }

    // =========================================================================
    // ENT-R05: All batches drained, quota at limit - denied with count
    // =========================================================================
    #[test]
    fn test_denied_carries_current_count() {
        let now = OffsetDateTime::now_utc();
        let drained = batch(1, 0, now);
        let decision = decide(false, None, now, &[drained], MAX_DEMO);
        assert_eq!(decision, Decision::Denied { used: MAX_DEMO });
    }

    // =========================================================================
    // ENT-R06: Quota counter past the limit still denies (advisory state)
    // =========================================================================
    #[test]
    fn test_over_limit_counter_denies() {
        let now = OffsetDateTime::now_utc();
        let decision = decide(false, None, now, &[], MAX_DEMO + 2);
        assert_eq!(
            decision,
            Decision::Denied {
                used: MAX_DEMO + 2
            }
        );
    }

    // =========================================================================
    // ENT-F01: Two open batches, t1 < t2 - the t1 batch is drawn first
    // =========================================================================
    #[test]
    fn test_fifo_draws_oldest_first() {
        let now = OffsetDateTime::now_utc();
        let a = batch(1, 1, now - Duration::days(3));
        let b = batch(2, 5, now - Duration::days(1));
        let decision = decide(false, None, now, &[b.clone(), a.clone()], 0);
        assert_eq!(decision, Decision::PaidCredit(a.batch_id));
    }

    // =========================================================================
    // ENT-F02: After the t1 batch hits zero, the next call draws from t2
    // =========================================================================
    #[test]
    fn test_fifo_moves_on_after_exhaustion() {
        let now = OffsetDateTime::now_utc();
        let a = batch(1, 0, now - Duration::days(3));
        let b = batch(2, 5, now - Duration::days(1));
        let decision = decide(false, None, now, &[a, b.clone()], 0);
        assert_eq!(decision, Decision::PaidCredit(b.batch_id));
    }

    // =========================================================================
    // ENT-F03: Same acquisition instant - batch_id makes the order total
    // =========================================================================
    #[test]
    fn test_fifo_is_deterministic_on_ties() {
        let acquired = OffsetDateTime::now_utc();
        let a = batch(10, 2, acquired);
        let b = batch(20, 2, acquired);
        for slice in [&[a.clone(), b.clone()][..], &[b.clone(), a.clone()][..]] {
            assert_eq!(
                decide(false, None, acquired, slice, 0),
                Decision::PaidCredit(a.batch_id)
            );
        }
    }

    // =========================================================================
    // ENT-Q01: count=3 at MAX_DEMO=3 - denied with {count: 3, limit: 3}
    // =========================================================================
    #[test]
    fn test_denial_at_exact_limit() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(MAX_DEMO, 3);
        assert_eq!(decide(false, None, now, &[], 3), Decision::Denied { used: 3 });
    }

    // =========================================================================
    // ENT-Q02: count=2 - one free slot left
    // =========================================================================
    #[test]
    fn test_last_free_slot_is_usable() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(decide(false, None, now, &[], 2), Decision::DemoQuota);
    }

    // =========================================================================
    // ENT-Q03: fresh identity - demo quota available immediately
    // =========================================================================
    #[test]
    fn test_fresh_identity_gets_demo_quota() {
        let now = OffsetDateTime::now_utc();
        assert_eq!(decide(false, None, now, &[], 0), Decision::DemoQuota);
    }
}

#[cfg(test)]
mod plan_grant_tests {
    use crate::plans::PlanKind;

    // =========================================================================
    // ENT-P01: pack5 purchase with no existing batch grants exactly 5
    // =========================================================================
    #[test]
    fn test_pack5_grants_five() {
        assert_eq!(PlanKind::Pack5.credits_granted(), 5);
    }

    // =========================================================================
    // ENT-P02: the grant table is closed - exactly three plans
    // =========================================================================
    #[test]
    fn test_grant_table_is_closed() {
        assert_eq!(PlanKind::ALL.len(), 3);
        let total: i32 = PlanKind::ALL.iter().map(|p| p.credits_granted()).sum();
        assert_eq!(total, 36);
    }

    // =========================================================================
    // ENT-P03: plan names never grant zero or negative credits
    // =========================================================================
    #[test]
    fn test_grants_are_positive() {
        for plan in PlanKind::ALL {
            assert!(plan.credits_granted() > 0, "{} must grant credits", plan);
        }
    }
}
