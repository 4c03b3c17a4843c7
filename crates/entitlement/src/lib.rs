// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LotLens Entitlement Module
//!
//! Decides, for every analysis request, whether the caller may consume the
//! AI pipeline, and reconciles asynchronous payment events into a durable,
//! race-safe credit balance.
//!
//! ## Features
//!
//! - **Credit Ledger**: purchased credit batches, FIFO consumption
//! - **Demo Quota**: fixed free-tier allowance, independent of payment
//! - **Unlimited Grants**: plan flag with optional expiry, operator bypass
//! - **Webhooks**: verified, idempotent payment-event ingestion
//! - **Invariants**: runnable consistency checks over the store
//!
//! All coordination happens through the durable store: there is no
//! in-process lock, and every mutation is a single atomic statement or an
//! explicit transaction, so independent workers stay correct under
//! concurrent requests for the same identity.

pub mod error;
pub mod events;
pub mod invariants;
pub mod ledger;
pub mod plans;
pub mod quota;
pub mod resolver;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Error
pub use error::{EntitlementError, EntitlementResult};

// Events
pub use events::{EventStore, ProcessedEvent};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Ledger
pub use ledger::{CreditBatch, CreditLedger};

// Plans
pub use plans::PlanKind;

// Quota
pub use quota::{QuotaCounter, MAX_DEMO};

// Resolver
pub use resolver::{
    ConsumptionSource, EntitlementResolver, EntitlementState, ResolverConfig, UnlimitedGrant,
};

// Webhooks
pub use webhooks::{IngestOutcome, PaymentCompleted, ProviderConfig, WebhookIngestor};

use sqlx::PgPool;

/// Main entitlement service that combines all entitlement functionality
pub struct EntitlementService {
    pub events: EventStore,
    pub ledger: CreditLedger,
    pub quota: QuotaCounter,
    pub resolver: EntitlementResolver,
    pub webhooks: WebhookIngestor,
    pub invariants: InvariantChecker,
}

impl EntitlementService {
    /// Create a new entitlement service from environment variables
    pub fn from_env(pool: PgPool) -> EntitlementResult<Self> {
        let provider = ProviderConfig::from_env()?;
        let resolver = ResolverConfig::from_env();
        Ok(Self::new(provider, resolver, pool))
    }

    /// Create a new entitlement service with explicit config
    pub fn new(provider: ProviderConfig, resolver: ResolverConfig, pool: PgPool) -> Self {
        Self {
            events: EventStore::new(pool.clone()),
            ledger: CreditLedger::new(pool.clone()),
            quota: QuotaCounter::new(pool.clone()),
            resolver: EntitlementResolver::new(pool.clone(), resolver),
            webhooks: WebhookIngestor::new(provider, pool.clone()),
            invariants: InvariantChecker::new(pool),
        }
    }
}
