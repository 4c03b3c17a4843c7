#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LotLens shared crate
//!
//! Database pool construction, embedded migrations, and the types that
//! cross crate boundaries (most importantly [`Identity`], the normalized
//! email address every entitlement row is keyed by).

pub mod db;
pub mod types;

pub use db::{create_migration_pool, create_pool, run_migrations};
pub use types::Identity;
