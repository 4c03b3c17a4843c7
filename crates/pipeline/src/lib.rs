#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! LotLens analysis pipeline
//!
//! Client for the OpenAI-compatible model API that turns raw listing text
//! into a structured analysis:
//!
//! - **Extraction**: listing fields plus risk findings (primary call)
//! - **Price band**: fair-price estimate from the extracted fields
//! - **Checklist**: pre-purchase inspection steps
//!
//! The secondary calls degrade independently; only the primary extraction
//! failing pushes a request onto the fallback output.

pub mod client;
pub mod error;
pub mod types;

pub use client::{PipelineClient, PipelineConfig};
pub use error::{PipelineError, PipelineResult};
pub use types::{
    AnalysisOutput, ChecklistItem, ExtractedListing, ListingFields, PriceBand, RiskFinding,
    RiskSeverity, FALLBACK_MODEL,
};
