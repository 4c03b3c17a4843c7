//! Typed pipeline outputs
//!
//! These are the structures the model is prompted to produce as JSON. The
//! composed [`AnalysisOutput`] is what gets persisted to the analyses
//! record, including the degraded and fallback shapes.

use serde::{Deserialize, Serialize};

/// Model identifier recorded when the pipeline fell back to a stub output.
pub const FALLBACK_MODEL: &str = "fallback";

/// Structured fields extracted from the listing text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListingFields {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub mileage_km: Option<i64>,
    pub asking_price_cents: Option<i64>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub first_registration: Option<String>,
    pub seller_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskSeverity {
    Low,
    Medium,
    High,
}

/// A single red flag the model found in the listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskFinding {
    pub severity: RiskSeverity,
    pub title: String,
    pub detail: String,
}

/// Primary extraction result: fields plus risk findings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedListing {
    #[serde(default)]
    pub fields: ListingFields,
    #[serde(default)]
    pub risks: Vec<RiskFinding>,
}

/// Estimated fair-price band for the vehicle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBand {
    pub low_cents: i64,
    pub high_cents: i64,
    pub currency: String,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// One inspection checklist entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub area: String,
    pub instruction: String,
}

/// The composed analysis result persisted per request.
///
/// `price` and `checklist` are independently optional: a secondary call
/// failing degrades the output instead of failing the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub listing: ExtractedListing,
    pub price: Option<PriceBand>,
    pub checklist: Option<Vec<ChecklistItem>>,
    pub degraded: bool,
    #[serde(default)]
    pub notes: Option<String>,
}

impl AnalysisOutput {
    /// Full result with all three calls succeeded.
    pub fn complete(
        listing: ExtractedListing,
        price: Option<PriceBand>,
        checklist: Option<Vec<ChecklistItem>>,
    ) -> Self {
        let degraded = price.is_none() || checklist.is_none();
        Self {
            listing,
            price,
            checklist,
            degraded,
            notes: None,
        }
    }

    /// Stub output persisted when the primary extraction failed after
    /// exhausting retries. Clearly tagged so it is never mistaken for a
    /// real analysis.
    pub fn fallback(reason: &str) -> Self {
        Self {
            listing: ExtractedListing::default(),
            price: None,
            checklist: None,
            degraded: true,
            notes: Some(format!("automatic analysis unavailable: {}", reason)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_with_all_parts_is_not_degraded() {
        let out = AnalysisOutput::complete(
            ExtractedListing::default(),
            Some(PriceBand {
                low_cents: 1_200_000,
                high_cents: 1_400_000,
                currency: "eur".into(),
                rationale: None,
            }),
            Some(vec![]),
        );
        assert!(!out.degraded);
        assert!(out.notes.is_none());
    }

    #[test]
    fn missing_secondary_marks_degraded() {
        let out = AnalysisOutput::complete(ExtractedListing::default(), None, Some(vec![]));
        assert!(out.degraded);
        assert!(out.price.is_none());
    }

    #[test]
    fn fallback_is_tagged_and_empty() {
        let out = AnalysisOutput::fallback("upstream unavailable");
        assert!(out.degraded);
        assert!(out.listing.risks.is_empty());
        assert!(out.notes.unwrap().contains("upstream unavailable"));
    }

    #[test]
    fn extracted_listing_tolerates_sparse_json() {
        let parsed: ExtractedListing =
            serde_json::from_str(r#"{"fields":{"make":"Skoda"}}"#).unwrap();
        assert_eq!(parsed.fields.make.as_deref(), Some("Skoda"));
        assert!(parsed.risks.is_empty());
    }

    #[test]
    fn risk_severity_uses_lowercase_wire_names() {
        let parsed: RiskSeverity = serde_json::from_str("\"high\"").unwrap();
        assert_eq!(parsed, RiskSeverity::High);
    }
}
