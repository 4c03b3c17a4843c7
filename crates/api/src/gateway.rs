//! Analysis gateway
//!
//! Front door for the one paid operation: charge the caller's entitlement,
//! run the pipeline, persist the result. Charging happens before the
//! pipeline runs and is never refunded; a pipeline failure produces a
//! clearly-tagged fallback record against the consumed unit instead of
//! re-crediting, so retry loops cannot mint free analyses.

use std::sync::Arc;

use lotlens_entitlement::{ConsumptionSource, EntitlementService, EntitlementState};
use lotlens_pipeline::{AnalysisOutput, PipelineClient, FALLBACK_MODEL};
use lotlens_shared::Identity;
use serde::Serialize;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ApiResult;

/// A persisted analysis, as returned to the client.
#[derive(Debug, Serialize)]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub identity: Identity,
    #[serde(flatten)]
    pub source: ConsumptionSource,
    pub output: AnalysisOutput,
    pub model_used: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub entitlement: EntitlementState,
}

pub struct AnalysisGateway {
    pool: PgPool,
    entitlement: Arc<EntitlementService>,
    pipeline: Option<Arc<PipelineClient>>,
}

impl AnalysisGateway {
    pub fn new(
        pool: PgPool,
        entitlement: Arc<EntitlementService>,
        pipeline: Option<Arc<PipelineClient>>,
    ) -> Self {
        Self {
            pool,
            entitlement,
            pipeline,
        }
    }

    /// Run one analysis for `identity` over `listing_text`.
    ///
    /// Order matters: the entitlement charge commits first, then the
    /// pipeline runs. Failures after the charge degrade or fall back but
    /// never error out the request, so the consumed unit always yields a
    /// persisted record.
    pub async fn analyze(
        &self,
        identity: &Identity,
        listing_text: &str,
    ) -> ApiResult<AnalysisRecord> {
        let source = self
            .entitlement
            .resolver
            .resolve_and_charge(identity)
            .await?;

        tracing::info!(
            identity = %identity,
            source = ?source,
            "Analysis request charged"
        );

        let (output, model_used) = self.run_pipeline(listing_text).await;

        let output_json = serde_json::to_value(&output)
            .map_err(|e| anyhow::anyhow!("failed to serialize analysis output: {e}"))?;

        let (id, created_at): (Uuid, OffsetDateTime) = sqlx::query_as(
            r#"
            INSERT INTO analyses (identity, input, output, model_used)
            VALUES ($1, $2, $3, $4)
            RETURNING id, created_at
            "#,
        )
        .bind(identity)
        .bind(listing_text)
        .bind(&output_json)
        .bind(&model_used)
        .fetch_one(&self.pool)
        .await?;

        let entitlement = self.entitlement.resolver.state_for(identity).await?;

        Ok(AnalysisRecord {
            id,
            identity: identity.clone(),
            source,
            output,
            model_used,
            created_at,
            entitlement,
        })
    }

    /// Run the three pipeline calls, degrading per-call.
    ///
    /// Primary extraction failing (or no configured pipeline) yields the
    /// fallback output; a secondary call failing drops only its section.
    async fn run_pipeline(&self, listing_text: &str) -> (AnalysisOutput, String) {
        let Some(pipeline) = &self.pipeline else {
            return (
                AnalysisOutput::fallback("analysis pipeline not configured"),
                FALLBACK_MODEL.to_string(),
            );
        };

        let listing = match pipeline.extract(listing_text).await {
            Ok(listing) => listing,
            Err(e) => {
                tracing::warn!(error = %e, "Listing extraction failed, serving fallback");
                return (
                    AnalysisOutput::fallback(&e.to_string()),
                    FALLBACK_MODEL.to_string(),
                );
            }
        };

        let price = match pipeline.estimate_price(&listing.fields).await {
            Ok(band) => Some(band),
            Err(e) => {
                tracing::warn!(error = %e, "Price estimate failed, degrading output");
                None
            }
        };

        let checklist = match pipeline
            .generate_checklist(&listing.fields, &listing.risks)
            .await
        {
            Ok(items) => Some(items),
            Err(e) => {
                tracing::warn!(error = %e, "Checklist generation failed, degrading output");
                None
            }
        };

        (
            AnalysisOutput::complete(listing, price, checklist),
            pipeline.model().to_string(),
        )
    }
}
