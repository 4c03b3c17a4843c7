//! Application state

use std::sync::Arc;

use lotlens_entitlement::EntitlementService;
use lotlens_pipeline::PipelineClient;
use sqlx::PgPool;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub entitlement: Arc<EntitlementService>,
    /// Analysis pipeline client. None when PIPELINE_API_KEY is not set;
    /// analyses then take the fallback path instead of failing.
    pub pipeline: Option<Arc<PipelineClient>>,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let entitlement = Arc::new(EntitlementService::from_env(pool.clone())?);
        tracing::info!("Entitlement service initialized");

        let pipeline = match PipelineClient::from_env() {
            Ok(client) => {
                tracing::info!(model = client.model(), "Analysis pipeline client initialized");
                Some(Arc::new(client))
            }
            Err(e) => {
                tracing::warn!("Analysis pipeline not configured: {}", e);
                None
            }
        };

        Ok(Self {
            pool,
            config,
            entitlement,
            pipeline,
        })
    }
}
