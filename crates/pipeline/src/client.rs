//! Analysis pipeline client
//!
//! Talks to an OpenAI-compatible chat-completions API. Each operation
//! (extract, price, checklist) is an independent call; the caller composes
//! partial results. Calls are retried with exponential backoff, but only
//! for transient failure classes - a 4xx or a malformed body fails fast.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::RetryIf;

use crate::error::{PipelineError, PipelineResult};
use crate::types::{ChecklistItem, ExtractedListing, ListingFields, PriceBand, RiskFinding};

/// Retry attempts per call (initial try plus two retries).
const RETRY_ATTEMPTS: usize = 2;

const EXTRACT_SYSTEM: &str = "You analyse used-vehicle listings. Extract structured fields and \
    risk findings from the listing text. Respond with a single JSON object: \
    {\"fields\": {\"make\", \"model\", \"year\", \"mileage_km\", \"asking_price_cents\", \
    \"fuel_type\", \"transmission\", \"first_registration\", \"seller_type\"}, \
    \"risks\": [{\"severity\": \"low\"|\"medium\"|\"high\", \"title\", \"detail\"}]}. \
    Omit fields you cannot determine.";

const PRICE_SYSTEM: &str = "You estimate fair market prices for used vehicles. Given extracted \
    listing fields as JSON, respond with a single JSON object: \
    {\"low_cents\", \"high_cents\", \"currency\", \"rationale\"}.";

const CHECKLIST_SYSTEM: &str = "You prepare pre-purchase inspection checklists for used vehicles. \
    Given extracted fields and risk findings as JSON, respond with a single JSON object: \
    {\"items\": [{\"area\", \"instruction\"}]}. Order items by importance.";

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub request_timeout: Duration,
}

impl PipelineConfig {
    /// Read `PIPELINE_API_KEY` (required), `PIPELINE_BASE_URL` and
    /// `PIPELINE_MODEL` (both defaulted) from the environment.
    pub fn from_env() -> PipelineResult<Self> {
        let api_key = std::env::var("PIPELINE_API_KEY")
            .map_err(|_| PipelineError::Config("PIPELINE_API_KEY not set".to_string()))?;

        let base_url = std::env::var("PIPELINE_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com".to_string());
        let model =
            std::env::var("PIPELINE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            api_key,
            base_url,
            model,
            request_timeout: Duration::from_secs(30),
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChecklistEnvelope {
    #[serde(default)]
    items: Vec<ChecklistItem>,
}

/// Client for the analysis pipeline collaborator.
#[derive(Clone)]
pub struct PipelineClient {
    http: reqwest::Client,
    config: PipelineConfig,
}

impl PipelineClient {
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> PipelineResult<Self> {
        Self::new(PipelineConfig::from_env()?)
    }

    /// Model identifier recorded alongside successful analyses.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Extract structured fields and risk findings from listing text.
    /// This is the primary call; its failure sends the request down the
    /// fallback path.
    pub async fn extract(&self, listing_text: &str) -> PipelineResult<ExtractedListing> {
        let content = self.chat_with_retry(EXTRACT_SYSTEM, listing_text).await?;
        parse_content(&content, "extraction")
    }

    /// Estimate a fair-price band from extracted fields. Secondary call:
    /// the gateway degrades to no price band when this fails.
    pub async fn estimate_price(&self, fields: &ListingFields) -> PipelineResult<PriceBand> {
        let user = serde_json::to_string(fields)
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;
        let content = self.chat_with_retry(PRICE_SYSTEM, &user).await?;
        parse_content(&content, "price estimate")
    }

    /// Generate an inspection checklist. Secondary call, same degradation
    /// contract as the price estimate.
    pub async fn generate_checklist(
        &self,
        fields: &ListingFields,
        risks: &[RiskFinding],
    ) -> PipelineResult<Vec<ChecklistItem>> {
        let user = serde_json::to_string(&serde_json::json!({
            "fields": fields,
            "risks": risks,
        }))
        .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;

        let content = self.chat_with_retry(CHECKLIST_SYSTEM, &user).await?;
        let envelope: ChecklistEnvelope = parse_content(&content, "checklist")?;
        Ok(envelope.items)
    }

    /// 100ms, 1s, capped at 5s.
    fn retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(10)
            .factor(10)
            .max_delay(Duration::from_secs(5))
            .take(RETRY_ATTEMPTS)
    }

    async fn chat_with_retry(&self, system: &str, user: &str) -> PipelineResult<String> {
        RetryIf::spawn(
            self.retry_strategy(),
            || self.chat(system, user),
            |err: &PipelineError| {
                let transient = err.is_transient();
                if transient {
                    tracing::warn!(error = %err, "Transient pipeline failure, retrying");
                }
                transient
            },
        )
        .await
    }

    async fn chat(&self, system: &str, user: &str) -> PipelineResult<String> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": self.config.model,
                "temperature": 0,
                "response_format": { "type": "json_object" },
                "messages": [
                    { "role": "system", "content": system },
                    { "role": "user", "content": user },
                ],
            }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(PipelineError::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PipelineError::Api {
                status: status.as_u16(),
                message: truncate(&message, 200),
            });
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::MalformedResponse(e.to_string()))?;

        body.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| PipelineError::MalformedResponse("response has no choices".to_string()))
    }
}

fn parse_content<T: DeserializeOwned>(content: &str, what: &str) -> PipelineResult<T> {
    serde_json::from_str(content).map_err(|e| {
        tracing::warn!(what = what, error = %e, "Pipeline returned undecodable content");
        PipelineError::MalformedResponse(format!("{}: {}", what, e))
    })
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(url: &str) -> PipelineClient {
        PipelineClient::new(PipelineConfig {
            api_key: "test-key".to_string(),
            base_url: url.to_string(),
            model: "test-model".to_string(),
            request_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn chat_body(content: &str) -> String {
        serde_json::json!({
            "choices": [ { "message": { "role": "assistant", "content": content } } ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn extract_parses_model_content() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_body(
                r#"{"fields":{"make":"Skoda","year":2016},"risks":[{"severity":"medium","title":"Odometer gap","detail":"Service history skips 2019-2021."}]}"#,
            ))
            .expect(1)
            .create_async()
            .await;

        let listing = client_for(&server.url())
            .extract("2016 Skoda Octavia, 180k km")
            .await
            .unwrap();

        assert_eq!(listing.fields.make.as_deref(), Some("Skoda"));
        assert_eq!(listing.fields.year, Some(2016));
        assert_eq!(listing.risks.len(), 1);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn server_errors_are_retried_to_exhaustion() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("internal error")
            .expect(1 + RETRY_ATTEMPTS)
            .create_async()
            .await;

        let err = client_for(&server.url()).extract("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::Api { status: 500, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limits_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(429)
            .expect(1 + RETRY_ATTEMPTS)
            .create_async()
            .await;

        let err = client_for(&server.url()).extract("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimited));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_errors_fail_fast() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(400)
            .with_body("bad request")
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server.url()).extract("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::Api { status: 400, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn undecodable_content_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_body("the vehicle looks fine to me"))
            .expect(1)
            .create_async()
            .await;

        let err = client_for(&server.url()).extract("text").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedResponse(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn checklist_unwraps_items_envelope() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(chat_body(
                r#"{"items":[{"area":"brakes","instruction":"Check disc wear front and rear."}]}"#,
            ))
            .create_async()
            .await;

        let items = client_for(&server.url())
            .generate_checklist(&ListingFields::default(), &[])
            .await
            .unwrap();

        assert_eq!(items.len(), 1);
        assert_eq!(items[0].area, "brakes");
    }

    mod config {
        use super::*;
        use serial_test::serial;

        #[test]
        #[serial]
        fn missing_api_key_is_config_error() {
            std::env::remove_var("PIPELINE_API_KEY");
            let err = PipelineConfig::from_env().unwrap_err();
            assert!(matches!(err, PipelineError::Config(_)));
        }

        #[test]
        #[serial]
        fn defaults_apply_when_only_key_is_set() {
            std::env::set_var("PIPELINE_API_KEY", "sk-test");
            std::env::remove_var("PIPELINE_BASE_URL");
            std::env::remove_var("PIPELINE_MODEL");
            let config = PipelineConfig::from_env().unwrap();
            std::env::remove_var("PIPELINE_API_KEY");

            assert_eq!(config.base_url, "https://api.openai.com");
            assert_eq!(config.model, "gpt-4o-mini");
        }
    }
}
