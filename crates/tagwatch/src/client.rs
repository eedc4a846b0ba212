//! HTTP client for the tag-prediction inference API.
//!
//! Endpoints (relative to the configured base url):
//! - `GET  api/ping`           connectivity check
//! - `GET  api/model_present`  readiness, `true` once a model is loaded
//! - `POST api/predict`        predict tags for a title
//! - `POST api/correct`        submit corrected tags for retraining

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::VERSION;
use crate::config::ClientConfig;
use crate::error::{ClientError, ConfigError, Result};
use crate::probe::{Probe, ProbeOutcome, classify_error, classify_response};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub title: String,
    pub tags: Vec<String>,
    /// Name of the classifier that produced the tags, when the service reports it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classifier: Option<String>,
}

/// Corrected tags for a title, fed back to the service for retraining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub title: String,
    pub predicted: Vec<String>,
    pub actual: Vec<String>,
}

pub struct InferenceClient {
    base_url: String,
    readiness_path: String,
    client: reqwest::Client,
}

impl InferenceClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        reqwest::Url::parse(&base_url).map_err(|e| ConfigError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;

        let mut headers = HeaderMap::new();
        if let Some(token) = &config.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|_| ConfigError::InvalidAuthToken)?;
            headers.insert(AUTHORIZATION, value);
        }
        if let Ok(value) = HeaderValue::from_str(&format!("tagwatch/{VERSION}")) {
            headers.insert(USER_AGENT, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;

        Ok(Self {
            base_url,
            readiness_path: config.readiness_path.trim_start_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    pub async fn ping(&self) -> Result<()> {
        self.send(self.client.get(self.url("api/ping"))).await?;
        Ok(())
    }

    /// Whether the service has a model loaded.
    pub async fn check_model_presence(&self) -> Result<bool> {
        let response = self
            .send(self.client.get(self.url("api/model_present")))
            .await?;
        let present = response
            .json::<Option<bool>>()
            .await
            .map_err(ClientError::Decode)?;
        Ok(present.unwrap_or(false))
    }

    pub async fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult> {
        tracing::debug!(title = %request.title, "Requesting prediction");
        let response = self
            .send(self.client.post(self.url("api/predict")).json(request))
            .await?;
        let result = response
            .json::<PredictionResult>()
            .await
            .map_err(ClientError::Decode)?;
        tracing::debug!(tags = ?result.tags, "Prediction received");
        Ok(result)
    }

    pub async fn correct_prediction(&self, request: &CorrectionRequest) -> Result<()> {
        tracing::debug!(
            title = %request.title,
            predicted = ?request.predicted,
            actual = ?request.actual,
            "Submitting correction"
        );
        self.send(self.client.post(self.url("api/correct")).json(request))
            .await?;
        Ok(())
    }

    /// Send a request, turning non-2xx responses into [`ClientError::Status`].
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await.map_err(ClientError::Request)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(status = %status, "Inference service returned an error");
        Err(ClientError::Status { status, body })
    }
}

#[async_trait]
impl Probe for InferenceClient {
    async fn check_availability(&self) -> ProbeOutcome {
        let url = self.url(&self.readiness_path);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, url = %url, "Readiness probe request failed");
                return classify_error(&e);
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => return classify_error(&e),
        };

        let outcome = classify_response(status, &body);
        tracing::trace!(status = %status, ?outcome, "Readiness probe");
        outcome
    }
}
