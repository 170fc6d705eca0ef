//! reqwest implementation of the conversation API

use super::error::{ApiError, ApiErrorKind};
use super::types::{RawReply, StartRequest, StepRequest};
use super::ConversationApi;
use crate::config::{ApiVersion, ClientConfig};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;

/// HTTP client for `{base_url}/{version}/...`
pub struct HttpApi {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    version: ApiVersion,
}

impl HttpApi {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let client = Client::builder()
            .build()
            .map_err(|e| ApiError::network(format!("Failed to create HTTP client: {e}")))?;

        tracing::info!(
            base_url = %config.base_url,
            api_version = %config.api_version,
            has_api_key = config.api_key.is_some(),
            "API client initialized"
        );

        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            version: config.api_version,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}/{}", self.base_url, self.version, path)
    }

    fn start_url(&self) -> String {
        match self.version {
            ApiVersion::Flow => format!("{}/flow_intro", self.base_url),
            ApiVersion::V2 | ApiVersion::V3 => self.endpoint("start"),
        }
    }

    fn step_url(&self) -> String {
        match self.version {
            ApiVersion::Flow => format!("{}/flow_step", self.base_url),
            ApiVersion::V2 | ApiVersion::V3 => self.endpoint("message"),
        }
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header("content-type", "application/json");
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    /// Send and return the body of a 2xx response
    async fn execute(&self, url: &str, request: RequestBuilder) -> Result<String, ApiError> {
        let start = std::time::Instant::now();
        let response = self.with_headers(request).send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::network(format!("Request timeout: {e}"))
            } else if e.is_connect() {
                ApiError::network(format!("Connection failed: {e}"))
            } else {
                ApiError::network(format!("Request failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::network(format!("Failed to read response: {e}")))?;

        tracing::debug!(
            url = %url,
            status = status.as_u16(),
            duration_ms = %start.elapsed().as_millis(),
            "API request finished"
        );

        if !status.is_success() {
            return Err(ApiError::from_status(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn post_reply<B: serde::Serialize + Sync>(
        &self,
        url: String,
        body: &B,
    ) -> Result<RawReply, ApiError> {
        let body = self.execute(&url, self.client.post(&url).json(body)).await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::decode(format!("Failed to parse response: {e} - body: {body}")))
    }

    async fn get_json(&self, url: String) -> Result<Value, ApiError> {
        let body = self.execute(&url, self.client.get(&url)).await?;
        serde_json::from_str(&body)
            .map_err(|e| ApiError::decode(format!("Failed to parse response: {e} - body: {body}")))
    }
}

#[async_trait]
impl ConversationApi for HttpApi {
    async fn start(&self, session_id: Option<&str>) -> Result<RawReply, ApiError> {
        self.post_reply(self.start_url(), &StartRequest { session_id })
            .await
    }

    async fn step(
        &self,
        session_id: &str,
        session_token: Option<&str>,
        message: &str,
    ) -> Result<RawReply, ApiError> {
        let request = StepRequest {
            session_id,
            session_token,
            message,
        };
        self.post_reply(self.step_url(), &request).await
    }

    async fn session_info(&self, session_id: &str) -> Result<Value, ApiError> {
        if self.version == ApiVersion::Flow {
            return Err(ApiError::new(
                ApiErrorKind::Status(501),
                "flow protocol has no session endpoint",
            ));
        }
        self.get_json(self.endpoint(&format!("session/{session_id}")))
            .await
    }

    async fn health(&self) -> Result<Value, ApiError> {
        self.get_json(format!("{}/health", self.base_url)).await
    }

    async fn current_protocol_health(&self) -> Result<(), ApiError> {
        let url = format!("{}/{}/health", self.base_url, ApiVersion::V3);
        self.execute(&url, self.client.get(&url)).await.map(|_| ())
    }
}
