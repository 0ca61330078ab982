//! HTTP transport to the management core.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{CoreClient, CoreEndpoint, CoreError, CoreResult, ServiceRecord, ServiceToken};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct RegisterResponse {
    id: String,
}

/// `CoreClient` speaking the core's management REST API
#[derive(Debug, Clone)]
pub struct HttpCoreClient {
    client: reqwest::Client,
}

impl HttpCoreClient {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn check(endpoint: &CoreEndpoint, response: reqwest::Result<reqwest::Response>) -> CoreResult<reqwest::Response> {
        let response = response.map_err(|e| CoreError::Unreachable {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        Err(CoreError::Rejected {
            status: status.as_u16(),
            message: if message.is_empty() {
                status.canonical_reason().unwrap_or("unknown").to_string()
            } else {
                message
            },
        })
    }
}

impl Default for HttpCoreClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoreClient for HttpCoreClient {
    async fn register(&self, endpoint: &CoreEndpoint, record: &ServiceRecord) -> CoreResult<ServiceToken> {
        let url = format!("{}/foglamp/service", endpoint.base_url());
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(record)
            .send()
            .await;
        let response = Self::check(endpoint, response).await?;

        let body: RegisterResponse = response
            .json()
            .await
            .map_err(|e| CoreError::InvalidResponse(e.to_string()))?;
        Ok(ServiceToken(body.id))
    }

    async fn deregister(&self, endpoint: &CoreEndpoint, token: &ServiceToken) -> CoreResult<()> {
        let url = format!("{}/foglamp/service/{}", endpoint.base_url(), token);
        let response = self.client.delete(&url).timeout(REQUEST_TIMEOUT).send().await;
        match Self::check(endpoint, response).await {
            Ok(_) => Ok(()),
            // Already gone
            Err(CoreError::Rejected { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn register_interest(&self, endpoint: &CoreEndpoint, token: &ServiceToken, category: &str) -> CoreResult<()> {
        let url = format!("{}/foglamp/interest", endpoint.base_url());
        let response = self
            .client
            .post(&url)
            .timeout(REQUEST_TIMEOUT)
            .json(&json!({ "category": category, "service": token.as_str() }))
            .send()
            .await;
        Self::check(endpoint, response).await.map(|_| ())
    }
}
