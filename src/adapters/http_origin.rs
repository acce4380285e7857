//! HTTP origin client
//!
//! Talks to the permission service over JSON:
//! - `POST {base}/permissions/check` with a [`CheckRequest`] body, answering
//!   `{"allowed": bool}` or `{"denied": "reason"}`
//! - `GET {base}/permissions/{actor}/snapshot` answering a [`PermissionSnapshot`]
//! - `GET {base}/health`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::OriginError;
use crate::ports::{CheckRequest, OriginService, PermissionSnapshot};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CheckAnswer {
    Verdict { allowed: bool },
    Denied { denied: String },
}

#[derive(Debug, Clone)]
pub struct HttpOrigin {
    client: reqwest::Client,
    base_url: String,
    health_timeout: Duration,
}

impl HttpOrigin {
    pub fn new(
        base_url: impl Into<String>,
        request_timeout: Duration,
        health_timeout: Duration,
    ) -> Result<Self, OriginError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| OriginError::Other(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            health_timeout,
        })
    }

    async fn into_checked(response: reqwest::Response) -> Result<reqwest::Response, OriginError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(OriginError::Status {
            status: status.as_u16(),
            message,
        })
    }
}

fn map_reqwest(err: reqwest::Error) -> OriginError {
    if err.is_timeout() {
        OriginError::Timeout
    } else if err.is_connect() || err.is_request() {
        OriginError::Network(err.to_string())
    } else if let Some(status) = err.status() {
        OriginError::Status {
            status: status.as_u16(),
            message: err.to_string(),
        }
    } else {
        OriginError::Other(err.to_string())
    }
}

#[async_trait]
impl OriginService for HttpOrigin {
    async fn check(&self, request: &CheckRequest) -> Result<bool, OriginError> {
        let response = self
            .client
            .post(format!("{}/permissions/check", self.base_url))
            .json(request)
            .send()
            .await
            .map_err(map_reqwest)?;
        let answer: CheckAnswer = Self::into_checked(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest)?;

        match answer {
            CheckAnswer::Verdict { allowed } => Ok(allowed),
            CheckAnswer::Denied { denied } => Err(OriginError::Denied(denied)),
        }
    }

    async fn snapshot(&self, actor_id: &str) -> Result<PermissionSnapshot, OriginError> {
        let response = self
            .client
            .get(format!("{}/permissions/{}/snapshot", self.base_url, actor_id))
            .send()
            .await
            .map_err(map_reqwest)?;
        Self::into_checked(response)
            .await?
            .json()
            .await
            .map_err(map_reqwest)
    }

    async fn health_check(&self) -> Result<(), OriginError> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(self.health_timeout)
            .send()
            .await
            .map_err(map_reqwest)?;
        Self::into_checked(response).await.map(|_| ())
    }
}
