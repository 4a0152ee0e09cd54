//! HTTP client for an Ollama-style inference server

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use super::context::Message;
use crate::Result;

/// Failures of a single backend request
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection refused, DNS failure, timeout
    #[error("backend unreachable: {0}")]
    Unreachable(String),

    /// The server does not have the requested model
    #[error("model '{0}' not found")]
    ModelNotFound(String),

    /// Any other non-success status
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Success status with a body we could not read
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

/// Body of `POST /api/generate`
#[derive(Debug, Serialize)]
pub struct GenerateRequest<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub system: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<&'a serde_json::Value>,
    pub stream: bool,
}

/// Reply of `POST /api/generate`
#[derive(Debug, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
    /// Opaque continuation, replayed verbatim on the next call
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagsModel>,
}

#[derive(Debug, Deserialize)]
struct TagsModel {
    name: String,
}

/// Talks to the inference server's model, generate and chat endpoints
#[derive(Debug, Clone)]
pub struct InferenceClient {
    client: reqwest::Client,
    base_url: Url,
}

impl InferenceClient {
    /// Create a client for the server at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or the HTTP client cannot be built
    pub fn new(base_url: &str, timeout: Option<Duration>) -> Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            client: builder.build()?,
            base_url,
        })
    }

    /// Server base URL
    #[must_use]
    pub const fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// List the model identifiers the server offers
    ///
    /// # Errors
    ///
    /// Returns error if the server cannot be reached or answers badly
    pub async fn list_models(&self) -> std::result::Result<Vec<String>, BackendError> {
        let url = self.endpoint("api/tags")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;

        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// One-shot completion with an opaque continuation token
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ModelNotFound`] on 404, otherwise a transport or status error
    pub async fn generate(
        &self,
        request: &GenerateRequest<'_>,
    ) -> std::result::Result<GenerateResponse, BackendError> {
        self.post("api/generate", request.model, request).await
    }

    /// Chat completion over an explicit message history
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::ModelNotFound`] on 404, otherwise a transport or status error
    pub async fn chat(
        &self,
        model: &str,
        messages: &[Message],
    ) -> std::result::Result<String, BackendError> {
        let request = ChatRequest {
            model,
            messages,
            stream: false,
        };
        let response: ChatResponse = self.post("api/chat", model, &request).await?;
        Ok(response.message.content)
    }

    async fn post<B, R>(
        &self,
        path: &str,
        model: &str,
        body: &B,
    ) -> std::result::Result<R, BackendError>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        tracing::debug!(url = %url, model, "sending backend request");

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.transport_error(&e))?;

        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::ModelNotFound(model.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text)
            .map_err(|e| BackendError::InvalidResponse(format!("{e}: {text}")))
    }

    fn endpoint(&self, path: &str) -> std::result::Result<Url, BackendError> {
        self.base_url
            .join(path)
            .map_err(|e| BackendError::Unreachable(format!("invalid endpoint {path}: {e}")))
    }

    fn transport_error(&self, e: &reqwest::Error) -> BackendError {
        if e.is_connect() {
            BackendError::Unreachable(format!("failed to connect to {}", self.base_url))
        } else if e.is_timeout() {
            BackendError::Unreachable("request timed out".to_string())
        } else {
            BackendError::Unreachable(e.to_string())
        }
    }
}
