//! Conversation backend
//!
//! Owns the session with the inference server: model discovery and
//! substitution at startup, conversational memory, and turning every failure
//! into a sentence the assistant can say.

mod client;
mod context;

pub use client::{BackendError, GenerateRequest, GenerateResponse, InferenceClient};
pub use context::{ContinuationToken, ConversationContext, Message, MessageHistory, Role};

use async_trait::async_trait;

use crate::config::BackendConfig;
use crate::{Error, Result};

/// Tone instruction sent with every request
pub const SYSTEM_INSTRUCTION: &str = "You are Aura, a local voice assistant running on a home computer. \
     Answer tersely in plain spoken sentences with no markdown, lists or emoji. \
     Give detail only when explicitly asked for it.";

/// Reply while the backend was unreachable at startup
pub const CANNOT_CONNECT: &str =
    "I cannot connect to my language model. Please check that the server is running.";

/// Reply for transport failures and unexpected responses
pub const TROUBLE_THINKING: &str = "I'm having trouble thinking right now.";

/// How conversational memory is carried between turns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationMode {
    /// Explicit message history through the chat endpoint
    Chat,
    /// Opaque continuation token through the generate endpoint
    Generate,
}

impl ConversationMode {
    /// Parse a mode name
    ///
    /// # Errors
    ///
    /// Returns error for anything other than `chat` or `generate`
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "chat" => Ok(Self::Chat),
            "generate" => Ok(Self::Generate),
            other => Err(Error::Config(format!(
                "unknown backend mode '{other}', expected 'chat' or 'generate'"
            ))),
        }
    }

    fn context(self, max_history_messages: usize) -> Box<dyn ConversationContext> {
        match self {
            Self::Chat => Box::new(MessageHistory::new(SYSTEM_INSTRUCTION, max_history_messages)),
            Self::Generate => Box::new(ContinuationToken::new(SYSTEM_INSTRUCTION)),
        }
    }
}

/// Outcome of the startup model handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendStatus {
    /// Configured model is available (or discovery listed nothing to compare against)
    Ready { model: String },
    /// Configured model is missing; the first listed model is used instead
    Substituted { requested: String, model: String },
    /// Server unreachable at startup; no request is attempted until restart
    Offline,
}

/// Pick the model to use from what the server lists
///
/// An untagged name matches its `:latest` tag. An empty list keeps the
/// configured name.
#[must_use]
pub fn resolve_model(configured: &str, available: &[String]) -> BackendStatus {
    let latest = format!("{configured}:latest");
    if let Some(found) = available.iter().find(|m| *m == configured || **m == latest) {
        return BackendStatus::Ready {
            model: found.clone(),
        };
    }

    match available.first() {
        Some(first) => BackendStatus::Substituted {
            requested: configured.to_string(),
            model: first.clone(),
        },
        None => BackendStatus::Ready {
            model: configured.to_string(),
        },
    }
}

/// Something that answers prompts
///
/// `think` never fails; failures come back as a sentence to speak.
#[async_trait]
pub trait Assistant: Send {
    async fn think(&mut self, prompt: &str) -> String;
}

/// The assistant's session with the inference server
pub struct ConversationBackend {
    client: InferenceClient,
    status: BackendStatus,
    model: String,
    context: Box<dyn ConversationContext>,
}

impl ConversationBackend {
    /// Connect and run the model handshake
    ///
    /// An unreachable server is not an error: the backend starts offline.
    /// A server that answers discovery with an error keeps the configured model.
    ///
    /// # Errors
    ///
    /// Returns error only if the configuration is invalid
    pub async fn connect(config: &BackendConfig) -> Result<Self> {
        let client = InferenceClient::new(&config.url, config.request_timeout)?;

        let status = match client.list_models().await {
            Ok(models) => {
                if models.is_empty() {
                    tracing::warn!(
                        model = %config.model,
                        "backend lists no models, keeping configured model"
                    );
                }
                resolve_model(&config.model, &models)
            }
            Err(e @ BackendError::Unreachable(_)) => {
                tracing::error!(url = %client.base_url(), error = %e, "backend offline");
                BackendStatus::Offline
            }
            Err(e) => {
                tracing::warn!(
                    url = %client.base_url(),
                    error = %e,
                    "model discovery failed, keeping configured model"
                );
                BackendStatus::Ready {
                    model: config.model.clone(),
                }
            }
        };

        let model = match &status {
            BackendStatus::Ready { model } => {
                tracing::info!(model = %model, mode = ?config.mode, "backend ready");
                model.clone()
            }
            BackendStatus::Substituted { requested, model } => {
                tracing::warn!(
                    requested = %requested,
                    model = %model,
                    "configured model missing, substituting"
                );
                model.clone()
            }
            BackendStatus::Offline => config.model.clone(),
        };

        Ok(Self {
            client,
            status,
            model,
            context: config.mode.context(config.max_history_messages),
        })
    }

    /// Startup handshake outcome
    #[must_use]
    pub const fn status(&self) -> &BackendStatus {
        &self.status
    }

    /// Model every request uses
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Forget the conversation so far
    pub fn reset(&mut self) {
        self.context.reset();
        tracing::debug!("conversation reset");
    }

    /// Answer a prompt, turning every failure into a reply
    pub async fn think(&mut self, prompt: &str) -> String {
        if self.status == BackendStatus::Offline {
            return CANNOT_CONNECT.to_string();
        }

        tracing::debug!(model = %self.model, "thinking");

        match self.context.exchange(&self.client, &self.model, prompt).await {
            Ok(reply) => reply,
            Err(BackendError::ModelNotFound(model)) => {
                tracing::error!(model = %model, "model not found on backend");
                format!("I can't find the model {model}. Please pull it or choose another model.")
            }
            Err(e) => {
                tracing::warn!(error = %e, "backend request failed");
                TROUBLE_THINKING.to_string()
            }
        }
    }
}

#[async_trait]
impl Assistant for ConversationBackend {
    async fn think(&mut self, prompt: &str) -> String {
        Self::think(self, prompt).await
    }
}
