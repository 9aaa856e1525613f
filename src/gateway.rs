use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Which family of API a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
}

/// API keys for the configured providers.
#[derive(Clone, Default)]
pub struct ProviderCredentials {
    pub anthropic: Option<String>,
    pub openai: Option<String>,
}

impl ProviderCredentials {
    pub fn key_for(&self, kind: ProviderKind) -> Option<&str> {
        let key = match kind {
            ProviderKind::Anthropic => self.anthropic.as_deref(),
            ProviderKind::OpenAi => self.openai.as_deref(),
        };
        key.filter(|k| !k.trim().is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.key_for(ProviderKind::Anthropic).is_none() && self.key_for(ProviderKind::OpenAi).is_none()
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("anthropic", &self.anthropic.as_ref().map(|_| "***"))
            .field("openai", &self.openai.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// The provider-independent part of a generation call.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub system: String,
    pub messages: Vec<PromptMessage>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A full gateway call: prompt plus cancellation and credentials.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub prompt: ProviderRequest,
    pub cancel: CancellationToken,
    pub credentials: ProviderCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayReply {
    pub text: String,
    pub provider_used: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no api key configured for {0}")]
    MissingKey(String),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider reply had no text")]
    EmptyReply,
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("no provider credentials configured")]
    MissingCredentials,
    #[error("all providers failed: {primary_name}: {primary}; {secondary_name}: {secondary}")]
    AllProvidersFailed {
        primary_name: String,
        primary: ProviderError,
        secondary_name: String,
        secondary: ProviderError,
    },
    #[error("request cancelled")]
    Cancelled,
}

/// A single text-generation backend.
#[async_trait]
pub trait TextProvider: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ProviderKind;
    async fn complete(&self, request: &ProviderRequest, api_key: &str) -> Result<String, ProviderError>;
}

/// Request in, text out. The story core owns prompts and parsing, not transport.
#[async_trait]
pub trait TextGateway: Send + Sync {
    async fn call(&self, request: GatewayRequest) -> Result<GatewayReply, GatewayError>;
}

/// Gateway that tries the primary provider and, only once it has failed,
/// the secondary.
///
/// Providers are never raced: the secondary is attempted after the primary
/// call has fully returned an error.
#[derive(Clone)]
pub struct FallbackGateway {
    primary: Arc<dyn TextProvider>,
    secondary: Arc<dyn TextProvider>,
}

impl FallbackGateway {
    pub fn new(primary: Arc<dyn TextProvider>, secondary: Arc<dyn TextProvider>) -> Self {
        Self { primary, secondary }
    }

    async fn attempt(
        provider: &dyn TextProvider,
        request: &GatewayRequest,
    ) -> Result<Result<String, ProviderError>, GatewayError> {
        let Some(key) = request.credentials.key_for(provider.kind()) else {
            return Ok(Err(ProviderError::MissingKey(provider.name().to_string())));
        };
        debug!(provider = %provider.name(), "calling text provider");
        tokio::select! {
            biased;
            _ = request.cancel.cancelled() => Err(GatewayError::Cancelled),
            res = provider.complete(&request.prompt, key) => Ok(res),
        }
    }
}

#[async_trait]
impl TextGateway for FallbackGateway {
    async fn call(&self, request: GatewayRequest) -> Result<GatewayReply, GatewayError> {
        if request.credentials.is_empty() {
            return Err(GatewayError::MissingCredentials);
        }
        if request.cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let primary = match Self::attempt(self.primary.as_ref(), &request).await? {
            Ok(text) => {
                return Ok(GatewayReply {
                    text,
                    provider_used: self.primary.name().to_string(),
                });
            }
            Err(e) => {
                warn!(provider = %self.primary.name(), error = %e, "primary provider failed, trying secondary");
                e
            }
        };

        match Self::attempt(self.secondary.as_ref(), &request).await? {
            Ok(text) => Ok(GatewayReply {
                text,
                provider_used: self.secondary.name().to_string(),
            }),
            Err(secondary) => {
                warn!(provider = %self.secondary.name(), error = %secondary, "secondary provider failed");
                Err(GatewayError::AllProvidersFailed {
                    primary_name: self.primary.name().to_string(),
                    primary,
                    secondary_name: self.secondary.name().to_string(),
                    secondary,
                })
            }
        }
    }
}
