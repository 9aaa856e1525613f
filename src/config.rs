use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::gateway::{ProviderCredentials, ProviderKind};
use crate::pipeline::AuthorPersona;

/// Sampling parameters for one kind of generation call.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CallSettings {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Per-call settings for arcs, finales and contract generation.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub arc: CallSettings,
    pub finale: CallSettings,
    pub contract: CallSettings,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            arc: CallSettings {
                temperature: 0.9,
                max_tokens: 1200,
            },
            finale: CallSettings {
                temperature: 0.8,
                max_tokens: 1600,
            },
            contract: CallSettings {
                temperature: 0.7,
                max_tokens: 1500,
            },
        }
    }
}

/// One text-generation backend.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderKind,
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    90
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(match self.provider {
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::OpenAi => "https://api.openai.com",
        })
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(match self.provider {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenAi => "OPENAI_API_KEY",
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub primary: ProviderConfig,
    pub secondary: ProviderConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            primary: ProviderConfig {
                provider: ProviderKind::Anthropic,
                model: "claude-3-5-sonnet-latest".into(),
                base_url: None,
                api_key_env: None,
                timeout_secs: default_timeout_secs(),
            },
            secondary: ProviderConfig {
                provider: ProviderKind::OpenAi,
                model: "gpt-4o-mini".into(),
                base_url: None,
                api_key_env: None,
                timeout_secs: default_timeout_secs(),
            },
        }
    }
}

/// Choreography delays of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionTiming {
    pub reveal_cadence_ms: u64,
    pub hide_settle_ms: u64,
    pub typing_delay_ms: u64,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            reveal_cadence_ms: 500,
            hide_settle_ms: 500,
            typing_delay_ms: 1200,
        }
    }
}

impl SessionTiming {
    pub fn reveal_cadence(&self) -> Duration {
        Duration::from_millis(self.reveal_cadence_ms)
    }

    pub fn hide_settle(&self) -> Duration {
        Duration::from_millis(self.hide_settle_ms)
    }

    pub fn typing_delay(&self) -> Duration {
        Duration::from_millis(self.typing_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UsageConfig {
    pub path: PathBuf,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("usage-history.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthorConfig {
    pub name: String,
    pub style_prompt: String,
    pub genre: String,
    pub arc_limit: u32,
}

impl Default for AuthorConfig {
    fn default() -> Self {
        Self {
            name: "Луна".into(),
            style_prompt: "Пиши образно и тепло, короткими ясными предложениями, от второго лица.".into(),
            genre: "мистическая притча".into(),
            arc_limit: 6,
        }
    }
}

impl AuthorConfig {
    pub fn persona(&self) -> AuthorPersona {
        AuthorPersona {
            name: self.name.clone(),
            style_prompt: self.style_prompt.clone(),
            genre: self.genre.clone(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub gateway: GatewayConfig,
    pub generation: GenerationSettings,
    pub session: SessionTiming,
    pub usage: UsageConfig,
    pub author: AuthorConfig,
}

impl AppConfig {
    /// Read provider API keys from the environment variables named in config.
    pub fn credentials_from_env(&self) -> ProviderCredentials {
        let mut creds = ProviderCredentials::default();
        for p in [&self.gateway.primary, &self.gateway.secondary] {
            let key = std::env::var(p.api_key_env()).ok();
            match p.provider {
                ProviderKind::Anthropic => creds.anthropic = creds.anthropic.or(key),
                ProviderKind::OpenAi => creds.openai = creds.openai.or(key),
            }
        }
        creds
    }
}

/// Parse an [`AppConfig`] from TOML text.
pub fn from_toml(text: &str) -> anyhow::Result<AppConfig> {
    Ok(toml::from_str(text)?)
}

/// Load an [`AppConfig`] from a TOML file.
///
/// # Examples
///
/// ```no_run
/// # async fn demo() -> anyhow::Result<()> {
/// let cfg = natal_story::config::load("natal-story.toml").await?;
/// assert!(cfg.author.arc_limit > 0);
/// # Ok(()) }
/// ```
pub async fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<AppConfig> {
    let text = tokio::fs::read_to_string(path).await?;
    from_toml(&text)
}
