use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chart::{self, ChartProvider};
use crate::config::{CallSettings, GenerationSettings};
use crate::context::condense;
use crate::contract_memory::ContractMemory;
use crate::gateway::{
    GatewayError, GatewayRequest, PromptMessage, ProviderCredentials, ProviderRequest, TextGateway,
};
use crate::message::{ContextSegment, HistoryStoryMeta, HistoryStoryOption};
use crate::prompt::{self, StoryPromptInput};
use crate::repair::{RepairError, parse_lenient};
use crate::stage::Stage;
use crate::text_util::{squash_whitespace, truncate_chars};

/// Maximum option title length, in characters.
pub const TITLE_LIMIT: usize = 48;
/// Maximum option description length, in characters.
pub const DESCRIPTION_LIMIT: usize = 140;

pub const DEFAULT_TITLE: &str = "История под звёздами";
pub const DEFAULT_GENRE: &str = "мистическая притча";
pub const DEFAULT_CONTRACT: &str = "Что я на самом деле выбираю, когда боюсь ошибиться?";
pub const DEFAULT_SCENE: &str = "Звёзды на мгновение замирают, словно прислушиваясь к тебе. Дорога впереди раздваивается: одна тропа уходит в мягкий лунный свет, другая теряется в тени старых деревьев. Ветер приносит знакомый запах, и ты понимаешь, что этот выбор давно ждал тебя.";

/// Options used whenever the model leaves a field empty.
pub fn fallback_options() -> [HistoryStoryOption; 2] {
    [
        HistoryStoryOption {
            id: "option-1".into(),
            title: "Довериться интуиции".into(),
            description: "Последовать внутреннему голосу и посмотреть, куда он приведёт.".into(),
        },
        HistoryStoryOption {
            id: "option-2".into(),
            title: "Сделать осознанный шаг".into(),
            description: "Остановиться, взвесить всё и выбрать путь с открытыми глазами.".into(),
        },
    ]
}

/// The voice the story is written in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorPersona {
    pub name: String,
    pub style_prompt: String,
    pub genre: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkMode {
    Arc,
    Finale,
}

/// Input for one mid-story beat.
#[derive(Debug, Clone)]
pub struct ArcRequest {
    pub context: Vec<ContextSegment>,
    pub current_choice: Option<HistoryStoryOption>,
    pub summary: Option<String>,
    pub author: AuthorPersona,
    pub arc_limit: u32,
    pub current_arc: u32,
    /// Contract question established earlier in the session.
    pub contract: Option<String>,
    /// Story metadata from arc 1; carried forward unchanged when present.
    pub meta: Option<HistoryStoryMeta>,
    pub cancel: CancellationToken,
    pub credentials: ProviderCredentials,
}

/// Input for the closing chunk.
#[derive(Debug, Clone)]
pub struct FinaleRequest {
    pub context: Vec<ContextSegment>,
    pub current_choice: Option<HistoryStoryOption>,
    pub summary: Option<String>,
    pub author: AuthorPersona,
    pub arc_limit: u32,
    pub contract: Option<String>,
    pub meta: Option<HistoryStoryMeta>,
    pub cancel: CancellationToken,
    pub credentials: ProviderCredentials,
}

#[derive(Debug, Clone)]
pub enum ChunkRequest {
    Arc(ArcRequest),
    Finale(FinaleRequest),
}

impl ChunkRequest {
    pub fn mode(&self) -> ChunkMode {
        match self {
            ChunkRequest::Arc(_) => ChunkMode::Arc,
            ChunkRequest::Finale(_) => ChunkMode::Finale,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoryNode {
    pub arc: u32,
    pub stage: Stage,
    pub scene: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArcChunk {
    pub meta: HistoryStoryMeta,
    pub node: StoryNode,
    pub options: Vec<HistoryStoryOption>,
    /// True when the scene had to be filled with the built-in default.
    #[serde(skip)]
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinaleText {
    pub resolution: String,
    pub human_interpretation: String,
    pub astrological_interpretation: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinaleChunk {
    pub meta: HistoryStoryMeta,
    pub finale: FinaleText,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkResponse {
    Arc(ArcChunk),
    Finale(FinaleChunk),
}

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Gateway(GatewayError),
    #[error(transparent)]
    Parse(#[from] RepairError),
    #[error("finale reply is missing `{0}`")]
    IncompleteFinale(&'static str),
    #[error("no contract could be resolved")]
    NoContract,
    #[error("generation cancelled")]
    Cancelled,
}

impl From<GatewayError> for GenerationError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Cancelled => GenerationError::Cancelled,
            other => GenerationError::Gateway(other),
        }
    }
}

impl GenerationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerationError::Cancelled)
    }
}

/// Non-empty, whitespace-normalized string at `key`. Numbers are accepted.
fn text_field(value: Option<&Value>, key: &str) -> Option<String> {
    let raw = match value?.get(key)? {
        Value::String(s) => squash_whitespace(s),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!raw.is_empty()).then_some(raw)
}

/// Sanitize one option; each field falls back independently.
pub fn sanitize_option(value: Option<&Value>, fallback: &HistoryStoryOption) -> HistoryStoryOption {
    let id = text_field(value, "id").unwrap_or_else(|| fallback.id.clone());
    let title = text_field(value, "title")
        .map(|t| truncate_chars(&t, TITLE_LIMIT))
        .unwrap_or_else(|| fallback.title.clone());
    let description = text_field(value, "description")
        .map(|d| truncate_chars(&d, DESCRIPTION_LIMIT))
        .unwrap_or_else(|| fallback.description.clone());
    HistoryStoryOption {
        id,
        title,
        description,
    }
}

/// Exactly two sanitized options with distinct ids.
pub fn sanitize_options(value: Option<&Value>) -> Vec<HistoryStoryOption> {
    let raw: Vec<&Value> = value
        .and_then(Value::as_array)
        .map(|items| items.iter().take(2).collect())
        .unwrap_or_default();
    let fallback = fallback_options();
    let mut options: Vec<_> = fallback
        .iter()
        .enumerate()
        .map(|(i, fb)| sanitize_option(raw.get(i).copied(), fb))
        .collect();
    if options[1].id == options[0].id {
        options[1].id = if options[0].id == fallback[1].id {
            format!("{}-2", options[0].id)
        } else {
            fallback[1].id.clone()
        };
    }
    options
}

/// Turns accumulated story context into prompts, calls the gateway and
/// normalizes whatever comes back.
///
/// Arc generation never fails on bad model output: any missing piece is filled
/// with a fixed default. Finale generation fails loudly instead, since a
/// canned ending would be worse than asking the reader to retry.
pub struct StoryGenerator {
    gateway: Arc<dyn TextGateway>,
    contracts: Arc<ContractMemory>,
    chart: Option<Arc<dyn ChartProvider>>,
    settings: GenerationSettings,
}

impl StoryGenerator {
    pub fn new(gateway: Arc<dyn TextGateway>, contracts: Arc<ContractMemory>) -> Self {
        Self {
            gateway,
            contracts,
            chart: None,
            settings: GenerationSettings::default(),
        }
    }

    pub fn with_chart(mut self, chart: Arc<dyn ChartProvider>) -> Self {
        self.chart = Some(chart);
        self
    }

    pub fn with_settings(mut self, settings: GenerationSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn contracts(&self) -> &Arc<ContractMemory> {
        &self.contracts
    }

    pub async fn generate_chunk(&self, request: ChunkRequest) -> Result<ChunkResponse, GenerationError> {
        match request {
            ChunkRequest::Arc(r) => self.generate_arc(r).await.map(ChunkResponse::Arc),
            ChunkRequest::Finale(r) => self.generate_finale(r).await.map(ChunkResponse::Finale),
        }
    }

    async fn call(
        &self,
        system: String,
        user: String,
        settings: CallSettings,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<String, GatewayError> {
        let reply = self
            .gateway
            .call(GatewayRequest {
                prompt: ProviderRequest {
                    system,
                    messages: vec![PromptMessage::user(user)],
                    temperature: settings.temperature,
                    max_tokens: settings.max_tokens,
                },
                cancel: cancel.clone(),
                credentials: credentials.clone(),
            })
            .await?;
        debug!(provider = %reply.provider_used, chars = reply.text.len(), "gateway reply");
        Ok(reply.text)
    }

    pub async fn generate_arc(&self, request: ArcRequest) -> Result<ArcChunk, GenerationError> {
        if request.cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let arc = request.current_arc.max(1);
        let (segments, summary) = condense(request.context, request.summary);

        let supplied = request.contract.filter(|c| !c.trim().is_empty());
        let (contract_text, active, scenario_for_arc) = match supplied {
            Some(text) => (text, self.contracts.active(), None),
            None if arc == 1 => {
                let active = self
                    .contracts
                    .ensure_contract(self.gateway.as_ref(), &request.cancel, &request.credentials)
                    .await?;
                let scenario = active.scenario.clone();
                (active.contract.question.clone(), Some(active), Some(scenario))
            }
            None => {
                let active = self.contracts.active();
                let text = active
                    .as_ref()
                    .map(|a| a.contract.question.clone())
                    .unwrap_or_default();
                (text, active, None)
            }
        };

        let stage = Stage::for_arc(arc);
        let chart = chart::fetch_optional(self.chart.as_deref()).await;
        let input = StoryPromptInput {
            author: &request.author,
            arc_limit: request.arc_limit,
            current_arc: arc,
            contract: &contract_text,
            active_contract: active.as_ref().map(|a| &a.contract),
            scenario: scenario_for_arc.as_ref(),
            current_choice: request.current_choice.as_ref(),
            summary: summary.as_deref(),
            segments: &segments,
        };
        let user = prompt::arc_prompt(&input, stage, chart.as_ref());

        let parsed = match self
            .call(
                prompt::story_system(&request.author),
                user,
                self.settings.arc,
                &request.cancel,
                &request.credentials,
            )
            .await
        {
            Ok(text) => match parse_lenient(&text) {
                Ok((value, stage_used)) => {
                    debug!(?stage_used, arc, "arc reply parsed");
                    Some(value)
                }
                Err(e) => {
                    warn!(error = %e, arc, "arc reply unparseable, using defaults");
                    None
                }
            },
            Err(GatewayError::Cancelled) => return Err(GenerationError::Cancelled),
            Err(e) => {
                warn!(error = %e, arc, "arc generation failed, using defaults");
                None
            }
        };
        if request.cancel.is_cancelled() {
            debug!(arc, "arc request cancelled after reply");
            return Err(GenerationError::Cancelled);
        }

        let value = parsed.as_ref();
        let meta = request.meta.unwrap_or_else(|| {
            build_meta(
                value.and_then(|v| v.get("meta")),
                &request.author,
                &contract_text,
                request.arc_limit,
            )
        });
        let scene = text_field(value.and_then(|v| v.get("node")), "scene");
        let degraded = scene.is_none();
        if degraded {
            warn!(arc, "arc reply had no scene, using default beat");
        }
        let chunk = ArcChunk {
            meta,
            node: StoryNode {
                arc,
                stage,
                scene: scene.unwrap_or_else(|| DEFAULT_SCENE.to_string()),
            },
            options: sanitize_options(value.and_then(|v| v.get("options"))),
            degraded,
        };
        info!(arc, stage = ?stage, degraded, "arc generated");
        Ok(chunk)
    }

    pub async fn generate_finale(&self, request: FinaleRequest) -> Result<FinaleChunk, GenerationError> {
        if request.cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }
        let (segments, summary) = condense(request.context, request.summary);
        let active = self.contracts.active();
        let contract_text = request
            .contract
            .filter(|c| !c.trim().is_empty())
            .or_else(|| active.as_ref().map(|a| a.contract.question.clone()))
            .unwrap_or_default();

        let chart = chart::fetch_optional(self.chart.as_deref()).await;
        let input = StoryPromptInput {
            author: &request.author,
            arc_limit: request.arc_limit,
            current_arc: request.arc_limit,
            contract: &contract_text,
            active_contract: active.as_ref().map(|a| &a.contract),
            scenario: None,
            current_choice: request.current_choice.as_ref(),
            summary: summary.as_deref(),
            segments: &segments,
        };
        let user = prompt::finale_prompt(&input, chart.as_ref());

        let text = self
            .call(
                prompt::story_system(&request.author),
                user,
                self.settings.finale,
                &request.cancel,
                &request.credentials,
            )
            .await?;
        let (value, stage_used) = parse_lenient(&text)?;
        debug!(?stage_used, "finale reply parsed");
        if request.cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        let finale = value.get("finale");
        let resolution =
            text_field(finale, "resolution").ok_or(GenerationError::IncompleteFinale("resolution"))?;
        let human_interpretation = text_field(finale, "humanInterpretation")
            .ok_or(GenerationError::IncompleteFinale("humanInterpretation"))?;
        let astrological_interpretation = text_field(finale, "astrologicalInterpretation")
            .ok_or(GenerationError::IncompleteFinale("astrologicalInterpretation"))?;

        let meta = request.meta.unwrap_or_else(|| {
            build_meta(value.get("meta"), &request.author, &contract_text, request.arc_limit)
        });
        info!("finale generated");
        Ok(FinaleChunk {
            meta,
            finale: FinaleText {
                resolution,
                human_interpretation,
                astrological_interpretation,
            },
        })
    }
}

fn build_meta(
    meta: Option<&Value>,
    author: &AuthorPersona,
    contract: &str,
    arc_limit: u32,
) -> HistoryStoryMeta {
    let genre = text_field(meta, "genre")
        .or_else(|| Some(squash_whitespace(&author.genre)).filter(|g| !g.is_empty()))
        .unwrap_or_else(|| DEFAULT_GENRE.to_string());
    let contract = Some(squash_whitespace(contract))
        .filter(|c| !c.is_empty())
        .or_else(|| text_field(meta, "contract"))
        .unwrap_or_else(|| DEFAULT_CONTRACT.to_string());
    HistoryStoryMeta {
        author: author.name.clone(),
        title: text_field(meta, "title").unwrap_or_else(|| DEFAULT_TITLE.to_string()),
        genre,
        contract,
        arc_limit,
    }
}
