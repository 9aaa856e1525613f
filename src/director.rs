use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::StoryContext;
use crate::gateway::ProviderCredentials;
use crate::message::{Author, ChatMessage, ContextSegment, HistoryStoryMeta, HistoryStoryOption};
use crate::pipeline::{ArcRequest, AuthorPersona, FinaleRequest, GenerationError, StoryGenerator};
use crate::session::{Phase, StorySession};
use crate::stage::Stage;

pub const FINALE_RETRY_PROMPT: &str =
    "Звёзды не успели сложить финал этой истории. Попробуй ещё раз, развязка стоит того.";

/// Result of one director command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// A new arc was shown. `degraded` is set when defaults filled the scene.
    Arc { arc: u32, degraded: bool },
    Finale,
    /// The finale could not be generated; [`StoryDirector::retry_finale`] may be called.
    FinaleFailed,
    /// A newer request or a reset superseded this one; nothing was applied.
    Superseded,
    /// The command does not apply in the current state.
    Rejected,
}

/// A choice whose consequence is still being generated.
#[derive(Debug, Clone)]
struct Chosen {
    segment: ContextSegment,
    choice: HistoryStoryOption,
}

#[derive(Debug, Default)]
struct Progress {
    context: StoryContext,
    meta: Option<HistoryStoryMeta>,
    options: Vec<HistoryStoryOption>,
    last_choice: Option<HistoryStoryOption>,
    /// Arc number and scene text of the beat currently on screen.
    scene: Option<(u32, String)>,
    finale_failed: bool,
    finished: bool,
}

impl Progress {
    /// Record a committed choice in the story context.
    fn settle(&mut self, chosen: Option<Chosen>) {
        if let Some(Chosen { segment, choice }) = chosen {
            self.context.push(segment);
            self.last_choice = Some(choice);
        }
    }
}

/// Wires a [`StorySession`] to a [`StoryGenerator`].
///
/// Arcs run from 1 up to `arc_limit - 1`; the choice made in the last of them
/// leads to the finale, which is shown as arc `arc_limit`.
pub struct StoryDirector {
    session: StorySession,
    generator: Arc<StoryGenerator>,
    author: AuthorPersona,
    arc_limit: u32,
    credentials: ProviderCredentials,
    progress: Mutex<Progress>,
}

impl StoryDirector {
    pub fn new(
        session: StorySession,
        generator: Arc<StoryGenerator>,
        author: AuthorPersona,
        arc_limit: u32,
        credentials: ProviderCredentials,
    ) -> Self {
        Self {
            session,
            generator,
            author,
            arc_limit: arc_limit.max(2),
            credentials,
            progress: Mutex::new(Progress::default()),
        }
    }

    fn progress(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn session(&self) -> &StorySession {
        &self.session
    }

    pub fn arc_limit(&self) -> u32 {
        self.arc_limit
    }

    pub fn meta(&self) -> Option<HistoryStoryMeta> {
        self.progress().meta.clone()
    }

    pub fn options(&self) -> Vec<HistoryStoryOption> {
        self.progress().options.clone()
    }

    pub fn finale_failed(&self) -> bool {
        self.progress().finale_failed
    }

    pub fn is_finished(&self) -> bool {
        self.progress().finished
    }

    /// Drop the current story, its contract and every pending request.
    pub fn reset(&self) {
        self.session.clear_messages();
        *self.progress() = Progress::default();
        self.generator.contracts().clear();
    }

    /// Begin a new story at arc 1.
    pub async fn start(&self) -> Result<Step, GenerationError> {
        self.reset();
        self.session.set_phase(Phase::Moon);
        let intro = ChatMessage::moon(format!(
            "Я {}. Посмотрим, какую историю хранят твои звёзды.",
            self.author.name
        ));
        if !self.session.deliver(intro, self.typing_delay()).await {
            return Ok(Step::Superseded);
        }
        self.session.set_phase(Phase::Story);
        self.request_arc(1, None).await
    }

    /// Follow the option with `option_id` to the next arc or the finale.
    ///
    /// Story progress only moves once the resulting beat is committed; a
    /// superseded or failed request leaves the current scene selectable.
    pub async fn choose(&self, option_id: &str) -> Result<Step, GenerationError> {
        let chosen = {
            let p = self.progress();
            if p.finished || p.finale_failed {
                return Ok(Step::Rejected);
            }
            let Some(choice) = p.options.iter().find(|o| o.id == option_id).cloned() else {
                debug!(option_id, "unknown option");
                return Ok(Step::Rejected);
            };
            let Some((arc, text)) = p.scene.clone() else {
                return Ok(Step::Rejected);
            };
            Chosen {
                segment: ContextSegment {
                    text,
                    arc,
                    option_title: Some(choice.title.clone()),
                    option_description: Some(choice.description.clone()),
                },
                choice,
            }
        };
        let next = chosen.segment.arc + 1;
        let options = self.options();
        self.session.hide_choices();
        self.session.add_message(ChatMessage::user(chosen.choice.title.clone()));
        let result = if next >= self.arc_limit {
            self.request_finale(Some(chosen)).await
        } else {
            self.request_arc(next, Some(chosen)).await
        };
        if result.is_err() {
            self.session.set_choices(options);
        }
        result
    }

    /// Try the finale again after a failure.
    pub async fn retry_finale(&self) -> Result<Step, GenerationError> {
        if !self.progress().finale_failed {
            return Ok(Step::Rejected);
        }
        self.request_finale(None).await
    }

    fn typing_delay(&self) -> Duration {
        self.session.timing().typing_delay()
    }

    /// Context and summary for a request, with the pending choice folded in.
    fn request_context(&self, chosen: Option<&Chosen>) -> (Vec<ContextSegment>, Option<String>) {
        let mut context = self.progress().context.clone();
        if let Some(chosen) = chosen {
            context.push(chosen.segment.clone());
        }
        (
            context.segments().to_vec(),
            context.summary().map(str::to_string),
        )
    }

    async fn request_arc(&self, arc: u32, chosen: Option<Chosen>) -> Result<Step, GenerationError> {
        let ticket = self.session.begin_request();
        self.session.set_typing(Some(Author::Story));
        let (context, summary) = self.request_context(chosen.as_ref());
        let meta = self.meta();
        let request = ArcRequest {
            context,
            current_choice: chosen.as_ref().map(|c| c.choice.clone()),
            summary,
            author: self.author.clone(),
            arc_limit: self.arc_limit,
            current_arc: arc,
            contract: meta.as_ref().map(|m| m.contract.clone()),
            meta: meta.clone(),
            cancel: ticket.cancel_token().clone(),
            credentials: self.credentials.clone(),
        };

        let chunk = match self.generator.generate_arc(request).await {
            Ok(chunk) => chunk,
            Err(e) if e.is_cancelled() => {
                debug!(arc, "arc request superseded");
                return Ok(Step::Superseded);
            }
            Err(e) => {
                self.session.release(&ticket);
                return Err(e);
            }
        };
        if !self.session.is_current(&ticket) {
            debug!(arc, "discarding arc for superseded request");
            return Ok(Step::Superseded);
        }

        let meta = meta.unwrap_or_else(|| chunk.meta.clone());
        if arc == 1 {
            let question = ChatMessage::moon(format!(
                "Главный вопрос этой истории: {}",
                meta.contract
            ));
            if !self.session.deliver(question, self.typing_delay()).await
                || !self.session.is_current(&ticket)
            {
                return Ok(Step::Superseded);
            }
        }

        let mut p = self.progress();
        let beat = ChatMessage::story(
            chunk.node.scene.clone(),
            Some(arc),
            Some(chunk.node.stage.label().to_string()),
        );
        if !self.session.commit(&ticket, vec![beat], Some(chunk.options.clone())) {
            return Ok(Step::Superseded);
        }
        if p.meta.is_none() {
            p.meta = Some(meta.clone());
        }
        p.settle(chosen);
        p.options = chunk.options;
        p.scene = Some((arc, chunk.node.scene));
        drop(p);
        self.session.set_phase(Phase::Choices);
        info!(arc, title = %meta.title, degraded = chunk.degraded, "arc shown");
        Ok(Step::Arc {
            arc,
            degraded: chunk.degraded,
        })
    }

    async fn request_finale(&self, chosen: Option<Chosen>) -> Result<Step, GenerationError> {
        let ticket = self.session.begin_request();
        self.session.set_phase(Phase::Finale);
        self.session.set_typing(Some(Author::Story));
        let (context, summary) = self.request_context(chosen.as_ref());
        let request = {
            let p = self.progress();
            FinaleRequest {
                context,
                current_choice: chosen
                    .as_ref()
                    .map(|c| c.choice.clone())
                    .or_else(|| p.last_choice.clone()),
                summary,
                author: self.author.clone(),
                arc_limit: self.arc_limit,
                contract: p.meta.as_ref().map(|m| m.contract.clone()),
                meta: p.meta.clone(),
                cancel: ticket.cancel_token().clone(),
                credentials: self.credentials.clone(),
            }
        };

        match self.generator.generate_finale(request).await {
            Ok(chunk) => {
                let mut p = self.progress();
                if !self.session.is_current(&ticket) {
                    return Ok(Step::Superseded);
                }
                let messages = vec![
                    ChatMessage::finale(
                        chunk.finale.resolution,
                        Some(self.arc_limit),
                        Some(Stage::Finale.label().to_string()),
                    ),
                    ChatMessage::moon(chunk.finale.human_interpretation),
                    ChatMessage::moon(chunk.finale.astrological_interpretation),
                ];
                if !self.session.commit(&ticket, messages, None) {
                    return Ok(Step::Superseded);
                }
                if p.meta.is_none() {
                    p.meta = Some(chunk.meta);
                }
                p.settle(chosen);
                p.options.clear();
                p.scene = None;
                p.finale_failed = false;
                p.finished = true;
                info!("finale shown");
                Ok(Step::Finale)
            }
            Err(e) if e.is_cancelled() => {
                debug!("finale request superseded");
                Ok(Step::Superseded)
            }
            Err(e) => {
                let mut p = self.progress();
                if !self.session.release(&ticket) {
                    return Ok(Step::Superseded);
                }
                warn!(error = %e, "finale generation failed");
                // The choice stands; a retry continues from it.
                p.settle(chosen);
                p.options.clear();
                p.scene = None;
                p.finale_failed = true;
                self.session.add_message(ChatMessage::system(FINALE_RETRY_PROMPT));
                Ok(Step::FinaleFailed)
            }
        }
    }
}
