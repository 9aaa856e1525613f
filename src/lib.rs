pub mod chart;
pub mod config;
pub mod context;
pub mod contract;
pub mod contract_memory;
pub mod director;
pub mod gateway;
pub mod logging;
pub mod message;
pub mod pipeline;
mod prompt;
pub mod providers;
pub mod repair;
pub mod scroll;
pub mod session;
pub mod stage;
#[cfg(test)]
pub mod test_helpers;
mod text_util;
pub mod usage;

pub use chart::{ChartProvider, NatalChart, StaticChart};
pub use config::AppConfig;
pub use context::StoryContext;
pub use contract::PsychologicalContract;
pub use contract_memory::{ActiveContract, ContractMemory, ContractSource};
pub use director::{Step, StoryDirector};
pub use gateway::{
    FallbackGateway, GatewayError, GatewayReply, GatewayRequest, ProviderCredentials, ProviderError,
    ProviderKind, TextGateway, TextProvider,
};
pub use message::{
    Author, ChatMessage, ContextSegment, HistoryStoryMeta, HistoryStoryOption, MessageBody, Planet,
};
pub use pipeline::{
    ArcChunk, ArcRequest, AuthorPersona, ChunkMode, ChunkRequest, ChunkResponse, FinaleChunk,
    FinaleRequest, GenerationError, StoryGenerator,
};
pub use providers::{AnthropicProvider, OpenAiProvider};
pub use scroll::{ScrollDirective, ScrollTarget, autoscroll};
pub use session::{Phase, RequestTicket, ScrollRequest, SessionEvent, StorySession};
pub use stage::Stage;
pub use usage::{InMemoryUsageStore, JsonFileUsageStore, UsageHistory, UsageStore};
