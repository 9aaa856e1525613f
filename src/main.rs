use anyhow::Context;
use clap::Parser;
use natal_story::config::{self, AppConfig, ProviderConfig};
use natal_story::logging::{self, LogLevel};
use natal_story::{
    AnthropicProvider, ChartProvider, ContractMemory, FallbackGateway, JsonFileUsageStore, NatalChart,
    OpenAiProvider, ProviderKind, SessionEvent, StaticChart, Step, StoryDirector, StoryGenerator,
    StorySession, TextProvider,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

/// Interactive astrological story in the terminal.
#[derive(Parser, Debug)]
#[command(name = "natal-story", version, about = "Branching story driven by a natal chart")]
struct Cli {
    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Logging verbosity level
    #[arg(long, default_value = "info")]
    log_level: LogLevel,

    /// JSON file with precomputed natal chart text
    #[arg(long)]
    chart: Option<PathBuf>,
}

fn build_provider(cfg: &ProviderConfig) -> anyhow::Result<Arc<dyn TextProvider>> {
    let provider: Arc<dyn TextProvider> = match cfg.provider {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            cfg.base_url(),
            cfg.model.clone(),
            cfg.timeout(),
        )?),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(
            cfg.base_url(),
            cfg.model.clone(),
            cfg.timeout(),
        )?),
    };
    Ok(provider)
}

async fn load_chart(path: &Path) -> anyhow::Result<NatalChart> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading chart {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

/// Print timeline additions and newly revealed choices as events arrive.
async fn print_events(
    director: Arc<StoryDirector>,
    mut events: tokio::sync::mpsc::UnboundedReceiver<SessionEvent>,
) {
    let mut printed = 0usize;
    let mut shown_choices = 0usize;
    while let Some(event) = events.recv().await {
        let session = director.session();
        match event {
            SessionEvent::MessagesChanged => {
                let messages = session.get_messages();
                if messages.len() < printed {
                    printed = 0;
                }
                for msg in &messages[printed..] {
                    println!("[{}] {}: {}\n", msg.time(), msg.author(), msg.content());
                }
                printed = messages.len();
                if let Some(author) = session.typing() {
                    println!("… {author} печатает");
                }
            }
            SessionEvent::ChoicesChanged { visible, hiding } => {
                if hiding || visible == 0 {
                    shown_choices = 0;
                    continue;
                }
                let choices = session.choices();
                for (i, choice) in choices.iter().enumerate().take(visible).skip(shown_choices) {
                    println!("  {}. {} ({})", i + 1, choice.title, choice.description);
                }
                if visible > choices.len() && shown_choices <= choices.len() {
                    println!("  Введи номер варианта или q для выхода.");
                }
                shown_choices = visible;
            }
            SessionEvent::PhaseChanged(phase) => debug!(?phase, "phase"),
            SessionEvent::Scroll(_) => {}
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_level);

    let cfg = match &cli.config {
        Some(path) => config::load(path)
            .await
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    let credentials = cfg.credentials_from_env();
    if credentials.is_empty() {
        anyhow::bail!(
            "no API key found; set {} or {}",
            cfg.gateway.primary.api_key_env(),
            cfg.gateway.secondary.api_key_env()
        );
    }

    let gateway = Arc::new(FallbackGateway::new(
        build_provider(&cfg.gateway.primary)?,
        build_provider(&cfg.gateway.secondary)?,
    ));
    let store = Arc::new(JsonFileUsageStore::new(cfg.usage.path.clone()));
    let mut contracts = ContractMemory::new(store).with_settings(cfg.generation.contract);
    let mut generator_chart: Option<Arc<dyn ChartProvider>> = None;
    if let Some(path) = &cli.chart {
        let chart: Arc<dyn ChartProvider> = Arc::new(StaticChart(load_chart(path).await?));
        contracts = contracts.with_chart(chart.clone());
        generator_chart = Some(chart);
    }
    let mut generator = StoryGenerator::new(gateway, Arc::new(contracts)).with_settings(cfg.generation);
    if let Some(chart) = generator_chart {
        generator = generator.with_chart(chart);
    }

    let (session, events) = StorySession::new(cfg.session);
    let director = Arc::new(StoryDirector::new(
        session,
        Arc::new(generator),
        cfg.author.persona(),
        cfg.author.arc_limit,
        credentials,
    ));
    let printer = tokio::spawn(print_events(director.clone(), events));

    info!(author = %cfg.author.name, arcs = director.arc_limit(), "starting story");
    let mut step = director.start().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if step == Step::Finale {
            println!("Конец истории.");
            break;
        }
        if director.finale_failed() {
            println!("Повторить финал? [y/n]");
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        if input.eq_ignore_ascii_case("q") {
            break;
        }
        if director.finale_failed() {
            if input.eq_ignore_ascii_case("y") {
                step = director.retry_finale().await?;
                continue;
            }
            break;
        }
        let options = director.options();
        let picked = input
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| options.get(i));
        match picked {
            Some(option) => step = director.choose(&option.id).await?,
            None => println!("Нет такого варианта."),
        }
    }

    director.session().shutdown();
    printer.abort();
    Ok(())
}
