use async_trait::async_trait;
use natal_story::gateway::{GatewayReply, GatewayRequest, ProviderRequest};
use natal_story::pipeline::{DESCRIPTION_LIMIT, TITLE_LIMIT};
use natal_story::{
    ArcRequest, AuthorPersona, ContextSegment, ContractMemory, FallbackGateway, FinaleRequest,
    GatewayError, GenerationError, InMemoryUsageStore, ProviderCredentials, ProviderError,
    ProviderKind, StoryGenerator, TextGateway, TextProvider,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

fn contract_reply() -> String {
    json!({
        "id": "mirror-of-doubt",
        "question": "Могу ли я доверять собственному голосу?",
        "theme": "самодоверие",
        "astroIndicators": ["Солнце в квадрате с Сатурном"],
        "commonTraps": [{"name": "чужое мнение", "description": "спрашивать всех, кроме себя"}],
        "scenarios": [
            {"id": "crossroads", "setting": "перекрёсток", "situation": "нужно выбрать дорогу", "symbolism": "компас"},
            {"id": "stage", "setting": "сцена", "situation": "зал ждёт слов", "symbolism": "микрофон"}
        ],
        "choicePoints": ["послушать себя или других"]
    })
    .to_string()
}

fn arc_reply(scene: &str) -> String {
    json!({
        "meta": {"title": "Зеркало", "genre": "притча", "contract": "другой вопрос"},
        "node": {"scene": scene},
        "options": [
            {"id": "a", "title": "Шагнуть вперёд", "description": "довериться себе"},
            {"id": "b", "title": "Подождать", "description": "прислушаться к другим"}
        ]
    })
    .to_string()
}

/// Gateway replaying scripted replies and remembering every user prompt.
struct Script {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl Script {
    fn new(replies: &[String]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().cloned().collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGateway for Script {
    async fn call(&self, request: GatewayRequest) -> Result<GatewayReply, GatewayError> {
        let prompt = request.prompt.messages[0].content.clone();
        self.prompts.lock().unwrap().push(prompt);
        let next = self.replies.lock().unwrap().pop_front();
        match next {
            Some(text) => Ok(GatewayReply {
                text,
                provider_used: "script".into(),
            }),
            None => Err(GatewayError::MissingCredentials),
        }
    }
}

/// Provider that always fails.
struct Down;

#[async_trait]
impl TextProvider for Down {
    fn name(&self) -> &str {
        "claude"
    }
    fn kind(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }
    async fn complete(&self, _r: &ProviderRequest, _k: &str) -> Result<String, ProviderError> {
        Err(ProviderError::Status {
            status: 529,
            body: "overloaded".into(),
        })
    }
}

/// Provider replaying scripted replies.
struct Backup {
    replies: Mutex<VecDeque<String>>,
    calls: AtomicUsize,
}

#[async_trait]
impl TextProvider for Backup {
    fn name(&self) -> &str {
        "gpt"
    }
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }
    async fn complete(&self, _r: &ProviderRequest, _k: &str) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(ProviderError::EmptyReply)
    }
}

fn persona() -> AuthorPersona {
    AuthorPersona {
        name: "Луна".into(),
        style_prompt: "Пиши тепло.".into(),
        genre: "притча".into(),
    }
}

fn creds() -> ProviderCredentials {
    ProviderCredentials {
        anthropic: Some("a-key".into()),
        openai: Some("o-key".into()),
    }
}

fn arc_request(arc: u32, contract: Option<&str>, context: Vec<ContextSegment>) -> ArcRequest {
    ArcRequest {
        context,
        current_choice: None,
        summary: None,
        author: persona(),
        arc_limit: 6,
        current_arc: arc,
        contract: contract.map(str::to_string),
        meta: None,
        cancel: CancellationToken::new(),
        credentials: creds(),
    }
}

fn finale_request() -> FinaleRequest {
    FinaleRequest {
        context: Vec::new(),
        current_choice: None,
        summary: None,
        author: persona(),
        arc_limit: 6,
        contract: Some("Могу ли я доверять себе?".into()),
        meta: None,
        cancel: CancellationToken::new(),
        credentials: creds(),
    }
}

#[tokio::test]
async fn first_arc_resolves_contract_and_records_one_usage() {
    // Given no contract yet and an empty usage history
    let store = Arc::new(InMemoryUsageStore::new());
    let memory = Arc::new(ContractMemory::new(store.clone()));
    let gateway = Script::new(&[contract_reply(), arc_reply("Ты стоишь у зеркала.")]);
    let generator = StoryGenerator::new(gateway.clone(), memory.clone());

    // When arc 1 is generated
    let chunk = generator
        .generate_arc(arc_request(1, None, Vec::new()))
        .await
        .unwrap();

    // Then the contract question drives the story and one usage is recorded
    assert_eq!(chunk.meta.contract, "Могу ли я доверять собственному голосу?");
    assert_eq!(chunk.node.scene, "Ты стоишь у зеркала.");
    let history = store.snapshot();
    assert_eq!(history.contracts.len(), 1);
    assert_eq!(history.scenarios.len(), 1);
    assert_eq!(history.contracts[0].contract_id, "mirror-of-doubt");

    // and the arc prompt was grounded in the chosen scenario
    let prompts = gateway.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Ситуация: нужно выбрать дорогу"));
}

#[tokio::test]
async fn secondary_provider_reply_counts_as_single_call() {
    let store = Arc::new(InMemoryUsageStore::new());
    let memory = Arc::new(ContractMemory::new(store.clone()));
    let backup = Arc::new(Backup {
        replies: Mutex::new(
            [contract_reply(), arc_reply("Первая сцена."), arc_reply("Вторая сцена.")]
                .into_iter()
                .collect(),
        ),
        calls: AtomicUsize::new(0),
    });
    let gateway = Arc::new(FallbackGateway::new(Arc::new(Down), backup.clone()));
    let generator = StoryGenerator::new(gateway, memory);

    let first = generator
        .generate_arc(arc_request(1, None, Vec::new()))
        .await
        .unwrap();
    assert_eq!(first.node.scene, "Первая сцена.");
    assert!(!first.degraded);

    let second = generator
        .generate_arc(arc_request(2, Some(&first.meta.contract), Vec::new()))
        .await
        .unwrap();
    assert_eq!(second.node.scene, "Вторая сцена.");

    assert_eq!(backup.calls.load(Ordering::SeqCst), 3);
    let history = store.snapshot();
    assert_eq!(history.contracts.len(), 1);
    assert_eq!(history.scenarios.len(), 1);
}

#[tokio::test]
async fn finale_throws_when_every_repair_stage_fails() {
    let memory = Arc::new(ContractMemory::new(Arc::new(InMemoryUsageStore::new())));
    for reply in ["Финала не будет", "{ resolution: без кавычек }", "```\n{\"finale\": [1, 2,\n```"] {
        let generator = StoryGenerator::new(Script::new(&[reply.to_string()]), memory.clone());
        let result = generator.generate_finale(finale_request()).await;
        assert!(
            matches!(result, Err(GenerationError::Parse(_))),
            "reply {reply:?} produced {result:?}"
        );
    }
}

#[tokio::test]
async fn finale_reports_gateway_failure() {
    let memory = Arc::new(ContractMemory::new(Arc::new(InMemoryUsageStore::new())));
    let generator = StoryGenerator::new(Script::new(&[]), memory);
    let err = generator.generate_finale(finale_request()).await.unwrap_err();
    assert!(matches!(err, GenerationError::Gateway(_)));
}

#[tokio::test]
async fn prompt_carries_at_most_four_verbatim_segments() {
    let memory = Arc::new(ContractMemory::new(Arc::new(InMemoryUsageStore::new())));
    let gateway = Script::new(&[arc_reply("Дальше.")]);
    let generator = StoryGenerator::new(gateway.clone(), memory);
    let context: Vec<_> = (1..=7)
        .map(|arc| ContextSegment {
            text: format!("сцена номер {arc}"),
            arc,
            option_title: Some(format!("выбор {arc}")),
            option_description: None,
        })
        .collect();

    generator
        .generate_arc(arc_request(8, Some("Вопрос"), context))
        .await
        .unwrap();

    let prompt = &gateway.prompts()[0];
    assert_eq!(prompt.matches("[выбор читателя:").count(), 4);
    assert!(prompt.contains("Арка 1: сцена номер 1 → выбор 1"));
    assert!(prompt.contains("Арка 7: сцена номер 7 [выбор читателя: выбор 7]"));
    assert!(!prompt.contains("Арка 3: сцена номер 3 [выбор"));
}

#[tokio::test]
async fn oversized_options_are_trimmed() {
    let memory = Arc::new(ContractMemory::new(Arc::new(InMemoryUsageStore::new())));
    let reply = json!({
        "node": {"scene": "Сцена."},
        "options": [
            {"id": "a", "title": "Очень ".repeat(20), "description": "длинно ".repeat(40)},
            {"title": "", "description": "   "}
        ]
    })
    .to_string();
    let generator = StoryGenerator::new(Script::new(&[reply]), memory);
    let chunk = generator
        .generate_arc(arc_request(2, Some("Вопрос"), Vec::new()))
        .await
        .unwrap();

    assert_eq!(chunk.options.len(), 2);
    for option in &chunk.options {
        let title = option.title.chars().count();
        assert!((1..=TITLE_LIMIT).contains(&title));
        assert!(option.description.chars().count() <= DESCRIPTION_LIMIT);
        assert!(!option.id.is_empty());
    }
    assert_eq!(chunk.options[1].id, "option-2");
}
