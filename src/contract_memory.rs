use chrono::Utc;
use rand::Rng;
use rand::seq::SliceRandom;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chart::{self, ChartProvider};
use crate::config::{CallSettings, GenerationSettings};
use crate::contract::{PsychologicalContract, Scenario, fallback_bank};
use crate::gateway::{
    GatewayError, GatewayRequest, PromptMessage, ProviderCredentials, ProviderRequest, TextGateway,
};
use crate::pipeline::GenerationError;
use crate::prompt;
use crate::repair::parse_lenient;
use crate::usage::{UsageHistory, UsageStore};

/// How many recent contract ids are shown to the model as negative examples.
pub const RECENT_CONTRACTS: usize = 8;
/// How many recent contract/scenario pairs are shown as negative examples.
pub const RECENT_PAIRS: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractSource {
    Generated,
    FallbackBank,
}

/// The contract in force for a session plus the scenario chosen for arc 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveContract {
    pub contract: PsychologicalContract,
    pub scenario: Scenario,
    pub source: ContractSource,
}

/// Holds the active contract for one session and steers new contracts away
/// from recently used ones.
pub struct ContractMemory {
    active: Mutex<Option<ActiveContract>>,
    resolving: tokio::sync::Mutex<()>,
    store: Arc<dyn UsageStore>,
    chart: Option<Arc<dyn ChartProvider>>,
    settings: CallSettings,
}

impl ContractMemory {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self {
            active: Mutex::new(None),
            resolving: tokio::sync::Mutex::new(()),
            store,
            chart: None,
            settings: GenerationSettings::default().contract,
        }
    }

    pub fn with_chart(mut self, chart: Arc<dyn ChartProvider>) -> Self {
        self.chart = Some(chart);
        self
    }

    pub fn with_settings(mut self, settings: CallSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn active(&self) -> Option<ActiveContract> {
        self.active.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Forget the active contract so the next arc 1 resolves a new one.
    pub fn clear(&self) {
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Return the active contract, resolving and recording a new one if needed.
    ///
    /// Generation failures fall back to the built-in bank. Usage is saved
    /// before the contract becomes active.
    pub async fn ensure_contract(
        &self,
        gateway: &dyn TextGateway,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<ActiveContract, GenerationError> {
        if let Some(active) = self.active() {
            return Ok(active);
        }
        let _guard = self.resolving.lock().await;
        if let Some(active) = self.active() {
            return Ok(active);
        }

        let mut history = match self.store.load().await {
            Ok(h) => h,
            Err(e) => {
                warn!(error = %e, "usage history unavailable, starting empty");
                UsageHistory::default()
            }
        };

        let generated = match self.generate(gateway, &history, cancel, credentials).await {
            Ok(contract) => Some(contract),
            Err(GenerationError::Cancelled) => return Err(GenerationError::Cancelled),
            Err(e) => {
                warn!(error = %e, "contract generation failed, using fallback bank");
                None
            }
        };
        let active = settle(generated, &history).ok_or(GenerationError::NoContract)?;
        if cancel.is_cancelled() {
            debug!("contract resolution cancelled before recording");
            return Err(GenerationError::Cancelled);
        }

        history.record(&active.contract.id, &active.scenario.id, Utc::now());
        if let Err(e) = self.store.save(&history).await {
            warn!(error = %e, "failed to save usage history");
        }
        *self.active.lock().unwrap_or_else(|e| e.into_inner()) = Some(active.clone());
        Ok(active)
    }

    async fn generate(
        &self,
        gateway: &dyn TextGateway,
        history: &UsageHistory,
        cancel: &CancellationToken,
        credentials: &ProviderCredentials,
    ) -> Result<PsychologicalContract, GenerationError> {
        let recent_ids: Vec<String> = history
            .recent_contract_ids(RECENT_CONTRACTS)
            .into_iter()
            .map(str::to_string)
            .collect();
        let recent_pairs: Vec<(String, String)> = history
            .recent_pairs(RECENT_PAIRS)
            .into_iter()
            .map(|(c, s)| (c.to_string(), s.to_string()))
            .collect();
        let chart = chart::fetch_optional(self.chart.as_deref()).await;

        let reply = gateway
            .call(GatewayRequest {
                prompt: ProviderRequest {
                    system: prompt::CONTRACT_SYSTEM.to_string(),
                    messages: vec![PromptMessage::user(prompt::contract_prompt(
                        &recent_ids,
                        &recent_pairs,
                        chart.as_ref(),
                    ))],
                    temperature: self.settings.temperature,
                    max_tokens: self.settings.max_tokens,
                },
                cancel: cancel.clone(),
                credentials: credentials.clone(),
            })
            .await
            .map_err(|e| match e {
                GatewayError::Cancelled => GenerationError::Cancelled,
                other => GenerationError::Gateway(other),
            })?;
        let (value, _) = parse_lenient(&reply.text)?;
        PsychologicalContract::from_value(value).map_err(|e| {
            warn!(error = %e, "generated contract rejected");
            GenerationError::NoContract
        })
    }
}

/// Attach a scenario to a generated contract, or fall back to the bank.
fn settle(generated: Option<PsychologicalContract>, history: &UsageHistory) -> Option<ActiveContract> {
    let mut rng = rand::thread_rng();
    if let Some(contract) = generated {
        if let Some(scenario) = pick_scenario(&contract, history, &mut rng) {
            info!(contract = %contract.id, scenario = %scenario.id, "contract generated");
            return Some(ActiveContract {
                contract,
                scenario,
                source: ContractSource::Generated,
            });
        }
    }
    let active = pick_fallback(history, &mut rng)?;
    info!(contract = %active.contract.id, scenario = %active.scenario.id, "contract taken from fallback bank");
    Some(active)
}

/// Prefer a scenario not among the recent pairs; otherwise pick at random.
fn pick_scenario<R: Rng>(
    contract: &PsychologicalContract,
    history: &UsageHistory,
    rng: &mut R,
) -> Option<Scenario> {
    let recent = history.recent_pairs(RECENT_PAIRS);
    contract
        .scenarios
        .iter()
        .find(|s| !recent.contains(&(contract.id.as_str(), s.id.as_str())))
        .or_else(|| contract.scenarios.choose(rng))
        .cloned()
}

/// Least recently used bank entry outside the recent set, ties broken randomly.
fn pick_fallback<R: Rng>(history: &UsageHistory, rng: &mut R) -> Option<ActiveContract> {
    let bank = fallback_bank();
    let recent = history.recent_contract_ids(RECENT_CONTRACTS);
    let fresh: Vec<&PsychologicalContract> =
        bank.iter().filter(|c| !recent.contains(&c.id.as_str())).collect();
    let candidates = if fresh.is_empty() {
        bank.iter().collect()
    } else {
        fresh
    };
    let oldest = candidates.iter().map(|c| history.last_used(&c.id)).min()?;
    let tied: Vec<&PsychologicalContract> = candidates
        .into_iter()
        .filter(|c| history.last_used(&c.id) == oldest)
        .collect();
    let contract = (*tied.choose(rng)?).clone();
    let scenario = pick_scenario(&contract, history, rng)?;
    Some(ActiveContract {
        contract,
        scenario,
        source: ContractSource::FallbackBank,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::ScriptedGateway;
    use crate::usage::InMemoryUsageStore;
    use chrono::Duration;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    fn generated_reply() -> String {
        json!({
            "id": "Fear of Silence",
            "question": "Можно ли мне молчать?",
            "theme": "тишина",
            "astroIndicators": ["Меркурий в 12 доме"],
            "commonTraps": [{"name": "болтливость", "description": "заполнять паузы"}],
            "scenarios": [{"id": "library", "setting": "библиотека", "situation": "все молчат", "symbolism": "книга"}],
            "choicePoints": ["сказать или промолчать"]
        })
        .to_string()
    }

    fn creds() -> ProviderCredentials {
        ProviderCredentials {
            anthropic: Some("k".into()),
            openai: None,
        }
    }

    #[tokio::test]
    async fn generated_contract_is_cached_and_recorded_once() {
        let store = Arc::new(InMemoryUsageStore::new());
        let memory = ContractMemory::new(store.clone());
        let gw = ScriptedGateway::new(vec![Ok(generated_reply())]);
        let cancel = CancellationToken::new();

        let first = memory.ensure_contract(gw.as_ref(), &cancel, &creds()).await.unwrap();
        let second = memory.ensure_contract(gw.as_ref(), &cancel, &creds()).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.source, ContractSource::Generated);
        assert_eq!(first.contract.id, "fear-of-silence");
        assert_eq!(gw.calls(), 1);
        let history = store.snapshot();
        assert_eq!(history.contracts.len(), 1);
        assert_eq!(history.scenarios[0].scenario_id, "library");
    }

    #[tokio::test]
    async fn invalid_contract_falls_back_to_bank() {
        let store = Arc::new(InMemoryUsageStore::new());
        let memory = ContractMemory::new(store.clone());
        let gw = ScriptedGateway::new(vec![Ok(json!({"question": "?", "theme": ""}).to_string())]);

        let active = memory
            .ensure_contract(gw.as_ref(), &CancellationToken::new(), &creds())
            .await
            .unwrap();
        assert_eq!(active.source, ContractSource::FallbackBank);
        assert!(fallback_bank().iter().any(|c| c.id == active.contract.id));
        assert_eq!(store.snapshot().contracts.len(), 1);
    }

    #[tokio::test]
    async fn clear_forces_a_new_resolution() {
        let memory = ContractMemory::new(Arc::new(InMemoryUsageStore::new()));
        let gw = ScriptedGateway::new(vec![Err("down".into()), Err("down".into())]);
        let cancel = CancellationToken::new();
        memory.ensure_contract(gw.as_ref(), &cancel, &creds()).await.unwrap();
        memory.clear();
        assert!(memory.active().is_none());
        memory.ensure_contract(gw.as_ref(), &cancel, &creds()).await.unwrap();
        assert_eq!(gw.calls(), 2);
    }

    #[tokio::test]
    async fn stored_history_steers_the_fallback_pick() {
        let bank = fallback_bank();
        let now = Utc::now();
        let mut history = UsageHistory::default();
        for (i, c) in bank.iter().skip(1).enumerate() {
            history.record(&c.id, &c.scenarios[0].id, now - Duration::minutes(50 - i as i64));
        }
        let store = Arc::new(InMemoryUsageStore::with_history(history));
        let memory = ContractMemory::new(store.clone());
        let gw = ScriptedGateway::new(vec![Err("down".into())]);

        let active = memory
            .ensure_contract(gw.as_ref(), &CancellationToken::new(), &creds())
            .await
            .unwrap();

        assert_eq!(active.source, ContractSource::FallbackBank);
        assert_eq!(active.contract.id, bank[0].id);
        assert_eq!(store.snapshot().recent_contract_ids(1), vec![bank[0].id.as_str()]);
    }

    #[tokio::test]
    async fn cancellation_records_nothing() {
        let store = Arc::new(InMemoryUsageStore::new());
        let memory = ContractMemory::new(store.clone());
        let gw = ScriptedGateway::new(vec![Ok(generated_reply())]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = memory.ensure_contract(gw.as_ref(), &cancel, &creds()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.snapshot().is_empty());
        assert!(memory.active().is_none());
    }

    #[test]
    fn fallback_prefers_least_recently_used_outside_recent_set() {
        let bank = fallback_bank();
        let now = Utc::now();
        let mut history = UsageHistory::default();
        // Every bank entry but the last was used, oldest first.
        for (i, c) in bank.iter().take(bank.len() - 1).enumerate() {
            history.record(&c.id, &c.scenarios[0].id, now - Duration::minutes(100 - i as i64));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let picked = pick_fallback(&history, &mut rng).unwrap();
        assert_eq!(picked.contract.id, bank[bank.len() - 1].id);
    }

    #[test]
    fn fallback_reuses_oldest_when_all_recent() {
        let bank = fallback_bank();
        let now = Utc::now();
        let mut history = UsageHistory::default();
        for (i, c) in bank.iter().enumerate() {
            history.record(&c.id, &c.scenarios[0].id, now - Duration::minutes(100 - i as i64));
        }
        let mut rng = StdRng::seed_from_u64(7);
        let picked = pick_fallback(&history, &mut rng).unwrap();
        assert_eq!(picked.contract.id, bank[0].id);
        assert_eq!(picked.scenario.id, bank[0].scenarios[1].id);
    }

    #[test]
    fn scenario_falls_back_to_random_when_all_recent() {
        let contract = fallback_bank().remove(0);
        let mut history = UsageHistory::default();
        for s in &contract.scenarios {
            history.record(&contract.id, &s.id, Utc::now());
        }
        let mut rng = StdRng::seed_from_u64(1);
        let s = pick_scenario(&contract, &history, &mut rng).unwrap();
        assert!(contract.scenario(&s.id).is_some());
    }
}
