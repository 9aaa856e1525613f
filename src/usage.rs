use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Maximum number of remembered contract uses.
pub const MAX_CONTRACT_ENTRIES: usize = 20;
/// Maximum number of remembered contract/scenario pairs.
pub const MAX_SCENARIO_ENTRIES: usize = 60;
/// Maximum number of remembered scenarios for a single contract.
pub const MAX_SCENARIOS_PER_CONTRACT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractUse {
    pub contract_id: String,
    pub used_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioUse {
    pub contract_id: String,
    pub scenario_id: String,
    pub used_at: DateTime<Utc>,
}

/// Bounded, newest-first record of which contracts and scenarios were used.
///
/// Only consulted to steer future selection away from recent repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageHistory {
    #[serde(default)]
    pub contracts: Vec<ContractUse>,
    #[serde(default)]
    pub scenarios: Vec<ScenarioUse>,
}

impl UsageHistory {
    /// Record one contract resolution together with its chosen scenario.
    pub fn record(&mut self, contract_id: &str, scenario_id: &str, at: DateTime<Utc>) {
        self.contracts.retain(|c| c.contract_id != contract_id);
        self.contracts.insert(
            0,
            ContractUse {
                contract_id: contract_id.to_string(),
                used_at: at,
            },
        );
        self.contracts.truncate(MAX_CONTRACT_ENTRIES);

        self.scenarios
            .retain(|s| !(s.contract_id == contract_id && s.scenario_id == scenario_id));
        self.scenarios.insert(
            0,
            ScenarioUse {
                contract_id: contract_id.to_string(),
                scenario_id: scenario_id.to_string(),
                used_at: at,
            },
        );
        let mut per_contract = 0usize;
        self.scenarios.retain(|s| {
            if s.contract_id != contract_id {
                return true;
            }
            per_contract += 1;
            per_contract <= MAX_SCENARIOS_PER_CONTRACT
        });
        self.scenarios.truncate(MAX_SCENARIO_ENTRIES);
    }

    /// Ids of the `limit` most recently used contracts.
    pub fn recent_contract_ids(&self, limit: usize) -> Vec<&str> {
        self.contracts
            .iter()
            .take(limit)
            .map(|c| c.contract_id.as_str())
            .collect()
    }

    /// The `limit` most recent contract/scenario pairs.
    pub fn recent_pairs(&self, limit: usize) -> Vec<(&str, &str)> {
        self.scenarios
            .iter()
            .take(limit)
            .map(|s| (s.contract_id.as_str(), s.scenario_id.as_str()))
            .collect()
    }

    pub fn last_used(&self, contract_id: &str) -> Option<DateTime<Utc>> {
        self.contracts
            .iter()
            .find(|c| c.contract_id == contract_id)
            .map(|c| c.used_at)
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty() && self.scenarios.is_empty()
    }
}

/// Persistence for [`UsageHistory`] across sessions.
#[async_trait]
pub trait UsageStore: Send + Sync {
    async fn load(&self) -> anyhow::Result<UsageHistory>;
    async fn save(&self, history: &UsageHistory) -> anyhow::Result<()>;
}

/// Process-local store, mainly for tests and ephemeral sessions.
#[derive(Default)]
pub struct InMemoryUsageStore {
    history: Mutex<UsageHistory>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: UsageHistory) -> Self {
        Self {
            history: Mutex::new(history),
        }
    }

    pub fn snapshot(&self) -> UsageHistory {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn load(&self) -> anyhow::Result<UsageHistory> {
        Ok(self.snapshot())
    }

    async fn save(&self, history: &UsageHistory) -> anyhow::Result<()> {
        *self.history.lock().unwrap_or_else(|e| e.into_inner()) = history.clone();
        Ok(())
    }
}

/// Stores the history as pretty-printed JSON. A missing file reads as empty.
pub struct JsonFileUsageStore {
    path: PathBuf,
}

impl JsonFileUsageStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl UsageStore for JsonFileUsageStore {
    async fn load(&self) -> anyhow::Result<UsageHistory> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UsageHistory::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, history: &UsageHistory) -> anyhow::Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let text = serde_json::to_string_pretty(history)?;
        tokio::fs::write(&self.path, text).await?;
        tracing::trace!(path = %self.path.display(), "usage history saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn record_is_newest_first_and_deduplicated() {
        let mut h = UsageHistory::default();
        let t0 = Utc::now();
        h.record("a", "s1", t0);
        h.record("b", "s1", t0 + Duration::seconds(1));
        h.record("a", "s2", t0 + Duration::seconds(2));
        assert_eq!(h.recent_contract_ids(8), vec!["a", "b"]);
        assert_eq!(h.recent_pairs(2), vec![("a", "s2"), ("b", "s1")]);
        assert_eq!(h.scenarios.len(), 3);
        assert_eq!(h.last_used("b"), Some(t0 + Duration::seconds(1)));
    }

    #[test]
    fn caps_scenarios_per_contract_and_total() {
        let mut h = UsageHistory::default();
        let t0 = Utc::now();
        for i in 0..10 {
            h.record("a", &format!("s{i}"), t0 + Duration::seconds(i));
        }
        assert_eq!(h.scenarios.len(), MAX_SCENARIOS_PER_CONTRACT);
        assert_eq!(h.scenarios[0].scenario_id, "s9");

        for i in 0..100 {
            h.record(&format!("c{i}"), "s", t0);
        }
        assert_eq!(h.contracts.len(), MAX_CONTRACT_ENTRIES);
        assert_eq!(h.scenarios.len(), MAX_SCENARIO_ENTRIES);
        assert_eq!(h.contracts[0].contract_id, "c99");
    }

    #[tokio::test]
    async fn json_file_store_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileUsageStore::new(dir.path().join("nested").join("usage.json"));
        assert!(store.load().await.unwrap().is_empty());

        let mut h = UsageHistory::default();
        h.record("anger-as-boundary", "council-hall", Utc::now());
        store.save(&h).await.unwrap();
        assert_eq!(store.load().await.unwrap(), h);
    }

    #[tokio::test]
    async fn json_file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.json");
        tokio::fs::write(&path, "not json").await.unwrap();
        assert!(JsonFileUsageStore::new(path).load().await.is_err());
    }
}
