use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Pre-serialized natal chart text, embedded verbatim into prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatalChart {
    pub birth_data: String,
    pub core_placements: String,
    pub hard_aspects: String,
    pub soft_aspects: String,
}

impl NatalChart {
    /// Full chart block for contract and finale prompts.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (label, text) in [
            ("Данные рождения", &self.birth_data),
            ("Ключевые положения", &self.core_placements),
            ("Напряжённые аспекты", &self.hard_aspects),
            ("Гармоничные аспекты", &self.soft_aspects),
        ] {
            if !text.trim().is_empty() {
                out.push_str(&format!("{label}:\n{}\n", text.trim()));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.render().is_empty()
    }
}

/// Source of astrological analysis. The story core never computes charts.
#[async_trait]
pub trait ChartProvider: Send + Sync {
    async fn natal_chart(&self) -> anyhow::Result<NatalChart>;
}

/// Chart provider returning a chart loaded up front.
#[derive(Debug, Clone)]
pub struct StaticChart(pub NatalChart);

#[async_trait]
impl ChartProvider for StaticChart {
    async fn natal_chart(&self) -> anyhow::Result<NatalChart> {
        Ok(self.0.clone())
    }
}

/// Fetch the chart, logging and swallowing failures.
pub(crate) async fn fetch_optional(provider: Option<&dyn ChartProvider>) -> Option<NatalChart> {
    let provider = provider?;
    match provider.natal_chart().await {
        Ok(chart) if !chart.is_empty() => Some(chart),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(error = ?e, "chart provider failed, continuing without chart");
            None
        }
    }
}
