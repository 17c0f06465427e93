use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One AI request as observed by the emitter or read back from the row store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_id: String,
    pub user_id: String,
    pub team_id: String,
    pub model_used: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub energy_wh: f64,
    pub co2_grams: f64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    #[serde(default)]
    pub prompt_complexity: f64,
    #[serde(default)]
    pub failed: bool,
    pub created_at: DateTime<Utc>,
}

impl RequestRecord {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamRow {
    pub team_id: String,
    pub team_name: String,
    pub member_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamSummary {
    pub team_id: String,
    pub team_name: String,
    pub member_count: u32,
    pub request_count: usize,
    pub total_co2_grams: f64,
    pub total_energy_kwh: f64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub efficiency_score: f64,
    pub green_tokens_earned: f64,
    pub badges_earned: u64,
    pub rank: Option<usize>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model_name: String,
    pub usage_count: usize,
    pub total_energy_kwh: f64,
    pub total_co2_grams: f64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    pub efficiency_score: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Badge {
    Gold,
    Silver,
    Bronze,
}

impl Badge {
    pub fn for_rank(rank: usize) -> Option<Badge> {
        match rank {
            1 => Some(Badge::Gold),
            2 => Some(Badge::Silver),
            3 => Some(Badge::Bronze),
            _ => None,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Badge::Gold => "gold",
            Badge::Silver => "silver",
            Badge::Bronze => "bronze",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: usize,
    /// Stable key of the ranked subject; display names may repeat.
    pub subject_id: String,
    pub subject_name: String,
    pub primary_value: f64,
    pub secondary_value: Option<f64>,
    pub change_percent: Option<f64>,
    pub badge: Option<Badge>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResult {
    pub metric: String,
    pub historical_length: usize,
    pub slope: f64,
    pub intercept: f64,
    pub projected_values: Vec<f64>,
    pub confidence_intervals: Vec<ConfidenceInterval>,
    pub root_mean_squared_error: f64,
    pub accuracy_score: f64,
}

/// Metric a team history or forecast is computed over.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Metric {
    Co2,
    Energy,
    Cost,
}

impl Metric {
    pub fn parse(input: &str) -> Option<Metric> {
        match input.trim().to_ascii_lowercase().as_str() {
            "co2" | "co2_saved" => Some(Metric::Co2),
            "energy" | "energy_saved" => Some(Metric::Energy),
            "cost" => Some(Metric::Cost),
            _ => None,
        }
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Metric::Co2 => "co2",
            Metric::Energy => "energy",
            Metric::Cost => "cost",
        }
    }

    pub fn value_of(self, record: &RequestRecord) -> f64 {
        match self {
            Metric::Co2 => record.co2_grams,
            Metric::Energy => record.energy_wh / 1000.0,
            Metric::Cost => record.cost_usd,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamDashboard {
    pub summary: TeamSummary,
    pub models: Vec<ModelSummary>,
    pub model_leaderboard: Vec<LeaderboardEntry>,
    pub team_leaderboard: Vec<LeaderboardEntry>,
    pub total_teams: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeWindow {
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl TimeWindow {
    pub fn as_label(self) -> &'static str {
        match self {
            TimeWindow::OneDay => "1d",
            TimeWindow::SevenDays => "7d",
            TimeWindow::ThirtyDays => "30d",
        }
    }

    pub fn as_hours(self) -> i64 {
        match self {
            TimeWindow::OneDay => 24,
            TimeWindow::SevenDays => 24 * 7,
            TimeWindow::ThirtyDays => 24 * 30,
        }
    }
}
