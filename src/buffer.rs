//! In-memory rolling window of recent requests.
//!
//! The buffer is bounded by capacity only: the oldest entry is evicted once
//! the capacity is exceeded. Time windows are applied when a summary is
//! computed, never to the stored entries.

use crate::analytics::{mean, median, percentile, sorted};
use crate::models::RequestRecord;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

pub const DEFAULT_CAPACITY: usize = 1000;
const RECOMMENDATION_LOOKBACK: usize = 50;
const COMPARISON_WINDOW_HOURS: i64 = 24;

/// A buffered record plus the per-request metrics derived on insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedRequest {
    pub record: RequestRecord,
    pub tokens_per_second: f64,
    pub cost_per_token: f64,
    pub efficiency_score: f64,
}

impl BufferedRequest {
    pub fn from_record(record: RequestRecord) -> Self {
        let total_tokens = record.total_tokens() as f64;
        let tokens_per_second = if record.latency_ms > 0 {
            total_tokens / (record.latency_ms as f64 / 1000.0)
        } else {
            0.0
        };
        let cost_per_token = if total_tokens > 0.0 {
            record.cost_usd / total_tokens
        } else {
            0.0
        };
        let efficiency_score = request_efficiency_score(
            record.latency_ms,
            record.cost_usd,
            tokens_per_second,
            record.prompt_complexity,
        );

        Self {
            record,
            tokens_per_second,
            cost_per_token,
            efficiency_score,
        }
    }
}

/// Per-request efficiency on a 0-100 scale: fast, cheap, high-throughput
/// requests score higher, with a small bonus for complex prompts.
pub fn request_efficiency_score(
    latency_ms: u64,
    cost_usd: f64,
    tokens_per_second: f64,
    complexity: f64,
) -> f64 {
    let latency_score = (1.0 - latency_ms as f64 / 5000.0).max(0.0);
    let cost_score = (1.0 - cost_usd / 0.1).max(0.0);
    let speed_score = (tokens_per_second / 100.0).min(1.0);

    let base = latency_score * 0.3 + cost_score * 0.4 + speed_score * 0.3;
    ((base + complexity * 0.1) * 100.0).clamp(0.0, 100.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostStats {
    pub mean_usd: f64,
    pub median_usd: f64,
    pub min_usd: f64,
    pub max_usd: f64,
    pub total_usd: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EfficiencyStats {
    pub mean_score: f64,
    pub median_score: f64,
    pub min_score: f64,
    pub max_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub mean_tokens_per_second: f64,
    pub median_tokens_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub window_hours: i64,
    pub model_filter: Option<String>,
    pub total_requests: usize,
    pub latency: LatencyStats,
    pub cost: CostStats,
    pub efficiency: EfficiencyStats,
    pub throughput: ThroughputStats,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPerformance {
    pub model: String,
    pub request_count: usize,
    pub avg_latency_ms: f64,
    pub avg_cost_usd: f64,
    pub total_cost_usd: f64,
    pub avg_efficiency_score: f64,
    pub avg_tokens_per_second: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub window_hours: i64,
    pub models: Vec<ModelPerformance>,
    pub best_performing_model: String,
    pub most_cost_effective_model: String,
    pub fastest_model: String,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlternativeModel {
    pub model: String,
    pub efficiency_improvement: f64,
    pub cost_difference: f64,
    pub latency_difference: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub current_model: String,
    pub avg_latency_ms: f64,
    pub avg_cost_usd: f64,
    pub avg_efficiency_score: f64,
    pub alternatives: Vec<AlternativeModel>,
    pub advice: Vec<String>,
}

pub struct RollingBuffer {
    capacity: usize,
    entries: Mutex<VecDeque<BufferedRequest>>,
}

impl RollingBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Appends a record, evicting the oldest entry when over capacity.
    pub fn record(&self, record: RequestRecord) {
        let entry = BufferedRequest::from_record(record);
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        while entries.len() > self.capacity {
            if let Some(evicted) = entries.pop_front() {
                tracing::debug!(request_id = %evicted.record.request_id, "evicted from rolling buffer");
            }
        }
    }

    /// Copies the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<BufferedRequest> {
        self.entries.lock().iter().cloned().collect()
    }

    fn window(&self, window_hours: i64, now: DateTime<Utc>) -> Vec<BufferedRequest> {
        let cutoff = now - Duration::hours(window_hours);
        self.snapshot()
            .into_iter()
            .filter(|e| e.record.created_at >= cutoff)
            .collect()
    }

    /// Windowed statistics, optionally for a single model. `None` means no
    /// record fell inside the window.
    pub fn summary(
        &self,
        window_hours: i64,
        model_filter: Option<&str>,
        now: DateTime<Utc>,
    ) -> Option<PerformanceSummary> {
        let recent: Vec<BufferedRequest> = self
            .window(window_hours, now)
            .into_iter()
            .filter(|e| model_filter.map_or(true, |m| e.record.model_used == m))
            .collect();
        if recent.is_empty() {
            return None;
        }

        let latencies: Vec<f64> = recent.iter().map(|e| e.record.latency_ms as f64).collect();
        let costs: Vec<f64> = recent.iter().map(|e| e.record.cost_usd).collect();
        let scores: Vec<f64> = recent.iter().map(|e| e.efficiency_score).collect();
        let speeds: Vec<f64> = recent.iter().map(|e| e.tokens_per_second).collect();

        let sorted_latencies = sorted(&latencies);
        let sorted_costs = sorted(&costs);
        let sorted_scores = sorted(&scores);

        Some(PerformanceSummary {
            window_hours,
            model_filter: model_filter.map(ToString::to_string),
            total_requests: recent.len(),
            latency: LatencyStats {
                p50_ms: percentile(&sorted_latencies, 0.50),
                p95_ms: percentile(&sorted_latencies, 0.95),
                min_ms: sorted_latencies[0],
                max_ms: sorted_latencies[sorted_latencies.len() - 1],
                mean_ms: mean(&latencies),
            },
            cost: CostStats {
                mean_usd: mean(&costs),
                median_usd: median(&sorted_costs),
                min_usd: sorted_costs[0],
                max_usd: sorted_costs[sorted_costs.len() - 1],
                total_usd: costs.iter().sum(),
            },
            efficiency: EfficiencyStats {
                mean_score: mean(&scores),
                median_score: median(&sorted_scores),
                min_score: sorted_scores[0],
                max_score: sorted_scores[sorted_scores.len() - 1],
            },
            throughput: ThroughputStats {
                mean_tokens_per_second: mean(&speeds),
                median_tokens_per_second: median(&sorted(&speeds)),
            },
            generated_at: now,
        })
    }

    pub fn model_comparison(&self, window_hours: i64, now: DateTime<Utc>) -> Option<ModelComparison> {
        let recent = self.window(window_hours, now);
        if recent.is_empty() {
            return None;
        }

        let mut groups: BTreeMap<String, Vec<&BufferedRequest>> = BTreeMap::new();
        for entry in &recent {
            groups
                .entry(entry.record.model_used.clone())
                .or_default()
                .push(entry);
        }

        let models: Vec<ModelPerformance> = groups
            .into_iter()
            .map(|(model, entries)| {
                let latencies: Vec<f64> = entries.iter().map(|e| e.record.latency_ms as f64).collect();
                let costs: Vec<f64> = entries.iter().map(|e| e.record.cost_usd).collect();
                let scores: Vec<f64> = entries.iter().map(|e| e.efficiency_score).collect();
                let speeds: Vec<f64> = entries.iter().map(|e| e.tokens_per_second).collect();
                ModelPerformance {
                    model,
                    request_count: entries.len(),
                    avg_latency_ms: mean(&latencies),
                    avg_cost_usd: mean(&costs),
                    total_cost_usd: costs.iter().sum(),
                    avg_efficiency_score: mean(&scores),
                    avg_tokens_per_second: mean(&speeds),
                }
            })
            .collect();

        let pick = |better: fn(&ModelPerformance, &ModelPerformance) -> bool| {
            models
                .iter()
                .fold(None::<&ModelPerformance>, |best, m| match best {
                    Some(b) if !better(m, b) => Some(b),
                    _ => Some(m),
                })
                .map(|m| m.model.clone())
                .unwrap_or_default()
        };

        Some(ModelComparison {
            window_hours,
            best_performing_model: pick(|a, b| a.avg_efficiency_score > b.avg_efficiency_score),
            most_cost_effective_model: pick(|a, b| a.avg_cost_usd < b.avg_cost_usd),
            fastest_model: pick(|a, b| a.avg_latency_ms < b.avg_latency_ms),
            models,
            generated_at: now,
        })
    }

    /// Alternatives to `current_model` with a higher mean efficiency score,
    /// best improvement first. `None` when the model has no buffered history.
    pub fn recommendations(&self, current_model: &str, now: DateTime<Utc>) -> Option<Recommendations> {
        let history: Vec<BufferedRequest> = self
            .snapshot()
            .into_iter()
            .filter(|e| e.record.model_used == current_model)
            .collect();
        if history.is_empty() {
            return None;
        }
        let recent = &history[history.len().saturating_sub(RECOMMENDATION_LOOKBACK)..];

        let latency = mean(&recent.iter().map(|e| e.record.latency_ms as f64).collect::<Vec<_>>());
        let cost = mean(&recent.iter().map(|e| e.record.cost_usd).collect::<Vec<_>>());
        let efficiency = mean(&recent.iter().map(|e| e.efficiency_score).collect::<Vec<_>>());

        let mut alternatives: Vec<AlternativeModel> = self
            .model_comparison(COMPARISON_WINDOW_HOURS, now)
            .map(|c| c.models)
            .unwrap_or_default()
            .into_iter()
            .filter(|m| m.model != current_model && m.avg_efficiency_score > efficiency)
            .map(|m| AlternativeModel {
                efficiency_improvement: m.avg_efficiency_score - efficiency,
                cost_difference: m.avg_cost_usd - cost,
                latency_difference: m.avg_latency_ms - latency,
                model: m.model,
            })
            .collect();
        alternatives.sort_by(|a, b| b.efficiency_improvement.total_cmp(&a.efficiency_improvement));

        let advice = alternatives
            .first()
            .map(|best| {
                vec![format!(
                    "Consider switching to {} for {:.1} points of efficiency improvement",
                    best.model, best.efficiency_improvement
                )]
            })
            .unwrap_or_default();

        Some(Recommendations {
            current_model: current_model.to_string(),
            avg_latency_ms: latency,
            avg_cost_usd: cost,
            avg_efficiency_score: efficiency,
            alternatives,
            advice,
        })
    }
}

impl Default for RollingBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
