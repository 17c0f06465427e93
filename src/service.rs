use crate::aggregator::{aggregate, aggregate_models};
use crate::analytics::{self, Description, OrgOverview, TTest};
use crate::buffer::{ModelComparison, PerformanceSummary, Recommendations, RollingBuffer};
use crate::config::{get_api_key, normalize_provider_name, AppConfig, ProviderSettings};
use crate::emitter::{emit, RequestContext};
use crate::error::AppError;
use crate::forecast::forecast;
use crate::load::{sample_system_load, SystemLoad};
use crate::models::{
    ForecastResult, LeaderboardEntry, Metric, RequestRecord, TeamDashboard, TeamRow, TeamSummary,
    TimeWindow,
};
use crate::profiles::{green_swap_savings, resolve_profile_in, SwapSavings};
use crate::providers::{
    all_providers, provider_for_model, Generation, GenerationRequest, ProviderContext,
};
use crate::ranker::{assign_ranks, model_leaderboard, team_leaderboard};
use crate::store::{Storage, UsageSource};
use chrono::{DateTime, Duration, Local, NaiveDate, Timelike, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

const MODEL_LEADERBOARD_LIMIT: usize = 10;

/// Longest daily history `team_history` will build.
pub const MAX_HISTORY_DAYS: u32 = 365;

pub struct ProviderTestReport {
    pub status_code: Option<u16>,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub prompt: String,
    pub model: String,
    pub team_id: String,
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatOutcome {
    pub request_id: String,
    pub success: bool,
    pub response_text: String,
    pub error: Option<String>,
    pub record: RequestRecord,
    pub stored: bool,
    pub green_swap: Option<SwapSavings>,
    pub green_tokens_awarded: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub window_hours: i64,
    pub buffered_requests: usize,
    pub summary: Option<PerformanceSummary>,
    pub comparison: Option<ModelComparison>,
    pub recommendations: Option<Recommendations>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamForecast {
    pub team_id: String,
    pub metric: Metric,
    pub history: Vec<DailyPoint>,
    pub history_stats: Option<Description>,
    /// Tests whether the day-over-day change differs from zero.
    pub trend: Option<TTest>,
    pub forecast: ForecastResult,
}

pub struct MeterService {
    client: Client,
    buffer: Arc<RollingBuffer>,
}

impl MeterService {
    pub fn new(buffer_capacity: usize) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            buffer: Arc::new(RollingBuffer::new(buffer_capacity)),
        })
    }

    pub fn buffer(&self) -> &Arc<RollingBuffer> {
        &self.buffer
    }

    pub async fn test_provider_connection(
        &self,
        provider: &str,
        api_key: String,
        settings: ProviderSettings,
    ) -> Result<ProviderTestReport, AppError> {
        let provider = normalize_provider_name(provider);
        let adapter = all_providers()
            .into_iter()
            .find(|p| p.name() == provider)
            .ok_or_else(|| AppError::Config(format!("Unsupported provider '{provider}'.")))?;
        let ctx = ProviderContext { api_key, settings };
        let started = Instant::now();
        let status_code = adapter.test_connection(&self.client, &ctx).await?;
        Ok(ProviderTestReport {
            status_code,
            duration_ms: started.elapsed().as_millis(),
        })
    }

    /// Sends one prompt, then records the resulting telemetry in the store
    /// and the rolling buffer. A failed generation still produces a
    /// (zero-valued) record; only configuration and storage problems are
    /// returned as errors.
    pub async fn chat(
        &self,
        cfg: &AppConfig,
        storage: &Storage,
        request: ChatRequest,
    ) -> Result<ChatOutcome, AppError> {
        let provider = provider_for_model(&request.model).ok_or_else(|| {
            AppError::Config(format!("No provider serves model '{}'.", request.model))
        })?;
        let ctx = ProviderContext {
            api_key: get_api_key(provider.name())?,
            settings: cfg
                .provider_settings
                .get(provider.name())
                .cloned()
                .unwrap_or_default(),
        };

        let load = tokio::task::spawn_blocking(sample_system_load)
            .await
            .unwrap_or_else(|err| {
                tracing::warn!("system load sampling failed: {err}");
                SystemLoad::idle()
            });

        let started = Instant::now();
        let outcome = provider
            .generate(
                &self.client,
                &ctx,
                &GenerationRequest::new(request.prompt.clone(), request.model.clone()),
            )
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;
        tracing::info!(
            provider = provider.name(),
            model = %request.model,
            latency_ms,
            ok = outcome.is_ok(),
            "generation finished"
        );

        let rctx = RequestContext {
            request_id: uuid::Uuid::new_v4().to_string(),
            user_id: request.user_id,
            team_id: request.team_id,
            model: request.model,
            prompt: request.prompt,
            load,
            local_hour: Local::now().hour(),
            created_at: Utc::now(),
        };
        self.record_generation(cfg, storage, &rctx, outcome, latency_ms)
    }

    /// Everything `chat` does after the provider call returns.
    pub fn record_generation(
        &self,
        cfg: &AppConfig,
        storage: &Storage,
        rctx: &RequestContext,
        outcome: Result<Generation, AppError>,
        latency_ms: u64,
    ) -> Result<ChatOutcome, AppError> {
        let profile = resolve_profile_in(&rctx.model, &cfg.profile_overrides, &cfg.region);
        let result = emit(rctx, &profile, outcome, latency_ms);

        let stored = storage.insert_request(&result.record)?;
        self.buffer.record(result.record.clone());

        let green_swap = if result.success {
            let baseline =
                resolve_profile_in(&cfg.baseline_model, &cfg.profile_overrides, &cfg.region);
            Some(green_swap_savings(
                &baseline,
                &profile,
                result.record.total_tokens(),
            ))
        } else {
            None
        };
        let green_tokens_awarded = green_swap
            .filter(SwapSavings::is_green)
            .map(|s| s.co2_saved_grams * cfg.reward_rate_per_gram_co2)
            .unwrap_or(0.0);

        Ok(ChatOutcome {
            request_id: result.record.request_id.clone(),
            success: result.success,
            response_text: result.response_text,
            error: result.error,
            record: result.record,
            stored,
            green_swap,
            green_tokens_awarded,
        })
    }

    /// Replays persisted records from the last `window_hours` into the
    /// buffer, so a fresh process can report on recent traffic.
    pub fn warm_buffer(
        &self,
        source: &dyn UsageSource,
        window_hours: i64,
        now: DateTime<Utc>,
    ) -> Result<usize, AppError> {
        let records = source.requests(None, now - Duration::hours(window_hours))?;
        let skip = records.len().saturating_sub(self.buffer.capacity());
        let mut replayed = 0;
        for record in records.into_iter().skip(skip) {
            self.buffer.record(record);
            replayed += 1;
        }
        tracing::debug!(replayed, source = source.label(), "buffer warmed");
        Ok(replayed)
    }

    pub fn metrics_report(
        &self,
        window_hours: i64,
        model: Option<&str>,
        now: DateTime<Utc>,
    ) -> MetricsReport {
        if self.buffer.is_empty() {
            return MetricsReport {
                window_hours,
                buffered_requests: 0,
                summary: None,
                comparison: None,
                recommendations: None,
            };
        }
        MetricsReport {
            window_hours,
            buffered_requests: self.buffer.len(),
            summary: self.buffer.summary(window_hours, model, now),
            comparison: self.buffer.model_comparison(window_hours, now),
            recommendations: model.and_then(|m| self.buffer.recommendations(m, now)),
        }
    }
}

fn window_bounds(window: TimeWindow, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    (now - Duration::hours(window.as_hours()), now)
}

fn summarize(
    source: &dyn UsageSource,
    team: &TeamRow,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<(TeamSummary, Vec<RequestRecord>), AppError> {
    let (start, end) = window_bounds(window, now);
    let records = source.requests(Some(&team.team_id), start)?;
    let mut summary = aggregate(&team.team_id, &records, team.member_count, start, end);
    summary.team_name = team.team_name.clone();
    Ok((summary, records))
}

fn find_team(source: &dyn UsageSource, team_id: &str) -> Result<TeamRow, AppError> {
    source
        .team(team_id)?
        .ok_or_else(|| AppError::Config(format!("Unknown team '{team_id}'.")))
}

/// Summaries for every team in the window, with leaderboard ranks filled.
pub fn team_summaries(
    source: &dyn UsageSource,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<Vec<TeamSummary>, AppError> {
    let mut summaries = source
        .teams()?
        .iter()
        .map(|team| summarize(source, team, window, now).map(|(s, _)| s))
        .collect::<Result<Vec<_>, _>>()?;
    if let Ok(board) = team_leaderboard(&summaries) {
        assign_ranks(&mut summaries, &board);
    }
    Ok(summaries)
}

pub fn teams_leaderboard(
    source: &dyn UsageSource,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    team_leaderboard(&team_summaries(source, window, now)?)
}

pub fn models_leaderboard(
    source: &dyn UsageSource,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    let (start, _) = window_bounds(window, now);
    let records = source.requests(None, start)?;
    model_leaderboard(&aggregate_models(&records), MODEL_LEADERBOARD_LIMIT)
}

pub fn team_dashboard(
    source: &dyn UsageSource,
    team_id: &str,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<TeamDashboard, AppError> {
    let team = find_team(source, team_id)?;
    let (mut summary, records) = summarize(source, &team, window, now)?;

    let all = team_summaries(source, window, now)?;
    let team_board = team_leaderboard(&all).unwrap_or_default();
    summary.rank = all
        .iter()
        .find(|s| s.team_id == team.team_id)
        .and_then(|s| s.rank);

    let models = aggregate_models(&records);
    let model_board = model_leaderboard(&models, MODEL_LEADERBOARD_LIMIT).unwrap_or_default();

    Ok(TeamDashboard {
        summary,
        models,
        model_leaderboard: model_board,
        team_leaderboard: team_board,
        total_teams: all.len(),
        generated_at: now,
    })
}

/// Daily totals of `metric` for the last `days` days, oldest first. Days
/// without traffic are reported as zero.
pub fn team_history(
    source: &dyn UsageSource,
    team_id: &str,
    metric: Metric,
    days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<DailyPoint>, AppError> {
    if days > MAX_HISTORY_DAYS {
        return Err(AppError::Config(format!(
            "History is limited to {MAX_HISTORY_DAYS} days, got {days}."
        )));
    }
    let days = days.max(1);
    let first = now
        .date_naive()
        .checked_sub_signed(Duration::days(i64::from(days) - 1))
        .ok_or_else(|| {
            AppError::Config(format!("History of {days} days reaches before the calendar."))
        })?;
    let since = first.and_hms_opt(0, 0, 0).map(|d| d.and_utc()).unwrap_or(now);

    let mut history: Vec<DailyPoint> = (0..days)
        .map(|i| DailyPoint {
            date: first + Duration::days(i64::from(i)),
            value: 0.0,
        })
        .collect();

    for record in source.requests(Some(team_id), since)? {
        let offset = record.created_at.date_naive().signed_duration_since(first).num_days();
        if let Some(point) = usize::try_from(offset).ok().and_then(|i| history.get_mut(i)) {
            point.value += metric.value_of(&record);
        }
    }
    Ok(history)
}

pub fn forecast_team(
    source: &dyn UsageSource,
    team_id: &str,
    metric: Metric,
    days: u32,
    horizon_days: usize,
    now: DateTime<Utc>,
) -> Result<TeamForecast, AppError> {
    let history = team_history(source, team_id, metric, days, now)?;
    let values: Vec<f64> = history.iter().map(|p| p.value).collect();
    let forecast = forecast(metric.as_label(), &values, horizon_days)?;

    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    Ok(TeamForecast {
        team_id: team_id.to_string(),
        metric,
        history_stats: analytics::describe(&values).ok(),
        trend: analytics::one_sample_t_test(&deltas).ok(),
        history,
        forecast,
    })
}

pub fn org_overview(
    source: &dyn UsageSource,
    window: TimeWindow,
    now: DateTime<Utc>,
) -> Result<OrgOverview, AppError> {
    Ok(analytics::org_overview(&team_summaries(source, window, now)?))
}
