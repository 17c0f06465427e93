//! Per-request energy, CO2 and cost estimation.
//!
//! Token counts are approximated from word counts because providers do not
//! reliably report them. The base figures from the model's
//! [`EnergyProfile`] are scaled by a fixed chain of adjustment factors.

use crate::error::AppError;
use crate::load::SystemLoad;
use crate::models::RequestRecord;
use crate::profiles::{model_efficiency_factor, EnergyProfile};
use crate::providers::Generation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TOKENS_PER_WORD: f64 = 1.3;

pub fn estimate_tokens(text: &str) -> u64 {
    (text.split_whitespace().count() as f64 * TOKENS_PER_WORD) as u64
}

pub fn system_load_factor(load: SystemLoad) -> f64 {
    1.0 + 0.3 * (load.cpu_percent / 100.0) + 0.2 * (load.mem_percent / 100.0)
}

/// Overnight hours `[2, 6)` carry a 10% surcharge.
pub fn time_of_day_factor(local_hour: u32) -> f64 {
    if (2..6).contains(&local_hour) {
        1.1
    } else {
        1.0
    }
}

pub fn complexity_factor(prompt_byte_len: usize) -> f64 {
    1.0 + 0.1 * (prompt_byte_len as f64 / 1000.0)
}

/// Prompt complexity in `[0, 1]` from length, punctuation density and the
/// number of questions/exclamations.
pub fn prompt_complexity(prompt: &str) -> f64 {
    let len = prompt.chars().count();
    if len == 0 {
        return 0.0;
    }

    let length_factor = (len as f64 / 1000.0).min(1.0);
    let special = prompt
        .chars()
        .filter(|c| !c.is_alphanumeric() && !c.is_whitespace())
        .count();
    let special_factor = (special as f64 / len as f64).min(1.0);
    let marks = prompt.chars().filter(|c| *c == '?' || *c == '!').count();
    let question_factor = (marks as f64 / 10.0).min(1.0);

    length_factor * 0.4 + special_factor * 0.3 + question_factor * 0.3
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentFactors {
    pub system_load: f64,
    pub model_efficiency: f64,
    pub time_of_day: f64,
    pub complexity: f64,
    pub regional_carbon: f64,
}

impl AdjustmentFactors {
    pub fn compute(
        model: &str,
        load: SystemLoad,
        local_hour: u32,
        prompt_byte_len: usize,
        profile: &EnergyProfile,
    ) -> Self {
        Self {
            system_load: system_load_factor(load),
            model_efficiency: model_efficiency_factor(model),
            time_of_day: time_of_day_factor(local_hour),
            complexity: complexity_factor(prompt_byte_len),
            regional_carbon: profile.region_carbon_multiplier,
        }
    }

    /// Product of every factor that applies to energy. The regional factor
    /// only applies to CO2.
    pub fn energy_multiplier(&self) -> f64 {
        self.system_load * self.model_efficiency * self.time_of_day * self.complexity
    }

    pub fn co2_multiplier(&self) -> f64 {
        self.energy_multiplier() * self.regional_carbon
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Emission {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub energy_wh: f64,
    pub co2_grams: f64,
    pub cost_usd: f64,
    pub factors: AdjustmentFactors,
}

pub fn estimate(
    prompt: &str,
    response: &str,
    model: &str,
    load: SystemLoad,
    local_hour: u32,
    profile: &EnergyProfile,
) -> Emission {
    let input_tokens = estimate_tokens(prompt);
    let output_tokens = estimate_tokens(response);
    let total_tokens = (input_tokens + output_tokens) as f64;

    let base_energy_wh = profile.energy_wh_per_1k_tokens * total_tokens / 1000.0;
    let base_co2 = profile.co2_grams_per_1k_tokens * total_tokens / 1000.0;
    let factors = AdjustmentFactors::compute(model, load, local_hour, prompt.len(), profile);

    Emission {
        input_tokens,
        output_tokens,
        energy_wh: (base_energy_wh * factors.energy_multiplier()).max(0.0),
        co2_grams: (base_co2 * factors.co2_multiplier()).max(0.0),
        cost_usd: (profile.cost_usd_per_1k_tokens * total_tokens / 1000.0).max(0.0),
        factors,
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub user_id: String,
    pub team_id: String,
    pub model: String,
    pub prompt: String,
    pub load: SystemLoad,
    pub local_hour: u32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitResult {
    pub record: RequestRecord,
    pub response_text: String,
    pub success: bool,
    pub error: Option<String>,
}

/// Turns the outcome of a generation call into a [`RequestRecord`].
///
/// A failed call never propagates: it yields a zero-valued record with
/// `failed` set and `success = false`.
pub fn emit(
    ctx: &RequestContext,
    profile: &EnergyProfile,
    outcome: Result<Generation, AppError>,
    latency_ms: u64,
) -> EmitResult {
    match outcome {
        Ok(generation) => {
            let emission = estimate(
                &ctx.prompt,
                &generation.text,
                &ctx.model,
                ctx.load,
                ctx.local_hour,
                profile,
            );
            EmitResult {
                record: RequestRecord {
                    request_id: ctx.request_id.clone(),
                    user_id: ctx.user_id.clone(),
                    team_id: ctx.team_id.clone(),
                    model_used: ctx.model.clone(),
                    input_tokens: emission.input_tokens,
                    output_tokens: emission.output_tokens,
                    energy_wh: emission.energy_wh,
                    co2_grams: emission.co2_grams,
                    cost_usd: emission.cost_usd,
                    latency_ms,
                    prompt_complexity: prompt_complexity(&ctx.prompt),
                    failed: false,
                    created_at: ctx.created_at,
                },
                response_text: generation.text,
                success: true,
                error: None,
            }
        }
        Err(err) => {
            tracing::warn!(
                request_id = %ctx.request_id,
                model = %ctx.model,
                "generation failed, emitting zero-valued record: {err}"
            );
            EmitResult {
                record: zero_record(ctx, latency_ms),
                response_text: format!("Error generating response: {err}"),
                success: false,
                error: Some(err.to_string()),
            }
        }
    }
}

fn zero_record(ctx: &RequestContext, latency_ms: u64) -> RequestRecord {
    RequestRecord {
        request_id: ctx.request_id.clone(),
        user_id: ctx.user_id.clone(),
        team_id: ctx.team_id.clone(),
        model_used: ctx.model.clone(),
        input_tokens: 0,
        output_tokens: 0,
        energy_wh: 0.0,
        co2_grams: 0.0,
        cost_usd: 0.0,
        latency_ms,
        prompt_complexity: 0.0,
        failed: true,
        created_at: ctx.created_at,
    }
}
