use crate::config::ProfileOverride;
use serde::{Deserialize, Serialize};

pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_REGION: &str = "us-central1";

/// Static energy, carbon, latency and price figures for one model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnergyProfile {
    pub model_pattern: String,
    pub energy_wh_per_1k_tokens: f64,
    pub co2_grams_per_1k_tokens: f64,
    pub cost_usd_per_1k_tokens: f64,
    pub baseline_latency_ms: u64,
    pub region: String,
    pub region_carbon_multiplier: f64,
}

fn profile(
    model_pattern: &str,
    energy_wh_per_1k_tokens: f64,
    co2_grams_per_1k_tokens: f64,
    cost_usd_per_1k_tokens: f64,
    baseline_latency_ms: u64,
) -> EnergyProfile {
    EnergyProfile {
        model_pattern: model_pattern.into(),
        energy_wh_per_1k_tokens,
        co2_grams_per_1k_tokens,
        cost_usd_per_1k_tokens,
        baseline_latency_ms,
        region: DEFAULT_REGION.into(),
        region_carbon_multiplier: region_carbon_factor(DEFAULT_REGION),
    }
}

pub fn built_in_profiles() -> Vec<EnergyProfile> {
    vec![
        profile("gemini-1.5-flash", 0.2, 0.10, 0.0002, 800),
        profile("gemini-1.5-pro", 0.6, 0.30, 0.0035, 1200),
        profile("gemini-2.0-flash", 0.15, 0.08, 0.00015, 700),
        profile("gpt-3.5-turbo", 0.3, 0.15, 0.001, 900),
        profile("gpt-4o", 0.5, 0.25, 0.01, 1100),
        profile("gpt-4", 1.0, 0.50, 0.045, 2500),
    ]
}

/// Multiplier relative to the reference model. Applied to both energy and CO2.
pub fn model_efficiency_factor(model: &str) -> f64 {
    match model {
        "gemini-1.5-flash" => 1.0,
        "gemini-1.5-pro" => 0.7,
        "gemini-2.0-flash" => 1.2,
        _ => 1.0,
    }
}

/// Carbon intensity of a datacenter region relative to `us-central1`.
pub fn region_carbon_factor(region: &str) -> f64 {
    match region {
        "us-central1" => 1.0,
        "us-west1" => 1.1,
        "europe-west1" => 0.8,
        _ => 1.0,
    }
}

fn best_match<'a, T>(
    model: &str,
    items: &'a [T],
    pattern: impl Fn(&T) -> &str,
) -> Option<&'a T> {
    items
        .iter()
        .filter(|item| model.contains(pattern(*item)))
        .max_by_key(|item| pattern(*item).len())
}

impl EnergyProfile {
    pub fn in_region(mut self, region: &str) -> Self {
        self.region_carbon_multiplier = region_carbon_factor(region);
        self.region = region.to_string();
        self
    }
}

/// Finds the profile for `model`, preferring overrides, then the longest
/// matching built-in pattern, then the default model's profile.
pub fn resolve_profile(model: &str, overrides: &[ProfileOverride]) -> EnergyProfile {
    resolve_profile_in(model, overrides, DEFAULT_REGION)
}

/// Like [`resolve_profile`], placing the model in `region` unless an
/// override pins its own region.
pub fn resolve_profile_in(
    model: &str,
    overrides: &[ProfileOverride],
    region: &str,
) -> EnergyProfile {
    if let Some(ov) = best_match(model, overrides, |ov| ov.model_pattern.as_str()) {
        let region = ov.region.clone().unwrap_or_else(|| region.to_string());
        let built_in = built_in_profiles();
        let baseline = best_match(model, &built_in, |p| p.model_pattern.as_str())
            .map(|p| p.baseline_latency_ms)
            .unwrap_or(1000);
        return EnergyProfile {
            model_pattern: ov.model_pattern.clone(),
            energy_wh_per_1k_tokens: ov.energy_wh_per_1k_tokens,
            co2_grams_per_1k_tokens: ov.co2_grams_per_1k_tokens,
            cost_usd_per_1k_tokens: ov.cost_usd_per_1k_tokens,
            baseline_latency_ms: baseline,
            region_carbon_multiplier: region_carbon_factor(&region),
            region,
        };
    }

    let profiles = built_in_profiles();
    if let Some(found) = best_match(model, &profiles, |p| p.model_pattern.as_str()) {
        return found.clone().in_region(region);
    }

    profiles
        .into_iter()
        .find(|p| p.model_pattern == DEFAULT_MODEL)
        .unwrap_or_else(|| profile(DEFAULT_MODEL, 0.2, 0.10, 0.0002, 800))
        .in_region(region)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SwapSavings {
    pub energy_saved_wh: f64,
    pub co2_saved_grams: f64,
    pub energy_saved_percent: f64,
    pub co2_saved_percent: f64,
}

impl SwapSavings {
    /// A swap only counts as green when it actually used less energy.
    pub fn is_green(&self) -> bool {
        self.energy_saved_wh > 0.0
    }
}

/// Energy and CO2 avoided by serving `tokens` with `actual` instead of `baseline`.
pub fn green_swap_savings(
    baseline: &EnergyProfile,
    actual: &EnergyProfile,
    tokens: u64,
) -> SwapSavings {
    let tokens = tokens as f64;
    let baseline_energy = baseline.energy_wh_per_1k_tokens * tokens / 1000.0;
    let actual_energy = actual.energy_wh_per_1k_tokens * tokens / 1000.0;
    let baseline_co2 = baseline.co2_grams_per_1k_tokens * tokens / 1000.0;
    let actual_co2 = actual.co2_grams_per_1k_tokens * tokens / 1000.0;

    let percent = |base: f64, actual: f64| {
        if base > 0.0 {
            (base - actual) / base * 100.0
        } else {
            0.0
        }
    };

    SwapSavings {
        energy_saved_wh: (baseline_energy - actual_energy).max(0.0),
        co2_saved_grams: (baseline_co2 - actual_co2).max(0.0),
        energy_saved_percent: percent(baseline_energy, actual_energy),
        co2_saved_percent: percent(baseline_co2, actual_co2),
    }
}
