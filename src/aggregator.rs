//! Reduces request records into per-team and per-model summaries.

use crate::models::{ModelSummary, RequestRecord, TeamSummary};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub const GREEN_TOKENS_PER_GRAM_CO2: f64 = 0.1;
pub const GREEN_TOKENS_PER_BADGE: f64 = 10.0;

/// Three-term composite of per-unit energy (kWh), CO2 (g) and cost (USD),
/// averaged and scaled into `[0, 1]`.
///
/// A divisor of zero yields exactly 0.
pub fn efficiency_score(
    total_energy_kwh: f64,
    total_co2_grams: f64,
    total_cost_usd: f64,
    divisor: u64,
) -> f64 {
    if divisor == 0 {
        return 0.0;
    }
    let m = divisor as f64;
    let composite =
        (total_energy_kwh / m + total_co2_grams / m + total_cost_usd / m) / 3.0 / 100.0;
    if composite.is_finite() {
        composite.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Mean latency over records that carry one. Rows without a recorded
/// latency come back from the store as 0 and are skipped.
fn avg_latency_ms<'a>(records: impl Iterator<Item = &'a RequestRecord>) -> f64 {
    let (sum, count) = records
        .filter(|r| r.latency_ms > 0)
        .fold((0.0, 0usize), |(sum, count), r| (sum + r.latency_ms as f64, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

/// Builds the summary for one team. `records` are taken as given: the
/// caller is responsible for selecting the team's rows inside the window.
pub fn aggregate(
    team_id: &str,
    records: &[RequestRecord],
    member_count: u32,
    window_start: DateTime<Utc>,
    window_end: DateTime<Utc>,
) -> TeamSummary {
    let total_energy_kwh = records.iter().map(|r| r.energy_wh).sum::<f64>() / 1000.0;
    let total_co2_grams: f64 = records.iter().map(|r| r.co2_grams).sum();
    let total_cost_usd: f64 = records.iter().map(|r| r.cost_usd).sum();

    let green_tokens_earned = total_co2_grams * GREEN_TOKENS_PER_GRAM_CO2;

    TeamSummary {
        team_id: team_id.to_string(),
        team_name: team_id.to_string(),
        member_count,
        request_count: records.len(),
        total_co2_grams,
        total_energy_kwh,
        total_cost_usd,
        avg_latency_ms: avg_latency_ms(records.iter()),
        efficiency_score: efficiency_score(
            total_energy_kwh,
            total_co2_grams,
            total_cost_usd,
            u64::from(member_count),
        ),
        green_tokens_earned,
        badges_earned: (green_tokens_earned / GREEN_TOKENS_PER_BADGE).floor().max(0.0) as u64,
        rank: None,
        window_start,
        window_end,
    }
}

/// Per-model summaries ordered by model name. The efficiency composite is
/// normalised by usage count instead of team size.
pub fn aggregate_models(records: &[RequestRecord]) -> Vec<ModelSummary> {
    let mut groups: BTreeMap<&str, Vec<&RequestRecord>> = BTreeMap::new();
    for record in records {
        groups.entry(record.model_used.as_str()).or_default().push(record);
    }

    groups
        .into_iter()
        .map(|(model, rows)| {
            let total_energy_kwh = rows.iter().map(|r| r.energy_wh).sum::<f64>() / 1000.0;
            let total_co2_grams: f64 = rows.iter().map(|r| r.co2_grams).sum();
            let total_cost_usd: f64 = rows.iter().map(|r| r.cost_usd).sum();
            ModelSummary {
                model_name: model.to_string(),
                usage_count: rows.len(),
                total_energy_kwh,
                total_co2_grams,
                total_cost_usd,
                avg_latency_ms: avg_latency_ms(rows.iter().copied()),
                efficiency_score: efficiency_score(
                    total_energy_kwh,
                    total_co2_grams,
                    total_cost_usd,
                    rows.len() as u64,
                ),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid fixed timestamp")
    }

    fn rec(model: &str, energy_wh: f64, co2_grams: f64, cost_usd: f64, latency_ms: u64) -> RequestRecord {
        RequestRecord {
            request_id: "r".into(),
            user_id: "u".into(),
            team_id: "team-a".into(),
            model_used: model.into(),
            input_tokens: 10,
            output_tokens: 10,
            energy_wh,
            co2_grams,
            cost_usd,
            latency_ms,
            prompt_complexity: 0.0,
            failed: false,
            created_at: now(),
        }
    }

    #[test]
    fn aggregate_matches_reference_scenario() {
        let records = vec![
            rec("gemini-1.5-flash", 100.0, 50.0, 0.0, 0),
            rec("gemini-1.5-flash", 200.0, 150.0, 0.0, 0),
        ];
        let s = aggregate("team-a", &records, 2, now() - Duration::days(7), now());

        assert!((s.total_energy_kwh - 0.3).abs() < 1e-12);
        assert!((s.total_co2_grams - 200.0).abs() < 1e-12);
        assert_eq!(s.avg_latency_ms, 0.0);
        assert_eq!(s.request_count, 2);
        // (0.15 + 100 + 0) / 3 / 100
        assert!((s.efficiency_score - 100.15 / 300.0).abs() < 1e-12);
        assert!((s.green_tokens_earned - 20.0).abs() < 1e-12);
        assert_eq!(s.badges_earned, 2);
        assert!(s.rank.is_none());
    }

    #[test]
    fn zero_members_score_exactly_zero() {
        let records = vec![rec("gpt-4", 5000.0, 9000.0, 3.0, 900)];
        let s = aggregate("team-a", &records, 0, now(), now());
        assert_eq!(s.efficiency_score, 0.0);
        assert!(s.total_co2_grams > 0.0);
    }

    #[test]
    fn score_is_clamped_to_unit_interval() {
        let records = vec![rec("gpt-4", 1.0e9, 1.0e9, 1.0e9, 900)];
        assert_eq!(aggregate("t", &records, 1, now(), now()).efficiency_score, 1.0);
        assert_eq!(efficiency_score(-5.0, -5.0, -5.0, 1), 0.0);
    }

    #[test]
    fn total_co2_is_exact_sum() {
        let records: Vec<RequestRecord> = (0..37)
            .map(|i| rec("gpt-4o", i as f64 * 0.7, i as f64 * 0.013 + 0.001, 0.0, 100))
            .collect();
        let expected: f64 = records.iter().map(|r| r.co2_grams).sum();
        let s = aggregate("team-a", &records, 4, now(), now());
        assert!((s.total_co2_grams - expected).abs() < 1e-9);
    }

    #[test]
    fn avg_latency_skips_unrecorded_rows() {
        let records = vec![
            rec("gpt-4o", 1.0, 1.0, 0.0, 0),
            rec("gpt-4o", 1.0, 1.0, 0.0, 300),
            rec("gpt-4o", 1.0, 1.0, 0.0, 500),
        ];
        let s = aggregate("team-a", &records, 1, now(), now());
        assert_eq!(s.avg_latency_ms, 400.0);
    }

    #[test]
    fn empty_record_set_is_all_zero() {
        let s = aggregate("team-a", &[], 3, now(), now());
        assert_eq!(s.request_count, 0);
        assert_eq!(s.total_energy_kwh, 0.0);
        assert_eq!(s.efficiency_score, 0.0);
        assert_eq!(s.badges_earned, 0);
    }

    #[test]
    fn aggregate_models_groups_by_name() {
        let records = vec![
            rec("gpt-4o", 400.0, 200.0, 0.02, 1000),
            rec("gemini-1.5-flash", 100.0, 50.0, 0.001, 500),
            rec("gpt-4o", 600.0, 300.0, 0.03, 2000),
        ];
        let models = aggregate_models(&records);

        assert_eq!(models.len(), 2);
        assert_eq!(models[0].model_name, "gemini-1.5-flash");
        assert_eq!(models[1].model_name, "gpt-4o");
        assert_eq!(models[1].usage_count, 2);
        assert!((models[1].total_energy_kwh - 1.0).abs() < 1e-12);
        assert_eq!(models[1].avg_latency_ms, 1500.0);
        let expected = (0.5 + 250.0 + 0.025) / 3.0 / 100.0;
        assert!((models[1].efficiency_score - expected).abs() < 1e-12);
    }
}
