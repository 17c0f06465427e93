//! Descriptive statistics, a rough significance test and the
//! organisation-wide rollup.

use crate::error::AppError;
use crate::models::{LeaderboardEntry, TeamSummary};
use crate::ranker;
use serde::{Deserialize, Serialize};

const TOP_PERFORMERS: usize = 5;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.total_cmp(b));
    out
}

/// Median of an ascending slice, averaging the middle pair for even lengths.
pub fn median(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        0.0
    } else if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Nearest-rank percentile: the value at index `floor(q * n)` of an
/// ascending slice, without interpolation.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((q * sorted.len() as f64).floor() as usize).min(sorted.len() - 1);
    sorted[idx]
}

/// Sample standard deviation (n - 1 denominator); 0 below two values.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Description {
    pub count: usize,
    pub mean: f64,
    pub std_dev: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub q1: f64,
    pub q3: f64,
}

pub fn describe(values: &[f64]) -> Result<Description, AppError> {
    if values.is_empty() {
        return Err(AppError::InsufficientData(
            "cannot describe an empty series".into(),
        ));
    }
    let s = sorted(values);
    Ok(Description {
        count: values.len(),
        mean: mean(values),
        std_dev: std_dev(values),
        median: median(&s),
        min: s[0],
        max: s[s.len() - 1],
        q1: percentile(&s, 0.25),
        q3: percentile(&s, 0.75),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub t_statistic: f64,
    pub p_value: f64,
    pub significant: bool,
    pub sample_size: usize,
}

/// Piecewise-linear stand-in for the t-distribution CDF.
fn approx_cdf(t: f64) -> f64 {
    if t.abs() < 1.96 {
        0.5 + 0.4 * (t / 1.96)
    } else if t > 0.0 {
        0.975
    } else {
        0.025
    }
}

/// Tests whether the mean of `values` differs from zero.
pub fn one_sample_t_test(values: &[f64]) -> Result<TTest, AppError> {
    let n = values.len();
    if n < 2 {
        return Err(AppError::InsufficientData(format!(
            "t-test needs at least 2 samples, got {n}"
        )));
    }
    let sd = std_dev(values);
    let t = if sd == 0.0 {
        0.0
    } else {
        mean(values) / (sd / (n as f64).sqrt())
    };
    let p = 2.0 * (1.0 - approx_cdf(t.abs()));

    Ok(TTest {
        t_statistic: t,
        p_value: p,
        significant: p < 0.05,
        sample_size: n,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgOverview {
    pub total_teams: usize,
    pub total_co2_grams: f64,
    pub total_energy_kwh: f64,
    /// Grams of CO2 per kWh, with a +1 guard on the denominator.
    pub avg_efficiency: f64,
    pub total_green_tokens: f64,
    pub top_performers: Vec<LeaderboardEntry>,
}

pub fn org_overview(summaries: &[TeamSummary]) -> OrgOverview {
    let total_co2_grams: f64 = summaries.iter().map(|s| s.total_co2_grams).sum();
    let total_energy_kwh: f64 = summaries.iter().map(|s| s.total_energy_kwh).sum();
    let mut top_performers = ranker::team_leaderboard(summaries).unwrap_or_default();
    top_performers.truncate(TOP_PERFORMERS);

    OrgOverview {
        total_teams: summaries.len(),
        total_co2_grams,
        total_energy_kwh,
        avg_efficiency: total_co2_grams / (total_energy_kwh + 1.0),
        total_green_tokens: summaries.iter().map(|s| s.green_tokens_earned).sum(),
        top_performers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn describe_reports_spread() {
        let d = describe(&[4.0, 1.0, 3.0, 2.0, 5.0]).expect("described");
        assert_eq!(d.count, 5);
        assert_eq!(d.mean, 3.0);
        assert_eq!(d.median, 3.0);
        assert_eq!(d.min, 1.0);
        assert_eq!(d.max, 5.0);
        assert_eq!(d.q1, 2.0);
        assert_eq!(d.q3, 4.0);
        assert!((d.std_dev - 2.5f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn describe_rejects_empty_series() {
        assert!(matches!(describe(&[]), Err(AppError::InsufficientData(_))));
    }

    #[test]
    fn median_averages_middle_pair() {
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[]), 0.0);
    }

    #[test]
    fn percentile_uses_floor_index() {
        assert_eq!(percentile(&[], 0.95), 0.0);
        assert_eq!(percentile(&[7.0], 0.95), 7.0);
        assert_eq!(percentile(&[1.0, 2.0], 0.95), 2.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 1.0), 3.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0, 4.0], 0.5), 3.0);
    }

    #[test]
    fn t_test_flags_clear_shift() {
        let t = one_sample_t_test(&[10.0, 10.5, 9.5, 10.2, 9.8]).expect("t-test");
        assert!(t.t_statistic > 1.96);
        assert!((t.p_value - 0.05).abs() < 1e-12);
        // the saturated tail gives p = 0.05, which is not below the cutoff
        assert!(!t.significant);
    }

    #[test]
    fn t_test_centered_sample_is_not_significant() {
        let t = one_sample_t_test(&[-1.0, 1.0, -2.0, 2.0]).expect("t-test");
        assert_eq!(t.t_statistic, 0.0);
        assert!((t.p_value - 1.0).abs() < 1e-12);
        assert!(!t.significant);
    }

    #[test]
    fn t_test_constant_sample_has_zero_statistic() {
        let t = one_sample_t_test(&[3.0, 3.0, 3.0]).expect("t-test");
        assert_eq!(t.t_statistic, 0.0);
    }

    #[test]
    fn t_test_needs_two_samples() {
        assert!(matches!(
            one_sample_t_test(&[1.0]),
            Err(AppError::InsufficientData(_))
        ));
    }

    #[test]
    fn org_overview_rolls_up_teams() {
        let at = Utc
            .timestamp_opt(1_700_000_000, 0)
            .single()
            .expect("valid fixed timestamp");
        let team = |name: &str, co2: f64, kwh: f64, score: f64| TeamSummary {
            team_id: name.to_string(),
            team_name: name.to_string(),
            member_count: 1,
            request_count: 1,
            total_co2_grams: co2,
            total_energy_kwh: kwh,
            total_cost_usd: 0.0,
            avg_latency_ms: 0.0,
            efficiency_score: score,
            green_tokens_earned: co2 * 0.1,
            badges_earned: 0,
            rank: None,
            window_start: at,
            window_end: at,
        };
        let summaries: Vec<TeamSummary> = (0..7)
            .map(|i| team(&format!("t{i}"), 10.0, 0.5, i as f64 / 10.0))
            .collect();

        let o = org_overview(&summaries);
        assert_eq!(o.total_teams, 7);
        assert!((o.total_co2_grams - 70.0).abs() < 1e-12);
        assert!((o.total_energy_kwh - 3.5).abs() < 1e-12);
        assert!((o.avg_efficiency - 70.0 / 4.5).abs() < 1e-12);
        assert_eq!(o.top_performers.len(), 5);
        assert_eq!(o.top_performers[0].subject_name, "t6");

        let empty = org_overview(&[]);
        assert_eq!(empty.total_teams, 0);
        assert!(empty.top_performers.is_empty());
    }
}
