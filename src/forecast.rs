//! Straight-line forecast of a daily metric series.

use crate::error::AppError;
use crate::models::{ConfidenceInterval, ForecastResult};

const Z_95: f64 = 1.96;

/// Longest projection `forecast` will produce.
pub const MAX_HORIZON_DAYS: usize = 365;

/// Fits an ordinary-least-squares line over `x = 0..n` and projects
/// `horizon_days` points past the end of `history`.
///
/// Projections and lower bounds are clamped at zero since none of the
/// tracked metrics can go negative.
pub fn forecast(
    metric: &str,
    history: &[f64],
    horizon_days: usize,
) -> Result<ForecastResult, AppError> {
    if horizon_days > MAX_HORIZON_DAYS {
        return Err(AppError::Config(format!(
            "Forecast horizon must be at most {MAX_HORIZON_DAYS} days, got {horizon_days}."
        )));
    }
    let n = history.len();
    if n < 2 {
        return Err(AppError::InsufficientData(format!(
            "forecasting {metric} needs at least 2 points, got {n}"
        )));
    }

    let nf = n as f64;
    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let sum_x: f64 = xs.iter().sum();
    let sum_y: f64 = history.iter().sum();
    let sum_xy: f64 = xs.iter().zip(history).map(|(x, y)| x * y).sum();
    let sum_x2: f64 = xs.iter().map(|x| x * x).sum();

    let denominator = nf * sum_x2 - sum_x * sum_x;
    let (slope, intercept) = if denominator == 0.0 {
        (0.0, sum_y / nf)
    } else {
        let slope = (nf * sum_xy - sum_x * sum_y) / denominator;
        (slope, (sum_y - slope * sum_x) / nf)
    };

    let squared_residuals: f64 = xs
        .iter()
        .zip(history)
        .map(|(x, y)| {
            let residual = y - (slope * x + intercept);
            residual * residual
        })
        .sum();
    let rmse = (squared_residuals / nf).sqrt();

    let x_mean = sum_x / nf;
    let ss_x: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();

    let mut projected_values = Vec::with_capacity(horizon_days);
    let mut confidence_intervals = Vec::with_capacity(horizon_days);
    for i in 0..horizon_days {
        let x = (n + i) as f64;
        let y = (slope * x + intercept).max(0.0);
        let leverage = if ss_x > 0.0 { (x - x_mean).powi(2) / ss_x } else { 0.0 };
        let margin = Z_95 * rmse * (1.0 + 1.0 / nf + leverage).sqrt();

        projected_values.push(y);
        confidence_intervals.push(ConfidenceInterval {
            lower: (y - margin).max(0.0),
            upper: y + margin,
        });
    }

    let mean = sum_y / nf;
    let accuracy_score = if mean == 0.0 {
        0.0
    } else {
        (1.0 - rmse / mean).max(0.0)
    };

    Ok(ForecastResult {
        metric: metric.to_string(),
        historical_length: n,
        slope,
        intercept,
        projected_values,
        confidence_intervals,
        root_mean_squared_error: rmse,
        accuracy_score,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_history_projects_exactly() {
        let f = forecast("co2", &[10.0, 20.0, 30.0, 40.0], 2).expect("forecast");
        assert_eq!(f.historical_length, 4);
        assert!((f.slope - 10.0).abs() < 1e-12);
        assert!((f.intercept - 10.0).abs() < 1e-12);
        assert_eq!(f.projected_values, vec![50.0, 60.0]);
        assert_eq!(f.root_mean_squared_error, 0.0);
        for (ci, y) in f.confidence_intervals.iter().zip(&f.projected_values) {
            assert_eq!(ci.lower, *y);
            assert_eq!(ci.upper, *y);
        }
        assert_eq!(f.accuracy_score, 1.0);
    }

    #[test]
    fn single_point_is_insufficient() {
        assert!(matches!(
            forecast("co2", &[5.0], 3),
            Err(AppError::InsufficientData(_))
        ));
        assert!(matches!(
            forecast("co2", &[], 3),
            Err(AppError::InsufficientData(_))
        ));
    }

    #[test]
    fn declining_series_is_clamped_at_zero() {
        let f = forecast("energy", &[30.0, 20.0, 10.0], 3).expect("forecast");
        assert_eq!(f.projected_values, vec![0.0, 0.0, 0.0]);
        assert!(f.confidence_intervals.iter().all(|ci| ci.lower == 0.0));
    }

    #[test]
    fn noisy_series_has_widening_band() {
        let f = forecast("co2", &[10.0, 14.0, 9.0, 15.0, 11.0, 16.0], 3).expect("forecast");
        assert!(f.root_mean_squared_error > 0.0);
        let widths: Vec<f64> = f
            .confidence_intervals
            .iter()
            .map(|ci| ci.upper - ci.lower)
            .collect();
        assert!(widths[0] > 0.0);
        assert!(widths[2] > widths[0]);
        assert!(f.accuracy_score > 0.0 && f.accuracy_score < 1.0);
    }

    #[test]
    fn zero_history_has_zero_accuracy() {
        let f = forecast("cost", &[0.0, 0.0, 0.0], 1).expect("forecast");
        assert_eq!(f.projected_values, vec![0.0]);
        assert_eq!(f.accuracy_score, 0.0);
    }

    #[test]
    fn zero_horizon_yields_no_projections() {
        let f = forecast("co2", &[1.0, 2.0], 0).expect("forecast");
        assert!(f.projected_values.is_empty());
        assert!(f.confidence_intervals.is_empty());
    }

    #[test]
    fn oversized_horizon_is_rejected() {
        let f = forecast("co2", &[1.0, 2.0], MAX_HORIZON_DAYS).expect("forecast");
        assert_eq!(f.projected_values.len(), MAX_HORIZON_DAYS);

        for horizon in [MAX_HORIZON_DAYS + 1, usize::MAX] {
            let err = forecast("co2", &[1.0, 2.0], horizon).expect_err("too long");
            assert!(matches!(err, AppError::Config(_)));
        }
    }
}
