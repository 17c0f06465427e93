//! Leaderboards: stable descending sort, 1-based ranks, top-3 badges.

use crate::error::AppError;
use crate::models::{Badge, LeaderboardEntry, ModelSummary, TeamSummary};

#[derive(Debug, Clone, PartialEq)]
pub struct RankItem {
    pub id: String,
    pub name: String,
    pub value: f64,
    pub secondary: Option<f64>,
    pub change_percent: Option<f64>,
}

impl RankItem {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            value,
            secondary: None,
            change_percent: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_secondary(mut self, secondary: f64) -> Self {
        self.secondary = Some(secondary);
        self
    }
}

/// Orders `items` by value, highest first. Equal values keep their input
/// order and still receive consecutive ranks.
pub fn rank(items: Vec<RankItem>) -> Result<Vec<LeaderboardEntry>, AppError> {
    if items.is_empty() {
        return Err(AppError::InsufficientData(
            "cannot rank an empty set".into(),
        ));
    }

    let mut items = items;
    // NaN would otherwise sort above every real value.
    items.sort_by(|a, b| sort_key(b.value).total_cmp(&sort_key(a.value)));

    Ok(items
        .into_iter()
        .enumerate()
        .map(|(pos, item)| {
            let rank = pos + 1;
            LeaderboardEntry {
                rank,
                subject_id: item.id,
                subject_name: item.name,
                primary_value: item.value,
                secondary_value: item.secondary,
                change_percent: item.change_percent,
                badge: Badge::for_rank(rank),
            }
        })
        .collect())
}

fn sort_key(value: f64) -> f64 {
    if value.is_nan() {
        f64::NEG_INFINITY
    } else {
        value
    }
}

/// Teams by efficiency score, with total CO2 as the secondary value.
pub fn team_leaderboard(summaries: &[TeamSummary]) -> Result<Vec<LeaderboardEntry>, AppError> {
    rank(
        summaries
            .iter()
            .map(|s| {
                RankItem::new(&s.team_name, s.efficiency_score)
                    .with_id(&s.team_id)
                    .with_secondary(s.total_co2_grams)
            })
            .collect(),
    )
}

/// Models by efficiency score, with usage count as the secondary value.
pub fn model_leaderboard(
    models: &[ModelSummary],
    limit: usize,
) -> Result<Vec<LeaderboardEntry>, AppError> {
    let mut entries = rank(
        models
            .iter()
            .map(|m| RankItem::new(&m.model_name, m.efficiency_score).with_secondary(m.usage_count as f64))
            .collect(),
    )?;
    entries.truncate(limit);
    Ok(entries)
}

/// Copies each team's leaderboard position back onto its summary.
pub fn assign_ranks(summaries: &mut [TeamSummary], leaderboard: &[LeaderboardEntry]) {
    for summary in summaries.iter_mut() {
        summary.rank = leaderboard
            .iter()
            .find(|e| e.subject_id == summary.team_id)
            .map(|e| e.rank);
    }
}
