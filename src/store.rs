use crate::emitter::AdjustmentFactors;
use crate::error::AppError;
use crate::load::SystemLoad;
use crate::models::{RequestRecord, TeamRow};
use crate::profiles::{built_in_profiles, resolve_profile};
use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use std::path::Path;

/// Where team rows and request records come from. The SQLite store and the
/// synthetic demo source share every aggregation path behind this trait.
pub trait UsageSource {
    fn label(&self) -> &'static str;

    fn teams(&self) -> Result<Vec<TeamRow>, AppError>;

    fn team(&self, team_id: &str) -> Result<Option<TeamRow>, AppError> {
        Ok(self.teams()?.into_iter().find(|t| t.team_id == team_id))
    }

    /// Records created at or after `since`, oldest first, optionally for a
    /// single team.
    fn requests(
        &self,
        team_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, AppError>;
}

pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let conn = Connection::open(path)?;
        let this = Self { conn };
        this.init()?;
        Ok(this)
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, AppError> {
        let this = Self {
            conn: Connection::open_in_memory()?,
        };
        this.init()?;
        Ok(this)
    }

    fn init(&self) -> Result<(), AppError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS teams (
                team_id TEXT PRIMARY KEY,
                team_name TEXT NOT NULL,
                member_count INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS ai_requests (
                id INTEGER PRIMARY KEY,
                request_id TEXT UNIQUE,
                user_id TEXT,
                team_id TEXT,
                model_used TEXT,
                tokens_input INTEGER,
                tokens_output INTEGER,
                energy_wh REAL,
                co2e_g REAL,
                cost_usd REAL,
                latency_ms INTEGER,
                prompt_complexity REAL,
                failed INTEGER,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS ai_requests_team_idx ON ai_requests (team_id);
            "#,
        )?;
        Ok(())
    }

    pub fn upsert_team(&self, team: &TeamRow) -> Result<(), AppError> {
        self.conn.execute(
            "INSERT INTO teams (team_id, team_name, member_count) VALUES (?1, ?2, ?3)
             ON CONFLICT(team_id) DO UPDATE SET
                team_name = excluded.team_name,
                member_count = excluded.member_count",
            params![team.team_id, team.team_name, team.member_count],
        )?;
        tracing::info!(team_id = %team.team_id, members = team.member_count, "team saved");
        Ok(())
    }

    /// Inserts one record. Returns `false` when a record with the same
    /// request id is already stored.
    pub fn insert_request(&self, r: &RequestRecord) -> Result<bool, AppError> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO ai_requests (
                request_id, user_id, team_id, model_used, tokens_input, tokens_output,
                energy_wh, co2e_g, cost_usd, latency_ms, prompt_complexity, failed, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                r.request_id,
                r.user_id,
                r.team_id,
                r.model_used,
                r.input_tokens as i64,
                r.output_tokens as i64,
                r.energy_wh,
                r.co2_grams,
                r.cost_usd,
                r.latency_ms as i64,
                r.prompt_complexity,
                r.failed,
                r.created_at.to_rfc3339(),
            ],
        )?;
        let inserted = changed == 1;
        if inserted {
            tracing::debug!(request_id = %r.request_id, team_id = %r.team_id, "request stored");
        } else {
            tracing::warn!(request_id = %r.request_id, "duplicate request id, row ignored");
        }
        Ok(inserted)
    }

    /// Every stored record, newest first.
    pub fn export_requests(&self) -> Result<Vec<RequestRecord>, AppError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {REQUEST_COLUMNS} FROM ai_requests ORDER BY created_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map([], record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn export_requests_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string_pretty(&self.export_requests()?)?)
    }
}

impl UsageSource for Storage {
    fn label(&self) -> &'static str {
        "sqlite"
    }

    /// Registered teams plus any team id that only appears on request rows,
    /// the latter with zero members.
    fn teams(&self) -> Result<Vec<TeamRow>, AppError> {
        let mut stmt = self.conn.prepare(
            "SELECT team_id, team_name, member_count FROM teams
             UNION
             SELECT DISTINCT team_id, team_id, 0 FROM ai_requests
             WHERE team_id IS NOT NULL AND team_id NOT IN (SELECT team_id FROM teams)
             ORDER BY 1",
        )?;
        let rows = stmt
            .query_map([], team_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn team(&self, team_id: &str) -> Result<Option<TeamRow>, AppError> {
        let registered = self
            .conn
            .query_row(
                "SELECT team_id, team_name, member_count FROM teams WHERE team_id = ?1",
                [team_id],
                team_from_row,
            )
            .optional()?;
        if registered.is_some() {
            return Ok(registered);
        }

        let seen = self
            .conn
            .query_row(
                "SELECT 1 FROM ai_requests WHERE team_id = ?1 LIMIT 1",
                [team_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(seen.map(|()| TeamRow {
            team_id: team_id.to_string(),
            team_name: team_id.to_string(),
            member_count: 0,
        }))
    }

    fn requests(
        &self,
        team_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, AppError> {
        let rows = match team_id {
            Some(team) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM ai_requests WHERE team_id = ?1 ORDER BY created_at, id"
                ))?;
                let rows = stmt
                    .query_map([team], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
            None => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {REQUEST_COLUMNS} FROM ai_requests ORDER BY created_at, id"
                ))?;
                let rows = stmt
                    .query_map([], record_from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            }
        };

        // Timestamps may carry different offsets, so the window is applied
        // after parsing rather than by string comparison.
        Ok(rows.into_iter().filter(|r| r.created_at >= since).collect())
    }
}

const REQUEST_COLUMNS: &str = "request_id, user_id, team_id, model_used, tokens_input, \
     tokens_output, energy_wh, co2e_g, cost_usd, latency_ms, prompt_complexity, failed, created_at";

fn team_from_row(row: &Row<'_>) -> rusqlite::Result<TeamRow> {
    let member_count: Option<i64> = row.get(2)?;
    Ok(TeamRow {
        team_id: row.get(0)?,
        team_name: row.get(1)?,
        member_count: member_count.unwrap_or(0).clamp(0, i64::from(u32::MAX)) as u32,
    })
}

/// The only place where nullable columns are defaulted: missing text becomes
/// empty, missing numbers become zero.
fn record_from_row(row: &Row<'_>) -> rusqlite::Result<RequestRecord> {
    let non_negative = |v: Option<i64>| v.unwrap_or(0).max(0) as u64;
    let created_at: String = row.get("created_at")?;

    Ok(RequestRecord {
        request_id: row.get::<_, Option<String>>("request_id")?.unwrap_or_default(),
        user_id: row.get::<_, Option<String>>("user_id")?.unwrap_or_default(),
        team_id: row.get::<_, Option<String>>("team_id")?.unwrap_or_default(),
        model_used: row.get::<_, Option<String>>("model_used")?.unwrap_or_default(),
        input_tokens: non_negative(row.get("tokens_input")?),
        output_tokens: non_negative(row.get("tokens_output")?),
        energy_wh: row.get::<_, Option<f64>>("energy_wh")?.unwrap_or(0.0),
        co2_grams: row.get::<_, Option<f64>>("co2e_g")?.unwrap_or(0.0),
        cost_usd: row.get::<_, Option<f64>>("cost_usd")?.unwrap_or(0.0),
        latency_ms: non_negative(row.get("latency_ms")?),
        prompt_complexity: row
            .get::<_, Option<f64>>("prompt_complexity")?
            .unwrap_or(0.0),
        failed: row.get::<_, Option<bool>>("failed")?.unwrap_or(false),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(12, Type::Text, Box::new(e)))?,
    })
}

const DEMO_TEAMS: [(&str, &str, u32); 4] = [
    ("platform", "Platform", 6),
    ("research", "Research", 4),
    ("growth", "Growth", 8),
    ("support", "Support", 3),
];
const DEMO_DAYS: i64 = 30;
const DEMO_SEED: u64 = 0x5eed_c0ff_ee00_0001;

/// Deterministic demo data anchored at a fixed instant. Every call returns
/// the same rows for the same anchor.
pub struct SyntheticSource {
    anchor: DateTime<Utc>,
}

impl SyntheticSource {
    pub fn new(anchor: DateTime<Utc>) -> Self {
        Self { anchor }
    }

    fn generate(&self) -> Vec<RequestRecord> {
        let models: Vec<String> = built_in_profiles()
            .into_iter()
            .map(|p| p.model_pattern)
            .collect();
        let mut rng = StdRng::seed_from_u64(DEMO_SEED);
        let mut out = Vec::new();

        for day in (0..DEMO_DAYS).rev() {
            for (team_idx, (team_id, _, members)) in DEMO_TEAMS.iter().enumerate() {
                let per_day = 2 + (*members as u64 + day as u64) % 4;
                for n in 0..per_day {
                    let model = &models[(rng.gen_range(0..models.len()) + team_idx) % models.len()];
                    let profile = resolve_profile(model, &[]);
                    let created_at = self.anchor
                        - Duration::days(day)
                        - Duration::minutes(rng.gen_range(30..1410));
                    let input_tokens: u64 = rng.gen_range(50..450);
                    let output_tokens: u64 = rng.gen_range(100..1000);
                    let load = SystemLoad {
                        cpu_percent: rng.gen_range(0.0..90.0),
                        mem_percent: rng.gen_range(30.0..90.0),
                    };
                    let prompt_len = (input_tokens * 5) as usize;
                    let factors = AdjustmentFactors::compute(
                        model,
                        load,
                        created_at.hour(),
                        prompt_len,
                        &profile,
                    );
                    let tokens = (input_tokens + output_tokens) as f64;
                    let latency_ms = profile.baseline_latency_ms
                        + rng.gen_range(0..profile.baseline_latency_ms.max(1));

                    out.push(RequestRecord {
                        request_id: format!("demo-{team_id}-{day:02}-{n}"),
                        user_id: format!("{team_id}-user-{}", rng.gen_range(0..(*members).max(1))),
                        team_id: (*team_id).to_string(),
                        model_used: model.clone(),
                        input_tokens,
                        output_tokens,
                        energy_wh: profile.energy_wh_per_1k_tokens * tokens / 1000.0
                            * factors.energy_multiplier(),
                        co2_grams: profile.co2_grams_per_1k_tokens * tokens / 1000.0
                            * factors.co2_multiplier(),
                        cost_usd: profile.cost_usd_per_1k_tokens * tokens / 1000.0,
                        latency_ms,
                        prompt_complexity: rng.gen_range(0.0..1.0),
                        failed: false,
                        created_at,
                    });
                }
            }
        }

        out.sort_by_key(|r| r.created_at);
        out
    }
}

impl UsageSource for SyntheticSource {
    fn label(&self) -> &'static str {
        "demo"
    }

    fn teams(&self) -> Result<Vec<TeamRow>, AppError> {
        Ok(DEMO_TEAMS
            .iter()
            .map(|(id, name, members)| TeamRow {
                team_id: (*id).to_string(),
                team_name: (*name).to_string(),
                member_count: *members,
            })
            .collect())
    }

    fn requests(
        &self,
        team_id: Option<&str>,
        since: DateTime<Utc>,
    ) -> Result<Vec<RequestRecord>, AppError> {
        Ok(self
            .generate()
            .into_iter()
            .filter(|r| team_id.map_or(true, |t| r.team_id == t))
            .filter(|r| r.created_at >= since)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn fixed_ts(hour: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + (hour * 3600), 0)
            .single()
            .expect("valid fixed timestamp")
    }

    fn sample(id: &str, team: &str, co2: f64, ts: DateTime<Utc>) -> RequestRecord {
        RequestRecord {
            request_id: id.to_string(),
            user_id: "u-1".to_string(),
            team_id: team.to_string(),
            model_used: "gemini-1.5-flash".to_string(),
            input_tokens: 13,
            output_tokens: 26,
            energy_wh: 0.01,
            co2_grams: co2,
            cost_usd: 0.0001,
            latency_ms: 420,
            prompt_complexity: 0.2,
            failed: false,
            created_at: ts,
        }
    }

    #[test]
    fn insert_request_round_trips_and_rejects_duplicates() {
        let tmp = TempDir::new().expect("tempdir");
        let storage = Storage::open(&tmp.path().join("carbonsight.sqlite")).expect("open storage");
        let record = sample("req-1", "platform", 0.5, fixed_ts(1));

        assert!(storage.insert_request(&record).expect("insert"));
        assert!(!storage.insert_request(&record).expect("second insert"));

        let rows = storage
            .requests(Some("platform"), fixed_ts(0))
            .expect("query");
        assert_eq!(rows, vec![record]);
    }

    #[test]
    fn requests_apply_team_and_time_filters() {
        let storage = Storage::open_in_memory().expect("open storage");
        storage
            .insert_request(&sample("a", "platform", 1.0, fixed_ts(1)))
            .expect("insert a");
        storage
            .insert_request(&sample("b", "platform", 2.0, fixed_ts(5)))
            .expect("insert b");
        storage
            .insert_request(&sample("c", "research", 3.0, fixed_ts(5)))
            .expect("insert c");

        let recent = storage.requests(Some("platform"), fixed_ts(2)).expect("query");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].request_id, "b");

        let all = storage.requests(None, fixed_ts(0)).expect("query");
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].request_id, "a");
    }

    #[test]
    fn null_metric_columns_default_to_zero() {
        let storage = Storage::open_in_memory().expect("open storage");
        storage
            .conn
            .execute(
                "INSERT INTO ai_requests (team_id, created_at) VALUES ('platform', ?1)",
                [fixed_ts(1).to_rfc3339()],
            )
            .expect("insert sparse row");

        let rows = storage.requests(Some("platform"), fixed_ts(0)).expect("query");
        assert_eq!(rows.len(), 1);
        let r = &rows[0];
        assert_eq!(r.request_id, "");
        assert_eq!(r.model_used, "");
        assert_eq!(r.total_tokens(), 0);
        assert_eq!(r.energy_wh, 0.0);
        assert_eq!(r.co2_grams, 0.0);
        assert_eq!(r.cost_usd, 0.0);
        assert_eq!(r.latency_ms, 0);
        assert!(!r.failed);
    }

    #[test]
    fn teams_include_unregistered_request_teams() {
        let storage = Storage::open_in_memory().expect("open storage");
        storage
            .upsert_team(&TeamRow {
                team_id: "platform".into(),
                team_name: "Platform".into(),
                member_count: 3,
            })
            .expect("upsert");
        storage
            .upsert_team(&TeamRow {
                team_id: "platform".into(),
                team_name: "Platform Eng".into(),
                member_count: 5,
            })
            .expect("upsert again");
        storage
            .insert_request(&sample("x", "orphans", 1.0, fixed_ts(1)))
            .expect("insert");

        let teams = storage.teams().expect("teams");
        assert_eq!(
            teams,
            vec![
                TeamRow {
                    team_id: "orphans".into(),
                    team_name: "orphans".into(),
                    member_count: 0,
                },
                TeamRow {
                    team_id: "platform".into(),
                    team_name: "Platform Eng".into(),
                    member_count: 5,
                },
            ]
        );
        assert_eq!(
            storage.team("platform").expect("team").map(|t| t.member_count),
            Some(5)
        );
        assert_eq!(
            storage.team("orphans").expect("team"),
            Some(teams[0].clone())
        );
        assert!(storage.team("missing").expect("team").is_none());

        let demo = SyntheticSource::new(fixed_ts(0));
        assert_eq!(
            demo.team("growth").expect("team").map(|t| t.member_count),
            Some(8)
        );
        assert!(demo.team("missing").expect("team").is_none());
    }

    #[test]
    fn export_requests_json_serializes_rows_newest_first() {
        let storage = Storage::open_in_memory().expect("open storage");
        storage
            .insert_request(&sample("old", "platform", 1.0, fixed_ts(1)))
            .expect("insert");
        storage
            .insert_request(&sample("new", "platform", 2.0, fixed_ts(2)))
            .expect("insert");

        let json = storage.export_requests_json().expect("export json");
        let rows: Vec<RequestRecord> = serde_json::from_str(&json).expect("parse exported json");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].request_id, "new");
        assert_eq!(rows[1].request_id, "old");
    }

    #[test]
    fn synthetic_source_is_deterministic() {
        let anchor = fixed_ts(0);
        let a = SyntheticSource::new(anchor);
        let b = SyntheticSource::new(anchor);
        let since = anchor - Duration::days(7);

        let ra = a.requests(None, since).expect("requests");
        let rb = b.requests(None, since).expect("requests");
        assert!(!ra.is_empty());
        assert_eq!(ra, rb);
        assert!(ra.iter().all(|r| r.created_at >= since && r.created_at <= anchor));
        assert!(ra.iter().all(|r| r.energy_wh > 0.0 && r.co2_grams > 0.0));

        let teams = a.teams().expect("teams");
        assert_eq!(teams.len(), 4);
        let platform = a.requests(Some("platform"), since).expect("requests");
        assert!(platform.iter().all(|r| r.team_id == "platform"));
    }

    #[test]
    fn synthetic_values_stay_in_sampled_ranges() {
        let anchor = fixed_ts(0);
        let rows = SyntheticSource::new(anchor)
            .requests(None, anchor - Duration::days(DEMO_DAYS + 1))
            .expect("requests");
        let models: Vec<String> = built_in_profiles()
            .into_iter()
            .map(|p| p.model_pattern)
            .collect();

        for r in &rows {
            assert!((50..450).contains(&r.input_tokens));
            assert!((100..1000).contains(&r.output_tokens));
            assert!((0.0..1.0).contains(&r.prompt_complexity));
            assert!(models.contains(&r.model_used));
            let baseline = resolve_profile(&r.model_used, &[]).baseline_latency_ms;
            assert!(r.latency_ms >= baseline && r.latency_ms < baseline * 2 + 1);
        }
        let ids: std::collections::HashSet<_> = rows.iter().map(|r| &r.request_id).collect();
        assert_eq!(ids.len(), rows.len());
    }
}
