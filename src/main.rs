mod aggregator;
mod analytics;
mod buffer;
mod config;
mod emitter;
mod error;
mod forecast;
mod load;
mod models;
mod profiles;
mod providers;
mod ranker;
mod service;
mod store;
mod ui;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use config::{
    db_path, ensure_initialized, load_config, normalize_provider_name, save_config, set_api_key,
};
use error::AppError;
use models::{Metric, TeamRow, TimeWindow};
use serde::Serialize;
use service::{ChatRequest, MeterService};
use store::{Storage, SyntheticSource, UsageSource};
use tracing_subscriber::EnvFilter;
use ui::run::run_tui;

#[derive(Debug, Parser)]
#[command(name = "carbonsight")]
#[command(about = "Energy, carbon and cost telemetry for AI usage, per team")]
struct Cli {
    /// Read from generated demo data instead of the local database.
    #[arg(long, global = true)]
    demo: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Board {
    Teams,
    Models,
}

#[derive(Debug, Subcommand)]
enum Commands {
    Init,
    AddProvider {
        provider: String,
        #[arg(long)]
        api_key: String,
        #[arg(long)]
        base_url: Option<String>,
        #[arg(long)]
        organization_id: Option<String>,
        /// Check the credentials against the provider before saving.
        #[arg(long)]
        test: bool,
    },
    AddTeam {
        team_id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, default_value_t = 1)]
        members: u32,
    },
    Chat {
        prompt: String,
        #[arg(long)]
        team: String,
        #[arg(long, default_value = "cli")]
        user: String,
        #[arg(long, default_value = profiles::DEFAULT_MODEL)]
        model: String,
    },
    Team {
        team_id: String,
        #[arg(long, default_value = "7d")]
        window: String,
    },
    Leaderboard {
        #[arg(value_enum)]
        board: Board,
        #[arg(long, default_value = "7d")]
        window: String,
    },
    Metrics {
        #[arg(long, default_value = "1d")]
        window: String,
        #[arg(long)]
        model: Option<String>,
    },
    Forecast {
        team_id: String,
        #[arg(long, default_value = "co2")]
        metric: String,
        #[arg(
            long,
            default_value_t = 14,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(service::MAX_HISTORY_DAYS))
        )]
        days: u32,
        #[arg(
            long,
            default_value_t = 7,
            value_parser = clap::value_parser!(u64).range(0..=forecast::MAX_HORIZON_DAYS as u64)
        )]
        horizon: u64,
    },
    Overview {
        #[arg(long, default_value = "7d")]
        window: String,
    },
    Export {
        #[arg(long, default_value = "json")]
        format: String,
    },
    ShowConfig,
    Tui,
}

fn validate_window(input: &str) -> Result<TimeWindow, AppError> {
    match input {
        "1d" => Ok(TimeWindow::OneDay),
        "7d" => Ok(TimeWindow::SevenDays),
        "30d" => Ok(TimeWindow::ThirtyDays),
        _ => Err(AppError::Config(
            "Unsupported window. Use 1d, 7d, or 30d.".into(),
        )),
    }
}

fn parse_metric(input: &str) -> Result<Metric, AppError> {
    Metric::parse(input).ok_or_else(|| {
        AppError::Config(format!(
            "Unsupported metric '{input}'. Use co2, energy, or cost."
        ))
    })
}

fn csv_field(raw: &str) -> String {
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw.to_string()
    }
}

fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn open_source(demo: bool) -> Result<Box<dyn UsageSource>, AppError> {
    if demo {
        Ok(Box::new(SyntheticSource::new(Utc::now())))
    } else {
        Ok(Box::new(Storage::open(&db_path()?)?))
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct InsufficientDataReport<'a> {
    status: &'static str,
    detail: &'a str,
}

/// Prints a result, turning missing data into a structured report instead
/// of a failure.
fn print_or_insufficient<T: Serialize>(result: Result<T, AppError>) -> Result<(), AppError> {
    match result {
        Ok(value) => print_json(&value),
        Err(AppError::InsufficientData(detail)) => print_json(&InsufficientDataReport {
            status: "insufficient_data",
            detail: &detail,
        }),
        Err(err) => Err(err),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(if matches!(cli.command, Commands::Tui) {
        "off"
    } else {
        "warn"
    });

    match cli.command {
        Commands::Init => {
            ensure_initialized()?;
            let db = db_path()?;
            Storage::open(&db)?;
            println!("Initialized carbonsight config and data directories.");
        }
        Commands::AddProvider {
            provider,
            api_key,
            base_url,
            organization_id,
            test,
        } => {
            ensure_initialized()?;
            let mut cfg = load_config()?;
            let provider = normalize_provider_name(&provider);
            let settings = config::ProviderSettings {
                base_url,
                organization_id,
            };

            if test {
                let svc = MeterService::new(cfg.buffer_capacity)?;
                let report = svc
                    .test_provider_connection(&provider, api_key.clone(), settings.clone())
                    .await
                    .with_context(|| format!("testing provider '{provider}'"))?;
                println!(
                    "Connection ok (HTTP {}) in {} ms.",
                    report
                        .status_code
                        .map_or_else(|| "-".to_string(), |c| c.to_string()),
                    report.duration_ms
                );
            }

            if !cfg
                .enabled_providers
                .iter()
                .any(|p| p.eq_ignore_ascii_case(&provider))
            {
                cfg.enabled_providers.push(provider.clone());
            }
            cfg.provider_settings.insert(provider.clone(), settings);

            set_api_key(&provider, &api_key)?;
            save_config(&cfg)?;
            println!("Provider '{}' configured.", provider);
        }
        Commands::AddTeam {
            team_id,
            name,
            members,
        } => {
            ensure_initialized()?;
            let storage = Storage::open(&db_path()?)?;
            let team = TeamRow {
                team_name: name.unwrap_or_else(|| team_id.clone()),
                team_id,
                member_count: members,
            };
            storage.upsert_team(&team)?;
            println!(
                "Team '{}' saved with {} member(s).",
                team.team_id, team.member_count
            );
        }
        Commands::Chat {
            prompt,
            team,
            user,
            model,
        } => {
            ensure_initialized()?;
            let cfg = load_config()?;
            let storage = Storage::open(&db_path()?)?;
            let svc = MeterService::new(cfg.buffer_capacity)?;
            let outcome = svc
                .chat(
                    &cfg,
                    &storage,
                    ChatRequest {
                        prompt,
                        model,
                        team_id: team,
                        user_id: user,
                    },
                )
                .await?;
            print_json(&outcome)?;
        }
        Commands::Team { team_id, window } => {
            let window = validate_window(&window)?;
            if !cli.demo {
                ensure_initialized()?;
            }
            let source = open_source(cli.demo)?;
            print_json(&service::team_dashboard(
                source.as_ref(),
                &team_id,
                window,
                Utc::now(),
            )?)?;
        }
        Commands::Leaderboard { board, window } => {
            let window = validate_window(&window)?;
            if !cli.demo {
                ensure_initialized()?;
            }
            let source = open_source(cli.demo)?;
            let result = match board {
                Board::Teams => service::teams_leaderboard(source.as_ref(), window, Utc::now()),
                Board::Models => service::models_leaderboard(source.as_ref(), window, Utc::now()),
            };
            print_or_insufficient(result)?;
        }
        Commands::Metrics { window, model } => {
            let window = validate_window(&window)?;
            if !cli.demo {
                ensure_initialized()?;
            }
            let cfg = load_config()?;
            let source = open_source(cli.demo)?;
            let svc = MeterService::new(cfg.buffer_capacity)?;
            let now = Utc::now();
            svc.warm_buffer(source.as_ref(), window.as_hours(), now)?;
            print_json(&svc.metrics_report(window.as_hours(), model.as_deref(), now))?;
        }
        Commands::Forecast {
            team_id,
            metric,
            days,
            horizon,
        } => {
            let metric = parse_metric(&metric)?;
            if !cli.demo {
                ensure_initialized()?;
            }
            let source = open_source(cli.demo)?;
            print_or_insufficient(service::forecast_team(
                source.as_ref(),
                &team_id,
                metric,
                days,
                horizon as usize,
                Utc::now(),
            ))?;
        }
        Commands::Overview { window } => {
            let window = validate_window(&window)?;
            if !cli.demo {
                ensure_initialized()?;
            }
            let source = open_source(cli.demo)?;
            print_json(&service::org_overview(source.as_ref(), window, Utc::now())?)?;
        }
        Commands::Export { format } => {
            ensure_initialized()?;
            let storage = Storage::open(&db_path()?)?;
            if format.eq_ignore_ascii_case("json") {
                println!("{}", storage.export_requests_json()?);
            } else if format.eq_ignore_ascii_case("csv") {
                println!(
                    "request_id,user_id,team_id,model_used,tokens_input,tokens_output,energy_wh,co2e_g,cost_usd,latency_ms,failed,created_at"
                );
                for r in storage.export_requests()? {
                    println!(
                        "{},{},{},{},{},{},{:.8},{:.8},{:.8},{},{},{}",
                        csv_field(&r.request_id),
                        csv_field(&r.user_id),
                        csv_field(&r.team_id),
                        csv_field(&r.model_used),
                        r.input_tokens,
                        r.output_tokens,
                        r.energy_wh,
                        r.co2_grams,
                        r.cost_usd,
                        r.latency_ms,
                        r.failed,
                        csv_field(&r.created_at.to_rfc3339()),
                    );
                }
            } else {
                return Err(AppError::Config(
                    "Unsupported export format. Use json or csv".into(),
                )
                .into());
            }
        }
        Commands::ShowConfig => {
            let cfg = load_config()?;
            print!("{}", toml::to_string_pretty(&cfg).map_err(AppError::from)?);
        }
        Commands::Tui => {
            ensure_initialized()?;
            run_tui(cli.demo)?;
        }
    }

    Ok(())
}
