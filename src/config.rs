use crate::error::AppError;
use crate::profiles::DEFAULT_REGION;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SERVICE_NAME: &str = "carbonsight";
pub const ENV_PREFIX: &str = "CARBONSIGHT";

pub fn normalize_provider_name(provider: &str) -> String {
    provider.trim().to_ascii_lowercase()
}

fn app_home_dir() -> Result<PathBuf, AppError> {
    if let Ok(custom) = std::env::var("CARBONSIGHT_HOME") {
        return Ok(PathBuf::from(custom));
    }

    if let Some(dirs) = ProjectDirs::from("com", "carbonsight", SERVICE_NAME) {
        let candidate = dirs.data_local_dir().to_path_buf();
        if fs::create_dir_all(&candidate).is_ok() {
            return Ok(candidate);
        }
    }

    let cwd = std::env::current_dir()?;
    Ok(cwd.join(".carbonsight"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub refresh_seconds: u64,
    pub enabled_providers: Vec<String>,
    pub provider_settings: HashMap<String, ProviderSettings>,
    pub buffer_capacity: usize,
    pub region: String,
    pub reward_rate_per_gram_co2: f64,
    pub baseline_model: String,
    pub profile_overrides: Vec<ProfileOverride>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub organization_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverride {
    pub model_pattern: String,
    pub energy_wh_per_1k_tokens: f64,
    pub co2_grams_per_1k_tokens: f64,
    pub cost_usd_per_1k_tokens: f64,
    #[serde(default)]
    pub region: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            refresh_seconds: 60,
            enabled_providers: vec![],
            provider_settings: HashMap::new(),
            buffer_capacity: 1000,
            region: DEFAULT_REGION.into(),
            reward_rate_per_gram_co2: 0.02,
            baseline_model: "gemini-1.5-pro".into(),
            profile_overrides: vec![],
        }
    }
}

pub fn config_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("config"))
}

pub fn data_dir() -> Result<PathBuf, AppError> {
    Ok(app_home_dir()?.join("data"))
}

pub fn config_path() -> Result<PathBuf, AppError> {
    Ok(config_dir()?.join("config.toml"))
}

pub fn db_path() -> Result<PathBuf, AppError> {
    Ok(data_dir()?.join("carbonsight.sqlite"))
}

pub fn ensure_dirs() -> Result<(), AppError> {
    fs::create_dir_all(config_dir()?)?;
    fs::create_dir_all(data_dir()?)?;
    Ok(())
}

fn normalize_config(config: &mut AppConfig) -> bool {
    let mut changed = false;

    let mut enabled = Vec::new();
    for provider in &config.enabled_providers {
        let normalized = normalize_provider_name(provider);
        if normalized != *provider {
            changed = true;
        }
        if !enabled.iter().any(|p: &String| p == &normalized) {
            enabled.push(normalized);
        } else {
            changed = true;
        }
    }
    config.enabled_providers = enabled;

    let mut normalized_settings: HashMap<String, ProviderSettings> = HashMap::new();
    for (provider, settings) in std::mem::take(&mut config.provider_settings) {
        let normalized = normalize_provider_name(&provider);
        if normalized != provider {
            changed = true;
        }
        normalized_settings.insert(normalized, settings);
    }
    config.provider_settings = normalized_settings;

    if config.buffer_capacity == 0 {
        config.buffer_capacity = AppConfig::default().buffer_capacity;
        changed = true;
    }

    changed
}

fn build_config(path: &Path) -> Result<AppConfig, AppError> {
    let layered = config::Config::builder()
        .add_source(
            config::File::from(path.to_path_buf())
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()?;
    Ok(layered.try_deserialize()?)
}

/// Loads `config.toml` with `CARBONSIGHT_*` environment overrides on top.
pub fn load_config() -> Result<AppConfig, AppError> {
    let path = config_path()?;
    let mut parsed = build_config(&path)?;

    // Only the file layer is persisted; env overrides stay ephemeral.
    if normalize_config(&mut parsed) && path.exists() {
        let mut on_disk = build_file_only(&path)?;
        normalize_config(&mut on_disk);
        save_config(&on_disk)?;
    }

    Ok(parsed)
}

fn build_file_only(path: &Path) -> Result<AppConfig, AppError> {
    let layered = config::Config::builder()
        .add_source(
            config::File::from(path.to_path_buf())
                .format(config::FileFormat::Toml)
                .required(false),
        )
        .build()?;
    Ok(layered.try_deserialize()?)
}

pub fn save_config(config: &AppConfig) -> Result<(), AppError> {
    ensure_dirs()?;
    let path = config_path()?;
    let raw = toml::to_string_pretty(config)?;
    fs::write(path, raw)?;
    Ok(())
}

pub fn set_api_key(provider: &str, key: &str) -> Result<(), AppError> {
    let normalized = normalize_provider_name(provider);
    let entry = keyring::Entry::new(SERVICE_NAME, &format!("provider:{normalized}"))?;
    entry.set_password(key)?;
    Ok(())
}

pub fn get_api_key(provider: &str) -> Result<String, AppError> {
    let normalized = normalize_provider_name(provider);
    if let Ok(entry) = keyring::Entry::new(SERVICE_NAME, &format!("provider:{normalized}")) {
        if let Ok(value) = entry.get_password() {
            if !value.is_empty() {
                return Ok(value);
            }
        }
    }

    let env_name = format!(
        "{}_API_KEY",
        normalized.to_ascii_uppercase().replace('-', "_")
    );
    if let Ok(value) = std::env::var(env_name) {
        if !value.is_empty() {
            return Ok(value);
        }
    }

    Err(AppError::Config(format!(
        "No API key found for provider '{normalized}'. Run add-provider or set the env var."
    )))
}

pub fn ensure_initialized() -> Result<(), AppError> {
    ensure_dirs()?;
    let cfg_path = config_path()?;
    if !Path::new(&cfg_path).exists() {
        save_config(&AppConfig::default())?;
    }
    Ok(())
}
