use crate::config::ProviderSettings;
use crate::error::AppError;
use async_trait::async_trait;
use reqwest::Client;

pub mod gemini;
pub mod openai;

#[derive(Debug, Clone)]
pub struct ProviderContext {
    pub api_key: String,
    pub settings: ProviderSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model: model.into(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn models(&self) -> &'static [&'static str];

    fn serves(&self, model: &str) -> bool {
        self.models().iter().any(|m| model.starts_with(m))
    }

    async fn generate(
        &self,
        client: &Client,
        ctx: &ProviderContext,
        request: &GenerationRequest,
    ) -> Result<Generation, AppError>;

    async fn test_connection(
        &self,
        client: &Client,
        ctx: &ProviderContext,
    ) -> Result<Option<u16>, AppError>;
}

pub fn all_providers() -> Vec<Box<dyn GenerationProvider>> {
    vec![Box::new(openai::OpenAiProvider), Box::new(gemini::GeminiProvider)]
}

pub fn provider_for_model(model: &str) -> Option<Box<dyn GenerationProvider>> {
    all_providers().into_iter().find(|p| p.serves(model))
}

/// Joins `path` onto a configured base URL, or onto `default_base` when unset.
pub(crate) fn resolve_endpoint(base_url: Option<&str>, default_base: &str, path: &str) -> String {
    let base = base_url.unwrap_or(default_base);
    match url::Url::parse(base) {
        Ok(mut parsed) => {
            let prefix = parsed.path().trim_end_matches('/').to_string();
            let prefix = prefix.strip_suffix("/v1").unwrap_or(&prefix).to_string();
            let prefix = prefix.strip_suffix("/v1beta").unwrap_or(&prefix).to_string();
            parsed.set_path(&format!("{prefix}{path}"));
            parsed.to_string()
        }
        Err(_) => format!("{}{}", base.trim_end_matches('/'), path),
    }
}
