use crate::error::AppError;
use crate::providers::{
    resolve_endpoint, Generation, GenerationProvider, GenerationRequest, ProviderContext,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT_BASE: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider;

impl GeminiProvider {
    fn generate_endpoint(ctx: &ProviderContext, model: &str) -> String {
        resolve_endpoint(
            ctx.settings.base_url.as_deref(),
            DEFAULT_BASE,
            &format!("/v1beta/models/{model}:generateContent"),
        )
    }

    fn models_endpoint(ctx: &ProviderContext) -> String {
        resolve_endpoint(ctx.settings.base_url.as_deref(), DEFAULT_BASE, "/v1beta/models")
    }

    fn request_body(request: &GenerationRequest) -> Value {
        json!({
            "contents": [{ "parts": [{ "text": request.prompt }] }],
            "generationConfig": {
                "maxOutputTokens": request.max_tokens,
                "temperature": request.temperature,
            }
        })
    }

    fn parse_text(body: &Value) -> Option<String> {
        let parts = body
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .and_then(|c| c.pointer("/content/parts"))
            .and_then(Value::as_array)?;

        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[async_trait]
impl GenerationProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn models(&self) -> &'static [&'static str] {
        &["gemini-1.5-flash", "gemini-1.5-pro", "gemini-2.0-flash"]
    }

    async fn generate(
        &self,
        client: &Client,
        ctx: &ProviderContext,
        request: &GenerationRequest,
    ) -> Result<Generation, AppError> {
        let body: Value = client
            .post(Self::generate_endpoint(ctx, &request.model))
            .header("x-goog-api-key", &ctx.api_key)
            .json(&Self::request_body(request))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let text = Self::parse_text(&body).ok_or_else(|| {
            AppError::Provider("Gemini response did not contain any candidate text".into())
        })?;

        Ok(Generation { text })
    }

    async fn test_connection(
        &self,
        client: &Client,
        ctx: &ProviderContext,
    ) -> Result<Option<u16>, AppError> {
        let response = client
            .get(Self::models_endpoint(ctx))
            .header("x-goog-api-key", &ctx.api_key)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Some(status.as_u16()));
        }
        if status.as_u16() == 400 || status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Config(
                "Gemini rejected credentials (unauthorized).".into(),
            ));
        }

        Err(AppError::Config(format!(
            "Gemini connection failed with HTTP status {}.",
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    #[test]
    fn parse_text_concatenates_parts() {
        let body = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "green " }, { "text": "compute" }] }
            }]
        });
        assert_eq!(
            GeminiProvider::parse_text(&body).as_deref(),
            Some("green compute")
        );
    }

    #[test]
    fn parse_text_returns_none_for_blocked_prompt() {
        let body = json!({ "promptFeedback": { "blockReason": "SAFETY" } });
        assert!(GeminiProvider::parse_text(&body).is_none());
    }

    #[test]
    fn generate_endpoint_embeds_model() {
        let ctx = ProviderContext {
            api_key: "k".into(),
            settings: ProviderSettings::default(),
        };
        assert_eq!(
            GeminiProvider::generate_endpoint(&ctx, "gemini-1.5-flash"),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent"
        );
    }
}
