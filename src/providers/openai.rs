use crate::error::AppError;
use crate::providers::{
    resolve_endpoint, Generation, GenerationProvider, GenerationRequest, ProviderContext,
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

const DEFAULT_BASE: &str = "https://api.openai.com";

pub struct OpenAiProvider;

impl OpenAiProvider {
    fn completions_endpoint(ctx: &ProviderContext) -> String {
        resolve_endpoint(
            ctx.settings.base_url.as_deref(),
            DEFAULT_BASE,
            "/v1/chat/completions",
        )
    }

    fn models_endpoint(ctx: &ProviderContext) -> String {
        resolve_endpoint(ctx.settings.base_url.as_deref(), DEFAULT_BASE, "/v1/models")
    }

    fn request_body(request: &GenerationRequest) -> Value {
        json!({
            "model": request.model,
            "messages": [{ "role": "user", "content": request.prompt }],
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        })
    }

    fn parse_text(body: &Value) -> Option<String> {
        body.get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(Value::as_str)
            .map(ToString::to_string)
    }
}

#[async_trait]
impl GenerationProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn models(&self) -> &'static [&'static str] {
        &["gpt-3.5-turbo", "gpt-4o", "gpt-4"]
    }

    async fn generate(
        &self,
        client: &Client,
        ctx: &ProviderContext,
        request: &GenerationRequest,
    ) -> Result<Generation, AppError> {
        let mut req = client
            .post(Self::completions_endpoint(ctx))
            .bearer_auth(&ctx.api_key)
            .json(&Self::request_body(request));
        if let Some(org) = &ctx.settings.organization_id {
            req = req.header("OpenAI-Organization", org);
        }

        let body: Value = req.send().await?.error_for_status()?.json().await?;
        let text = Self::parse_text(&body).ok_or_else(|| {
            AppError::Provider("OpenAI response did not contain a message".into())
        })?;

        Ok(Generation { text })
    }

    async fn test_connection(
        &self,
        client: &Client,
        ctx: &ProviderContext,
    ) -> Result<Option<u16>, AppError> {
        let mut req = client
            .get(Self::models_endpoint(ctx))
            .bearer_auth(&ctx.api_key);
        if let Some(org) = &ctx.settings.organization_id {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(Some(status.as_u16()));
        }
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Config(
                "OpenAI rejected credentials (unauthorized).".into(),
            ));
        }

        Err(AppError::Config(format!(
            "OpenAI connection failed with HTTP status {}.",
            status
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;

    #[test]
    fn parse_text_reads_first_choice() {
        let body = json!({
            "choices": [
                { "message": { "role": "assistant", "content": "hello there" } },
                { "message": { "role": "assistant", "content": "ignored" } }
            ]
        });
        assert_eq!(
            OpenAiProvider::parse_text(&body).as_deref(),
            Some("hello there")
        );
    }

    #[test]
    fn parse_text_returns_none_for_empty_choices() {
        assert!(OpenAiProvider::parse_text(&json!({ "choices": [] })).is_none());
        assert!(OpenAiProvider::parse_text(&json!({})).is_none());
    }

    #[test]
    fn request_body_carries_generation_parameters() {
        let body = OpenAiProvider::request_body(&GenerationRequest::new("hi", "gpt-4o"));
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["content"], "hi");
        assert_eq!(body["max_tokens"], 1000);
    }

    #[test]
    fn endpoints_follow_base_url() {
        let ctx = ProviderContext {
            api_key: "k".into(),
            settings: ProviderSettings {
                base_url: Some("http://localhost:8080/v1".into()),
                organization_id: None,
            },
        };
        assert_eq!(
            OpenAiProvider::completions_endpoint(&ctx),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            OpenAiProvider::models_endpoint(&ctx),
            "http://localhost:8080/v1/models"
        );
    }
}
