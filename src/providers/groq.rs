use crate::models::TransportError;
use crate::providers::{
    Completion, CompletionContext, CompletionProvider, MAX_TOKENS, SYSTEM_PROMPT, TEMPERATURE,
};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Groq's OpenAI-compatible chat-completions endpoint.
pub struct GroqProvider;

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

impl GroqProvider {
    fn resolve_completions_url(base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            return base.to_string();
        }
        format!("{base}/chat/completions")
    }

    fn build_request<'a>(ctx: &'a CompletionContext, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &ctx.settings.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        }
    }
}

#[async_trait]
impl CompletionProvider for GroqProvider {
    fn name(&self) -> &'static str {
        "groq"
    }

    async fn complete(
        &self,
        client: &Client,
        ctx: &CompletionContext,
        prompt: &str,
    ) -> Result<Completion, TransportError> {
        let url = Self::resolve_completions_url(&ctx.settings.base_url);
        debug!(%url, model = %ctx.settings.model, prompt_len = prompt.len(), "sending completion request");

        let response = client
            .post(url)
            .bearer_auth(&ctx.api_key)
            .json(&Self::build_request(ctx, prompt))
            .send()
            .await
            .map_err(|e| TransportError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), %body, "completion API returned an error");
            return Err(TransportError::http(status.as_u16(), &body));
        }

        let payload: ChatResponse = response.json().await.map_err(|e| {
            TransportError::unknown(format!("Unreadable completion response: {e}"))
        })?;

        let total_tokens = payload.usage.and_then(|u| u.total_tokens);
        let text = payload
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| TransportError::unknown("Completion response contained no choices"))?;

        debug!(?total_tokens, reply_len = text.len(), "completion received");
        Ok(Completion { text, total_tokens })
    }
}
