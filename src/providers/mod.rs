use crate::config::CompletionSettings;
use crate::models::TransportError;
use async_trait::async_trait;
use reqwest::Client;

pub mod groq;

pub const SYSTEM_PROMPT: &str = "You are a knowledgeable travel guide assistant. \
Provide detailed, engaging, and helpful information about travel destinations. \
Include information about:
- Best time to visit
- Top attractions
- Local cuisine
- Cultural tips
- Budget considerations
- Travel tips

Format your response in a friendly, conversational way with clear sections. \
Keep responses concise but informative (around 250-300 words).";

pub const TEMPERATURE: f64 = 0.7;

pub const MAX_TOKENS: u32 = 1024;

#[derive(Debug, Clone)]
pub struct CompletionContext {
    pub api_key: String,
    pub settings: CompletionSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    /// `usage.total_tokens`, when the endpoint reports it.
    pub total_tokens: Option<u64>,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        client: &Client,
        ctx: &CompletionContext,
        prompt: &str,
    ) -> Result<Completion, TransportError>;
}
