use crate::config::{AppConfig, CompletionSettings};
use crate::error::AppError;
use crate::guard::RateGuard;
use crate::models::{QueryRequest, QueryResult};
use crate::providers::groq::GroqProvider;
use crate::providers::{CompletionContext, CompletionProvider};
use chrono::Utc;
use reqwest::Client;
use std::time::Instant;
use tracing::{info, warn};

pub fn http_client() -> Result<Client, AppError> {
    Ok(Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .build()?)
}

pub fn provider_for(name: &str) -> Result<Box<dyn CompletionProvider>, AppError> {
    match name {
        "groq" => Ok(Box::new(GroqProvider)),
        _ => Err(AppError::Config(format!(
            "Unsupported completion provider '{name}'."
        ))),
    }
}

/// Sends travel queries through the rate guard to the completion endpoint.
///
/// `dispatch` borrows the service mutably, so one query is in flight at a
/// time per service.
pub struct GuideService {
    client: Client,
    provider: Box<dyn CompletionProvider>,
    ctx: CompletionContext,
    guard: RateGuard,
}

impl GuideService {
    pub fn new(
        client: Client,
        provider: Box<dyn CompletionProvider>,
        api_key: String,
        settings: CompletionSettings,
        guard: RateGuard,
    ) -> Self {
        Self {
            client,
            provider,
            ctx: CompletionContext { api_key, settings },
            guard,
        }
    }

    pub fn from_config(
        cfg: &AppConfig,
        api_key: String,
        guard: RateGuard,
    ) -> Result<Self, AppError> {
        Ok(Self::new(
            http_client()?,
            provider_for(&cfg.completion.provider)?,
            api_key,
            cfg.completion.clone(),
            guard,
        ))
    }

    #[cfg(test)]
    pub fn usage(&self) -> crate::models::UsageSnapshot {
        self.guard.snapshot(Utc::now())
    }

    pub async fn dispatch(&mut self, query: &QueryRequest) -> QueryResult {
        let now = Utc::now();
        if let Err(limit) = self.guard.try_admit(now) {
            let usage = self.guard.snapshot(now);
            warn!(?limit, %usage, "query rejected by rate guard");
            return QueryResult::RateLimited { usage, limit };
        }

        let started = Instant::now();
        match self
            .provider
            .complete(&self.client, &self.ctx, query.text())
            .await
        {
            Ok(completion) => {
                self.guard.record_success(completion.total_tokens);
                info!(
                    provider = self.provider.name(),
                    tokens = ?completion.total_tokens,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "query answered"
                );
                QueryResult::Success {
                    text: completion.text,
                    tokens_consumed: completion.total_tokens,
                }
            }
            Err(err) => {
                warn!(
                    provider = self.provider.name(),
                    category = ?err.category,
                    error = %err,
                    "query failed"
                );
                QueryResult::TransportError(err)
            }
        }
    }
}
