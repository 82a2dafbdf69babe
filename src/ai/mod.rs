//! AI Service Abstraction (spec.md §4.3): remote parser with deterministic
//! fallback, cost accounting, and cancellation.

pub mod cost;
pub mod fallback;
pub mod pricing;
pub mod remote;
pub mod traits;

pub use traits::{AiService, ParseOutcome, SuggestOutcome, Usage};

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::ai::cost::CostLogger;
use crate::ai::pricing::PricingResolver;
use crate::ai::remote::RemoteAiClient;
use crate::config::AiConfig;
use crate::domain::{AiOperation, NewAiCostLog};

/// Production `AiService`: tries [`RemoteAiClient`] first, downgrading to
/// the deterministic regex/keyword fallback on any failure, and always
/// enqueues a cost-log entry via [`CostLogger`] regardless of which path
/// produced the result.
pub struct GeminiAiService {
    remote: RemoteAiClient,
    provider: String,
    model: String,
    pricing: PricingResolver,
    cost_logger: CostLogger,
    cancellation: CancellationToken,
}

impl GeminiAiService {
    pub fn new(config: AiConfig, pricing: PricingResolver, cost_logger: CostLogger) -> Self {
        let provider = config.provider.clone();
        let model = config.model.clone();
        Self {
            remote: RemoteAiClient::new(config),
            provider,
            model,
            pricing,
            cost_logger,
            cancellation: CancellationToken::new(),
        }
    }

    /// A token callers may cancel to abort any in-flight remote call
    /// issued through this service; a cost-log entry describing the
    /// attempt is still emitted.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    async fn log_cost(&self, user_id: &str, operation: AiOperation, usage: Usage, used_fallback: bool) {
        let cost = if used_fallback {
            crate::domain::Money::ZERO
        } else {
            self.pricing
                .cost_for(&self.provider, &self.model, usage.input_tokens, usage.output_tokens)
                .await
        };

        self.cost_logger.log(NewAiCostLog {
            user_id: user_id.to_string(),
            operation,
            provider: self.provider.clone(),
            model: self.model.clone(),
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            total_tokens: usage.total(),
            cost,
            currency: "USD".to_string(),
        });
    }
}

#[async_trait]
impl AiService for GeminiAiService {
    async fn parse_expense(&self, text: &str, user_id: &str) -> ParseOutcome {
        let result = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => None,
            r = self.remote.parse_expense(text, user_id) => Some(r),
        };

        let (expenses, usage, used_fallback) = match result {
            Some(Ok((expenses, usage))) => (expenses, usage, false),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "remote AI parse failed, using fallback");
                (fallback::parse_expenses(text), Usage::default(), true)
            }
            None => {
                tracing::warn!("remote AI parse cancelled, using fallback");
                (fallback::parse_expenses(text), Usage::default(), true)
            }
        };

        self.log_cost(user_id, AiOperation::ParseExpense, usage, used_fallback).await;

        ParseOutcome {
            expenses,
            usage,
            used_fallback,
        }
    }

    async fn suggest_category(&self, description: &str, user_id: &str) -> SuggestOutcome {
        let result = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => None,
            r = self.remote.suggest_category(description, user_id) => Some(r),
        };

        let (category, usage, used_fallback) = match result {
            Some(Ok((category, usage))) => (category, usage, false),
            Some(Err(e)) => {
                tracing::warn!(error = %e, "remote AI category suggestion failed, using fallback");
                (fallback::suggest_category(description), Usage::default(), true)
            }
            None => (fallback::suggest_category(description), Usage::default(), true),
        };

        self.log_cost(user_id, AiOperation::SuggestCategory, usage, used_fallback).await;

        SuggestOutcome {
            category,
            usage,
            used_fallback,
        }
    }
}
