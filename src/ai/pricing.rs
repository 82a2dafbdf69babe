//! Static per-model price table plus `PricingConfig` override lookup.
//!
//! Mirrors the teacher's `src/cost/pricing.rs::model_pricing` — a plain
//! match over known model name prefixes returning `(input, output)` price
//! per million tokens, `(0.0, 0.0)` for anything unrecognized — generalized
//! from Anthropic/OpenAI model families to whatever `AI_MODEL` this service
//! is configured with, and consulted only when no `PricingConfig` row
//! overrides it.

use std::sync::Arc;

use crate::domain::Money;
use crate::repository::PricingRepository;

/// Built-in `(input_price_per_million, output_price_per_million)` in USD,
/// used when no `PricingConfig` row is active for `(provider, model)`.
fn static_model_pricing(model: &str) -> (f64, f64) {
    let name = model.rsplit_once('/').map(|(_, m)| m).unwrap_or(model);
    match name {
        n if n.starts_with("gemini-2.0-flash") => (0.10, 0.40),
        n if n.starts_with("gemini-1.5-pro") => (1.25, 5.0),
        n if n.starts_with("gemini-1.5-flash") => (0.075, 0.30),
        n if n.starts_with("gpt-4o-mini") => (0.15, 0.60),
        n if n.starts_with("gpt-4o") => (2.50, 10.0),
        n if n.starts_with("claude-3-5-sonnet") || n.starts_with("claude-3.5-sonnet") => (3.0, 15.0),
        n if n.starts_with("claude-3-5-haiku") || n.starts_with("claude-3.5-haiku") => (0.80, 4.0),
        _ => (0.0, 0.0),
    }
}

pub struct PricingResolver {
    pricing_repo: Arc<dyn PricingRepository>,
}

impl PricingResolver {
    pub fn new(pricing_repo: Arc<dyn PricingRepository>) -> Self {
        Self { pricing_repo }
    }

    /// Cost in `Money` for `input_tokens`/`output_tokens` against
    /// `(provider, model)`, preferring an active `PricingConfig` row and
    /// falling back to the static table.
    pub async fn cost_for(&self, provider: &str, model: &str, input_tokens: i64, output_tokens: i64) -> Money {
        let (input_price, output_price) = match self
            .pricing_repo
            .get_active(provider, model, chrono::Utc::now())
            .await
        {
            Ok(Some(cfg)) => (
                cfg.input_price_per_million.as_f64(),
                cfg.output_price_per_million.as_f64(),
            ),
            _ => static_model_pricing(model),
        };

        let input_cost = input_tokens as f64 / 1_000_000.0 * input_price;
        let output_cost = output_tokens as f64 / 1_000_000.0 * output_price;
        Money::from_major(input_cost + output_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_model_has_nonzero_pricing() {
        let (input, output) = static_model_pricing("gemini-1.5-flash");
        assert!(input > 0.0);
        assert!(output > 0.0);
    }

    #[test]
    fn unknown_model_is_zero_cost() {
        assert_eq!(static_model_pricing("some-future-model"), (0.0, 0.0));
    }
}
