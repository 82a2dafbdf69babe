//! AI service contract (spec.md §4.3).

use async_trait::async_trait;

use crate::domain::ParsedExpense;

#[async_trait]
pub trait AiService: Send + Sync {
    /// Zero or more expenses extracted from free-form `text`.
    async fn parse_expense(&self, text: &str, user_id: &str) -> ParseOutcome;

    /// A category name from the standard taxonomy, or a name the caller may
    /// promote to a user-defined category.
    async fn suggest_category(&self, description: &str, user_id: &str) -> SuggestOutcome;
}

/// Result of a parse attempt plus the token accounting needed for the cost
/// log, regardless of whether the remote call or the fallback produced it.
#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub expenses: Vec<ParsedExpense>,
    pub usage: Usage,
    pub used_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct SuggestOutcome {
    pub category: String,
    pub usage: Usage,
    pub used_fallback: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl Usage {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }
}
