//! Remote AI parser (spec.md §4.3, primary path).
//!
//! A single `reqwest::Client` with a 10s-bounded request carries the
//! prompt to the configured provider's generation endpoint; non-2xx and
//! malformed-JSON responses are surfaced as `Err` so the caller can
//! downgrade to the deterministic fallback. Currently targets the Gemini
//! `generateContent` REST shape, selected via `AiConfig::provider`.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::ai::traits::Usage;
use crate::config::AiConfig;
use crate::domain::{Money, ParsedExpense};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct RemoteAiClient {
    http: reqwest::Client,
    config: AiConfig,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct RawParsedExpense {
    description: String,
    amount: f64,
    suggested_category: Option<String>,
    date: Option<String>,
}

impl RemoteAiClient {
    pub fn new(config: AiConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("building reqwest client");
        Self {
            http,
            config,
            base_url: GEMINI_BASE_URL.to_string(),
        }
    }

    /// Same as [`Self::new`] but targeting a caller-supplied host instead of
    /// the real Gemini API, for pointing at a local mock server in tests.
    #[cfg(test)]
    fn new_with_base_url(config: AiConfig, base_url: String) -> Self {
        let mut client = Self::new(config);
        client.base_url = base_url;
        client
    }

    fn parse_prompt(&self, text: &str) -> String {
        let today = Utc::now().format("%Y-%m-%d");
        format!(
            "Today's date is {today}. Extract every expense mentioned in the following message. \
             Resolve any relative date (e.g. \"yesterday\") against today's date. Respond with a \
             JSON array only, each element shaped as \
             {{\"description\": string, \"amount\": number, \"suggested_category\": string, \"date\": \"YYYY-MM-DD\"}}. \
             Default currency is {}. If no expenses are mentioned, respond with an empty array.\n\nMessage: {text}",
            self.config.home_currency
        )
    }

    /// Issues the remote parse call. `Ok(vec![])` is a valid "no expenses
    /// found" result; `Err` means the caller should fall back.
    pub async fn parse_expense(&self, text: &str, _user_id: &str) -> Result<(Vec<ParsedExpense>, Usage)> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no AI api key configured"))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={api_key}",
            self.base_url, self.config.model
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": self.parse_prompt(text) }] }]
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("sending remote AI parse request")?;

        if !response.status().is_success() {
            bail!("AI provider returned non-2xx status: {}", response.status());
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .context("decoding AI provider response")?;

        let text_out = payload
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.as_str())
            .ok_or_else(|| anyhow!("AI response had no content"))?;

        let json_slice = extract_json_array(text_out).ok_or_else(|| anyhow!("AI response had no JSON array"))?;
        let raw: Vec<RawParsedExpense> =
            serde_json::from_str(json_slice).context("parsing AI JSON expense array")?;

        let expenses = raw
            .into_iter()
            .map(|r| ParsedExpense {
                description: r.description,
                amount: Money::from_major(r.amount),
                suggested_category: r.suggested_category.unwrap_or_else(|| "Other".to_string()),
                date: r.date.and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
            })
            .collect();

        let usage = payload
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok((expenses, usage))
    }

    pub async fn suggest_category(&self, description: &str, _user_id: &str) -> Result<(String, Usage)> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("no AI api key configured"))?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={api_key}",
            self.base_url, self.config.model
        );

        let prompt = format!(
            "Classify this expense description into exactly one of: Food, Transport, Shopping, \
             Entertainment, Other. Respond with only the category word.\n\nDescription: {description}"
        );
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });

        let response = self.http.post(&url).json(&body).send().await?;
        if !response.status().is_success() {
            bail!("AI provider returned non-2xx status: {}", response.status());
        }
        let payload: GenerateContentResponse = response.json().await?;
        let text_out = payload
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.trim().to_string())
            .ok_or_else(|| anyhow!("AI response had no content"))?;

        let usage = payload
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
            })
            .unwrap_or_default();

        Ok((text_out, usage))
    }
}

fn extract_json_array(text: &str) -> Option<&str> {
    let start = text.find('[')?;
    let end = text.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

#[derive(Debug, Deserialize, Serialize)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Candidate {
    content: Content,
}

#[derive(Debug, Deserialize, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize, Serialize)]
struct UsageMetadata {
    #[serde(rename = "promptTokenCount", default)]
    prompt_token_count: i64,
    #[serde(rename = "candidatesTokenCount", default)]
    candidates_token_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_array_finds_bracketed_slice() {
        let text = "Here you go: [{\"a\":1}] thanks";
        assert_eq!(extract_json_array(text), Some("[{\"a\":1}]"));
    }

    #[test]
    fn extract_json_array_returns_none_without_brackets() {
        assert_eq!(extract_json_array("no json here"), None);
    }

    fn test_config() -> AiConfig {
        AiConfig {
            provider: "gemini".to_string(),
            model: "gemini-1.5-flash".to_string(),
            api_key: Some("test-key".to_string()),
            home_currency: "USD".to_string(),
        }
    }

    #[tokio::test]
    async fn parse_expense_decodes_gemini_response() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        let body = serde_json::json!({
            "candidates": [{
                "content": {
                    "parts": [{
                        "text": "[{\"description\":\"lunch\",\"amount\":12.5,\"suggested_category\":\"Food\"}]"
                    }]
                }
            }],
            "usageMetadata": { "promptTokenCount": 10, "candidatesTokenCount": 5 }
        });
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1beta/models/.*:generateContent$"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = RemoteAiClient::new_with_base_url(test_config(), server.uri());
        let (expenses, usage) = client.parse_expense("lunch $12.50", "user-1").await.unwrap();

        assert_eq!(expenses.len(), 1);
        assert_eq!(expenses[0].description, "lunch");
        assert_eq!(expenses[0].amount.cents(), 1250);
        assert_eq!(expenses[0].suggested_category, "Food");
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn parse_expense_errors_on_non_2xx_status() {
        use wiremock::matchers::{method, path_regex};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path_regex(r"^/v1beta/models/.*:generateContent$"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = RemoteAiClient::new_with_base_url(test_config(), server.uri());
        let result = client.parse_expense("lunch $12.50", "user-1").await;

        assert!(result.is_err());
    }
}
