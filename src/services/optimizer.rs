//! Optional language-model cleanup of merged product records.
//!
//! The optimizer fails open: any error, timeout or malformed reply leaves the
//! merged record untouched and the scan proceeds.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use garde::Validate;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OptimizerSettings;
use crate::models::product::{LookupResult, OptimizedProduct};

const WORKERS_AI_BASE_URL: &str = "https://api.cloudflare.com/client/v4/accounts";

/// Text-completion capability used by the optimizer.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OptimizeError>;
}

/// Client for Cloudflare Workers AI text generation models.
pub struct WorkersAiClient {
    http: Client,
    account_id: String,
    api_token: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    success: bool,
    result: Option<ChatResult>,
}

#[derive(Deserialize)]
struct ChatResult {
    response: Option<String>,
}

impl WorkersAiClient {
    pub fn new(account_id: String, api_token: String, model: String) -> Self {
        Self {
            http: Client::new(),
            account_id,
            api_token,
            model,
        }
    }
}

#[async_trait]
impl LanguageModel for WorkersAiClient {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String, OptimizeError> {
        let url = format!(
            "{}/{}/ai/run/{}",
            WORKERS_AI_BASE_URL, self.account_id, self.model
        );

        let request_body = ChatRequest {
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            max_tokens: 512,
            temperature: 0.2,
        };

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await?
            .error_for_status()?;

        let chat: ChatResponse = response.json().await?;
        if !chat.success {
            return Err(OptimizeError::Malformed("model call unsuccessful".into()));
        }
        chat.result
            .and_then(|r| r.response)
            .ok_or_else(|| OptimizeError::Malformed("empty model response".into()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Optimization timed out")]
    Timeout,

    #[error("Malformed model response: {0}")]
    Malformed(String),

    #[error("Failed to parse model response as product fields: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Model response failed validation: {0}")]
    Invalid(#[from] garde::Report),
}

impl OptimizeError {
    fn label(&self) -> &'static str {
        match self {
            OptimizeError::Http(_) => "http_error",
            OptimizeError::Timeout => "timeout",
            OptimizeError::Malformed(_) | OptimizeError::Parse(_) | OptimizeError::Invalid(_) => {
                "malformed"
            }
        }
    }
}

const SYSTEM_PROMPT: &str = concat!(
    "You normalize grocery and household product records for an inventory system. ",
    "Reply with ONLY a JSON object with the fields title, description, brand, category."
);

/// Fail-open wrapper around a [`LanguageModel`].
#[derive(Clone)]
pub struct Optimizer {
    model: Option<Arc<dyn LanguageModel>>,
}

impl Optimizer {
    pub fn new(model: Option<Arc<dyn LanguageModel>>) -> Self {
        Self { model }
    }

    pub fn disabled() -> Self {
        Self { model: None }
    }

    /// Ask the model for a cleaned record. `None` means keep the merged record.
    pub async fn optimize(
        &self,
        merged: &LookupResult,
        settings: &OptimizerSettings,
    ) -> Option<OptimizedProduct> {
        if !settings.enabled {
            return None;
        }
        let Some(model) = &self.model else {
            debug!("Optimizer enabled but no language model configured");
            return None;
        };

        match try_optimize(model.as_ref(), merged, settings.timeout()).await {
            Ok(optimized) => {
                metrics::counter!("optimizer_outcomes_total", "outcome" => "optimized")
                    .increment(1);
                debug!(barcode = %merged.barcode, title = %optimized.title, "Product record optimized");
                Some(optimized)
            }
            Err(e) => {
                metrics::counter!("optimizer_outcomes_total", "outcome" => e.label()).increment(1);
                warn!(
                    barcode = %merged.barcode,
                    error = %e,
                    "Optimization failed, keeping merged record"
                );
                None
            }
        }
    }
}

async fn try_optimize(
    model: &dyn LanguageModel,
    merged: &LookupResult,
    timeout: Duration,
) -> Result<OptimizedProduct, OptimizeError> {
    let prompt = build_prompt(merged);
    let reply = tokio::time::timeout(timeout, model.complete(SYSTEM_PROMPT, &prompt))
        .await
        .map_err(|_| OptimizeError::Timeout)??;
    parse_reply(&reply)
}

/// Structured prompt describing the merged candidate.
pub fn build_prompt(merged: &LookupResult) -> String {
    let field = |v: &Option<String>| v.clone().unwrap_or_default();
    let candidate = serde_json::json!({
        "barcode": merged.barcode,
        "name": field(&merged.name),
        "brand": field(&merged.brand),
        "category": field(&merged.category),
        "description": field(&merged.description),
    });
    format!(
        concat!(
            "Clean up this product record.\n",
            "- title: standard title casing, prefixed with the brand when the brand is not already in it, ",
            "keep size/quantity (e.g. 500 g, 1.5 L, 6 x 330 ml).\n",
            "- description: one short sentence.\n",
            "- brand: the brand name only.\n",
            "- category: a short generic grocery category.\n",
            "Record:\n{}"
        ),
        candidate
    )
}

/// Extract the first balanced JSON object from a model reply and validate it.
pub fn parse_reply(reply: &str) -> Result<OptimizedProduct, OptimizeError> {
    let json = extract_json_object(reply)
        .ok_or_else(|| OptimizeError::Malformed("no JSON object in reply".into()))?;
    let mut product: OptimizedProduct = serde_json::from_str(json)?;

    product.title = product.title.trim().to_string();
    for field in [
        &mut product.description,
        &mut product.brand,
        &mut product.category,
    ] {
        *field = crate::models::product::non_empty(field.take());
    }

    product.validate()?;
    Ok(product)
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let product = parse_reply(
            r#"{"title":"Ferrero Nutella 400 g","description":"Hazelnut cocoa spread.","brand":"Ferrero","category":"Spreads"}"#,
        )
        .unwrap();
        assert_eq!(product.title, "Ferrero Nutella 400 g");
        assert_eq!(product.brand.as_deref(), Some("Ferrero"));
    }

    #[test]
    fn test_parse_fenced_json_with_prose() {
        let reply = "Sure! Here is the record:\n```json\n{\"title\": \"Heinz Tomato Ketchup {Classic} 500 ml\", \"brand\": \"Heinz\", \"category\": \"Condiments\", \"description\": \"\"}\n```\nLet me know.";
        let product = parse_reply(reply).unwrap();
        assert_eq!(product.title, "Heinz Tomato Ketchup {Classic} 500 ml");
        assert_eq!(product.description, None);
    }

    #[test]
    fn test_rejects_reply_without_object() {
        assert!(matches!(
            parse_reply("I cannot help with that."),
            Err(OptimizeError::Malformed(_))
        ));
    }

    #[test]
    fn test_rejects_empty_title() {
        assert!(matches!(
            parse_reply(r#"{"title": "   ", "brand": "X"}"#),
            Err(OptimizeError::Invalid(_))
        ));
    }

    #[test]
    fn test_rejects_truncated_object() {
        assert!(parse_reply(r#"{"title": "Cut off"#).is_err());
    }
}
