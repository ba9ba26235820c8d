//! AI signal review through an OpenAI-compatible chat completions API
//!
//! Advisory only: the caller decides how a verdict or a failure affects
//! confidence. The validator never blocks signal generation.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AiValidator, Validation};
use crate::models::{MarketSnapshot, Signal};
use crate::{Error, Result};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 300;

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Debug, Deserialize)]
struct MessageContent {
    content: String,
}

pub struct OpenAiValidator {
    api_key: String,
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OpenAiValidator {
    pub fn new(api_key: String, model: Option<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            url: OPENAI_API_URL.to_string(),
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.url = url.to_string();
        self
    }

    /// Compact description of the snapshot and the candidate signal
    fn create_prompt(&self, snapshot: &MarketSnapshot, signal: &Signal) -> String {
        let ind = &snapshot.indicators;
        let fmt = |v: Option<f64>| v.map(|x| format!("{:.5}", x)).unwrap_or_else(|| "n/a".to_string());

        let votes: Vec<String> = signal
            .votes
            .iter()
            .map(|v| format!("{}={:?}({:.2})", v.strategy, v.direction, v.strength))
            .collect();

        format!(
            "Symbol: {} ({})\n\
             Last close: {}\n\
             RSI: {}\n\
             MACD histogram: {}\n\
             ATR: {}\n\
             EMA fast/slow: {} / {}\n\
             Bollinger upper/lower: {} / {}\n\
             Relative volume: {}\n\
             Candidate: {:?} strength {:.1} confidence {:.1}\n\
             Strategy votes: {}\n\n\
             Reply with JSON only: {{\"validated\": bool, \"confidence\": 0-100, \"comment\": string}}",
            snapshot.symbol,
            snapshot.timeframe,
            fmt(ind.close),
            fmt(ind.rsi),
            fmt(ind.macd.map(|m| m.histogram)),
            fmt(ind.atr),
            fmt(ind.ema_fast),
            fmt(ind.ema_slow),
            fmt(ind.bollinger.map(|b| b.upper)),
            fmt(ind.bollinger.map(|b| b.lower)),
            fmt(ind.relative_volume),
            signal.direction,
            signal.strength,
            signal.confidence,
            votes.join(", ")
        )
    }
}

#[async_trait]
impl AiValidator for OpenAiValidator {
    async fn validate(&self, snapshot: &MarketSnapshot, signal: &Signal) -> Result<Validation> {
        let request = OpenAIRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            temperature: 0.0, // Deterministic responses
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You review technical trading signals. Always respond with valid JSON only, no markdown formatting.".to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: self.create_prompt(snapshot, signal),
                },
            ],
        };

        let response = self
            .client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", &self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Validation(format!("API error {}: {}", status, body)));
        }

        let openai_response: OpenAIResponse = response.json().await?;
        let mut text = openai_response
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| Error::Validation("empty completion".to_string()))?;

        // Strip markdown code blocks (```json ... ``` or ``` ... ```)
        if text.starts_with("```") {
            text = text
                .trim_start_matches("```json")
                .trim_start_matches("```")
                .trim_end_matches("```")
                .trim()
                .to_string();
        }

        let mut validation: Validation = serde_json::from_str(&text)
            .map_err(|e| Error::Validation(format!("JSON parse error: {} (text: {})", e, text)))?;
        validation.confidence = validation.confidence.clamp(0.0, 100.0);

        Ok(validation)
    }
}
