//! Minimal OpenAI client for AI-assisted problem drafting.
//!
//! We only call chat.completions with a strict JSON object response. The model
//! proposes a statement, an equation and its own answer; the engine never
//! trusts that answer and re-derives it with the solver.
//!
//! NOTE: We never log the API key, and prompts/responses are only logged truncated.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::Prompts;
use crate::domain::ProblemConfig;
use crate::util::{fill_template, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

/// What the model hands back for one problem.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct AiProblemDraft {
  pub statement: String,
  pub equation: String,
  /// The model's own answer, a number or `x = value`.
  #[serde(deserialize_with = "text_or_number")]
  pub answer: String,
}

fn text_or_number<'de, D: serde::Deserializer<'de>>(d: D) -> Result<String, D::Error> {
  match serde_json::Value::deserialize(d)? {
    serde_json::Value::String(s) => Ok(s),
    serde_json::Value::Number(n) => Ok(n.to_string()),
    other => Err(serde::de::Error::custom(format!("expected a string or number, got {other}"))),
  }
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok()?;
    let base_url =
      std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
    let model = std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
    Self::new(api_key, base_url, model)
  }

  pub fn new(api_key: impl Into<String>, base_url: impl Into<String>, model: impl Into<String>) -> Option<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(20))
      .build()
      .ok()?;
    Some(Self { client, api_key: api_key.into(), base_url: base_url.into(), model: model.into() })
  }

  /// JSON-object chat completion. Generic over the target type T.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_json<T: for<'a> Deserialize<'a>>(
    &self,
    system: &str,
    user: &str,
    temperature: f32,
  ) -> Result<T, String> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      response_format: Some(ResponseFormat { r#type: "json_object".into() }),
      max_tokens: Some(400),
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "mathgen/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await.map_err(|e| e.to_string())?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or(body);
      return Err(format!("OpenAI HTTP {}: {}", status, msg));
    }

    let body: ChatCompletionResponse = res.json().await.map_err(|e| e.to_string())?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let text = body.choices.first()
      .and_then(|c| c.message.content.clone())
      .unwrap_or_default();

    serde_json::from_str::<T>(&text)
      .map_err(|e| format!("JSON parse error: {} in {}", e, trunc_for_log(&text, 120)))
  }

  /// Ask the model for one problem matching `config`.
  #[instrument(
    level = "info",
    skip(self, prompts, config),
    fields(problem_type = %config.problem_type, difficulty = %config.difficulty, model = %self.model)
  )]
  pub async fn generate_problem(&self, prompts: &Prompts, config: &ProblemConfig) -> Result<AiProblemDraft, String> {
    let pairs = [("problem_type", config.problem_type.as_str()), ("difficulty", config.difficulty.as_str())];
    let system = fill_template(&prompts.problem_system, &pairs);
    let user = fill_template(&prompts.problem_user_template, &pairs);

    let start = std::time::Instant::now();
    let result = self.chat_json::<AiProblemDraft>(&system, &user, 0.9).await;
    let elapsed = start.elapsed();
    match &result {
      Ok(d) => info!(?elapsed, equation = %trunc_for_log(&d.equation, 60), "Model drafted a problem"),
      Err(e) => error!(?elapsed, error = %e, "Model call failed during problem drafting"),
    }
    result
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  response_format: Option<ResponseFormat>,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat { #[serde(rename = "type")] r#type: String }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp { content: Option<String> }
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn drafts_accept_numeric_answers() {
    let d: AiProblemDraft =
      serde_json::from_str(r#"{"statement":"What is 2 + 3?","equation":"2 + 3","answer":5}"#).unwrap();
    assert_eq!(d.answer, "5");
    let d: AiProblemDraft =
      serde_json::from_str(r#"{"statement":"Solve 2x = 6.","equation":"2x = 6","answer":"x = 3"}"#).unwrap();
    assert_eq!(d.answer, "x = 3");
    assert!(serde_json::from_str::<AiProblemDraft>(r#"{"statement":"s","equation":"e","answer":[1]}"#).is_err());
  }

  #[test]
  fn error_bodies_are_unwrapped() {
    assert_eq!(extract_openai_error(r#"{"error":{"message":"quota"}}"#).as_deref(), Some("quota"));
    assert_eq!(extract_openai_error("gateway down"), None);
  }
}
