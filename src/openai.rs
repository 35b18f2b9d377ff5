//! Minimal OpenAI-compatible chat client used to draft rubrics.
//!
//! We only call chat.completions and expect a JSON array of criteria back.
//! Calls are instrumented and log model names, latencies, and response sizes (not contents).
//!
//! NOTE: We never log the API key.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::config::Prompts;
use crate::domain::Rubric;
use crate::error::{ParseError, UpstreamError};
use crate::rubric::parse_rubric_value;
use crate::util::{fill_template, trunc_for_log};

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
}

/// What the drafter needs to know about the assignment.
#[derive(Clone, Debug)]
pub struct RubricDraftRequest<'a> {
  pub title: &'a str,
  pub description: &'a str,
  pub max_points: f64,
}

impl OpenAI {
  /// Construct the client if we find LLM_API_KEY; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let api_key = std::env::var("LLM_API_KEY").ok()?;
    let base_url = std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.publicai.co/v1".into());
    let model = std::env::var("LLM_MODEL").unwrap_or_else(|_| "swiss-ai/apertus-70b-instruct".into());
    Self::new(api_key, base_url, model).ok()
  }

  pub fn new(api_key: String, base_url: String, model: String) -> Result<Self, UpstreamError> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
    Ok(Self { client, api_key, base_url: base_url.trim_end_matches('/').to_string(), model })
  }

  /// Plain chat completion returning the first choice's content.
  #[instrument(level = "info", skip(self, system, user), fields(model = %self.model))]
  async fn chat_plain(&self, system: &str, user: &str, temperature: f32, max_tokens: Option<u32>) -> Result<String, UpstreamError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature,
      max_tokens,
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "schologic-grading/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      let message = extract_api_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(UpstreamError::Status { status, message });
    }

    let body: ChatCompletionResponse = res.json().await?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "LLM usage");
    }
    Ok(body.choices.first().and_then(|c| c.message.content.clone()).unwrap_or_default())
  }

  /// Ask the model for a rubric draft for the given assignment.
  #[instrument(level = "info", skip(self, prompts, req), fields(title_len = req.title.len(), max_points = req.max_points))]
  pub async fn draft_rubric(&self, prompts: &Prompts, req: &RubricDraftRequest<'_>) -> Result<Rubric, UpstreamError> {
    let max_points = format_points(req.max_points);
    let system = fill_template(
      &prompts.rubric_system_template,
      &[("title", req.title), ("description", req.description), ("max_points", &max_points)],
    );

    let start = std::time::Instant::now();
    let content = match self.chat_plain(&system, &prompts.rubric_user, 0.1, Some(2500)).await {
      Ok(c) => c,
      Err(e) => {
        error!(elapsed = ?start.elapsed(), error = %e, "Model call failed during rubric drafting");
        return Err(e);
      }
    };
    info!(elapsed = ?start.elapsed(), content_len = content.len(), "Rubric draft received");

    Ok(extract_rubric(&content)?)
  }
}

fn format_points(p: f64) -> String {
  if p.fract() == 0.0 { format!("{}", p as i64) } else { format!("{}", p) }
}

/// Models like to wrap JSON in markdown fences or chatter around it; keep the
/// outermost `[...]` and parse that.
pub fn extract_rubric(content: &str) -> Result<Rubric, ParseError> {
  const WHAT: &str = "rubric_draft";
  let cleaned = content.replace("```json", "").replace("```", "");
  let cleaned = cleaned.trim();
  let (Some(start), Some(end)) = (cleaned.find('['), cleaned.rfind(']')) else {
    return Err(ParseError::Shape { what: WHAT, message: "no JSON array in model output".into() });
  };
  if end <= start {
    return Err(ParseError::Shape { what: WHAT, message: "no JSON array in model output".into() });
  }
  let value: serde_json::Value =
    serde_json::from_str(&cleaned[start..=end]).map_err(|e| ParseError::Json { what: WHAT, message: e.to_string() })?;
  parse_rubric_value(&value)
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  #[serde(skip_serializing_if = "Option::is_none")]
  max_tokens: Option<u32>,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }

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

/// Try to extract a clean error message from an OpenAI-style error body.
fn extract_api_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  serde_json::from_str::<EWrap>(body).ok().map(|w| w.error.message)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

  #[test]
  fn extracts_array_from_fenced_output() {
    let content = "Here you go:\n```json\n[{\"criterion\": \"Thesis\", \"points\": 40, \"levels\": [{\"score\": 40, \"description\": \"clear\"}, {\"score\": 0, \"description\": \"missing\"}]}]\n```";
    let rubric = extract_rubric(content).unwrap();
    assert_eq!(rubric.criteria.len(), 1);
    assert_eq!(rubric.criteria[0].name, "Thesis");
    assert_eq!(rubric.criteria[0].levels.len(), 2);
  }

  #[test]
  fn rejects_output_without_array() {
    assert!(matches!(extract_rubric("I cannot help with that."), Err(ParseError::Shape { .. })));
    assert!(matches!(extract_rubric("[not json]"), Err(ParseError::Json { .. })));
  }

  #[tokio::test]
  async fn draft_rubric_calls_chat_completions() {
    let server = MockServer::start().await;
    let content = r#"[{"criterion": "Analysis", "points": 60, "levels": [{"score": 60, "description": "deep"}, {"score": 20, "description": "thin"}]},
                      {"criterion": "Writing", "points": 40, "levels": [{"score": 40, "description": "clean"}, {"score": 10, "description": "rough"}]}]"#;
    Mock::given(matchers::method("POST"))
      .and(matchers::path("/v1/chat/completions"))
      .and(matchers::header("authorization", "Bearer llm-key"))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "content": content } }],
        "usage": { "prompt_tokens": 10, "completion_tokens": 20, "total_tokens": 30 }
      })))
      .mount(&server)
      .await;

    let client = OpenAI::new("llm-key".into(), format!("{}/v1", server.uri()), "test-model".into()).unwrap();
    let req = RubricDraftRequest { title: "Climate essay", description: "Argue a position", max_points: 100.0 };
    let rubric = client.draft_rubric(&Prompts::default(), &req).await.unwrap();
    assert_eq!(rubric.possible_points(), 100.0);
    assert_eq!(rubric.criteria[1].name, "Writing");
  }

  #[tokio::test]
  async fn draft_rubric_reports_api_error_message() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
      .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": { "message": "bad key" } })))
      .mount(&server)
      .await;

    let client = OpenAI::new("nope".into(), server.uri(), "m".into()).unwrap();
    let req = RubricDraftRequest { title: "t", description: "", max_points: 10.0 };
    match client.draft_rubric(&Prompts::default(), &req).await {
      Err(UpstreamError::Status { status, message }) => {
        assert_eq!(status, 401);
        assert_eq!(message, "bad key");
      }
      other => panic!("unexpected result: {:?}", other.map(|r| r.criteria.len())),
    }
  }
}
