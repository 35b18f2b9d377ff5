//! Client for the external AI text-classification service.
//!
//! The service returns a 0-100 AI-likelihood and an optional per-segment
//! breakdown. We store both as received; nothing in this crate recomputes
//! the score. Calls log model names, latency and sizes, never the text.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::error::{ParseError, UpstreamError};
use crate::util::trunc_for_log;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
  #[default]
  Paragraph,
  Sentence,
  Document,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMethod {
  Strict,
  #[default]
  Weighted,
  Binary,
}

/// Per-class analysis configuration forwarded to the service.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionSettings {
  pub model: String,
  pub granularity: Granularity,
  pub method: ScoringMethod,
}

impl Default for DetectionSettings {
  fn default() -> Self {
    Self { model: "PirateXX/AI-Content-Detector".into(), granularity: Granularity::Paragraph, method: ScoringMethod::Weighted }
  }
}

/// Outcome of the detection step for one submission.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
  Analyzed,
  /// No detection service is configured.
  Disabled,
  Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionSegment {
  pub text: String,
  /// 0-1 probability for this segment.
  pub prob: f64,
  pub words: u32,
  pub is_flagged: bool,
  #[serde(default)] pub contribution: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DetectionReport {
  pub score: f64,
  #[serde(default)] pub segments: Vec<DetectionSegment>,
  #[serde(default)] pub total_words: u32,
  #[serde(default)] pub overall_reason: Option<String>,
}

impl DetectionReport {
  /// Validate a service response. Accepts `score` or `globalScore` and
  /// camelCase segment keys; the score must lie in 0..=100.
  pub fn parse(value: &Value) -> Result<Self, ParseError> {
    const WHAT: &str = "detection_report";
    let obj = value
      .as_object()
      .ok_or_else(|| ParseError::Shape { what: WHAT, message: "expected an object".into() })?;
    let score = obj
      .get("score")
      .or_else(|| obj.get("globalScore"))
      .and_then(Value::as_f64)
      .ok_or(ParseError::MissingField { what: WHAT, field: "score" })?;
    if !(0.0..=100.0).contains(&score) {
      return Err(ParseError::OutOfRange { what: WHAT, field: "score", value: score });
    }

    let segments = match obj.get("segments") {
      None | Some(Value::Null) => Vec::new(),
      Some(Value::Array(items)) => items.iter().map(parse_segment).collect::<Result<Vec<_>, _>>()?,
      Some(_) => return Err(ParseError::Shape { what: WHAT, message: "segments must be an array".into() }),
    };
    let total_words = word_count(obj.get("total_words").or_else(|| obj.get("totalWords")), WHAT, "total_words")?;
    let overall_reason = obj
      .get("overall_reason")
      .or_else(|| obj.get("overallReason"))
      .and_then(Value::as_str)
      .map(str::to_string);

    Ok(Self { score, segments, total_words, overall_reason })
  }
}

fn parse_segment(v: &Value) -> Result<DetectionSegment, ParseError> {
  const WHAT: &str = "detection_segment";
  let obj = v.as_object().ok_or_else(|| ParseError::Shape { what: WHAT, message: "expected an object".into() })?;
  let prob = obj.get("prob").and_then(Value::as_f64).ok_or(ParseError::MissingField { what: WHAT, field: "prob" })?;
  if !(0.0..=1.0).contains(&prob) {
    return Err(ParseError::OutOfRange { what: WHAT, field: "prob", value: prob });
  }
  Ok(DetectionSegment {
    text: obj.get("text").and_then(Value::as_str).unwrap_or_default().to_string(),
    prob,
    words: word_count(obj.get("words"), WHAT, "words")?,
    is_flagged: obj
      .get("is_flagged")
      .or_else(|| obj.get("isFlagged"))
      .and_then(Value::as_bool)
      .unwrap_or(false),
    contribution: obj.get("contribution").and_then(Value::as_f64).unwrap_or(0.0),
  })
}

/// Absent counts are zero; anything that is not a `u32` fails closed.
fn word_count(v: Option<&Value>, what: &'static str, field: &'static str) -> Result<u32, ParseError> {
  let Some(v) = v.filter(|v| !v.is_null()) else { return Ok(0) };
  if !v.is_number() {
    return Err(ParseError::Shape { what, message: format!("{} must be a number, got {}", field, v) });
  }
  v.as_u64()
    .and_then(|n| u32::try_from(n).ok())
    .ok_or(ParseError::OutOfRange { what, field, value: v.as_f64().unwrap_or(f64::NAN) })
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
  text: &'a str,
  model: &'a str,
  granularity: Granularity,
  method: ScoringMethod,
}

#[derive(Clone)]
pub struct DetectionClient {
  pub client: reqwest::Client,
  pub base_url: String,
  pub api_key: Option<String>,
}

impl DetectionClient {
  /// Construct the client if DETECTION_API_URL is set; otherwise return None.
  pub fn from_env() -> Option<Self> {
    let base_url = std::env::var("DETECTION_API_URL").ok()?;
    let api_key = std::env::var("DETECTION_API_KEY").ok();
    Self::new(base_url, api_key).ok()
  }

  pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, UpstreamError> {
    let client = reqwest::Client::builder().timeout(Duration::from_secs(60)).build()?;
    Ok(Self { client, base_url: base_url.into().trim_end_matches('/').to_string(), api_key })
  }

  #[instrument(level = "info", skip(self, text, settings), fields(text_len = text.len(), model = %settings.model, granularity = ?settings.granularity, method = ?settings.method))]
  pub async fn classify(&self, text: &str, settings: &DetectionSettings) -> Result<DetectionReport, UpstreamError> {
    let url = format!("{}/analyze", self.base_url);
    let body = AnalyzeRequest { text, model: &settings.model, granularity: settings.granularity, method: settings.method };

    let start = std::time::Instant::now();
    let mut req = self
      .client
      .post(&url)
      .header(USER_AGENT, "schologic-grading/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(&body);
    if let Some(key) = &self.api_key {
      req = req.header(AUTHORIZATION, format!("Bearer {}", key));
    }
    let res = req.send().await?;

    if !res.status().is_success() {
      let status = res.status().as_u16();
      let body = res.text().await.unwrap_or_default();
      error!(target: "detection", status, body = %trunc_for_log(&body, 200), "Detection service returned an error");
      return Err(UpstreamError::Status { status, message: trunc_for_log(&body, 200) });
    }

    let value: Value = res.json().await?;
    let report = DetectionReport::parse(&value)?;
    info!(target: "detection", elapsed = ?start.elapsed(), score = report.score, segments = report.segments.len(), "Detection completed");
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

  #[test]
  fn parses_camel_case_service_output() {
    let report = DetectionReport::parse(&json!({
      "globalScore": 72,
      "segments": [{ "text": "para", "prob": 0.8, "words": 10, "isFlagged": true, "contribution": 8.0 }],
      "totalWords": 10,
      "overallReason": "Analysis via PirateXX/AI-Content-Detector (weighted)"
    }))
    .unwrap();
    assert_eq!(report.score, 72.0);
    assert_eq!(report.total_words, 10);
    assert!(report.segments[0].is_flagged);
  }

  #[test]
  fn rejects_out_of_range_scores() {
    assert!(matches!(
      DetectionReport::parse(&json!({ "score": 140 })),
      Err(ParseError::OutOfRange { field: "score", .. })
    ));
    assert!(matches!(DetectionReport::parse(&json!({ "segments": [] })), Err(ParseError::MissingField { .. })));
    assert!(DetectionReport::parse(&json!({ "score": 10, "segments": [{ "prob": 2.0 }] })).is_err());
  }

  #[test]
  fn word_counts_outside_u32_are_rejected() {
    assert!(matches!(
      DetectionReport::parse(&json!({ "score": 10, "totalWords": 4_294_967_296u64 })),
      Err(ParseError::OutOfRange { field: "total_words", .. })
    ));
    assert!(matches!(
      DetectionReport::parse(&json!({ "score": 10, "segments": [{ "prob": 0.5, "words": -3 }] })),
      Err(ParseError::OutOfRange { field: "words", .. })
    ));
    assert!(DetectionReport::parse(&json!({ "score": 10, "total_words": "many" })).is_err());
    assert_eq!(DetectionReport::parse(&json!({ "score": 10 })).unwrap().total_words, 0);
  }

  #[tokio::test]
  async fn classify_posts_text_and_settings() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
      .and(matchers::path("/analyze"))
      .and(matchers::header("authorization", "Bearer det-key"))
      .and(matchers::body_partial_json(json!({ "model": "PirateXX/AI-Content-Detector", "granularity": "paragraph", "method": "weighted" })))
      .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "score": 35, "segments": [], "totalWords": 120 })))
      .mount(&server)
      .await;

    let client = DetectionClient::new(server.uri(), Some("det-key".into())).unwrap();
    let report = client.classify("Some essay text", &DetectionSettings::default()).await.unwrap();
    assert_eq!(report.score, 35.0);
    assert_eq!(report.total_words, 120);
  }

  #[tokio::test]
  async fn classify_surfaces_http_errors() {
    let server = MockServer::start().await;
    Mock::given(matchers::method("POST"))
      .respond_with(ResponseTemplate::new(503).set_body_string("model loading"))
      .mount(&server)
      .await;

    let client = DetectionClient::new(server.uri(), None).unwrap();
    let err = client.classify("text", &DetectionSettings::default()).await.unwrap_err();
    assert!(matches!(err, UpstreamError::Status { status: 503, .. }));
  }
}
