//! Loading grading configuration (risk thresholds, practicum weights, detection
//! defaults and rubric-drafting prompts) from TOML.
//!
//! See `GradingConfig` for the expected schema. Every section is optional.

use serde::Deserialize;
use tracing::{error, info};

use crate::detection::DetectionSettings;

#[derive(Clone, Debug, Deserialize, Default)]
pub struct GradingConfig {
  #[serde(default)]
  pub integrity: IntegrityConfig,
  #[serde(default)]
  pub practicum: PracticumWeights,
  #[serde(default)]
  pub detection: DetectionSettings,
  #[serde(default)]
  pub prompts: Prompts,
}

/// The two dashboards historically used different risk cut-offs; both are kept
/// and chosen per view.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct IntegrityConfig {
  pub dashboard_risk_threshold: f64,
  pub insights_risk_threshold: f64,
  pub trend_window: usize,
  pub at_risk_limit: usize,
}

impl Default for IntegrityConfig {
  fn default() -> Self {
    Self { dashboard_risk_threshold: 60.0, insights_risk_threshold: 50.0, trend_window: 5, at_risk_limit: 4 }
  }
}

/// Weights for the weighted practicum formula.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PracticumWeights {
  pub supervisor_weight: f64,
  pub report_weight: f64,
  pub logs_weight: f64,
}

impl Default for PracticumWeights {
  fn default() -> Self {
    Self { supervisor_weight: 0.5, report_weight: 0.3, logs_weight: 0.2 }
  }
}

/// Prompts used when asking the LLM for a rubric draft.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub rubric_system_template: String,
  pub rubric_user: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      rubric_system_template: r#"You are an expert curriculum developer.
TASK: Create a grading rubric for this assignment.

CONTEXT:
- Title: "{title}"
- Instructions/Description: "{description}"
- Max Points: {max_points}

RULES:
1. Total points across all criteria MUST sum to EXACTLY {max_points}.
2. Criteria must be derived STRICTLY from the provided Instructions.
3. Every level score must be between 0 and the criterion points, listed from best to worst.
4. Output strictly valid JSON only. NO markdown blocks.

JSON STRUCTURE:
[
  {
    "criterion": "Name of criterion",
    "points": 20,
    "levels": [
      { "score": 20, "description": "Excellent performance..." },
      { "score": 10, "description": "Needs improvement..." }
    ]
  }
]"#
        .into(),
      rubric_user: "Generate the rubric JSON.".into(),
    }
  }
}

pub fn parse_config(s: &str) -> Result<GradingConfig, toml::de::Error> {
  toml::from_str::<GradingConfig>(s)
}

/// Load `GradingConfig` from GRADING_CONFIG_PATH. On any parsing/IO error, falls back to defaults.
pub fn load_config_from_env() -> GradingConfig {
  let Ok(path) = std::env::var("GRADING_CONFIG_PATH") else {
    info!(target: "grading_backend", "GRADING_CONFIG_PATH not set; using built-in defaults");
    return GradingConfig::default();
  };
  match std::fs::read_to_string(&path) {
    Ok(s) => match parse_config(&s) {
      Ok(cfg) => {
        info!(target: "grading_backend", %path, "Loaded grading config (TOML)");
        cfg
      }
      Err(e) => {
        error!(target: "grading_backend", %path, error = %e, "Failed to parse TOML config; using defaults");
        GradingConfig::default()
      }
    },
    Err(e) => {
      error!(target: "grading_backend", %path, error = %e, "Failed to read TOML config file; using defaults");
      GradingConfig::default()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_config_uses_defaults() {
    let cfg = parse_config("").unwrap();
    assert_eq!(cfg.integrity.dashboard_risk_threshold, 60.0);
    assert_eq!(cfg.integrity.insights_risk_threshold, 50.0);
    assert_eq!(cfg.practicum, PracticumWeights::default());
    assert!(cfg.prompts.rubric_system_template.contains("{max_points}"));
  }

  #[test]
  fn partial_sections_keep_remaining_defaults() {
    let cfg = parse_config(
      r#"
        [integrity]
        insights_risk_threshold = 65.0

        [practicum]
        supervisor_weight = 0.6
        report_weight = 0.2
      "#,
    )
    .unwrap();
    assert_eq!(cfg.integrity.insights_risk_threshold, 65.0);
    assert_eq!(cfg.integrity.trend_window, 5);
    assert_eq!(cfg.practicum.supervisor_weight, 0.6);
    assert_eq!(cfg.practicum.logs_weight, 0.2);
  }
}
