//! Rubric validation and deterministic rubric scoring.
//!
//! Scoring only ever sums level scores the instructor defined and can see.
//! There is no weighting, no model call and no hidden state involved, so the
//! same rubric and selections always produce the same total.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::domain::{CurrentActor, Rubric, RubricCriterion, RubricLevel};
use crate::error::{require_grader, GradingError, ParseError};
use crate::util::{approx_eq, round_to};

/// Chosen performance level for one criterion, identified by its score.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LevelSelection {
  pub criterion: String,
  pub score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RubricScore {
  pub total: f64,
  pub possible: f64,
  /// total / possible * 100, 0 when the rubric has no points.
  pub percentage: f64,
  pub warnings: Vec<String>,
}

/// Hard invariants checked when a rubric is saved.
pub fn validate_rubric(rubric: &Rubric) -> Result<(), GradingError> {
  let mut names = HashSet::new();
  for c in &rubric.criteria {
    let name = c.name.trim();
    if name.is_empty() {
      return Err(GradingError::Validation("criterion name must not be empty".into()));
    }
    if !names.insert(name.to_string()) {
      return Err(GradingError::Validation(format!("duplicate criterion `{}`", name)));
    }
    if !c.point_value.is_finite() || c.point_value < 0.0 {
      return Err(GradingError::Validation(format!("criterion `{}` has negative point value", name)));
    }
    for l in &c.levels {
      if !l.score.is_finite() || l.score < 0.0 || l.score > c.point_value + crate::util::POINT_EPSILON {
        return Err(GradingError::Validation(format!(
          "criterion `{}`: level score {} outside 0..={}",
          name, l.score, c.point_value
        )));
      }
    }
    if !levels_monotonic(&c.levels) {
      return Err(GradingError::Validation(format!("criterion `{}`: level scores are not monotonic", name)));
    }
  }
  Ok(())
}

// Levels may be listed best-first or worst-first, but not mixed.
fn levels_monotonic(levels: &[RubricLevel]) -> bool {
  let non_decreasing = levels.windows(2).all(|w| w[0].score <= w[1].score);
  let non_increasing = levels.windows(2).all(|w| w[0].score >= w[1].score);
  non_decreasing || non_increasing
}

/// Soft invariant: criteria should add up to the assignment maximum.
pub fn total_mismatch_warning(rubric: &Rubric, max_points: f64) -> Option<String> {
  let possible = rubric.possible_points();
  if approx_eq(possible, max_points) {
    None
  } else {
    Some(format!(
      "rubric criteria total {} points but the assignment is worth {}",
      possible, max_points
    ))
  }
}

/// Sum the selected level scores.
///
/// Criteria without a selection contribute 0. A selection naming an unknown
/// criterion, a level the criterion does not define, or the same criterion
/// twice is rejected.
#[instrument(level = "debug", skip(actor, rubric, selections), fields(actor = %actor.id, criteria = rubric.criteria.len(), selections = selections.len()))]
pub fn score_rubric(
  actor: &CurrentActor,
  rubric: &Rubric,
  max_points: f64,
  selections: &[LevelSelection],
) -> Result<RubricScore, GradingError> {
  require_grader(actor, "score rubrics")?;

  let mut seen = HashSet::new();
  let mut total = 0.0;
  for sel in selections {
    let criterion = find_criterion(rubric, &sel.criterion).ok_or_else(|| GradingError::InvalidSelection {
      criterion: sel.criterion.clone(),
      score: sel.score,
    })?;
    if !seen.insert(criterion.name.as_str()) {
      debug!(target: "rubric", criterion = %criterion.name, "Criterion selected more than once");
      return Err(GradingError::InvalidSelection { criterion: criterion.name.clone(), score: sel.score });
    }
    let level = criterion
      .levels
      .iter()
      .find(|l| approx_eq(l.score, sel.score))
      .ok_or_else(|| GradingError::InvalidSelection { criterion: criterion.name.clone(), score: sel.score })?;
    if level.score > criterion.point_value + crate::util::POINT_EPSILON {
      return Err(GradingError::Validation(format!(
        "criterion `{}`: level {} exceeds point value {}",
        criterion.name, level.score, criterion.point_value
      )));
    }
    total += level.score;
  }

  let possible = rubric.possible_points();
  let mut warnings = Vec::new();
  if let Some(w) = total_mismatch_warning(rubric, max_points) {
    warn!(target: "rubric", possible, max_points, "Rubric total does not match assignment max points");
    warnings.push(w);
  }

  let percentage = if possible > 0.0 { round_to(total / possible * 100.0, 2) } else { 0.0 };
  debug!(target: "rubric", total, possible, "Rubric scored");
  Ok(RubricScore { total, possible, percentage, warnings })
}

fn find_criterion<'a>(rubric: &'a Rubric, name: &str) -> Option<&'a RubricCriterion> {
  let name = name.trim();
  rubric.criteria.iter().find(|c| c.name.trim() == name)
}

/// Scale a raw rubric total into the weight it contributes to a final grade,
/// e.g. 45/50 scaled into a 50% component is 45. Rounded to 2 decimals.
pub fn scale_to_weight(raw: f64, possible: f64, weight: f64) -> f64 {
  if possible == 0.0 {
    return 0.0;
  }
  round_to(raw / possible * weight, 2)
}

/// Parse a stored or externally produced rubric blob.
///
/// Accepts a bare criteria array or an object wrapping it in `criteria`.
/// Criterion keys follow either the current names (`name`, `point_value`)
/// or the older ones (`criterion`/`title`, `points`/`max_points`).
pub fn parse_rubric_value(value: &Value) -> Result<Rubric, ParseError> {
  const WHAT: &str = "rubric";
  let items = match value {
    Value::Array(items) => items,
    Value::Object(obj) => match obj.get("criteria") {
      Some(Value::Array(items)) => items,
      _ => return Err(ParseError::MissingField { what: WHAT, field: "criteria" }),
    },
    other => return Err(ParseError::Shape { what: WHAT, message: format!("expected array or object, got {}", kind_of(other)) }),
  };

  let mut criteria = Vec::with_capacity(items.len());
  for item in items {
    let obj = item
      .as_object()
      .ok_or_else(|| ParseError::Shape { what: WHAT, message: "criterion is not an object".into() })?;
    let name = ["name", "criterion", "title"]
      .iter()
      .find_map(|k| obj.get(*k).and_then(Value::as_str))
      .ok_or(ParseError::MissingField { what: WHAT, field: "criterion" })?
      .to_string();
    let point_value = ["point_value", "points", "max_points"]
      .iter()
      .find_map(|k| obj.get(*k).and_then(Value::as_f64))
      .ok_or(ParseError::MissingField { what: WHAT, field: "points" })?;
    let description = obj.get("description").and_then(Value::as_str).map(str::to_string);
    let levels = match obj.get("levels") {
      None | Some(Value::Null) => Vec::new(),
      Some(v) => serde_json::from_value::<Vec<RubricLevel>>(v.clone())
        .map_err(|e| ParseError::Json { what: WHAT, message: e.to_string() })?,
    };
    criteria.push(RubricCriterion { name, point_value, description, levels });
  }
  Ok(Rubric { criteria })
}

fn kind_of(v: &Value) -> &'static str {
  match v {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn level(score: f64) -> RubricLevel {
    RubricLevel { score, description: String::new() }
  }

  fn two_criteria() -> Rubric {
    Rubric {
      criteria: vec![
        RubricCriterion {
          name: "Argument".into(),
          point_value: 50.0,
          description: None,
          levels: vec![level(50.0), level(30.0), level(0.0)],
        },
        RubricCriterion {
          name: "Evidence".into(),
          point_value: 50.0,
          description: None,
          levels: vec![level(50.0), level(25.0), level(0.0)],
        },
      ],
    }
  }

  fn sel(criterion: &str, score: f64) -> LevelSelection {
    LevelSelection { criterion: criterion.into(), score }
  }

  #[test]
  fn scores_selected_levels_without_warnings() {
    let actor = CurrentActor::instructor("t1");
    let out = score_rubric(&actor, &two_criteria(), 100.0, &[sel("Argument", 50.0), sel("Evidence", 25.0)]).unwrap();
    assert_eq!(out.total, 75.0);
    assert_eq!(out.possible, 100.0);
    assert_eq!(out.percentage, 75.0);
    assert!(out.warnings.is_empty());
  }

  #[test]
  fn selection_order_does_not_matter() {
    let actor = CurrentActor::instructor("t1");
    let rubric = two_criteria();
    let a = score_rubric(&actor, &rubric, 100.0, &[sel("Argument", 30.0), sel("Evidence", 50.0)]).unwrap();
    let b = score_rubric(&actor, &rubric, 100.0, &[sel("Evidence", 50.0), sel("Argument", 30.0)]).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.total, 80.0);
  }

  #[test]
  fn unselected_criterion_counts_as_zero() {
    let actor = CurrentActor::instructor("t1");
    let out = score_rubric(&actor, &two_criteria(), 100.0, &[sel("Evidence", 25.0)]).unwrap();
    assert_eq!(out.total, 25.0);
  }

  #[test]
  fn mismatched_max_points_warns_but_scores() {
    let actor = CurrentActor::instructor("t1");
    let out = score_rubric(&actor, &two_criteria(), 120.0, &[sel("Argument", 50.0)]).unwrap();
    assert_eq!(out.total, 50.0);
    assert_eq!(out.warnings.len(), 1);
    assert!(out.warnings[0].contains("120"));
  }

  #[test]
  fn unknown_level_is_rejected() {
    let actor = CurrentActor::instructor("t1");
    let err = score_rubric(&actor, &two_criteria(), 100.0, &[sel("Argument", 40.0)]).unwrap_err();
    assert!(matches!(err, GradingError::InvalidSelection { ref criterion, .. } if criterion == "Argument"));
  }

  #[test]
  fn unknown_criterion_and_duplicates_are_rejected() {
    let actor = CurrentActor::instructor("t1");
    let rubric = two_criteria();
    assert!(matches!(
      score_rubric(&actor, &rubric, 100.0, &[sel("Style", 10.0)]),
      Err(GradingError::InvalidSelection { .. })
    ));
    assert!(matches!(
      score_rubric(&actor, &rubric, 100.0, &[sel("Argument", 50.0), sel("Argument", 30.0)]),
      Err(GradingError::InvalidSelection { score, .. }) if score == 30.0
    ));
  }

  #[test]
  fn students_cannot_score() {
    let err = score_rubric(&CurrentActor::student("s1"), &two_criteria(), 100.0, &[]).unwrap_err();
    assert!(matches!(err, GradingError::Forbidden { .. }));
  }

  #[test]
  fn validate_rejects_level_above_point_value_and_mixed_order() {
    let mut rubric = two_criteria();
    assert!(validate_rubric(&rubric).is_ok());

    rubric.criteria[0].levels.push(level(60.0));
    assert!(validate_rubric(&rubric).is_err());

    let mut mixed = two_criteria();
    mixed.criteria[1].levels = vec![level(25.0), level(50.0), level(0.0)];
    assert!(validate_rubric(&mixed).is_err());
  }

  #[test]
  fn scale_to_weight_matches_examples() {
    assert_eq!(scale_to_weight(45.0, 50.0, 50.0), 45.0);
    assert_eq!(scale_to_weight(10.0, 0.0, 50.0), 0.0);
    assert_eq!(scale_to_weight(1.0, 3.0, 30.0), 10.0);
  }

  #[test]
  fn parses_legacy_rubric_shapes() {
    let legacy = json!({ "criteria": [
      { "title": "Clarity", "max_points": 20, "levels": [{ "score": 20, "description": "clear" }] }
    ]});
    let rubric = parse_rubric_value(&legacy).unwrap();
    assert_eq!(rubric.criteria[0].name, "Clarity");
    assert_eq!(rubric.criteria[0].point_value, 20.0);

    let current = json!([{ "criterion": "Depth", "points": 30, "levels": [] }]);
    assert_eq!(parse_rubric_value(&current).unwrap().possible_points(), 30.0);

    assert!(matches!(parse_rubric_value(&json!("nope")), Err(ParseError::Shape { .. })));
    assert!(matches!(
      parse_rubric_value(&json!([{ "points": 5 }])),
      Err(ParseError::MissingField { field: "criterion", .. })
    ));
  }
}
