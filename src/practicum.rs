//! Practicum final-grade calculation, supervisor-report sync and grade edits.
//!
//! Nothing here re-derives a final grade on its own. A component edit stays a
//! component edit until the instructor runs "calculate all" again.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::config::PracticumWeights;
use crate::domain::{CurrentActor, GradeField, PracticumEnrollment};
use crate::error::{require_grader, GradingError, ParseError};
use crate::util::{approx_eq, round_to};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalGradeMode {
  /// logs + report + supervisor
  #[default]
  Sum,
  /// supervisor / report / logs weighted by `PracticumWeights`
  Weighted,
}

/// Final grade from the three components; missing components count as 0.
pub fn calculate_practicum_final(
  actor: &CurrentActor,
  enrollment: &PracticumEnrollment,
  mode: FinalGradeMode,
  weights: &PracticumWeights,
) -> Result<f64, GradingError> {
  require_grader(actor, "calculate practicum grades")?;
  Ok(final_grade(enrollment, mode, weights))
}

pub(crate) fn final_grade(e: &PracticumEnrollment, mode: FinalGradeMode, weights: &PracticumWeights) -> f64 {
  let logs = e.logs_grade.unwrap_or(0.0);
  let report = e.report_grade.unwrap_or(0.0);
  let supervisor = e.supervisor_grade.unwrap_or(0.0);
  match mode {
    FinalGradeMode::Sum => logs + report + supervisor,
    FinalGradeMode::Weighted => round_to(
      supervisor * weights.supervisor_weight + report * weights.report_weight + logs * weights.logs_weight,
      2,
    ),
  }
}

/// A single grade-cell change, carrying the value it replaces so a failed
/// write can be undone exactly.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GradeEdit {
  pub enrollment_id: String,
  pub field: GradeField,
  pub previous: Option<f64>,
  pub value: Option<f64>,
}

impl GradeEdit {
  pub fn capture(enrollment: &PracticumEnrollment, field: GradeField, value: Option<f64>) -> Self {
    Self { enrollment_id: enrollment.id.clone(), field, previous: field.get(enrollment), value }
  }

  pub fn inverse(&self) -> Self {
    Self {
      enrollment_id: self.enrollment_id.clone(),
      field: self.field,
      previous: self.value,
      value: self.previous,
    }
  }

  pub fn is_noop(&self) -> bool {
    match (self.previous, self.value) {
      (Some(a), Some(b)) => approx_eq(a, b),
      (None, None) => true,
      _ => false,
    }
  }

  pub fn apply(&self, enrollment: &mut PracticumEnrollment) {
    self.field.set(enrollment, self.value);
  }
}

pub fn validate_grade_value(value: Option<f64>) -> Result<(), GradingError> {
  match value {
    Some(v) if !v.is_finite() || v < 0.0 => Err(GradingError::Validation(format!("grade {} must be a non-negative number", v))),
    _ => Ok(()),
  }
}

/// "Calculate all": one final-grade edit per enrollment, always overwriting.
#[instrument(level = "info", skip_all, fields(actor = %actor.id, enrollments = enrollments.len(), ?mode))]
pub fn plan_calculate_all(
  actor: &CurrentActor,
  enrollments: &[PracticumEnrollment],
  mode: FinalGradeMode,
  weights: &PracticumWeights,
) -> Result<Vec<GradeEdit>, GradingError> {
  require_grader(actor, "calculate practicum grades")?;
  Ok(
    enrollments
      .iter()
      .map(|e| GradeEdit::capture(e, GradeField::Final, Some(final_grade(e, mode, weights))))
      .collect(),
  )
}

/// Supervisor evaluation as submitted through the supervisor portal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SupervisorReport {
  pub total_score: f64,
  #[serde(default)] pub comments: Option<String>,
  #[serde(default)] pub ratings: Option<serde_json::Map<String, Value>>,
  #[serde(default)] pub submitted_at: Option<String>,
}

impl SupervisorReport {
  /// Schema check at the boundary. Missing or non-numeric totals fail closed.
  pub fn parse(value: &Value) -> Result<Self, ParseError> {
    const WHAT: &str = "supervisor_report";
    let obj = value
      .as_object()
      .ok_or_else(|| ParseError::Shape { what: WHAT, message: "expected an object".into() })?;
    match obj.get("total_score") {
      None | Some(Value::Null) => return Err(ParseError::MissingField { what: WHAT, field: "total_score" }),
      Some(v) if !v.is_number() => {
        return Err(ParseError::Shape { what: WHAT, message: format!("total_score must be a number, got {}", v) })
      }
      _ => {}
    }
    let report: SupervisorReport =
      serde_json::from_value(value.clone()).map_err(|e| ParseError::Json { what: WHAT, message: e.to_string() })?;
    if !report.total_score.is_finite() || report.total_score < 0.0 {
      return Err(ParseError::OutOfRange { what: WHAT, field: "total_score", value: report.total_score });
    }
    Ok(report)
  }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SyncPlan {
  pub edits: Vec<GradeEdit>,
  pub unchanged: usize,
  pub without_report: usize,
  pub invalid: Vec<(String, ParseError)>,
}

/// Copy supervisor totals into `supervisor_grade` where they differ.
/// A zero total means the supervisor has not scored yet and counts as no
/// report. Final grades are left alone.
#[instrument(level = "info", skip_all, fields(actor = %actor.id, enrollments = enrollments.len()))]
pub fn plan_supervisor_sync(actor: &CurrentActor, enrollments: &[PracticumEnrollment]) -> Result<SyncPlan, GradingError> {
  require_grader(actor, "sync supervisor grades")?;

  let mut plan = SyncPlan::default();
  for e in enrollments {
    let Some(raw) = &e.supervisor_report else {
      plan.without_report += 1;
      continue;
    };
    match SupervisorReport::parse(raw) {
      Ok(report) if report.total_score == 0.0 => plan.without_report += 1,
      Ok(report) => {
        let edit = GradeEdit::capture(e, GradeField::Supervisor, Some(report.total_score));
        if edit.is_noop() {
          plan.unchanged += 1;
        } else {
          plan.edits.push(edit);
        }
      }
      Err(err) => {
        debug!(target: "practicum", enrollment = %e.id, error = %err, "Supervisor report rejected");
        plan.invalid.push((e.id.clone(), err));
      }
    }
  }
  Ok(plan)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn enrollment(id: &str, logs: Option<f64>, report: Option<f64>, supervisor: Option<f64>) -> PracticumEnrollment {
    PracticumEnrollment {
      id: id.into(),
      practicum_id: "p1".into(),
      student_id: format!("student-{}", id),
      logs_grade: logs,
      report_grade: report,
      supervisor_grade: supervisor,
      ..Default::default()
    }
  }

  #[test]
  fn sum_mode_adds_components() {
    let actor = CurrentActor::instructor("t");
    let e = enrollment("e1", Some(18.0), Some(27.0), Some(45.0));
    let w = PracticumWeights::default();
    assert_eq!(calculate_practicum_final(&actor, &e, FinalGradeMode::Sum, &w).unwrap(), 90.0);
    // unchanged inputs, same answer
    assert_eq!(calculate_practicum_final(&actor, &e, FinalGradeMode::Sum, &w).unwrap(), 90.0);
  }

  #[test]
  fn missing_components_count_as_zero() {
    let actor = CurrentActor::instructor("t");
    let e = enrollment("e1", None, Some(27.0), None);
    assert_eq!(
      calculate_practicum_final(&actor, &e, FinalGradeMode::Sum, &PracticumWeights::default()).unwrap(),
      27.0
    );
  }

  #[test]
  fn weighted_mode_uses_fifty_thirty_twenty() {
    let actor = CurrentActor::instructor("t");
    let e = enrollment("e1", Some(80.0), Some(70.0), Some(90.0));
    let grade = calculate_practicum_final(&actor, &e, FinalGradeMode::Weighted, &PracticumWeights::default()).unwrap();
    assert_eq!(grade, 82.0);
  }

  #[test]
  fn calculate_all_overwrites_manual_finals() {
    let actor = CurrentActor::instructor("t");
    let mut manual = enrollment("e1", Some(10.0), Some(10.0), Some(10.0));
    manual.final_grade = Some(99.0);
    let edits = plan_calculate_all(&actor, &[manual], FinalGradeMode::Sum, &PracticumWeights::default()).unwrap();
    assert_eq!(edits.len(), 1);
    assert_eq!(edits[0].previous, Some(99.0));
    assert_eq!(edits[0].value, Some(30.0));
  }

  #[test]
  fn grade_edit_inverse_restores_previous() {
    let mut e = enrollment("e1", Some(5.0), None, None);
    let edit = GradeEdit::capture(&e, GradeField::Logs, Some(12.0));
    edit.apply(&mut e);
    assert_eq!(e.logs_grade, Some(12.0));
    edit.inverse().apply(&mut e);
    assert_eq!(e.logs_grade, Some(5.0));
    assert_eq!(edit.inverse().inverse(), edit);
  }

  #[test]
  fn sync_only_plans_changed_supervisor_grades() {
    let actor = CurrentActor::instructor("t");
    let mut same = enrollment("same", None, None, Some(40.0));
    same.supervisor_report = Some(json!({ "total_score": 40 }));
    let mut changed = enrollment("changed", None, None, Some(10.0));
    changed.supervisor_report = Some(json!({ "total_score": 44, "comments": "solid" }));
    changed.final_grade = Some(70.0);
    let none = enrollment("none", None, None, None);
    let mut broken = enrollment("broken", None, None, None);
    broken.supervisor_report = Some(json!({ "total": 44 }));

    let plan = plan_supervisor_sync(&actor, &[same, changed, none, broken]).unwrap();
    assert_eq!(plan.edits.len(), 1);
    assert_eq!(plan.edits[0].enrollment_id, "changed");
    assert_eq!(plan.edits[0].field, GradeField::Supervisor);
    assert_eq!(plan.edits[0].value, Some(44.0));
    assert_eq!(plan.unchanged, 1);
    assert_eq!(plan.without_report, 1);
    assert_eq!(plan.invalid.len(), 1);
    assert!(matches!(plan.invalid[0].1, ParseError::MissingField { field: "total_score", .. }));
  }

  #[test]
  fn zero_supervisor_total_is_not_yet_scored() {
    let mut e = enrollment("e1", None, None, Some(42.0));
    e.supervisor_report = Some(json!({ "total_score": 0 }));
    let plan = plan_supervisor_sync(&CurrentActor::instructor("t"), &[e]).unwrap();
    assert!(plan.edits.is_empty());
    assert_eq!(plan.without_report, 1);
    assert_eq!(plan.unchanged, 0);
  }

  #[test]
  fn supervisor_report_fails_closed() {
    assert!(SupervisorReport::parse(&json!("44")).is_err());
    assert!(SupervisorReport::parse(&json!({ "total_score": "44" })).is_err());
    assert!(SupervisorReport::parse(&json!({ "total_score": -3 })).is_err());
    assert_eq!(SupervisorReport::parse(&json!({ "total_score": 44.5 })).unwrap().total_score, 44.5);
  }

  #[test]
  fn students_cannot_calculate() {
    let e = enrollment("e1", None, None, None);
    assert!(calculate_practicum_final(&CurrentActor::student("s"), &e, FinalGradeMode::Sum, &PracticumWeights::default()).is_err());
  }
}
