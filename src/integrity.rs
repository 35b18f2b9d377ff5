//! AI-integrity aggregation across submissions.
//!
//! Per-submission AI scores come from the detection service and are used
//! as-is. This module only aggregates them: a class average, a per-assignment
//! trend over the most recent assignments, a week-over-week movement and an
//! at-risk ranking of students. The instructor dashboard runs the same
//! aggregation over every class they teach, trending per class instead.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::IntegrityConfig;
use crate::domain::{Assignment, Class, CurrentActor, Submission};
use crate::error::{require_grader, GradingError};
use crate::util::{mean, round_to};

/// Which dashboard is asking. Each view has its own configured risk threshold.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IntegrityView {
  Dashboard,
  #[default]
  Insights,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntegrityOptions {
  /// A submission is flagged when its AI score is strictly above this.
  pub risk_threshold: f64,
  pub trend_window: usize,
  pub at_risk_limit: usize,
}

impl IntegrityOptions {
  pub fn for_view(cfg: &IntegrityConfig, view: IntegrityView) -> Self {
    let risk_threshold = match view {
      IntegrityView::Dashboard => cfg.dashboard_risk_threshold,
      IntegrityView::Insights => cfg.insights_risk_threshold,
    };
    Self { risk_threshold, trend_window: cfg.trend_window, at_risk_limit: cfg.at_risk_limit }
  }

  pub fn with_threshold(mut self, threshold: Option<f64>) -> Self {
    if let Some(t) = threshold {
      self.risk_threshold = t;
    }
    self
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrendPoint {
  pub assignment_id: String,
  pub label: String,
  pub full_title: String,
  /// Mean AI score of analyzed submissions; absent when there are none.
  pub average: Option<f64>,
  pub has_data: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AtRiskStudent {
  pub student_id: String,
  pub flagged_count: usize,
  pub max_score: f64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct IntegrityReport {
  /// Mean AI score over every analyzed submission (higher = more AI-like).
  pub class_average: Option<f64>,
  /// 100 - class average, rounded. Absent when nothing has been analyzed.
  pub authenticity: Option<f64>,
  pub analyzed_count: usize,
  pub student_count: usize,
  pub trend: Vec<TrendPoint>,
  /// Previous-week mean minus current-week mean; positive means AI use dropped.
  pub weekly_trend: Option<f64>,
  pub risk_threshold: f64,
  pub at_risk: Vec<AtRiskStudent>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ClassTrendPoint {
  pub class_id: String,
  pub name: String,
  pub average: Option<f64>,
  pub has_data: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DashboardReport {
  pub class_count: usize,
  /// Mean AI score over every analyzed submission in every class.
  pub global_average: Option<f64>,
  pub authenticity: Option<f64>,
  pub analyzed_count: usize,
  /// Distinct students on any roster or with any submission.
  pub student_count: usize,
  pub trend: Vec<ClassTrendPoint>,
  pub weekly_trend: Option<f64>,
  pub risk_threshold: f64,
  pub at_risk: Vec<AtRiskStudent>,
}

#[instrument(level = "info", skip_all, fields(actor = %actor.id, submissions = submissions.len(), assignments = assignments.len(), threshold = options.risk_threshold))]
pub fn aggregate_integrity(
  actor: &CurrentActor,
  submissions: &[Submission],
  assignments: &[Assignment],
  options: &IntegrityOptions,
  now: DateTime<Utc>,
) -> Result<IntegrityReport, GradingError> {
  require_grader(actor, "view integrity analytics")?;

  let analyzed: Vec<&Submission> = submissions.iter().filter(|s| s.ai_score.is_some()).collect();
  let class_average = mean(analyzed.iter().filter_map(|s| s.ai_score));
  let authenticity = class_average.map(|avg| (100.0 - avg).round());

  let student_count = submissions
    .iter()
    .filter_map(|s| s.student_id.as_deref())
    .collect::<HashSet<_>>()
    .len();

  let report = IntegrityReport {
    class_average,
    authenticity,
    analyzed_count: analyzed.len(),
    student_count,
    trend: assignment_trend(&analyzed, assignments, options.trend_window),
    weekly_trend: weekly_trend(&analyzed, now),
    risk_threshold: options.risk_threshold,
    at_risk: at_risk_students(submissions, options.risk_threshold, options.at_risk_limit),
  };
  debug!(target: "integrity", analyzed = report.analyzed_count, at_risk = report.at_risk.len(), "Integrity aggregated");
  Ok(report)
}

/// Cross-class view for an instructor's dashboard. `submissions` may span
/// any of `classes`; ones from other classes are ignored.
#[instrument(level = "info", skip_all, fields(actor = %actor.id, classes = classes.len(), submissions = submissions.len(), threshold = options.risk_threshold))]
pub fn aggregate_dashboard(
  actor: &CurrentActor,
  classes: &[Class],
  submissions: &[Submission],
  options: &IntegrityOptions,
  now: DateTime<Utc>,
) -> Result<DashboardReport, GradingError> {
  require_grader(actor, "view integrity analytics")?;

  let class_ids: HashSet<&str> = classes.iter().map(|c| c.id.as_str()).collect();
  let in_scope: Vec<Submission> = submissions.iter().filter(|s| class_ids.contains(s.class_id.as_str())).cloned().collect();
  let analyzed: Vec<&Submission> = in_scope.iter().filter(|s| s.ai_score.is_some()).collect();
  let global_average = mean(analyzed.iter().filter_map(|s| s.ai_score));

  let mut students: HashSet<&str> = classes.iter().flat_map(|c| c.student_ids.iter().map(String::as_str)).collect();
  students.extend(in_scope.iter().filter_map(|s| s.student_id.as_deref()));

  let trend = classes
    .iter()
    .map(|c| {
      let average = mean(analyzed.iter().filter(|s| s.class_id == c.id).filter_map(|s| s.ai_score));
      ClassTrendPoint { class_id: c.id.clone(), name: c.name.clone(), average, has_data: average.is_some() }
    })
    .collect();

  let report = DashboardReport {
    class_count: classes.len(),
    global_average,
    authenticity: global_average.map(|avg| (100.0 - avg).round()),
    analyzed_count: analyzed.len(),
    student_count: students.len(),
    trend,
    weekly_trend: weekly_trend(&analyzed, now),
    risk_threshold: options.risk_threshold,
    at_risk: at_risk_students(&in_scope, options.risk_threshold, options.at_risk_limit),
  };
  debug!(target: "integrity", classes = report.class_count, analyzed = report.analyzed_count, "Dashboard aggregated");
  Ok(report)
}

/// Mean AI score per assignment for the `window` most recently created assignments.
pub fn assignment_trend(analyzed: &[&Submission], assignments: &[Assignment], window: usize) -> Vec<TrendPoint> {
  let mut ordered: Vec<&Assignment> = assignments.iter().collect();
  ordered.sort_by_key(|a| a.created_at);
  let skip = ordered.len().saturating_sub(window);

  ordered
    .into_iter()
    .skip(skip)
    .map(|a| {
      let average = mean(
        analyzed
          .iter()
          .filter(|s| s.assignment_id.as_deref() == Some(a.id.as_str()))
          .filter_map(|s| s.ai_score),
      );
      TrendPoint {
        assignment_id: a.id.clone(),
        label: a.label(),
        full_title: a.title.clone(),
        average,
        has_data: average.is_some(),
      }
    })
    .collect()
}

/// Week-over-week movement; `None` unless both weeks have analyzed work.
pub fn weekly_trend(analyzed: &[&Submission], now: DateTime<Utc>) -> Option<f64> {
  let one_week_ago = now - Duration::days(7);
  let two_weeks_ago = now - Duration::days(14);

  let previous = mean(
    analyzed
      .iter()
      .filter(|s| s.created_at >= two_weeks_ago && s.created_at < one_week_ago)
      .filter_map(|s| s.ai_score),
  )?;
  let current = mean(
    analyzed
      .iter()
      .filter(|s| s.created_at >= one_week_ago && s.created_at <= now)
      .filter_map(|s| s.ai_score),
  )?;

  Some(round_to(previous - current, 1))
}

/// Students with at least one submission scoring above `threshold`, most
/// flagged first. Ties keep first-seen order.
pub fn at_risk_students(submissions: &[Submission], threshold: f64, limit: usize) -> Vec<AtRiskStudent> {
  let mut order: Vec<String> = Vec::new();
  let mut tally: HashMap<String, (usize, f64)> = HashMap::new();

  for s in submissions {
    let (Some(student), Some(score)) = (s.student_id.as_deref(), s.ai_score) else { continue };
    if score <= threshold {
      continue;
    }
    let entry = tally.entry(student.to_string()).or_insert_with(|| {
      order.push(student.to_string());
      (0, 0.0)
    });
    entry.0 += 1;
    entry.1 = entry.1.max(score);
  }

  let mut ranked: Vec<AtRiskStudent> = order
    .into_iter()
    .filter_map(|id| {
      tally.remove(&id).map(|(flagged_count, max_score)| AtRiskStudent { student_id: id, flagged_count, max_score })
    })
    .collect();
  ranked.sort_by(|a, b| b.flagged_count.cmp(&a.flagged_count));
  ranked.truncate(limit);
  ranked
}
