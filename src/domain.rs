//! Domain models used by the backend: actors, rubrics, assignments, submissions,
//! quizzes and practicum enrollments.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::{DetectionReport, DetectionSettings};

/// Who is asking? Passed explicitly to every scoring call.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
  Instructor,
  Student,
  Admin,
}

impl Role {
  pub fn parse(s: &str) -> Option<Self> {
    match s.trim().to_ascii_lowercase().as_str() {
      "instructor" => Some(Role::Instructor),
      "student" => Some(Role::Student),
      "admin" => Some(Role::Admin),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Role::Instructor => "instructor",
      Role::Student => "student",
      Role::Admin => "admin",
    }
  }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentActor {
  pub id: String,
  pub role: Role,
}

impl CurrentActor {
  #[allow(dead_code)]
  pub fn instructor(id: impl Into<String>) -> Self {
    Self { id: id.into(), role: Role::Instructor }
  }

  #[allow(dead_code)]
  pub fn student(id: impl Into<String>) -> Self {
    Self { id: id.into(), role: Role::Student }
  }

  /// Admins may do anything an instructor may.
  pub fn can_grade(&self) -> bool {
    matches!(self.role, Role::Instructor | Role::Admin)
  }
}

/// One performance level of a criterion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RubricLevel {
  pub score: f64,
  #[serde(default)] pub description: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RubricCriterion {
  pub name: String,
  pub point_value: f64,
  #[serde(default)] pub description: Option<String>,
  #[serde(default)] pub levels: Vec<RubricLevel>,
}

/// Ordered criteria owned by an assignment. Replaced wholesale on save/regenerate.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Rubric {
  pub criteria: Vec<RubricCriterion>,
}

impl Rubric {
  pub fn possible_points(&self) -> f64 {
    self.criteria.iter().map(|c| c.point_value).sum()
  }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Assignment {
  pub id: String,
  pub class_id: String,
  pub title: String,
  #[serde(default)] pub short_code: Option<String>,
  #[serde(default)] pub description: Option<String>,
  pub max_points: f64,
  pub created_at: DateTime<Utc>,
  #[serde(default)] pub rubric: Option<Rubric>,
}

impl Assignment {
  /// Short chart label: short code if present, else first three letters uppercased.
  pub fn label(&self) -> String {
    match &self.short_code {
      Some(code) if !code.is_empty() => code.clone(),
      _ => self.title.chars().take(3).collect::<String>().to_uppercase(),
    }
  }
}

/// A class taught by one instructor. The roster feeds dashboard student counts.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Class {
  pub id: String,
  pub name: String,
  pub instructor_id: String,
  #[serde(default)] pub student_ids: Vec<String>,
  /// Overrides the configured detection defaults for this class.
  #[serde(default)] pub detection: Option<DetectionSettings>,
}

/// A student's written submission. Immutable except for `grade`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
  pub id: String,
  #[serde(default)] pub assignment_id: Option<String>,
  pub class_id: String,
  #[serde(default)] pub student_id: Option<String>,
  pub content: String,
  /// AI-likelihood 0-100 from the detection service; `None` until analyzed.
  #[serde(default)] pub ai_score: Option<f64>,
  #[serde(default)] pub report: Option<DetectionReport>,
  #[serde(default)] pub grade: Option<f64>,
  pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuizQuestion {
  pub id: String,
  pub prompt: String,
  pub choices: Vec<String>,
  pub correct_index: usize,
  pub points: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Quiz {
  pub id: String,
  #[serde(default)] pub assignment_id: Option<String>,
  pub questions: Vec<QuizQuestion>,
  #[serde(default)] pub time_limit_minutes: Option<u32>,
}

impl Quiz {
  /// Summed in `u64` so no set of `u32` question values can overflow.
  pub fn total_points(&self) -> u64 {
    self.questions.iter().map(|q| u64::from(q.points)).sum()
  }
}

/// Question id -> selected choice index.
pub type QuizResponses = HashMap<String, usize>;

/// Written once, atomically, at submit time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct QuizSubmission {
  pub quiz_id: String,
  pub student_id: String,
  pub responses: QuizResponses,
  pub score: u64,
  pub submitted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PracticumEnrollment {
  pub id: String,
  pub practicum_id: String,
  pub student_id: String,
  #[serde(default)] pub logs_grade: Option<f64>,
  #[serde(default)] pub report_grade: Option<f64>,
  #[serde(default)] pub supervisor_grade: Option<f64>,
  #[serde(default)] pub final_grade: Option<f64>,
  /// Raw supervisor evaluation as submitted; parsed at the point of use.
  #[serde(default)] pub supervisor_report: Option<serde_json::Value>,
}

/// Grade columns of an enrollment that can be edited independently.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GradeField {
  Logs,
  Report,
  Supervisor,
  Final,
}

impl GradeField {
  pub fn get(&self, e: &PracticumEnrollment) -> Option<f64> {
    match self {
      GradeField::Logs => e.logs_grade,
      GradeField::Report => e.report_grade,
      GradeField::Supervisor => e.supervisor_grade,
      GradeField::Final => e.final_grade,
    }
  }

  pub fn set(&self, e: &mut PracticumEnrollment, value: Option<f64>) {
    match self {
      GradeField::Logs => e.logs_grade = value,
      GradeField::Report => e.report_grade = value,
      GradeField::Supervisor => e.supervisor_grade = value,
      GradeField::Final => e.final_grade = value,
    }
  }
}
