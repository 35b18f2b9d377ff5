//! Public request/response structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::detection::DetectionSettings;
use crate::domain::{Assignment, Class, GradeField, PracticumEnrollment, Quiz, QuizQuestion, QuizResponses, Rubric};
use crate::error::ParseError;
use crate::integrity::IntegrityView;
use crate::logic::BatchPolicy;
use crate::practicum::FinalGradeMode;
use crate::rubric::{parse_rubric_value, LevelSelection, RubricScore};

//
// Classes
//

#[derive(Debug, Deserialize)]
pub struct ClassIn {
    pub name: String,
    /// Defaults to the calling instructor.
    #[serde(default)]
    pub instructor_id: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<String>,
    #[serde(default)]
    pub detection: Option<DetectionSettings>,
}

impl ClassIn {
    pub fn into_class(self, id: String, actor_id: &str) -> Class {
        Class {
            id,
            name: self.name,
            instructor_id: self.instructor_id.unwrap_or_else(|| actor_id.to_string()),
            student_ids: self.student_ids,
            detection: self.detection,
        }
    }
}

//
// Assignments & rubrics
//

#[derive(Debug, Deserialize)]
pub struct AssignmentIn {
    pub class_id: String,
    pub title: String,
    #[serde(default)]
    pub short_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub max_points: f64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// Raw rubric JSON; legacy shapes are normalized on the way in.
    #[serde(default)]
    pub rubric: Option<Value>,
}

impl AssignmentIn {
    pub fn into_assignment(self, id: String, now: DateTime<Utc>) -> Result<Assignment, ParseError> {
        let rubric = match &self.rubric {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_rubric_value(v)?),
        };
        Ok(Assignment {
            id,
            class_id: self.class_id,
            title: self.title,
            short_code: self.short_code,
            description: self.description,
            max_points: self.max_points,
            created_at: self.created_at.unwrap_or(now),
            rubric,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct RubricIn {
    pub rubric: Value,
}

#[derive(Serialize)]
pub struct SavedOut {
    pub id: String,
    pub warnings: Vec<String>,
}

#[derive(Serialize)]
pub struct RubricDraftOut {
    pub rubric: Rubric,
    pub possible: f64,
    pub warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ScoreRubricIn {
    pub selections: Vec<LevelSelection>,
    /// Points this rubric is worth in the final grade, if any.
    #[serde(default)]
    pub weight: Option<f64>,
}

#[derive(Serialize)]
pub struct RubricScoreOut {
    #[serde(flatten)]
    pub score: RubricScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub weighted: Option<f64>,
}

//
// Submissions & integrity
//

#[derive(Deserialize)]
pub struct SubmissionIn {
    pub content: String,
    /// Only honored for instructors submitting on a student's behalf.
    #[serde(default)]
    pub student_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct IntegrityQuery {
    #[serde(default)]
    pub view: Option<IntegrityView>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

//
// Quizzes
//

#[derive(Debug, Deserialize)]
pub struct QuizIn {
    #[serde(default)]
    pub assignment_id: Option<String>,
    pub questions: Vec<QuizQuestion>,
    #[serde(default)]
    pub time_limit_minutes: Option<u32>,
}

impl QuizIn {
    pub fn into_quiz(self, id: String) -> Quiz {
        Quiz { id, assignment_id: self.assignment_id, questions: self.questions, time_limit_minutes: self.time_limit_minutes }
    }
}

#[derive(Debug, Deserialize)]
pub struct QuizSubmitIn {
    #[serde(default)]
    pub responses: QuizResponses,
}

//
// Practicum
//

#[derive(Debug, Deserialize)]
pub struct EnrollmentIn {
    pub practicum_id: String,
    pub student_id: String,
    #[serde(default)]
    pub logs_grade: Option<f64>,
    #[serde(default)]
    pub report_grade: Option<f64>,
    #[serde(default)]
    pub supervisor_grade: Option<f64>,
    #[serde(default)]
    pub final_grade: Option<f64>,
    #[serde(default)]
    pub supervisor_report: Option<Value>,
}

impl EnrollmentIn {
    pub fn into_enrollment(self, id: String) -> PracticumEnrollment {
        PracticumEnrollment {
            id,
            practicum_id: self.practicum_id,
            student_id: self.student_id,
            logs_grade: self.logs_grade,
            report_grade: self.report_grade,
            supervisor_grade: self.supervisor_grade,
            final_grade: self.final_grade,
            supervisor_report: self.supervisor_report,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FinalQuery {
    #[serde(default)]
    pub mode: FinalGradeMode,
}

#[derive(Serialize)]
pub struct FinalOut {
    pub enrollment_id: String,
    pub mode: FinalGradeMode,
    pub final_grade: f64,
}

#[derive(Debug, Deserialize)]
pub struct GradeEditIn {
    pub field: GradeField,
    /// `null` clears the cell.
    pub value: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CalculateIn {
    #[serde(default)]
    pub mode: FinalGradeMode,
    #[serde(default)]
    pub policy: BatchPolicy,
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct SyncIn {
    #[serde(default)]
    pub policy: BatchPolicy,
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
    pub detection: bool,
    pub rubric_drafting: bool,
}
