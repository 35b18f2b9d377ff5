//! Core behaviors shared by the HTTP handlers.
//!
//! This includes:
//!   - Saving assignments and rubrics (with soft warnings) and drafting rubrics
//!   - Scoring a rubric against an assignment
//!   - Classes and their detection settings
//!   - Creating submissions and attaching the detection service's verdict
//!   - Class integrity analytics and the cross-class dashboard
//!   - Quiz authoring, stepwise quiz attempts and one-shot quiz submission
//!   - Practicum grade edits and the bulk "calculate all" / "sync supervisor" runs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{GradingConfig, PracticumWeights};
use crate::detection::{DetectionClient, DetectionSettings, DetectionStatus};
use crate::domain::{
  Assignment, Class, CurrentActor, GradeField, PracticumEnrollment, Quiz, QuizResponses, Role, Rubric, Submission,
};
use crate::error::{require_grader, GradingError, StoreError};
use crate::integrity::{
  aggregate_dashboard, aggregate_integrity, DashboardReport, IntegrityOptions, IntegrityReport, IntegrityView,
};
use crate::openai::{OpenAI, RubricDraftRequest};
use crate::practicum::{
  calculate_practicum_final, plan_calculate_all, plan_supervisor_sync, validate_grade_value, FinalGradeMode, GradeEdit,
};
use crate::quiz::{validate_quiz, QuizAttempts, QuizGrade, QuizSession, QuizState};
use crate::rubric::{scale_to_weight, score_rubric, total_mismatch_warning, validate_rubric, LevelSelection, RubricScore};
use crate::store::GradeStore;

/// What to do with the writes that went through when others in the same
/// bulk run failed.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchPolicy {
  /// Keep them; report the failures.
  #[default]
  BestEffort,
  /// Revert them so the batch leaves no trace.
  AllOrNothing,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BatchFailure {
  pub id: String,
  pub message: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
  pub attempted: usize,
  pub succeeded: usize,
  pub failed: Vec<BatchFailure>,
  pub rolled_back: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SyncReport {
  #[serde(flatten)]
  pub batch: BatchReport,
  pub unchanged: usize,
  pub without_report: usize,
  /// Enrollments whose supervisor report failed validation; not written.
  pub invalid: Vec<BatchFailure>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SubmissionOutcome {
  #[serde(flatten)]
  pub submission: Submission,
  pub detection: DetectionStatus,
  pub warnings: Vec<String>,
}

/// One step of a quiz attempt, as sent by the quiz-taking client.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AttemptCommand {
  Select { question_id: String, choice: usize },
  GoTo { index: usize },
  RequestSubmit,
  Cancel,
}

#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct AttemptView {
  pub quiz_id: String,
  pub state: QuizState,
  pub current_question: usize,
  pub responses: QuizResponses,
  pub unanswered: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub grade: Option<QuizGrade>,
}

// --- Classes ---

/// Create or replace a class. Instructors may only save classes they teach.
#[instrument(level = "info", skip(store, class), fields(actor = %actor.id, id = %class.id))]
pub async fn upsert_class<S: GradeStore>(store: &S, actor: &CurrentActor, class: Class) -> Result<(), GradingError> {
  require_grader(actor, "edit classes")?;
  if class.name.trim().is_empty() {
    return Err(GradingError::Validation("class name must not be empty".into()));
  }
  if actor.role != Role::Admin && class.instructor_id != actor.id {
    return Err(GradingError::Forbidden { action: "edit another instructor's class", role: actor.role.as_str() });
  }
  if let Some(d) = &class.detection {
    if d.model.trim().is_empty() {
      return Err(GradingError::Validation("detection model must not be empty".into()));
    }
  }
  store.put_class(class).await?;
  Ok(())
}

/// The class's own detection settings, or `defaults` when it has none.
pub async fn detection_settings_for<S: GradeStore>(
  store: &S,
  class_id: &str,
  defaults: &DetectionSettings,
) -> Result<DetectionSettings, GradingError> {
  match store.get_class(class_id).await {
    Ok(class) => Ok(class.detection.unwrap_or_else(|| defaults.clone())),
    Err(StoreError::NotFound { .. }) => Ok(defaults.clone()),
    Err(e) => Err(e.into()),
  }
}

// --- Assignments & rubrics ---

/// Create or replace an assignment. A rubric that comes with it is validated
/// the same way `save_rubric` does.
#[instrument(level = "info", skip(store, assignment), fields(actor = %actor.id, id = %assignment.id))]
pub async fn upsert_assignment<S: GradeStore>(
  store: &S,
  actor: &CurrentActor,
  assignment: Assignment,
) -> Result<Vec<String>, GradingError> {
  require_grader(actor, "edit assignments")?;
  if assignment.title.trim().is_empty() {
    return Err(GradingError::Validation("assignment title must not be empty".into()));
  }
  if !assignment.max_points.is_finite() || assignment.max_points < 0.0 {
    return Err(GradingError::Validation(format!("max points {} must be a non-negative number", assignment.max_points)));
  }
  let mut warnings = Vec::new();
  if let Some(rubric) = &assignment.rubric {
    validate_rubric(rubric)?;
    warnings.extend(total_mismatch_warning(rubric, assignment.max_points));
  }
  store.put_assignment(assignment).await?;
  Ok(warnings)
}

/// Replace the assignment's rubric. A total that does not match the
/// assignment's max points is saved anyway and reported as a warning.
#[instrument(level = "info", skip(store, rubric), fields(actor = %actor.id, criteria = rubric.criteria.len()))]
pub async fn save_rubric<S: GradeStore>(
  store: &S,
  actor: &CurrentActor,
  assignment_id: &str,
  rubric: Rubric,
) -> Result<Vec<String>, GradingError> {
  require_grader(actor, "edit rubrics")?;
  validate_rubric(&rubric)?;
  let assignment = store.get_assignment(assignment_id).await?;
  let warnings: Vec<String> = total_mismatch_warning(&rubric, assignment.max_points).into_iter().collect();
  if !warnings.is_empty() {
    warn!(target: "rubric", %assignment_id, possible = rubric.possible_points(), max_points = assignment.max_points, "Saving rubric whose total differs from max points");
  }
  store.put_rubric(assignment_id, rubric).await?;
  Ok(warnings)
}

/// Ask the LLM for a rubric and replace the assignment's rubric with it.
/// The instructor can still edit and re-save it afterwards.
#[instrument(level = "info", skip(store, drafter, cfg), fields(actor = %actor.id))]
pub async fn generate_rubric<S: GradeStore>(
  store: &S,
  drafter: Option<&OpenAI>,
  cfg: &GradingConfig,
  actor: &CurrentActor,
  assignment_id: &str,
) -> Result<(Rubric, Vec<String>), GradingError> {
  require_grader(actor, "generate rubrics")?;
  let drafter = drafter.ok_or(GradingError::Disabled("rubric drafting"))?;
  let assignment = store.get_assignment(assignment_id).await?;
  let req = RubricDraftRequest {
    title: &assignment.title,
    description: assignment.description.as_deref().unwrap_or_default(),
    max_points: assignment.max_points,
  };
  let rubric = drafter.draft_rubric(&cfg.prompts, &req).await?;
  validate_rubric(&rubric)?;
  let warnings = total_mismatch_warning(&rubric, assignment.max_points).into_iter().collect();
  store.put_rubric(assignment_id, rubric.clone()).await?;
  info!(target: "rubric", %assignment_id, criteria = rubric.criteria.len(), "Generated rubric saved");
  Ok((rubric, warnings))
}

/// Score a rubric against the assignment's saved rubric. With a `weight`, the
/// total is also scaled into that many points of a final grade.
#[instrument(level = "info", skip(store, selections), fields(actor = %actor.id, selections = selections.len()))]
pub async fn score_assignment_rubric<S: GradeStore>(
  store: &S,
  actor: &CurrentActor,
  assignment_id: &str,
  selections: &[LevelSelection],
  weight: Option<f64>,
) -> Result<(RubricScore, Option<f64>), GradingError> {
  require_grader(actor, "score rubrics")?;
  let assignment = store.get_assignment(assignment_id).await?;
  let rubric = assignment
    .rubric
    .as_ref()
    .ok_or_else(|| GradingError::Validation(format!("assignment `{}` has no rubric", assignment_id)))?;
  let score = score_rubric(actor, rubric, assignment.max_points, selections)?;
  let weighted = match weight {
    Some(w) if !w.is_finite() || w < 0.0 => {
      return Err(GradingError::Validation(format!("weight {} must be a non-negative number", w)))
    }
    Some(w) => Some(scale_to_weight(score.total, score.possible, w)),
    None => None,
  };
  Ok((score, weighted))
}

// --- Submissions & integrity ---

/// Store a submission, attaching the detection verdict when the service is
/// configured. Classification uses the class's settings, falling back to
/// `defaults`. A failed classification keeps the submission unanalyzed and
/// says so in the outcome; there is no retry.
#[allow(clippy::too_many_arguments)]
#[instrument(level = "info", skip(store, detector, defaults, content), fields(actor = %actor.id, content_len = content.len()))]
pub async fn create_submission<S: GradeStore>(
  store: &S,
  detector: Option<&DetectionClient>,
  defaults: &DetectionSettings,
  actor: &CurrentActor,
  assignment_id: &str,
  student_id: Option<String>,
  content: String,
  now: DateTime<Utc>,
) -> Result<SubmissionOutcome, GradingError> {
  if content.trim().is_empty() {
    return Err(GradingError::Validation("submission content must not be empty".into()));
  }
  let assignment = store.get_assignment(assignment_id).await?;
  // Students always submit as themselves.
  let student_id = if actor.can_grade() { student_id } else { Some(actor.id.clone()) };

  let mut warnings = Vec::new();
  let (report, detection) = match detector {
    Some(client) => {
      let settings = detection_settings_for(store, &assignment.class_id, defaults).await?;
      match client.classify(&content, &settings).await {
        Ok(r) => (Some(r), DetectionStatus::Analyzed),
        Err(e) => {
          error!(target: "detection", %assignment_id, model = %settings.model, error = %e, "Classification failed; storing submission unanalyzed");
          warnings.push(format!("AI detection failed ({}); the submission was saved without an AI score", e));
          (None, DetectionStatus::Failed)
        }
      }
    }
    None => (None, DetectionStatus::Disabled),
  };

  let submission = Submission {
    id: Uuid::new_v4().to_string(),
    assignment_id: Some(assignment.id),
    class_id: assignment.class_id,
    student_id,
    content,
    ai_score: report.as_ref().map(|r| r.score),
    report,
    grade: None,
    created_at: now,
  };
  store.insert_submission(submission.clone()).await?;
  info!(target: "integrity", id = %submission.id, ai_score = ?submission.ai_score, ?detection, "Submission stored");
  Ok(SubmissionOutcome { submission, detection, warnings })
}

fn check_threshold(threshold: Option<f64>) -> Result<(), GradingError> {
  match threshold {
    Some(t) if !(0.0..=100.0).contains(&t) => Err(GradingError::Validation(format!("threshold {} outside 0..=100", t))),
    _ => Ok(()),
  }
}

#[instrument(level = "info", skip(store, cfg), fields(actor = %actor.id))]
pub async fn integrity_for_class<S: GradeStore>(
  store: &S,
  cfg: &GradingConfig,
  actor: &CurrentActor,
  class_id: &str,
  view: IntegrityView,
  threshold: Option<f64>,
  now: DateTime<Utc>,
) -> Result<IntegrityReport, GradingError> {
  require_grader(actor, "view integrity analytics")?;
  check_threshold(threshold)?;
  let submissions = store.list_submissions(class_id).await?;
  let assignments = store.list_assignments(class_id).await?;
  let options = IntegrityOptions::for_view(&cfg.integrity, view).with_threshold(threshold);
  aggregate_integrity(actor, &submissions, &assignments, &options, now)
}

/// Integrity across every class the actor teaches; admins see all classes.
#[instrument(level = "info", skip(store, cfg), fields(actor = %actor.id))]
pub async fn integrity_dashboard<S: GradeStore>(
  store: &S,
  cfg: &GradingConfig,
  actor: &CurrentActor,
  view: IntegrityView,
  threshold: Option<f64>,
  now: DateTime<Utc>,
) -> Result<DashboardReport, GradingError> {
  require_grader(actor, "view integrity analytics")?;
  check_threshold(threshold)?;
  let owner = (actor.role != Role::Admin).then_some(actor.id.as_str());
  let classes = store.list_classes(owner).await?;
  let mut submissions = Vec::new();
  for class in &classes {
    submissions.extend(store.list_submissions(&class.id).await?);
  }
  let options = IntegrityOptions::for_view(&cfg.integrity, view).with_threshold(threshold);
  aggregate_dashboard(actor, &classes, &submissions, &options, now)
}

// --- Quizzes ---

#[instrument(level = "info", skip(store, quiz), fields(actor = %actor.id, id = %quiz.id, questions = quiz.questions.len()))]
pub async fn save_quiz<S: GradeStore>(store: &S, actor: &CurrentActor, quiz: Quiz) -> Result<(), GradingError> {
  validate_quiz(actor, &quiz)?;
  store.put_quiz(quiz).await?;
  Ok(())
}

/// Grade and persist a student's attempt in one step. The stored score is
/// computed exactly once; a second attempt by the same student conflicts.
#[instrument(level = "info", skip(store, responses), fields(actor = %actor.id, responses = responses.len()))]
pub async fn submit_quiz<S: GradeStore>(
  store: &S,
  actor: &CurrentActor,
  quiz_id: &str,
  responses: QuizResponses,
  now: DateTime<Utc>,
) -> Result<QuizGrade, GradingError> {
  let quiz = store.get_quiz(quiz_id).await?;
  let mut session = QuizSession::restore(actor, quiz, responses)?;
  let unanswered = session.request_submit()?;
  if unanswered > 0 {
    info!(target: "quiz", %quiz_id, unanswered, "Submitting with unanswered questions");
  }
  session
    .commit(now, |submission| async move { store.insert_quiz_submission(submission).await.map_err(GradingError::from) })
    .await
}

fn attempt_view(quiz_id: &str, session: &QuizSession) -> AttemptView {
  AttemptView {
    quiz_id: quiz_id.to_string(),
    state: session.state(),
    current_question: session.current_question(),
    responses: session.responses().clone(),
    unanswered: session.unanswered_count(),
    grade: session.grade().cloned(),
  }
}

fn attempt_not_found(quiz_id: &str) -> GradingError {
  GradingError::Store(StoreError::NotFound { kind: "quiz attempt", id: quiz_id.to_string() })
}

/// Open an attempt for the calling student, or resume the one already open.
#[instrument(level = "info", skip(store, attempts), fields(actor = %actor.id))]
pub async fn start_attempt<S: GradeStore>(
  store: &S,
  attempts: &QuizAttempts,
  actor: &CurrentActor,
  quiz_id: &str,
) -> Result<AttemptView, GradingError> {
  let key = (quiz_id.to_string(), actor.id.clone());
  if let Some(session) = attempts.sessions.read().await.get(&key) {
    return Ok(attempt_view(quiz_id, session));
  }
  let session = QuizSession::start(actor, store.get_quiz(quiz_id).await?)?;
  let mut open = attempts.sessions.write().await;
  let session = open.entry(key).or_insert(session);
  Ok(attempt_view(quiz_id, session))
}

#[instrument(level = "info", skip(attempts), fields(actor = %actor.id))]
pub async fn step_attempt(
  attempts: &QuizAttempts,
  actor: &CurrentActor,
  quiz_id: &str,
  command: AttemptCommand,
) -> Result<AttemptView, GradingError> {
  let mut open = attempts.sessions.write().await;
  let session = open.get_mut(&(quiz_id.to_string(), actor.id.clone())).ok_or_else(|| attempt_not_found(quiz_id))?;
  match command {
    AttemptCommand::Select { question_id, choice } => session.select(&question_id, choice)?,
    AttemptCommand::GoTo { index } => session.go_to(index)?,
    AttemptCommand::RequestSubmit => {
      session.request_submit()?;
    }
    AttemptCommand::Cancel => session.cancel()?,
  }
  Ok(attempt_view(quiz_id, session))
}

/// Commit a confirmed attempt. A failed save leaves it awaiting confirmation
/// so the student can submit again.
#[instrument(level = "info", skip(store, attempts), fields(actor = %actor.id))]
pub async fn submit_attempt<S: GradeStore>(
  store: &S,
  attempts: &QuizAttempts,
  actor: &CurrentActor,
  quiz_id: &str,
  now: DateTime<Utc>,
) -> Result<QuizGrade, GradingError> {
  let mut open = attempts.sessions.write().await;
  let session = open.get_mut(&(quiz_id.to_string(), actor.id.clone())).ok_or_else(|| attempt_not_found(quiz_id))?;
  session
    .commit(now, |submission| async move { store.insert_quiz_submission(submission).await.map_err(GradingError::from) })
    .await
}

// --- Practicum ---

#[instrument(level = "info", skip(store, enrollment), fields(actor = %actor.id, id = %enrollment.id))]
pub async fn upsert_enrollment<S: GradeStore>(
  store: &S,
  actor: &CurrentActor,
  enrollment: PracticumEnrollment,
) -> Result<(), GradingError> {
  require_grader(actor, "edit practicum enrollments")?;
  for field in [GradeField::Logs, GradeField::Report, GradeField::Supervisor, GradeField::Final] {
    validate_grade_value(field.get(&enrollment))?;
  }
  store.put_enrollment(enrollment).await?;
  Ok(())
}

pub async fn final_for_enrollment<S: GradeStore>(
  store: &S,
  weights: &PracticumWeights,
  actor: &CurrentActor,
  enrollment_id: &str,
  mode: FinalGradeMode,
) -> Result<f64, GradingError> {
  require_grader(actor, "calculate practicum grades")?;
  let enrollment = store.get_enrollment(enrollment_id).await?;
  calculate_practicum_final(actor, &enrollment, mode, weights)
}

/// Write one grade cell. Editing a component never touches the final grade.
#[instrument(level = "info", skip(store), fields(actor = %actor.id))]
pub async fn edit_grade<S: GradeStore>(
  store: &S,
  actor: &CurrentActor,
  enrollment_id: &str,
  field: GradeField,
  value: Option<f64>,
) -> Result<PracticumEnrollment, GradingError> {
  require_grader(actor, "edit grades")?;
  validate_grade_value(value)?;
  let current = store.get_enrollment(enrollment_id).await?;
  let edit = GradeEdit::capture(&current, field, value);
  match store.apply_grade_edit(&edit).await {
    Ok(updated) => Ok(updated),
    Err(e) => {
      // The row is unchanged; the caller shows `previous` again.
      error!(target: "practicum", %enrollment_id, ?field, previous = ?edit.previous, error = %e, "Grade edit failed");
      Err(e.into())
    }
  }
}

/// Recompute and overwrite every final grade of a practicum. Overwrites manual
/// finals, so the caller must confirm explicitly.
#[instrument(level = "info", skip(store, weights), fields(actor = %actor.id))]
pub async fn calculate_all<S: GradeStore + 'static>(
  store: &Arc<S>,
  weights: &PracticumWeights,
  actor: &CurrentActor,
  practicum_id: &str,
  mode: FinalGradeMode,
  policy: BatchPolicy,
  confirm: bool,
) -> Result<BatchReport, GradingError> {
  require_grader(actor, "calculate practicum grades")?;
  if !confirm {
    return Err(GradingError::Validation("calculating all final grades overwrites manual entries; set confirm=true".into()));
  }
  let enrollments = store.list_enrollments(practicum_id).await?;
  let edits = plan_calculate_all(actor, &enrollments, mode, weights)?;
  let report = run_batch(store, edits, policy).await;
  info!(target: "practicum", %practicum_id, succeeded = report.succeeded, failed = report.failed.len(), rolled_back = report.rolled_back, "Calculate all finished");
  Ok(report)
}

/// Copy supervisor-report totals into the supervisor grade where they changed.
#[instrument(level = "info", skip(store), fields(actor = %actor.id))]
pub async fn sync_supervisor<S: GradeStore + 'static>(
  store: &Arc<S>,
  actor: &CurrentActor,
  practicum_id: &str,
  policy: BatchPolicy,
) -> Result<SyncReport, GradingError> {
  let enrollments = store.list_enrollments(practicum_id).await?;
  let plan = plan_supervisor_sync(actor, &enrollments)?;
  let batch = run_batch(store, plan.edits, policy).await;
  info!(target: "practicum", %practicum_id, updated = batch.succeeded, unchanged = plan.unchanged, invalid = plan.invalid.len(), "Supervisor sync finished");
  Ok(SyncReport {
    batch,
    unchanged: plan.unchanged,
    without_report: plan.without_report,
    invalid: plan.invalid.into_iter().map(|(id, e)| BatchFailure { id, message: e.to_string() }).collect(),
  })
}

/// Fire one write per edit concurrently and wait for all of them.
async fn apply_concurrently<S: GradeStore + 'static>(
  store: &Arc<S>,
  edits: Vec<GradeEdit>,
) -> Vec<(GradeEdit, Result<(), String>)> {
  let mut set = JoinSet::new();
  for edit in edits {
    let store = Arc::clone(store);
    set.spawn(async move {
      let res = store.apply_grade_edit(&edit).await.map(|_| ()).map_err(|e: StoreError| e.to_string());
      (edit, res)
    });
  }

  let mut out = Vec::new();
  while let Some(joined) = set.join_next().await {
    match joined {
      Ok(pair) => out.push(pair),
      Err(e) => error!(target: "practicum", error = %e, "Grade write task did not complete"),
    }
  }
  out
}

async fn run_batch<S: GradeStore + 'static>(store: &Arc<S>, edits: Vec<GradeEdit>, policy: BatchPolicy) -> BatchReport {
  let attempted = edits.len();
  let results = apply_concurrently(store, edits).await;

  let mut applied = Vec::new();
  let mut failed = Vec::new();
  for (edit, res) in results {
    match res {
      Ok(()) => applied.push(edit),
      Err(message) => failed.push(BatchFailure { id: edit.enrollment_id, message }),
    }
  }
  // Tasks that never reported back count as failed too.
  let lost = attempted - applied.len() - failed.len();
  for _ in 0..lost {
    failed.push(BatchFailure { id: "unknown".into(), message: "write task aborted".into() });
  }
  failed.sort_by(|a, b| a.id.cmp(&b.id));

  let mut report = BatchReport { attempted, succeeded: applied.len(), failed, rolled_back: false };
  if policy == BatchPolicy::AllOrNothing && !report.failed.is_empty() && !applied.is_empty() {
    let inverses: Vec<GradeEdit> = applied.iter().map(GradeEdit::inverse).collect();
    let reverted = apply_concurrently(store, inverses).await;
    let revert_failures: Vec<&String> = reverted.iter().filter_map(|(e, r)| r.as_ref().err().map(|_| &e.enrollment_id)).collect();
    if revert_failures.is_empty() && reverted.len() == applied.len() {
      report.rolled_back = true;
      report.succeeded = 0;
    } else {
      error!(target: "practicum", failures = ?revert_failures, "Rollback incomplete; some writes remain applied");
    }
  }
  report
}
