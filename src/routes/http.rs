//! HTTP endpoint handlers. These are thin wrappers that forward to core logic.
//! Each handler is instrumented and logs parameters and basic result info.
//!
//! The caller identifies itself with `x-actor-id` / `x-actor-role` headers;
//! session handling lives in front of this service.

use std::sync::Arc;

use axum::{
  async_trait,
  extract::{FromRequestParts, Path, Query, State},
  http::request::Parts,
  response::IntoResponse,
  Json,
};
use chrono::Utc;
use tracing::{info, instrument};

use crate::domain::{CurrentActor, PracticumEnrollment, Role};
use crate::error::GradingError;
use crate::integrity::{DashboardReport, IntegrityReport, IntegrityView};
use crate::logic::{self, AttemptCommand, AttemptView, BatchReport, SubmissionOutcome, SyncReport};
use crate::protocol::*;
use crate::quiz::QuizGrade;
use crate::rubric::parse_rubric_value;
use crate::state::AppState;

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_ROLE_HEADER: &str = "x-actor-role";

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for CurrentActor {
  type Rejection = GradingError;

  async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
    let header = |name: &str| -> Option<String> {
      let value = parts.headers.get(name)?.to_str().ok()?.trim();
      (!value.is_empty()).then(|| value.to_string())
    };
    let id = header(ACTOR_ID_HEADER).ok_or(GradingError::Unauthenticated)?;
    let role = header(ACTOR_ROLE_HEADER).and_then(|r| Role::parse(&r)).ok_or(GradingError::Unauthenticated)?;
    Ok(CurrentActor { id, role })
  }
}

#[instrument(level = "info", skip(state))]
pub async fn http_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(HealthOut { ok: true, detection: state.detection.is_some(), rubric_drafting: state.drafter.is_some() })
}

// --- Classes ---

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id))]
pub async fn http_put_class(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<ClassIn>,
) -> Result<Json<SavedOut>, GradingError> {
  logic::upsert_class(state.store.as_ref(), &actor, body.into_class(id.clone(), &actor.id)).await?;
  Ok(Json(SavedOut { id, warnings: Vec::new() }))
}

// --- Assignments & rubrics ---

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id))]
pub async fn http_put_assignment(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<AssignmentIn>,
) -> Result<Json<SavedOut>, GradingError> {
  let assignment = body.into_assignment(id.clone(), Utc::now())?;
  let warnings = logic::upsert_assignment(state.store.as_ref(), &actor, assignment).await?;
  info!(target: "rubric", %id, warnings = warnings.len(), "HTTP assignment saved");
  Ok(Json(SavedOut { id, warnings }))
}

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id))]
pub async fn http_put_rubric(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<RubricIn>,
) -> Result<Json<SavedOut>, GradingError> {
  let rubric = parse_rubric_value(&body.rubric)?;
  let warnings = logic::save_rubric(state.store.as_ref(), &actor, &id, rubric).await?;
  info!(target: "rubric", %id, warnings = warnings.len(), "HTTP rubric saved");
  Ok(Json(SavedOut { id, warnings }))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, %id))]
pub async fn http_post_rubric_generate(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
) -> Result<Json<RubricDraftOut>, GradingError> {
  let (rubric, warnings) =
    logic::generate_rubric(state.store.as_ref(), state.drafter.as_ref(), &state.config, &actor, &id).await?;
  let possible = rubric.possible_points();
  Ok(Json(RubricDraftOut { rubric, possible, warnings }))
}

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id, selections = body.selections.len()))]
pub async fn http_post_rubric_score(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<ScoreRubricIn>,
) -> Result<Json<RubricScoreOut>, GradingError> {
  let (score, weighted) =
    logic::score_assignment_rubric(state.store.as_ref(), &actor, &id, &body.selections, body.weight).await?;
  info!(target: "rubric", %id, total = score.total, possible = score.possible, ?weighted, "HTTP rubric scored");
  Ok(Json(RubricScoreOut { score, weighted }))
}

// --- Submissions & integrity ---

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id, content_len = body.content.len()))]
pub async fn http_post_submission(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<SubmissionIn>,
) -> Result<Json<SubmissionOutcome>, GradingError> {
  let outcome = logic::create_submission(
    state.store.as_ref(),
    state.detection.as_ref(),
    &state.config.detection,
    &actor,
    &id,
    body.student_id,
    body.content,
    Utc::now(),
  )
  .await?;
  info!(target: "integrity", %id, detection = ?outcome.detection, warnings = outcome.warnings.len(), "HTTP submission stored");
  Ok(Json(outcome))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, %id, view = ?q.view, threshold = ?q.threshold))]
pub async fn http_get_integrity(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Query(q): Query<IntegrityQuery>,
) -> Result<Json<IntegrityReport>, GradingError> {
  let report = logic::integrity_for_class(
    state.store.as_ref(),
    &state.config,
    &actor,
    &id,
    q.view.unwrap_or_default(),
    q.threshold,
    Utc::now(),
  )
  .await?;
  info!(target: "integrity", class = %id, analyzed = report.analyzed_count, at_risk = report.at_risk.len(), "HTTP integrity served");
  Ok(Json(report))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, view = ?q.view, threshold = ?q.threshold))]
pub async fn http_get_dashboard(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Query(q): Query<IntegrityQuery>,
) -> Result<Json<DashboardReport>, GradingError> {
  let report = logic::integrity_dashboard(
    state.store.as_ref(),
    &state.config,
    &actor,
    q.view.unwrap_or(IntegrityView::Dashboard),
    q.threshold,
    Utc::now(),
  )
  .await?;
  info!(target: "integrity", classes = report.class_count, analyzed = report.analyzed_count, "HTTP dashboard served");
  Ok(Json(report))
}

// --- Quizzes ---

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id, questions = body.questions.len()))]
pub async fn http_put_quiz(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<QuizIn>,
) -> Result<Json<SavedOut>, GradingError> {
  logic::save_quiz(state.store.as_ref(), &actor, body.into_quiz(id.clone())).await?;
  Ok(Json(SavedOut { id, warnings: Vec::new() }))
}

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id, responses = body.responses.len()))]
pub async fn http_post_quiz_submit(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<QuizSubmitIn>,
) -> Result<Json<QuizGrade>, GradingError> {
  let grade = logic::submit_quiz(state.store.as_ref(), &actor, &id, body.responses, Utc::now()).await?;
  info!(target: "quiz", %id, score = grade.score, max_score = grade.max_score, "HTTP quiz submitted");
  Ok(Json(grade))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, %id))]
pub async fn http_post_attempt(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
) -> Result<Json<AttemptView>, GradingError> {
  let view = logic::start_attempt(state.store.as_ref(), &state.attempts, &actor, &id).await?;
  Ok(Json(view))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, %id, ?command))]
pub async fn http_patch_attempt(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(command): Json<AttemptCommand>,
) -> Result<Json<AttemptView>, GradingError> {
  let view = logic::step_attempt(&state.attempts, &actor, &id, command).await?;
  Ok(Json(view))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, %id))]
pub async fn http_post_attempt_submit(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
) -> Result<Json<QuizGrade>, GradingError> {
  let grade = logic::submit_attempt(state.store.as_ref(), &state.attempts, &actor, &id, Utc::now()).await?;
  info!(target: "quiz", %id, score = grade.score, max_score = grade.max_score, "HTTP quiz attempt submitted");
  Ok(Json(grade))
}

// --- Practicum ---

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id))]
pub async fn http_put_enrollment(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<EnrollmentIn>,
) -> Result<Json<SavedOut>, GradingError> {
  logic::upsert_enrollment(state.store.as_ref(), &actor, body.into_enrollment(id.clone())).await?;
  Ok(Json(SavedOut { id, warnings: Vec::new() }))
}

#[instrument(level = "info", skip(state, actor), fields(actor = %actor.id, %id, mode = ?q.mode))]
pub async fn http_get_final(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Query(q): Query<FinalQuery>,
) -> Result<Json<FinalOut>, GradingError> {
  let final_grade =
    logic::final_for_enrollment(state.store.as_ref(), &state.config.practicum, &actor, &id, q.mode).await?;
  Ok(Json(FinalOut { enrollment_id: id, mode: q.mode, final_grade }))
}

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id, field = ?body.field))]
pub async fn http_patch_grade(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<GradeEditIn>,
) -> Result<Json<PracticumEnrollment>, GradingError> {
  let updated = logic::edit_grade(state.store.as_ref(), &actor, &id, body.field, body.value).await?;
  Ok(Json(updated))
}

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id, mode = ?body.mode, policy = ?body.policy, confirm = body.confirm))]
pub async fn http_post_calculate(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  Json(body): Json<CalculateIn>,
) -> Result<Json<BatchReport>, GradingError> {
  let report = logic::calculate_all(
    &state.store,
    &state.config.practicum,
    &actor,
    &id,
    body.mode,
    body.policy,
    body.confirm,
  )
  .await?;
  Ok(Json(report))
}

#[instrument(level = "info", skip(state, actor, body), fields(actor = %actor.id, %id))]
pub async fn http_post_sync_supervisor(
  State(state): State<Arc<AppState>>,
  actor: CurrentActor,
  Path(id): Path<String>,
  body: Option<Json<SyncIn>>,
) -> Result<Json<SyncReport>, GradingError> {
  let policy = body.map(|Json(b)| b.policy).unwrap_or_default();
  let report = logic::sync_supervisor(&state.store, &actor, &id, policy).await?;
  Ok(Json(report))
}
