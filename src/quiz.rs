//! Multiple-choice quiz autograding and the quiz-taking session.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{CurrentActor, Quiz, QuizResponses, QuizSubmission, Role};
use crate::error::{require_grader, GradingError};

pub const MIN_CHOICES: usize = 2;
pub const MAX_CHOICES: usize = 6;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QuizGrade {
  pub score: u64,
  pub max_score: u64,
  /// Question ids with no response, in quiz order.
  pub unanswered: Vec<String>,
  pub warnings: Vec<String>,
}

/// Authoring checks; run before a quiz is stored.
pub fn validate_quiz(actor: &CurrentActor, quiz: &Quiz) -> Result<(), GradingError> {
  require_grader(actor, "author quizzes")?;
  if quiz.questions.is_empty() {
    return Err(GradingError::Validation("quiz has no questions".into()));
  }
  let mut ids = HashSet::new();
  for q in &quiz.questions {
    if !ids.insert(q.id.as_str()) {
      return Err(GradingError::Validation(format!("duplicate question id `{}`", q.id)));
    }
    if !(MIN_CHOICES..=MAX_CHOICES).contains(&q.choices.len()) {
      return Err(GradingError::Validation(format!(
        "question `{}` has {} choices; expected {}..={}",
        q.id,
        q.choices.len(),
        MIN_CHOICES,
        MAX_CHOICES
      )));
    }
    if q.correct_index >= q.choices.len() {
      return Err(GradingError::Validation(format!(
        "question `{}` marks choice {} correct but has {} choices",
        q.id,
        q.correct_index,
        q.choices.len()
      )));
    }
    if q.points < 1 {
      return Err(GradingError::Validation(format!("question `{}` must be worth at least 1 point", q.id)));
    }
  }
  Ok(())
}

/// Sum points of every question answered with exactly the correct index.
///
/// Missing responses score zero like wrong ones. Out-of-range indices and
/// responses to unknown questions also score zero and are reported as warnings.
pub fn grade_quiz(quiz: &Quiz, responses: &QuizResponses) -> QuizGrade {
  let mut score: u64 = 0;
  let mut unanswered = Vec::new();
  let mut warnings = Vec::new();

  for q in &quiz.questions {
    match responses.get(&q.id) {
      None => unanswered.push(q.id.clone()),
      Some(&idx) if idx >= q.choices.len() => {
        warnings.push(format!("question `{}`: choice {} does not exist", q.id, idx));
      }
      Some(&idx) if idx == q.correct_index => score += u64::from(q.points),
      Some(_) => {}
    }
  }

  let known: HashSet<&str> = quiz.questions.iter().map(|q| q.id.as_str()).collect();
  let mut stray: Vec<&String> = responses.keys().filter(|k| !known.contains(k.as_str())).collect();
  stray.sort();
  for id in stray {
    warnings.push(format!("response for unknown question `{}` ignored", id));
  }

  QuizGrade { score, max_score: quiz.total_points(), unanswered, warnings }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuizState {
  Drafting,
  ConfirmingSubmit,
  Submitted,
}

/// Attempts in progress, keyed by (quiz id, student id). Submitted attempts
/// stay so a resumed session shows its grade.
#[derive(Default)]
pub struct QuizAttempts {
  pub sessions: RwLock<HashMap<(String, String), QuizSession>>,
}

/// One student's attempt. Responses stay editable until the submission is
/// committed; a failed save leaves the session waiting for confirmation.
#[derive(Clone, Debug)]
pub struct QuizSession {
  quiz: Quiz,
  student_id: String,
  responses: QuizResponses,
  state: QuizState,
  current: usize,
  grade: Option<QuizGrade>,
}

impl QuizSession {
  pub fn start(actor: &CurrentActor, quiz: Quiz) -> Result<Self, GradingError> {
    if actor.role != Role::Student {
      return Err(GradingError::Forbidden { action: "take quizzes", role: actor.role.as_str() });
    }
    Ok(Self {
      quiz,
      student_id: actor.id.clone(),
      responses: QuizResponses::new(),
      state: QuizState::Drafting,
      current: 0,
      grade: None,
    })
  }

  /// Resume an attempt from responses collected elsewhere (e.g. the client).
  /// Entries are kept as sent; grading reports the invalid ones.
  pub fn restore(actor: &CurrentActor, quiz: Quiz, responses: QuizResponses) -> Result<Self, GradingError> {
    let mut session = Self::start(actor, quiz)?;
    session.responses = responses;
    Ok(session)
  }

  pub fn state(&self) -> QuizState {
    self.state
  }

  pub fn responses(&self) -> &QuizResponses {
    &self.responses
  }

  pub fn grade(&self) -> Option<&QuizGrade> {
    self.grade.as_ref()
  }

  pub fn current_question(&self) -> usize {
    self.current
  }

  /// Free navigation between questions while the attempt is open.
  pub fn go_to(&mut self, index: usize) -> Result<(), GradingError> {
    self.ensure_open("navigate")?;
    if index >= self.quiz.questions.len() {
      return Err(GradingError::Validation(format!("no question at position {}", index)));
    }
    self.current = index;
    Ok(())
  }

  pub fn select(&mut self, question_id: &str, choice: usize) -> Result<(), GradingError> {
    self.ensure_open("change answers")?;
    let q = self
      .quiz
      .questions
      .iter()
      .find(|q| q.id == question_id)
      .ok_or_else(|| GradingError::Validation(format!("unknown question `{}`", question_id)))?;
    if choice >= q.choices.len() {
      return Err(GradingError::Validation(format!("question `{}` has no choice {}", question_id, choice)));
    }
    self.responses.insert(question_id.to_string(), choice);
    Ok(())
  }

  pub fn unanswered_count(&self) -> usize {
    self.quiz.questions.iter().filter(|q| !self.responses.contains_key(&q.id)).count()
  }

  /// Open the confirmation step. Returns how many questions are still
  /// unanswered; submission is not blocked by them.
  pub fn request_submit(&mut self) -> Result<usize, GradingError> {
    match self.state {
      QuizState::Drafting | QuizState::ConfirmingSubmit => {
        self.state = QuizState::ConfirmingSubmit;
        Ok(self.unanswered_count())
      }
      QuizState::Submitted => Err(GradingError::InvalidTransition("quiz already submitted".into())),
    }
  }

  pub fn cancel(&mut self) -> Result<(), GradingError> {
    match self.state {
      QuizState::ConfirmingSubmit => {
        self.state = QuizState::Drafting;
        Ok(())
      }
      other => Err(GradingError::InvalidTransition(format!("cannot cancel from {:?}", other))),
    }
  }

  /// Grade and hand the submission to `persist`. The session only becomes
  /// `Submitted` when `persist` succeeds; there is no automatic retry.
  #[instrument(level = "info", skip_all, fields(quiz = %self.quiz.id, student = %self.student_id))]
  pub async fn commit<F, Fut>(&mut self, now: DateTime<Utc>, persist: F) -> Result<QuizGrade, GradingError>
  where
    F: FnOnce(QuizSubmission) -> Fut,
    Fut: std::future::Future<Output = Result<(), GradingError>>,
  {
    if self.state != QuizState::ConfirmingSubmit {
      return Err(GradingError::InvalidTransition(format!("cannot submit from {:?}", self.state)));
    }
    let grade = grade_quiz(&self.quiz, &self.responses);
    let submission = QuizSubmission {
      quiz_id: self.quiz.id.clone(),
      student_id: self.student_id.clone(),
      responses: self.responses.clone(),
      score: grade.score,
      submitted_at: now,
    };
    persist(submission).await?;
    debug!(target: "quiz", score = grade.score, "Quiz submitted");
    self.state = QuizState::Submitted;
    self.grade = Some(grade.clone());
    Ok(grade)
  }

  fn ensure_open(&self, what: &str) -> Result<(), GradingError> {
    if self.state == QuizState::Submitted {
      Err(GradingError::InvalidTransition(format!("cannot {} after submission", what)))
    } else {
      Ok(())
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::QuizQuestion;
  use crate::error::StoreError;

  fn question(id: &str, correct: usize, points: u32) -> QuizQuestion {
    QuizQuestion {
      id: id.into(),
      prompt: format!("Prompt {}", id),
      choices: vec!["a".into(), "b".into(), "c".into()],
      correct_index: correct,
      points,
    }
  }

  fn quiz() -> Quiz {
    Quiz { id: "quiz1".into(), assignment_id: None, questions: vec![question("q1", 1, 5), question("q2", 2, 10)], time_limit_minutes: None }
  }

  fn responses(pairs: &[(&str, usize)]) -> QuizResponses {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
  }

  #[test]
  fn grades_exact_matches_only() {
    let grade = grade_quiz(&quiz(), &responses(&[("q1", 1), ("q2", 0)]));
    assert_eq!(grade.score, 5);
    assert_eq!(grade.max_score, 15);
    assert!(grade.unanswered.is_empty());
    assert!(grade.warnings.is_empty());
  }

  #[test]
  fn empty_responses_score_zero() {
    let grade = grade_quiz(&quiz(), &QuizResponses::new());
    assert_eq!(grade.score, 0);
    assert_eq!(grade.unanswered, vec!["q1".to_string(), "q2".to_string()]);
  }

  #[test]
  fn invalid_indices_and_unknown_questions_warn() {
    let grade = grade_quiz(&quiz(), &responses(&[("q1", 7), ("q2", 2), ("zz", 0)]));
    assert_eq!(grade.score, 10);
    assert_eq!(grade.warnings.len(), 2);
  }

  #[test]
  fn max_point_questions_sum_without_wrapping() {
    let quiz = Quiz {
      id: "big".into(),
      assignment_id: None,
      questions: vec![question("q1", 0, u32::MAX), question("q2", 1, u32::MAX)],
      time_limit_minutes: None,
    };
    assert!(validate_quiz(&CurrentActor::instructor("t"), &quiz).is_ok());
    let grade = grade_quiz(&quiz, &responses(&[("q1", 0), ("q2", 1)]));
    assert_eq!(grade.max_score, 2 * u64::from(u32::MAX));
    assert_eq!(grade.score, grade.max_score);
  }

  #[test]
  fn validate_checks_choice_bounds() {
    let actor = CurrentActor::instructor("t");
    assert!(validate_quiz(&actor, &quiz()).is_ok());

    let mut too_few = quiz();
    too_few.questions[0].choices.truncate(1);
    too_few.questions[0].correct_index = 0;
    assert!(validate_quiz(&actor, &too_few).is_err());

    let mut too_many = quiz();
    too_many.questions[0].choices = (0..7).map(|i| i.to_string()).collect();
    assert!(validate_quiz(&actor, &too_many).is_err());

    let mut bad_key = quiz();
    bad_key.questions[1].correct_index = 3;
    assert!(validate_quiz(&actor, &bad_key).is_err());

    let mut zero_points = quiz();
    zero_points.questions[0].points = 0;
    assert!(validate_quiz(&actor, &zero_points).is_err());
  }

  #[tokio::test]
  async fn session_walks_draft_confirm_submit() {
    let mut session = QuizSession::start(&CurrentActor::student("s1"), quiz()).unwrap();
    session.select("q1", 1).unwrap();
    session.go_to(1).unwrap();
    assert_eq!(session.request_submit().unwrap(), 1);
    session.cancel().unwrap();
    assert_eq!(session.state(), QuizState::Drafting);

    session.select("q2", 2).unwrap();
    assert_eq!(session.request_submit().unwrap(), 0);
    let grade = session.commit(Utc::now(), |sub| async move {
      assert_eq!(sub.score, 15);
      assert_eq!(sub.student_id, "s1");
      Ok(())
    })
    .await
    .unwrap();
    assert_eq!(grade.score, 15);
    assert_eq!(session.state(), QuizState::Submitted);
    assert!(session.select("q1", 0).is_err());
    assert!(session.request_submit().is_err());
  }

  #[tokio::test]
  async fn failed_persist_stays_in_confirmation() {
    let mut session = QuizSession::start(&CurrentActor::student("s1"), quiz()).unwrap();
    session.request_submit().unwrap();
    let err = session
      .commit(Utc::now(), |_| async { Err(GradingError::Store(StoreError::Unavailable("offline".into()))) })
      .await
      .unwrap_err();
    assert!(matches!(err, GradingError::Store(_)));
    assert_eq!(session.state(), QuizState::ConfirmingSubmit);
    assert!(session.grade().is_none());

    session.commit(Utc::now(), |_| async { Ok(()) }).await.unwrap();
    assert_eq!(session.state(), QuizState::Submitted);
  }

  #[tokio::test]
  async fn commit_requires_confirmation() {
    let mut session = QuizSession::start(&CurrentActor::student("s1"), quiz()).unwrap();
    let err = session.commit(Utc::now(), |_| async { Ok(()) }).await.unwrap_err();
    assert!(matches!(err, GradingError::InvalidTransition(_)));
  }

  #[tokio::test]
  async fn restored_session_grades_raw_responses() {
    let mut session = QuizSession::restore(&CurrentActor::student("s1"), quiz(), responses(&[("q1", 1), ("q2", 9)])).unwrap();
    assert_eq!(session.request_submit().unwrap(), 0);
    let grade = session.commit(Utc::now(), |_| async { Ok(()) }).await.unwrap();
    assert_eq!(grade.score, 5);
    assert_eq!(grade.warnings.len(), 1);
  }

  #[test]
  fn instructors_do_not_take_quizzes() {
    assert!(QuizSession::start(&CurrentActor::instructor("t"), quiz()).is_err());
  }
}
