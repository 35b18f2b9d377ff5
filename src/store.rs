//! Data-store collaborator.
//!
//! `GradeStore` is the seam to the hosted database: per-row reads and writes,
//! each its own atomic unit. `InMemoryStore` keeps everything in `RwLock`ed
//! maps and is what the binary runs with.

use std::collections::HashMap;
use std::future::Future;

use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{Assignment, Class, PracticumEnrollment, Quiz, QuizSubmission, Rubric, Submission};
use crate::error::StoreError;
use crate::practicum::GradeEdit;

pub trait GradeStore: Send + Sync {
  fn put_class(&self, class: Class) -> impl Future<Output = Result<(), StoreError>> + Send;
  fn get_class(&self, id: &str) -> impl Future<Output = Result<Class, StoreError>> + Send;
  /// Classes taught by `instructor_id`, or every class when `None`. Ordered by id.
  fn list_classes(&self, instructor_id: Option<&str>) -> impl Future<Output = Result<Vec<Class>, StoreError>> + Send;

  fn put_assignment(&self, assignment: Assignment) -> impl Future<Output = Result<(), StoreError>> + Send;
  fn get_assignment(&self, id: &str) -> impl Future<Output = Result<Assignment, StoreError>> + Send;
  /// Assignments of a class, oldest first.
  fn list_assignments(&self, class_id: &str) -> impl Future<Output = Result<Vec<Assignment>, StoreError>> + Send;
  /// Replace an assignment's rubric wholesale.
  fn put_rubric(&self, assignment_id: &str, rubric: Rubric) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn insert_submission(&self, submission: Submission) -> impl Future<Output = Result<(), StoreError>> + Send;
  /// Submissions of a class, oldest first.
  fn list_submissions(&self, class_id: &str) -> impl Future<Output = Result<Vec<Submission>, StoreError>> + Send;

  fn put_quiz(&self, quiz: Quiz) -> impl Future<Output = Result<(), StoreError>> + Send;
  fn get_quiz(&self, id: &str) -> impl Future<Output = Result<Quiz, StoreError>> + Send;
  /// One submission per (quiz, student); a second one is a `Conflict`.
  fn insert_quiz_submission(&self, submission: QuizSubmission) -> impl Future<Output = Result<(), StoreError>> + Send;

  fn put_enrollment(&self, enrollment: PracticumEnrollment) -> impl Future<Output = Result<(), StoreError>> + Send;
  fn get_enrollment(&self, id: &str) -> impl Future<Output = Result<PracticumEnrollment, StoreError>> + Send;
  fn list_enrollments(&self, practicum_id: &str) -> impl Future<Output = Result<Vec<PracticumEnrollment>, StoreError>> + Send;
  /// Write a single grade cell and return the updated row.
  fn apply_grade_edit(&self, edit: &GradeEdit) -> impl Future<Output = Result<PracticumEnrollment, StoreError>> + Send;
}

#[derive(Default)]
pub struct InMemoryStore {
  classes: RwLock<HashMap<String, Class>>,
  assignments: RwLock<HashMap<String, Assignment>>,
  submissions: RwLock<HashMap<String, Submission>>,
  quizzes: RwLock<HashMap<String, Quiz>>,
  quiz_submissions: RwLock<HashMap<(String, String), QuizSubmission>>,
  enrollments: RwLock<HashMap<String, PracticumEnrollment>>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl GradeStore for InMemoryStore {
  async fn put_class(&self, class: Class) -> Result<(), StoreError> {
    self.classes.write().await.insert(class.id.clone(), class);
    Ok(())
  }

  async fn get_class(&self, id: &str) -> Result<Class, StoreError> {
    self
      .classes
      .read()
      .await
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound { kind: "class", id: id.to_string() })
  }

  async fn list_classes(&self, instructor_id: Option<&str>) -> Result<Vec<Class>, StoreError> {
    let mut out: Vec<Class> = self
      .classes
      .read()
      .await
      .values()
      .filter(|c| instructor_id.map_or(true, |owner| c.instructor_id == owner))
      .cloned()
      .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(out)
  }

  #[instrument(level = "debug", skip(self, assignment), fields(id = %assignment.id))]
  async fn put_assignment(&self, assignment: Assignment) -> Result<(), StoreError> {
    self.assignments.write().await.insert(assignment.id.clone(), assignment);
    Ok(())
  }

  async fn get_assignment(&self, id: &str) -> Result<Assignment, StoreError> {
    self
      .assignments
      .read()
      .await
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound { kind: "assignment", id: id.to_string() })
  }

  async fn list_assignments(&self, class_id: &str) -> Result<Vec<Assignment>, StoreError> {
    let mut out: Vec<Assignment> =
      self.assignments.read().await.values().filter(|a| a.class_id == class_id).cloned().collect();
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(out)
  }

  #[instrument(level = "debug", skip(self, rubric), fields(criteria = rubric.criteria.len()))]
  async fn put_rubric(&self, assignment_id: &str, rubric: Rubric) -> Result<(), StoreError> {
    let mut assignments = self.assignments.write().await;
    let a = assignments
      .get_mut(assignment_id)
      .ok_or_else(|| StoreError::NotFound { kind: "assignment", id: assignment_id.to_string() })?;
    a.rubric = Some(rubric);
    Ok(())
  }

  async fn insert_submission(&self, submission: Submission) -> Result<(), StoreError> {
    let mut subs = self.submissions.write().await;
    if subs.contains_key(&submission.id) {
      return Err(StoreError::Conflict(format!("submission `{}` already exists", submission.id)));
    }
    subs.insert(submission.id.clone(), submission);
    Ok(())
  }

  async fn list_submissions(&self, class_id: &str) -> Result<Vec<Submission>, StoreError> {
    let mut out: Vec<Submission> =
      self.submissions.read().await.values().filter(|s| s.class_id == class_id).cloned().collect();
    out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    Ok(out)
  }

  async fn put_quiz(&self, quiz: Quiz) -> Result<(), StoreError> {
    self.quizzes.write().await.insert(quiz.id.clone(), quiz);
    Ok(())
  }

  async fn get_quiz(&self, id: &str) -> Result<Quiz, StoreError> {
    self
      .quizzes
      .read()
      .await
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound { kind: "quiz", id: id.to_string() })
  }

  #[instrument(level = "debug", skip(self, submission), fields(quiz = %submission.quiz_id, student = %submission.student_id))]
  async fn insert_quiz_submission(&self, submission: QuizSubmission) -> Result<(), StoreError> {
    let key = (submission.quiz_id.clone(), submission.student_id.clone());
    let mut subs = self.quiz_submissions.write().await;
    if subs.contains_key(&key) {
      return Err(StoreError::Conflict(format!(
        "student `{}` already submitted quiz `{}`",
        submission.student_id, submission.quiz_id
      )));
    }
    subs.insert(key, submission);
    Ok(())
  }

  async fn put_enrollment(&self, enrollment: PracticumEnrollment) -> Result<(), StoreError> {
    self.enrollments.write().await.insert(enrollment.id.clone(), enrollment);
    Ok(())
  }

  async fn get_enrollment(&self, id: &str) -> Result<PracticumEnrollment, StoreError> {
    self
      .enrollments
      .read()
      .await
      .get(id)
      .cloned()
      .ok_or_else(|| StoreError::NotFound { kind: "enrollment", id: id.to_string() })
  }

  async fn list_enrollments(&self, practicum_id: &str) -> Result<Vec<PracticumEnrollment>, StoreError> {
    let mut out: Vec<PracticumEnrollment> =
      self.enrollments.read().await.values().filter(|e| e.practicum_id == practicum_id).cloned().collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(out)
  }

  // Last write wins; the edit's `previous` is only used to build inverses.
  async fn apply_grade_edit(&self, edit: &GradeEdit) -> Result<PracticumEnrollment, StoreError> {
    let mut enrollments = self.enrollments.write().await;
    let e = enrollments
      .get_mut(&edit.enrollment_id)
      .ok_or_else(|| StoreError::NotFound { kind: "enrollment", id: edit.enrollment_id.clone() })?;
    edit.apply(e);
    debug!(target: "store", enrollment = %edit.enrollment_id, field = ?edit.field, value = ?edit.value, "Grade cell written");
    Ok(e.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::domain::GradeField;
  use chrono::{Duration, Utc};
  use std::collections::HashMap;

  fn assignment(id: &str, class_id: &str, age_days: i64) -> Assignment {
    Assignment {
      id: id.into(),
      class_id: class_id.into(),
      title: format!("Assignment {}", id),
      short_code: None,
      description: None,
      max_points: 100.0,
      created_at: Utc::now() - Duration::days(age_days),
      rubric: None,
    }
  }

  #[tokio::test]
  async fn assignments_are_listed_oldest_first_per_class() {
    let store = InMemoryStore::new();
    store.put_assignment(assignment("new", "c1", 1)).await.unwrap();
    store.put_assignment(assignment("old", "c1", 9)).await.unwrap();
    store.put_assignment(assignment("other", "c2", 3)).await.unwrap();

    let ids: Vec<String> = store.list_assignments("c1").await.unwrap().into_iter().map(|a| a.id).collect();
    assert_eq!(ids, vec!["old".to_string(), "new".to_string()]);
  }

  #[tokio::test]
  async fn classes_are_filtered_by_instructor() {
    let store = InMemoryStore::new();
    for (id, owner) in [("c2", "t1"), ("c1", "t1"), ("c3", "t2")] {
      store
        .put_class(Class { id: id.into(), name: id.into(), instructor_id: owner.into(), student_ids: vec![], detection: None })
        .await
        .unwrap();
    }
    let mine: Vec<String> = store.list_classes(Some("t1")).await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(mine, vec!["c1".to_string(), "c2".to_string()]);
    assert_eq!(store.list_classes(None).await.unwrap().len(), 3);
    assert!(matches!(store.get_class("nope").await, Err(StoreError::NotFound { kind: "class", .. })));
  }

  #[tokio::test]
  async fn rubric_requires_existing_assignment() {
    let store = InMemoryStore::new();
    let err = store.put_rubric("missing", Rubric::default()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { kind: "assignment", .. }));
  }

  #[tokio::test]
  async fn second_quiz_submission_conflicts() {
    let store = InMemoryStore::new();
    let sub = QuizSubmission {
      quiz_id: "q".into(),
      student_id: "s".into(),
      responses: HashMap::new(),
      score: 0,
      submitted_at: Utc::now(),
    };
    store.insert_quiz_submission(sub.clone()).await.unwrap();
    assert!(matches!(store.insert_quiz_submission(sub).await, Err(StoreError::Conflict(_))));
  }

  #[tokio::test]
  async fn grade_edit_touches_only_its_field() {
    let store = InMemoryStore::new();
    let e = PracticumEnrollment {
      id: "e1".into(),
      practicum_id: "p".into(),
      logs_grade: Some(10.0),
      final_grade: Some(50.0),
      ..Default::default()
    };
    store.put_enrollment(e.clone()).await.unwrap();
    let updated = store.apply_grade_edit(&GradeEdit::capture(&e, GradeField::Logs, Some(20.0))).await.unwrap();
    assert_eq!(updated.logs_grade, Some(20.0));
    assert_eq!(updated.final_grade, Some(50.0));
  }
}
