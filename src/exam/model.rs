use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of an exam session. `InProgress` is the only non-terminal state;
/// once a session leaves it, it never returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    InProgress,
    Completed,
    Expired,
}

impl ExamStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExamStatus::Completed | ExamStatus::Expired)
    }
}

/// One graded submission, appended to the exam's answer log. Duplicate
/// question indices are allowed: the log records what happened, it is not a
/// per-question map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    pub question_index: usize,
    pub student_answer: String,
    pub is_correct: bool,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

/// A timed exam session over a Test, owned by a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exam {
    pub id: String,
    pub user_id: String,
    pub test_id: String,
    pub status: ExamStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Whole seconds between start and end, set at finalization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_spent: Option<i64>,
    /// 0-100, set at finalization; absent on ungraded (expired) sessions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    pub answers: Vec<Answer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_token: Option<String>,
}

impl Exam {
    pub fn new(user_id: &str, test_id: &str, room_token: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            test_id: test_id.to_string(),
            status: ExamStatus::InProgress,
            start_time: Utc::now(),
            end_time: None,
            time_spent: None,
            score: None,
            answers: Vec::new(),
            room_token: Some(room_token),
        }
    }

    /// Identifier of the realtime room for this exam. Older records without
    /// a token fall back to the exam id.
    pub fn room_id(&self) -> &str {
        self.room_token.as_deref().unwrap_or(&self.id)
    }

    /// Seconds left on the clock, recomputed from the immutable start time.
    pub fn remaining_seconds(&self, time_limit_minutes: u32, now: DateTime<Utc>) -> u64 {
        let limit_ms = i64::from(time_limit_minutes) * 60 * 1000;
        let elapsed_ms = (now - self.start_time).num_milliseconds();
        let remaining_ms = (limit_ms - elapsed_ms).max(0);
        (remaining_ms / 1000) as u64
    }

    /// Terminal transition with a computed score (timeout and explicit
    /// finish). Caller must have verified the exam is still in progress.
    pub fn mark_completed(&mut self, score: u8, now: DateTime<Utc>) {
        self.status = ExamStatus::Completed;
        self.end_time = Some(now);
        self.time_spent = Some((now - self.start_time).num_seconds());
        self.score = Some(score);
    }

    /// Ungraded terminal transition (force-finish, forced restart). Leaves
    /// the score unset.
    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.status = ExamStatus::Expired;
        self.end_time = Some(now);
        self.time_spent = Some((now - self.start_time).num_seconds());
    }

    pub fn correct_answers(&self) -> usize {
        self.answers.iter().filter(|a| a.is_correct).count()
    }
}

/// Final score as an integer percentage: round(100 * correct / total),
/// or 0 when the test has no questions.
pub fn compute_score(correct: usize, total_questions: usize) -> u8 {
    if total_questions == 0 {
        return 0;
    }
    ((100.0 * correct as f64) / total_questions as f64).round() as u8
}

/// A single test question with its grading key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub prompt: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Source test for an exam session. Read-only input to this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Test {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub questions: Vec<Question>,
    /// Minutes allowed for the whole test.
    pub time_limit: u32,
}

/// Client-facing projection of a question: the grading key never leaves the
/// server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub prompt: String,
    pub options: Vec<String>,
}

/// Client-facing projection of a test, sent on join.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestView {
    pub id: String,
    pub title: String,
    pub questions: Vec<QuestionView>,
    pub time_limit: u32,
}

impl From<&Test> for TestView {
    fn from(test: &Test) -> Self {
        Self {
            id: test.id.clone(),
            title: test.title.clone(),
            questions: test
                .questions
                .iter()
                .map(|q| QuestionView {
                    prompt: q.prompt.clone(),
                    options: q.options.clone(),
                })
                .collect(),
            time_limit: test.time_limit,
        }
    }
}
