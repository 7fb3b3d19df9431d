use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use warp::ws::Message;

use crate::error::{ExamError, Result};
use super::evaluator::{AnswerEvaluator, Evaluation};
use super::model::{compute_score, Answer, Exam, ExamStatus, TestView};
use super::protocol::ServerEvent;
use super::rooms::RoomManager;
use super::store::{ExamRepository, TestRepository};
use super::ticker::TickerStore;

/// Result of starting (or force-restarting) an exam session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedExam {
    pub exam_id: String,
    pub room_token: String,
    pub start_time: DateTime<Utc>,
    pub time_limit: u32,
}

/// Result of joining a running exam over the realtime channel.
#[derive(Debug, Clone)]
pub struct JoinedExam {
    pub test: TestView,
    pub remaining_time: u64,
}

/// Drives the exam session lifecycle: start/restart, realtime join, graded
/// answer submission, and finalization from timeout, explicit finish or the
/// administrative force paths.
///
/// Read-modify-write sections on a single exam (answer appends, terminal
/// transitions) are serialized through a per-exam async mutex; the evaluator
/// is always called outside that lock.
pub struct SessionManager {
    exams: Arc<dyn ExamRepository>,
    tests: Arc<dyn TestRepository>,
    evaluator: Arc<dyn AnswerEvaluator>,
    rooms: Arc<RoomManager>,
    tickers: Arc<TickerStore>,
    /// Lock entries live for the life of the process; terminal exams reject
    /// writes regardless.
    exam_locks: Arc<RwLock<HashMap<String, Arc<Mutex<()>>>>>,
}

impl SessionManager {
    pub fn new(
        exams: Arc<dyn ExamRepository>,
        tests: Arc<dyn TestRepository>,
        evaluator: Arc<dyn AnswerEvaluator>,
        rooms: Arc<RoomManager>,
        tickers: Arc<TickerStore>,
    ) -> Arc<Self> {
        Arc::new(Self {
            exams,
            tests,
            evaluator,
            rooms,
            tickers,
            exam_locks: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Start a fresh exam session for a test the user owns.
    ///
    /// An existing in-progress session for the same (user, test) pair blocks
    /// the start unless `force_new` is set, in which case the old session is
    /// expired without grading before the new one is created. A test owned
    /// by a different user reads as missing.
    pub async fn start_exam(
        &self,
        user_id: &str,
        test_id: &str,
        force_new: bool,
    ) -> Result<StartedExam> {
        let test = self
            .tests
            .find_test_by_id(test_id)
            .await?
            .filter(|test| test.user_id == user_id)
            .ok_or_else(|| ExamError::TestNotFound(test_id.to_string()))?;

        if let Some(existing) = self.exams.find_active_exam(user_id, test_id).await? {
            if !force_new {
                tracing::info!(
                    user_id = %user_id,
                    test_id = %test_id,
                    exam_id = %existing.id,
                    "Start blocked by active exam"
                );
                return Err(ExamError::AlreadyActive(existing.id));
            }

            tracing::info!(
                user_id = %user_id,
                test_id = %test_id,
                exam_id = %existing.id,
                "Expiring active exam before forced restart"
            );
            self.expire_exam(&existing.id).await?;
        }

        let exam = Exam::new(user_id, test_id, Self::generate_room_token());
        self.exams.create_exam(&exam).await?;

        tracing::info!(
            exam_id = %exam.id,
            user_id = %user_id,
            test_id = %test_id,
            time_limit = test.time_limit,
            "Exam session started"
        );

        Ok(StartedExam {
            room_token: exam.room_id().to_string(),
            exam_id: exam.id,
            start_time: exam.start_time,
            time_limit: test.time_limit,
        })
    }

    /// Join a running exam: validates ownership and state, registers the
    /// connection in the exam's room and makes sure a countdown ticker is
    /// running. Nothing is registered on a failed join.
    pub async fn join_exam(
        self: &Arc<Self>,
        exam_id: &str,
        user_id: &str,
        conn_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Result<JoinedExam> {
        let exam = self.fetch_exam(exam_id).await?;
        if exam.user_id != user_id {
            tracing::warn!(
                exam_id = %exam_id,
                user_id = %user_id,
                "Join rejected, connection does not own the exam"
            );
            return Err(ExamError::Unauthorized(exam_id.to_string()));
        }
        if exam.status != ExamStatus::InProgress {
            return Err(ExamError::InvalidState(exam_id.to_string()));
        }

        let test = self
            .tests
            .find_test_by_id(&exam.test_id)
            .await?
            .ok_or_else(|| ExamError::TestNotFound(exam.test_id.clone()))?;

        let remaining = exam.remaining_seconds(test.time_limit, Utc::now());
        let room_id = exam.room_id().to_string();

        self.rooms.join_room(&room_id, conn_id, sender).await;
        self.ensure_ticker(&exam.id, &room_id, test.time_limit).await;

        let members = self.rooms.member_count(&room_id).await;
        tracing::info!(
            exam_id = %exam_id,
            user_id = %user_id,
            remaining = remaining,
            members = members,
            "Connection joined exam"
        );

        Ok(JoinedExam {
            test: TestView::from(&test),
            remaining_time: remaining,
        })
    }

    /// Grade one submitted answer and append it to the exam's answer log.
    ///
    /// The evaluator runs before the per-exam lock is taken; the state is
    /// re-checked under the lock so a submission that raced a terminal
    /// transition is rejected instead of appended. An evaluator failure
    /// drops the submission entirely.
    pub async fn submit_answer(
        &self,
        exam_id: &str,
        user_id: &str,
        question_index: usize,
        answer: &str,
    ) -> Result<Evaluation> {
        let exam = self.fetch_exam(exam_id).await?;
        if exam.user_id != user_id {
            return Err(ExamError::Unauthorized(exam_id.to_string()));
        }
        if exam.status != ExamStatus::InProgress {
            return Err(ExamError::InvalidState(exam_id.to_string()));
        }

        let test = self
            .tests
            .find_test_by_id(&exam.test_id)
            .await?
            .ok_or_else(|| ExamError::TestNotFound(exam.test_id.clone()))?;
        let question = test
            .questions
            .get(question_index)
            .ok_or(ExamError::QuestionNotFound(question_index))?;

        let evaluation = self
            .evaluator
            .evaluate(&question.prompt, &question.correct_answer, answer)
            .await?;

        let lock = self.exam_lock(exam_id).await;
        let _guard = lock.lock().await;

        let mut exam = self.fetch_exam(exam_id).await?;
        if exam.status != ExamStatus::InProgress {
            tracing::warn!(
                exam_id = %exam_id,
                question_index = question_index,
                "Exam ended while answer was being graded, dropping submission"
            );
            return Err(ExamError::InvalidState(exam_id.to_string()));
        }

        exam.answers.push(Answer {
            question_index,
            student_answer: answer.to_string(),
            is_correct: evaluation.is_correct,
            feedback: evaluation.feedback.clone(),
            timestamp: Utc::now(),
        });
        self.exams.save_exam(&exam).await?;

        tracing::info!(
            exam_id = %exam_id,
            question_index = question_index,
            is_correct = evaluation.is_correct,
            answers = exam.answers.len(),
            "Answer recorded"
        );

        Ok(evaluation)
    }

    /// Compute the final score and mark the exam completed. Idempotent:
    /// an already-terminal exam returns `Ok(None)` without touching anything.
    ///
    /// With an identity supplied the caller must own the exam; the timeout
    /// path passes `None`. On success the terminal record is broadcast to
    /// the exam's room. The ticker is stopped after every attempted terminal
    /// write, whether or not the write succeeded.
    pub async fn finalize(&self, exam_id: &str, identity: Option<&str>) -> Result<Option<Exam>> {
        let lock = self.exam_lock(exam_id).await;
        let _guard = lock.lock().await;

        let mut exam = self.fetch_exam(exam_id).await?;
        if let Some(user_id) = identity {
            if exam.user_id != user_id {
                return Err(ExamError::Unauthorized(exam_id.to_string()));
            }
        }
        if exam.status.is_terminal() {
            tracing::debug!(
                exam_id = %exam_id,
                status = ?exam.status,
                "Finalize skipped, exam already terminal"
            );
            return Ok(None);
        }

        let total_questions = match self.tests.find_test_by_id(&exam.test_id).await? {
            Some(test) => test.questions.len(),
            None => {
                tracing::warn!(
                    exam_id = %exam_id,
                    test_id = %exam.test_id,
                    "Test missing at finalization, scoring against zero questions"
                );
                0
            }
        };
        let correct = exam.correct_answers();
        let score = compute_score(correct, total_questions);
        exam.mark_completed(score, Utc::now());

        let saved = self.exams.save_exam(&exam).await;
        self.tickers.stop(exam_id).await;
        saved?;

        tracing::info!(
            exam_id = %exam_id,
            score = score,
            correct = correct,
            total_questions = total_questions,
            time_spent = exam.time_spent.unwrap_or(0),
            "Exam finalized"
        );

        let event = ServerEvent::ExamFinished {
            exam_id: exam.id.clone(),
            score,
            total_questions,
            correct_answers: correct,
            time_spent: exam.time_spent.unwrap_or(0),
            status: exam.status,
        };
        if let Err(e) = self.rooms.broadcast(exam.room_id(), &event).await {
            tracing::error!(exam_id = %exam_id, error = %e, "Failed to broadcast exam finished");
        }

        Ok(Some(exam))
    }

    /// Administrative stop: mark an in-progress exam expired without grading.
    /// Missing and non-owned exams both read as not found.
    pub async fn force_finish(&self, exam_id: &str, user_id: &str) -> Result<Exam> {
        let exam = self.fetch_exam(exam_id).await?;
        if exam.user_id != user_id {
            return Err(ExamError::ExamNotFound(exam_id.to_string()));
        }
        if exam.status.is_terminal() {
            return Err(ExamError::InvalidState(exam_id.to_string()));
        }

        match self.expire_exam(exam_id).await? {
            Some(expired) => {
                tracing::info!(exam_id = %exam_id, user_id = %user_id, "Exam force-finished");
                Ok(expired)
            }
            // Lost the race against another terminal transition.
            None => Err(ExamError::InvalidState(exam_id.to_string())),
        }
    }

    /// Detach a closed connection from whatever room it sat in. Tickers are
    /// left running so the countdown survives reconnects.
    pub async fn disconnect(&self, conn_id: &str) {
        let _ = self.rooms.remove_connection(conn_id).await;
    }

    /// Ungraded terminal transition shared by force-finish and forced
    /// restart. Returns `None` when the exam is missing or already terminal.
    async fn expire_exam(&self, exam_id: &str) -> Result<Option<Exam>> {
        let lock = self.exam_lock(exam_id).await;
        let _guard = lock.lock().await;

        let mut exam = match self.exams.find_exam_by_id(exam_id).await? {
            Some(exam) => exam,
            None => return Ok(None),
        };
        if exam.status.is_terminal() {
            return Ok(None);
        }

        exam.mark_expired(Utc::now());
        let saved = self.exams.save_exam(&exam).await;
        self.tickers.stop(exam_id).await;
        saved?;

        Ok(Some(exam))
    }

    async fn ensure_ticker(self: &Arc<Self>, exam_id: &str, room_id: &str, time_limit: u32) {
        if self.tickers.is_running(exam_id).await {
            return;
        }

        let ticker = Arc::clone(self).run_ticker(
            exam_id.to_string(),
            room_id.to_string(),
            time_limit,
        );
        self.tickers.start(exam_id, ticker).await;
    }

    /// Countdown loop for one exam. Remaining time is recomputed from the
    /// immutable start time every tick, never decremented, so the clock is
    /// immune to scheduler drift. The loop ends on its own at zero or when
    /// the exam turns terminal; it never stops its own ticker handle, the
    /// finalizer does that from a separate task.
    async fn run_ticker(self: Arc<Self>, exam_id: String, room_id: String, time_limit: u32) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            interval.tick().await;

            let exam = match self.exams.find_exam_by_id(&exam_id).await {
                Ok(Some(exam)) => exam,
                Ok(None) => {
                    tracing::warn!(exam_id = %exam_id, "Ticker found no exam, stopping");
                    break;
                }
                Err(e) => {
                    tracing::error!(exam_id = %exam_id, error = %e, "Ticker failed to load exam");
                    break;
                }
            };

            if exam.status.is_terminal() {
                tracing::debug!(exam_id = %exam_id, "Ticker observed terminal exam, stopping");
                break;
            }

            let remaining = exam.remaining_seconds(time_limit, Utc::now());
            if remaining > 0 {
                let update = ServerEvent::TimeUpdate {
                    remaining_time: remaining,
                };
                if let Err(e) = self.rooms.broadcast(&room_id, &update).await {
                    tracing::error!(exam_id = %exam_id, error = %e, "Failed to broadcast time update");
                }
                continue;
            }

            tracing::info!(exam_id = %exam_id, "Exam time limit reached");
            if let Err(e) = self.rooms.broadcast(&room_id, &ServerEvent::ExamExpired).await {
                tracing::error!(exam_id = %exam_id, error = %e, "Failed to broadcast exam expired");
            }

            // Finalization runs on its own task: it stops this ticker's
            // handle, which must not abort the finalize call itself.
            let finalizer = Arc::clone(&self);
            let finalize_id = exam_id.clone();
            tokio::spawn(async move {
                if let Err(e) = finalizer.finalize(&finalize_id, None).await {
                    tracing::error!(
                        exam_id = %finalize_id,
                        error = %e,
                        "Timeout finalization failed"
                    );
                }
            });
            break;
        }
    }

    async fn fetch_exam(&self, exam_id: &str) -> Result<Exam> {
        self.exams
            .find_exam_by_id(exam_id)
            .await?
            .ok_or_else(|| ExamError::ExamNotFound(exam_id.to_string()))
    }

    async fn exam_lock(&self, exam_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.exam_locks.write().await;
        locks
            .entry(exam_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn generate_room_token() -> String {
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill(&mut bytes);
        hex::encode(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exam::evaluator::RuleBasedEvaluator;
    use crate::exam::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use tokio::time::sleep;

    const OWNER: &str = "demo-user";
    const TEST_ID: &str = "demo-test";

    struct FailingEvaluator;

    #[async_trait]
    impl AnswerEvaluator for FailingEvaluator {
        async fn evaluate(&self, _q: &str, _c: &str, _s: &str) -> Result<Evaluation> {
            Err(ExamError::upstream("evaluator offline"))
        }
    }

    struct Harness {
        store: MemoryStore,
        rooms: Arc<RoomManager>,
        tickers: Arc<TickerStore>,
        manager: Arc<SessionManager>,
    }

    async fn harness() -> Harness {
        harness_with(Arc::new(RuleBasedEvaluator::new())).await
    }

    async fn harness_with(evaluator: Arc<dyn AnswerEvaluator>) -> Harness {
        let store = MemoryStore::new();
        store.seed_demo_data().await;
        let rooms = RoomManager::new();
        let tickers = TickerStore::new();
        let manager = SessionManager::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            evaluator,
            rooms.clone(),
            tickers.clone(),
        );
        Harness {
            store,
            rooms,
            tickers,
            manager,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<serde_json::Value> {
        let mut events = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            events.push(serde_json::from_str(msg.to_str().unwrap()).unwrap());
        }
        events
    }

    fn count_type(events: &[serde_json::Value], event_type: &str) -> usize {
        events.iter().filter(|e| e["type"] == event_type).count()
    }

    async fn stored_exam(store: &MemoryStore, exam_id: &str) -> Exam {
        store.find_exam_by_id(exam_id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_start_exam_creates_in_progress_session() {
        let h = harness().await;

        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        assert_eq!(started.time_limit, 30);
        assert_eq!(started.room_token.len(), 32);
        assert!(started.room_token.chars().all(|c| c.is_ascii_hexdigit()));

        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(exam.status, ExamStatus::InProgress);
        assert_eq!(exam.user_id, OWNER);
        assert_eq!(exam.test_id, TEST_ID);
        assert!(exam.answers.is_empty());
        assert!(exam.score.is_none());
        assert_eq!(exam.room_id(), started.room_token);
    }

    #[tokio::test]
    async fn test_start_exam_unknown_or_foreign_test_reads_as_missing() {
        let h = harness().await;

        let err = h.manager.start_exam(OWNER, "no-such-test", false).await;
        assert!(matches!(err, Err(ExamError::TestNotFound(_))));

        // A test owned by someone else is indistinguishable from a missing one.
        let err = h.manager.start_exam("intruder", TEST_ID, false).await;
        assert!(matches!(err, Err(ExamError::TestNotFound(_))));
    }

    #[tokio::test]
    async fn test_start_exam_twice_reports_already_active() {
        let h = harness().await;

        let first = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();
        let err = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap_err();

        match err {
            ExamError::AlreadyActive(exam_id) => assert_eq!(exam_id, first.exam_id),
            other => panic!("expected AlreadyActive, got {other:?}"),
        }

        // The blocked start leaves the running session untouched.
        let exam = stored_exam(&h.store, &first.exam_id).await;
        assert_eq!(exam.status, ExamStatus::InProgress);
    }

    #[tokio::test]
    async fn test_start_exam_with_force_expires_previous_session() {
        let h = harness().await;

        let first = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();
        h.manager
            .join_exam(&first.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap();
        assert!(h.tickers.is_running(&first.exam_id).await);

        let second = h.manager.start_exam(OWNER, TEST_ID, true).await.unwrap();
        assert_ne!(second.exam_id, first.exam_id);

        let old = stored_exam(&h.store, &first.exam_id).await;
        assert_eq!(old.status, ExamStatus::Expired);
        assert!(old.end_time.is_some());
        assert!(old.time_spent.is_some());
        assert!(old.score.is_none());
        assert!(!h.tickers.is_running(&first.exam_id).await);

        let fresh = stored_exam(&h.store, &second.exam_id).await;
        assert_eq!(fresh.status, ExamStatus::InProgress);
    }

    #[tokio::test]
    async fn test_join_exam_returns_sanitized_test_and_remaining_time() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let joined = h
            .manager
            .join_exam(&started.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap();

        assert!(joined.remaining_time <= 30 * 60);
        assert!(joined.remaining_time >= 30 * 60 - 2);
        assert_eq!(joined.test.questions.len(), 4);

        // Grading keys never reach the client.
        let wire = serde_json::to_string(&joined.test).unwrap();
        assert!(!wire.contains("correctAnswer"));
        assert!(!wire.contains("explanation"));

        assert_eq!(h.rooms.member_count(&started.room_token).await, 1);
        assert!(h.tickers.is_running(&started.exam_id).await);
    }

    #[tokio::test]
    async fn test_join_by_non_owner_registers_nothing() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = h
            .manager
            .join_exam(&started.exam_id, "intruder", "conn_x", tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::Unauthorized(_)));
        assert_eq!(h.rooms.member_count(&started.room_token).await, 0);
        assert!(!h.tickers.is_running(&started.exam_id).await);
    }

    #[tokio::test]
    async fn test_join_missing_exam_is_not_found() {
        let h = harness().await;

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = h
            .manager
            .join_exam("no-such-exam", OWNER, "conn_a", tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::ExamNotFound(_)));
    }

    #[tokio::test]
    async fn test_join_terminal_exam_is_invalid_state() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();
        h.manager
            .force_finish(&started.exam_id, OWNER)
            .await
            .unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = h
            .manager
            .join_exam(&started.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::InvalidState(_)));
        assert_eq!(h.rooms.member_count(&started.room_token).await, 0);
    }

    #[tokio::test]
    async fn test_submit_answer_grades_and_appends() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let correct = h
            .manager
            .submit_answer(&started.exam_id, OWNER, 0, "4")
            .await
            .unwrap();
        assert!(correct.is_correct);

        let wrong = h
            .manager
            .submit_answer(&started.exam_id, OWNER, 0, "5")
            .await
            .unwrap();
        assert!(!wrong.is_correct);

        // Both submissions for the same question stay in the log.
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(exam.answers.len(), 2);
        assert_eq!(exam.answers[0].question_index, 0);
        assert_eq!(exam.answers[0].student_answer, "4");
        assert!(exam.answers[0].is_correct);
        assert!(!exam.answers[1].is_correct);
    }

    #[tokio::test]
    async fn test_submit_answer_out_of_range_question_is_rejected() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let err = h
            .manager
            .submit_answer(&started.exam_id, OWNER, 99, "4")
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::QuestionNotFound(99)));
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert!(exam.answers.is_empty());
    }

    #[tokio::test]
    async fn test_submit_answer_by_non_owner_is_unauthorized() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let err = h
            .manager
            .submit_answer(&started.exam_id, "intruder", 0, "4")
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn test_evaluator_failure_drops_submission() {
        let h = harness_with(Arc::new(FailingEvaluator)).await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let err = h
            .manager
            .submit_answer(&started.exam_id, OWNER, 0, "4")
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::UpstreamFailure(_)));
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert!(exam.answers.is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_finalize_is_rejected() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();
        h.manager
            .finalize(&started.exam_id, Some(OWNER))
            .await
            .unwrap();

        let err = h
            .manager
            .submit_answer(&started.exam_id, OWNER, 0, "4")
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::InvalidState(_)));
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert!(exam.answers.is_empty());
    }

    #[tokio::test]
    async fn test_finalize_scores_answered_questions() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        // Three answers, two correct, over a four question test.
        h.manager
            .submit_answer(&started.exam_id, OWNER, 0, "4")
            .await
            .unwrap();
        h.manager
            .submit_answer(&started.exam_id, OWNER, 1, "99")
            .await
            .unwrap();
        h.manager
            .submit_answer(&started.exam_id, OWNER, 2, "25")
            .await
            .unwrap();

        let finalized = h
            .manager
            .finalize(&started.exam_id, Some(OWNER))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(finalized.status, ExamStatus::Completed);
        assert_eq!(finalized.score, Some(50));
        assert_eq!(finalized.answers.len(), 3);
        assert_eq!(finalized.correct_answers(), 2);
        assert!(finalized.end_time.is_some());
        assert!(finalized.time_spent.unwrap() >= 0);

        let stored = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(stored.status, ExamStatus::Completed);
        assert_eq!(stored.score, Some(50));
    }

    #[tokio::test]
    async fn test_finalize_with_no_answers_completes_with_zero_score() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let finalized = h
            .manager
            .finalize(&started.exam_id, Some(OWNER))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(finalized.status, ExamStatus::Completed);
        assert_eq!(finalized.score, Some(0));
    }

    #[tokio::test]
    async fn test_finalize_twice_broadcasts_once() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager
            .join_exam(&started.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap();

        let first = h.manager.finalize(&started.exam_id, Some(OWNER)).await.unwrap();
        assert!(first.is_some());

        let second = h.manager.finalize(&started.exam_id, Some(OWNER)).await.unwrap();
        assert!(second.is_none());

        let events = drain(&mut rx);
        assert_eq!(count_type(&events, "exam-finished"), 1);
        assert!(!h.tickers.is_running(&started.exam_id).await);
    }

    #[tokio::test]
    async fn test_finalize_by_non_owner_mutates_nothing() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let err = h
            .manager
            .finalize(&started.exam_id, Some("intruder"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExamError::Unauthorized(_)));
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(exam.status, ExamStatus::InProgress);
        assert!(exam.end_time.is_none());
    }

    #[tokio::test]
    async fn test_finalize_missing_exam_is_not_found() {
        let h = harness().await;
        let err = h.manager.finalize("no-such-exam", None).await.unwrap_err();
        assert!(matches!(err, ExamError::ExamNotFound(_)));
    }

    #[tokio::test]
    async fn test_force_finish_expires_without_score_or_broadcast() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager
            .join_exam(&started.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap();

        let expired = h
            .manager
            .force_finish(&started.exam_id, OWNER)
            .await
            .unwrap();

        assert_eq!(expired.status, ExamStatus::Expired);
        assert!(expired.score.is_none());
        assert!(expired.end_time.is_some());
        assert!(!h.tickers.is_running(&started.exam_id).await);

        let events = drain(&mut rx);
        assert_eq!(count_type(&events, "exam-finished"), 0);
        assert_eq!(count_type(&events, "exam-expired"), 0);
    }

    #[tokio::test]
    async fn test_force_finish_by_non_owner_reads_as_missing() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let err = h
            .manager
            .force_finish(&started.exam_id, "intruder")
            .await
            .unwrap_err();
        assert!(matches!(err, ExamError::ExamNotFound(_)));

        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(exam.status, ExamStatus::InProgress);
    }

    #[tokio::test]
    async fn test_force_finish_terminal_exam_is_invalid_state() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();
        h.manager
            .force_finish(&started.exam_id, OWNER)
            .await
            .unwrap();

        let err = h
            .manager
            .force_finish(&started.exam_id, OWNER)
            .await
            .unwrap_err();
        assert!(matches!(err, ExamError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_ticker_expires_exam_and_finalizes() {
        let h = harness().await;

        // Backdate the start so roughly two seconds remain on the clock.
        let mut exam = Exam::new(
            OWNER,
            TEST_ID,
            SessionManager::generate_room_token(),
        );
        exam.start_time = Utc::now() - ChronoDuration::seconds(30 * 60 - 2);
        h.store.create_exam(&exam).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let joined = h
            .manager
            .join_exam(&exam.id, OWNER, "conn_a", tx)
            .await
            .unwrap();
        assert!(joined.remaining_time <= 2);

        sleep(Duration::from_millis(3600)).await;

        let events = drain(&mut rx);
        assert_eq!(count_type(&events, "exam-expired"), 1);
        assert_eq!(count_type(&events, "exam-finished"), 1);

        let finished = events
            .iter()
            .find(|e| e["type"] == "exam-finished")
            .unwrap();
        assert_eq!(finished["status"], "completed");
        assert_eq!(finished["score"], 0);
        assert_eq!(finished["totalQuestions"], 4);

        let stored = stored_exam(&h.store, &exam.id).await;
        assert_eq!(stored.status, ExamStatus::Completed);
        assert_eq!(stored.score, Some(0));
        assert!(!h.tickers.is_running(&exam.id).await);
    }

    #[tokio::test]
    async fn test_ticker_broadcasts_countdown_while_running() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager
            .join_exam(&started.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap();

        sleep(Duration::from_millis(2300)).await;

        let events = drain(&mut rx);
        let updates = count_type(&events, "time-update");
        assert!(updates >= 1, "expected at least one time-update, got {events:?}");
        for event in events.iter().filter(|e| e["type"] == "time-update") {
            let remaining = event["remainingTime"].as_u64().unwrap();
            assert!(remaining > 0 && remaining <= 30 * 60);
        }
    }

    #[tokio::test]
    async fn test_tick_on_terminal_exam_broadcasts_nothing() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.manager
            .join_exam(&started.exam_id, OWNER, "conn_a", tx)
            .await
            .unwrap();
        h.manager
            .force_finish(&started.exam_id, OWNER)
            .await
            .unwrap();
        drain(&mut rx);

        // A stray ticker against the finished exam must observe the terminal
        // state and end without broadcasting or rewriting anything.
        let stray = Arc::clone(&h.manager).run_ticker(
            started.exam_id.clone(),
            started.room_token.clone(),
            30,
        );
        h.tickers.start(&started.exam_id, stray).await;

        sleep(Duration::from_millis(2300)).await;

        assert!(drain(&mut rx).is_empty());
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(exam.status, ExamStatus::Expired);
        assert!(exam.score.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_submissions_are_all_recorded() {
        let h = harness().await;
        let started = h.manager.start_exam(OWNER, TEST_ID, false).await.unwrap();

        let mut handles = Vec::new();
        for index in 0..4usize {
            let manager = h.manager.clone();
            let exam_id = started.exam_id.clone();
            handles.push(tokio::spawn(async move {
                manager.submit_answer(&exam_id, OWNER, index, "4").await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // No submission is lost to a read-modify-write race.
        let exam = stored_exam(&h.store, &started.exam_id).await;
        assert_eq!(exam.answers.len(), 4);
    }
}
