use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{ExamError, Result};
use crate::exam::model::{Exam, ExamStatus, Question, Test};

/// Persistence contract for exam sessions. Reads return owned snapshots;
/// writers hand back the whole record (read-modify-write, serialized by the
/// session manager's per-exam locks).
#[async_trait]
pub trait ExamRepository: Send + Sync {
    async fn find_exam_by_id(&self, exam_id: &str) -> Result<Option<Exam>>;

    /// The in-progress exam for (user, test), if any. Backs the
    /// duplicate-active-session guard.
    async fn find_active_exam(&self, user_id: &str, test_id: &str) -> Result<Option<Exam>>;

    async fn create_exam(&self, exam: &Exam) -> Result<()>;

    /// Replace the stored record wholesale. Fails with `ExamNotFound` if the
    /// exam was never created.
    async fn save_exam(&self, exam: &Exam) -> Result<()>;
}

/// Read accessor for tests. Tests are immutable input to this service.
#[async_trait]
pub trait TestRepository: Send + Sync {
    async fn find_test_by_id(&self, test_id: &str) -> Result<Option<Test>>;
}

/// In-memory implementation of both repositories. Default backing store for
/// the server and the unit tests; a database-backed implementation can slot
/// in behind the same traits.
#[derive(Clone, Default)]
pub struct MemoryStore {
    exams: Arc<RwLock<HashMap<String, Exam>>>,
    tests: Arc<RwLock<HashMap<String, Test>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_test(&self, test: Test) {
        let mut tests = self.tests.write().await;
        tests.insert(test.id.clone(), test);
    }

    /// Seed a deterministic demo test so the CLI and the live integration
    /// tests can run full flows without the account/test subsystems.
    pub async fn seed_demo_data(&self) -> String {
        let test = Test {
            id: "demo-test".to_string(),
            user_id: "demo-user".to_string(),
            title: "Demo: mental arithmetic".to_string(),
            questions: vec![
                Question {
                    prompt: "What is 2 + 2?".to_string(),
                    options: vec!["3".into(), "4".into(), "5".into()],
                    correct_answer: "4".to_string(),
                    explanation: None,
                },
                Question {
                    prompt: "What is 9 * 6?".to_string(),
                    options: vec!["54".into(), "56".into(), "63".into()],
                    correct_answer: "54".to_string(),
                    explanation: None,
                },
                Question {
                    prompt: "What is 100 / 4?".to_string(),
                    options: vec!["20".into(), "25".into(), "40".into()],
                    correct_answer: "25".to_string(),
                    explanation: None,
                },
                Question {
                    prompt: "What is 17 - 9?".to_string(),
                    options: vec!["6".into(), "7".into(), "8".into()],
                    correct_answer: "8".to_string(),
                    explanation: None,
                },
            ],
            time_limit: 30,
        };

        let id = test.id.clone();
        self.insert_test(test).await;
        id
    }
}

#[async_trait]
impl ExamRepository for MemoryStore {
    async fn find_exam_by_id(&self, exam_id: &str) -> Result<Option<Exam>> {
        let exams = self.exams.read().await;
        Ok(exams.get(exam_id).cloned())
    }

    async fn find_active_exam(&self, user_id: &str, test_id: &str) -> Result<Option<Exam>> {
        let exams = self.exams.read().await;
        Ok(exams
            .values()
            .find(|exam| {
                exam.user_id == user_id
                    && exam.test_id == test_id
                    && exam.status == ExamStatus::InProgress
            })
            .cloned())
    }

    async fn create_exam(&self, exam: &Exam) -> Result<()> {
        let mut exams = self.exams.write().await;
        if exams.contains_key(&exam.id) {
            return Err(ExamError::storage(format!(
                "exam {} already exists",
                exam.id
            )));
        }
        exams.insert(exam.id.clone(), exam.clone());
        Ok(())
    }

    async fn save_exam(&self, exam: &Exam) -> Result<()> {
        let mut exams = self.exams.write().await;
        match exams.get_mut(&exam.id) {
            Some(stored) => {
                *stored = exam.clone();
                Ok(())
            }
            None => Err(ExamError::ExamNotFound(exam.id.clone())),
        }
    }
}

#[async_trait]
impl TestRepository for MemoryStore {
    async fn find_test_by_id(&self, test_id: &str) -> Result<Option<Test>> {
        let tests = self.tests.read().await;
        Ok(tests.get(test_id).cloned())
    }
}
