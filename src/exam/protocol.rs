use serde::{Deserialize, Serialize};

use crate::exam::model::{ExamStatus, TestView};

/// Messages a client sends over the realtime channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinExam {
        exam_id: String,
    },

    SubmitAnswer {
        exam_id: String,
        question_index: usize,
        answer: String,
    },

    FinishExam {
        exam_id: String,
    },
}

/// Messages the server emits, either to one connection or to a whole room.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// Reply to a successful join; the test view omits grading keys.
    ExamJoined {
        test: TestView,
        remaining_time: u64,
    },

    /// Broadcast to the room every second while the exam runs.
    TimeUpdate {
        remaining_time: u64,
    },

    /// Broadcast to the room once, when the clock reaches zero.
    ExamExpired,

    /// Sent to the submitting connection only.
    AnswerFeedback {
        question_index: usize,
        is_correct: bool,
        feedback: String,
    },

    /// Terminal broadcast with the final record.
    ExamFinished {
        exam_id: String,
        score: u8,
        total_questions: usize,
        correct_answers: usize,
        time_spent: i64,
        status: ExamStatus,
    },

    Error {
        message: String,
    },
}
