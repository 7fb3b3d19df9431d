use thiserror::Error;

/// Custom error types for the exam session service
#[derive(Debug, Error)]
pub enum ExamError {
    /// Lookup and ownership errors
    #[error("Exam {0} not found")]
    ExamNotFound(String),

    #[error("Test {0} not found")]
    TestNotFound(String),

    #[error("Invalid question index {0}")]
    QuestionNotFound(usize),

    #[error("Unauthorized access to exam {0}")]
    Unauthorized(String),

    #[error("Authentication error: {0}")]
    AuthenticationFailed(String),

    /// Lifecycle errors
    #[error("Exam {0} is not active")]
    InvalidState(String),

    #[error("You already have an active exam for this test: {0}")]
    AlreadyActive(String),

    /// Answer grading errors
    #[error("Failed to evaluate answer: {0}")]
    UpstreamFailure(String),

    /// Payload errors
    #[error("Invalid message payload: {0}")]
    ValidationFailure(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Storage and generic errors
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using ExamError
pub type Result<T> = std::result::Result<T, ExamError>;

impl ExamError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        ExamError::Internal(msg.into())
    }

    /// Helper to create Storage errors
    pub fn storage(msg: impl Into<String>) -> Self {
        ExamError::Storage(msg.into())
    }

    /// Helper to create UpstreamFailure errors
    pub fn upstream(msg: impl Into<String>) -> Self {
        ExamError::UpstreamFailure(msg.into())
    }

    /// Helper to create ValidationFailure errors
    pub fn validation(msg: impl Into<String>) -> Self {
        ExamError::ValidationFailure(msg.into())
    }

    /// HTTP status for surfacing this error on the REST endpoints
    pub fn status_code(&self) -> warp::http::StatusCode {
        use warp::http::StatusCode;

        match self {
            ExamError::ExamNotFound(_)
            | ExamError::TestNotFound(_)
            | ExamError::QuestionNotFound(_) => StatusCode::NOT_FOUND,
            ExamError::Unauthorized(_) | ExamError::AuthenticationFailed(_) => {
                StatusCode::UNAUTHORIZED
            }
            ExamError::InvalidState(_)
            | ExamError::AlreadyActive(_)
            | ExamError::ValidationFailure(_) => StatusCode::BAD_REQUEST,
            ExamError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ExamError::SerializationFailed(_)
            | ExamError::Storage(_)
            | ExamError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
