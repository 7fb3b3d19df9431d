use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EvaluatorConfig;
use crate::error::{ExamError, Result};

/// Verdict for one submitted answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub is_correct: bool,
    pub feedback: String,
}

/// Judges a student's answer against the grading key. Treated as an opaque,
/// possibly-slow, possibly-failing capability; a failure drops the
/// submission, nothing is retried here.
#[async_trait]
pub trait AnswerEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        question: &str,
        correct_answer: &str,
        student_answer: &str,
    ) -> Result<Evaluation>;
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Grades answers through an OpenAI-compatible chat-completions endpoint.
pub struct OpenAiEvaluator {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAiEvaluator {
    pub fn new(api_key: String, api_base: String, model: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base,
            model,
        }
    }
}

#[async_trait]
impl AnswerEvaluator for OpenAiEvaluator {
    async fn evaluate(
        &self,
        question: &str,
        correct_answer: &str,
        student_answer: &str,
    ) -> Result<Evaluation> {
        let user_prompt = format!(
            "Grade this exam answer.\n\n\
             Question: {question}\n\
             Correct Answer: {correct_answer}\n\
             Student's Answer: {student_answer}\n\n\
             Decide whether the student's answer is correct and give one or two\n\
             sentences of feedback (a hint if wrong, never the full answer).\n\n\
             Return ONLY valid JSON:\n\
             {{\"isCorrect\": true or false, \"feedback\": \"...\"}}"
        );

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: "You are a fair exam evaluator. Be constructive in your feedback."
                        .to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user_prompt,
                },
            ],
            max_tokens: 200,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Evaluator request failed");
                ExamError::upstream(e.to_string())
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Evaluator returned an error");
            return Err(ExamError::upstream(format!("evaluator returned {status}")));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExamError::upstream(e.to_string()))?;

        let content = chat
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| ExamError::upstream("no response choices"))?;

        parse_evaluation(content)
    }
}

/// Parses the model's JSON verdict, tolerating markdown code fences around it.
fn parse_evaluation(content: &str) -> Result<Evaluation> {
    let cleaned = content
        .replace("```json", "")
        .replace("```", "")
        .trim()
        .to_string();

    serde_json::from_str(&cleaned).map_err(|e| {
        tracing::warn!(error = %e, "Evaluator returned unparseable verdict");
        ExamError::upstream(format!("unparseable verdict: {e}"))
    })
}

/// Deterministic offline evaluator: normalized string comparison against the
/// grading key. Used when no API key is configured, and in tests.
#[derive(Default)]
pub struct RuleBasedEvaluator;

impl RuleBasedEvaluator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnswerEvaluator for RuleBasedEvaluator {
    async fn evaluate(
        &self,
        _question: &str,
        correct_answer: &str,
        student_answer: &str,
    ) -> Result<Evaluation> {
        let is_correct =
            student_answer.trim().to_lowercase() == correct_answer.trim().to_lowercase();

        let feedback = if is_correct {
            "Correct.".to_string()
        } else {
            "Incorrect. That is not the expected answer.".to_string()
        };

        Ok(Evaluation {
            is_correct,
            feedback,
        })
    }
}

/// Picks the evaluator implementation for the given configuration.
pub fn evaluator_from_config(config: &EvaluatorConfig) -> std::sync::Arc<dyn AnswerEvaluator> {
    match &config.api_key {
        Some(key) => {
            tracing::info!(model = %config.model, "Using OpenAI answer evaluator");
            std::sync::Arc::new(OpenAiEvaluator::new(
                key.clone(),
                config.api_base.clone(),
                config.model.clone(),
            ))
        }
        None => {
            tracing::info!("No API key configured, using rule-based answer evaluator");
            std::sync::Arc::new(RuleBasedEvaluator::new())
        }
    }
}
