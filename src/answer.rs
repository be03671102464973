//! Question answering over the combined page context.
//!
//! Rules first, model second. When the model cannot help, inventory
//! questions still get the rule-based count; everything else gets a fixed
//! message. The HTTP status travels with the answer so `/api/chat` can
//! report it without re-deriving the outcome.

use serde::Serialize;

use crate::heuristics::{inventory_answer, rule_answer};
use crate::llm::{build_prompt, GenerativeModel};

pub const MISSING_INPUT: &str = "Missing question or context";
pub const MODEL_UNAVAILABLE: &str =
    "Gemini API key missing on server. Only simple queries are supported.";
pub const NO_ANSWER: &str = "No answer found in context.";
pub const MODEL_FAILED: &str = "Failed to generate response using Gemini.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswerOutcome {
    pub answer: String,
    #[serde(skip)]
    pub status: u16,
}

impl AnswerOutcome {
    fn ok(answer: impl Into<String>) -> Self {
        Self {
            answer: answer.into(),
            status: 200,
        }
    }

    fn with_status(answer: impl Into<String>, status: u16) -> Self {
        Self {
            answer: answer.into(),
            status,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Answers `question` from `context`.
///
/// `prompt_char_limit` bounds how much of the context is sent to the model.
pub async fn answer_question(
    question: &str,
    context: &str,
    model: &dyn GenerativeModel,
    prompt_char_limit: usize,
) -> AnswerOutcome {
    if question.trim().is_empty() || context.trim().is_empty() {
        return AnswerOutcome::with_status(MISSING_INPUT, 400);
    }

    if let Some(answer) = rule_answer(question, context) {
        tracing::debug!(%answer, "answered by rule");
        return AnswerOutcome::ok(answer);
    }

    if !model.is_enabled() {
        return AnswerOutcome::with_status(MODEL_UNAVAILABLE, 500);
    }

    let mentions_inventory = question.to_lowercase().contains("inventory");
    let prompt = build_prompt(question, context, prompt_char_limit);

    match model.generate(&prompt).await {
        Ok(text) if !text.trim().is_empty() => AnswerOutcome::ok(text),
        Ok(_) => {
            tracing::warn!(model = model.name(), "model returned an empty answer");
            if mentions_inventory {
                AnswerOutcome::ok(inventory_answer(context))
            } else {
                AnswerOutcome::ok(NO_ANSWER)
            }
        }
        Err(e) => {
            tracing::error!(model = model.name(), error = %e, "model request failed");
            if mentions_inventory {
                AnswerOutcome::ok(inventory_answer(context))
            } else {
                AnswerOutcome::with_status(MODEL_FAILED, 500)
            }
        }
    }
}
