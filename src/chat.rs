//! Chat sessions and the send flow.
//!
//! [`ChatStore`] persists named transcripts and tracks which one is active.
//! [`ChatClient`] runs a question through the page cache and an
//! [`AnswerBackend`], retrying once before giving up with a fixed apology.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::answer::answer_question;
use crate::config::{ChatConfig, Config};
use crate::llm::{truncate_chars, GenerativeModel};
use crate::models::{ChatSession, Message, Sender};
use crate::scan::Scanner;

pub const NEW_CHAT_TITLE: &str = "New Chat";
pub const NO_PRECISE_ANSWER: &str =
    "Sorry, I couldn't find a precise answer based on the scanned pages.";
pub const PROCESSING_FAILED: &str =
    "⚠️ I couldn't process your question right now. Please try again after scanning pages.";

const ACTIVE_KEY: &str = "active_session";

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("chat session not found: {0}")]
    SessionNotFound(String),
}

// ============ Store ============

#[derive(Clone)]
pub struct ChatStore {
    pool: SqlitePool,
}

impl ChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Restores the saved sessions. The newest one becomes active.
    pub async fn load(&self) -> Result<Vec<ChatSession>> {
        let sessions = self.list().await?;
        let first = sessions.first().map(|s| s.id.clone());
        self.set_active(first.as_deref()).await?;
        Ok(sessions)
    }

    /// All sessions, newest first, with their messages.
    pub async fn list(&self) -> Result<Vec<ChatSession>> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM chat_sessions ORDER BY position DESC")
                .fetch_all(&self.pool)
                .await?;

        let mut sessions = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(session) = self.get(&id).await? {
                sessions.push(session);
            }
        }
        Ok(sessions)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ChatSession>> {
        let title: Option<String> = sqlx::query_scalar("SELECT title FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        let Some(title) = title else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT sender, text, timestamp FROM chat_messages WHERE session_id = ? ORDER BY seq ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let sender: String = row.get("sender");
            let timestamp: String = row.get("timestamp");
            messages.push(Message {
                sender: Sender::parse(&sender)
                    .with_context(|| format!("unknown sender '{}' in session {}", sender, id))?,
                text: row.get("text"),
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .with_context(|| format!("bad timestamp in session {}", id))?
                    .with_timezone(&Utc),
            });
        }

        Ok(Some(ChatSession {
            id: id.to_string(),
            title,
            messages,
        }))
    }

    /// Creates an empty session ahead of the others and makes it active.
    pub async fn new_chat(&self) -> Result<ChatSession> {
        let id = Uuid::new_v4().to_string();
        let next: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(position), 0) + 1 FROM chat_sessions")
                .fetch_one(&self.pool)
                .await?;

        sqlx::query("INSERT INTO chat_sessions (id, title, position, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(NEW_CHAT_TITLE)
            .bind(next)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await?;

        self.set_active(Some(&id)).await?;

        Ok(ChatSession {
            id,
            title: NEW_CHAT_TITLE.to_string(),
            messages: Vec::new(),
        })
    }

    pub async fn select(&self, id: &str) -> Result<()> {
        if !self.exists(id).await? {
            return Err(ChatError::SessionNotFound(id.to_string()).into());
        }
        self.set_active(Some(id)).await
    }

    /// Deletes a session. When it was the active one, the newest remaining
    /// session takes over (or none, when it was the last).
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chat_messages WHERE session_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let res = sqlx::query("DELETE FROM chat_sessions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        if self.active_id().await?.as_deref() == Some(id) {
            let newest: Option<String> =
                sqlx::query_scalar("SELECT id FROM chat_sessions ORDER BY position DESC LIMIT 1")
                    .fetch_optional(&self.pool)
                    .await?;
            self.set_active(newest.as_deref()).await?;
        }

        Ok(res.rows_affected() > 0)
    }

    pub async fn active_id(&self) -> Result<Option<String>> {
        let id: Option<String> = sqlx::query_scalar("SELECT value FROM chat_state WHERE key = ?")
            .bind(ACTIVE_KEY)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    pub async fn active(&self) -> Result<Option<ChatSession>> {
        match self.active_id().await? {
            Some(id) => self.get(&id).await,
            None => Ok(None),
        }
    }

    pub async fn append_message(&self, session_id: &str, message: &Message) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO chat_messages (session_id, seq, sender, text, timestamp)
            VALUES (?, (SELECT COALESCE(MAX(seq), -1) + 1 FROM chat_messages WHERE session_id = ?), ?, ?, ?)
            "#,
        )
        .bind(session_id)
        .bind(session_id)
        .bind(message.sender.as_str())
        .bind(&message.text)
        .bind(message.timestamp.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_title(&self, session_id: &str, title: &str) -> Result<()> {
        sqlx::query("UPDATE chat_sessions SET title = ? WHERE id = ?")
            .bind(title)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let found: Option<String> = sqlx::query_scalar("SELECT id FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    async fn set_active(&self, id: Option<&str>) -> Result<()> {
        match id {
            Some(id) => {
                sqlx::query(
                    r#"
                    INSERT INTO chat_state (key, value) VALUES (?, ?)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value
                    "#,
                )
                .bind(ACTIVE_KEY)
                .bind(id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query("DELETE FROM chat_state WHERE key = ?")
                    .bind(ACTIVE_KEY)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

// ============ Answer backends ============

/// Where the chat flow sends a question.
#[async_trait]
pub trait AnswerBackend: Send + Sync {
    /// Returns the answer text, `None` when the backend replied without one.
    async fn ask(&self, question: &str, context: &str) -> Result<Option<String>>;
}

/// Answers in-process with the rule/model pipeline.
pub struct LocalBackend {
    model: Arc<dyn GenerativeModel>,
    prompt_char_limit: usize,
}

impl LocalBackend {
    pub fn new(model: Arc<dyn GenerativeModel>, prompt_char_limit: usize) -> Self {
        Self {
            model,
            prompt_char_limit,
        }
    }
}

#[async_trait]
impl AnswerBackend for LocalBackend {
    async fn ask(&self, question: &str, context: &str) -> Result<Option<String>> {
        let outcome =
            answer_question(question, context, self.model.as_ref(), self.prompt_char_limit).await;
        Ok(Some(outcome.answer).filter(|a| !a.is_empty()))
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    question: &'a str,
    context: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    answer: Option<String>,
}

/// Posts questions to a remote `/api/chat` endpoint.
///
/// Error statuses still carry an `answer` body, so the status is ignored
/// and only the body decides.
pub struct HttpBackend {
    client: reqwest::Client,
    url: String,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AnswerBackend for HttpBackend {
    async fn ask(&self, question: &str, context: &str) -> Result<Option<String>> {
        let resp = self
            .client
            .post(&self.url)
            .json(&ChatRequest { question, context })
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;

        let body: ChatResponse = resp.json().await.context("invalid chat response")?;
        Ok(body.answer.filter(|a| !a.is_empty()))
    }
}

/// Builds the backend the configuration asks for.
pub fn create_backend(
    config: &Config,
    model: Arc<dyn GenerativeModel>,
) -> Result<Arc<dyn AnswerBackend>> {
    match &config.chat.remote_url {
        Some(url) => Ok(Arc::new(HttpBackend::new(
            url.clone(),
            Duration::from_secs(config.llm.timeout_secs + config.scan.timeout_secs),
        )?)),
        None => Ok(Arc::new(LocalBackend::new(
            model,
            config.llm.prompt_char_limit,
        ))),
    }
}

// ============ Send flow ============

pub struct ChatClient {
    store: ChatStore,
    scanner: Scanner,
    backend: Arc<dyn AnswerBackend>,
    routes: Vec<String>,
    settings: ChatConfig,
}

impl ChatClient {
    pub fn new(
        store: ChatStore,
        scanner: Scanner,
        backend: Arc<dyn AnswerBackend>,
        routes: Vec<String>,
        settings: ChatConfig,
    ) -> Self {
        Self {
            store,
            scanner,
            backend,
            routes,
            settings,
        }
    }

    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// Sends `input` in the active session and returns the bot's reply.
    ///
    /// Blank input, or no active session, is a no-op returning `None`.
    pub async fn send(&self, input: &str) -> Result<Option<Message>> {
        let Some(session_id) = self.store.active_id().await? else {
            tracing::debug!("no active chat session; ignoring message");
            return Ok(None);
        };
        self.send_in(&session_id, input).await
    }

    /// Sends `input` in the session `session_id`, leaving the active session
    /// untouched.
    ///
    /// Blank input returns `None`. An unknown session is a
    /// [`ChatError::SessionNotFound`].
    pub async fn send_in(&self, session_id: &str, input: &str) -> Result<Option<Message>> {
        let question = input.trim();
        if question.is_empty() {
            return Ok(None);
        }
        let Some(session) = self.store.get(session_id).await? else {
            return Err(ChatError::SessionNotFound(session_id.to_string()).into());
        };

        if session.messages.is_empty() {
            let title = truncate_chars(question, self.settings.title_max_chars);
            self.store.set_title(&session.id, title).await?;
        }
        self.store
            .append_message(&session.id, &Message::now(Sender::User, input))
            .await?;

        let context = self.context_for_question().await;
        let reply = self.ask_with_retries(input, &context).await;

        let message = Message::now(Sender::Bot, reply);
        self.store.append_message(&session.id, &message).await?;
        Ok(Some(message))
    }

    /// Cached context, rescanning every route first when the cache is
    /// (nearly) empty.
    async fn context_for_question(&self) -> String {
        let pages = self.scanner.store();
        let mut context = pages.get_combined_context().await;
        if context.trim().chars().count() < self.settings.min_context_chars {
            tracing::info!("page cache is empty; scanning all routes");
            self.scanner.scan_all_routes(&self.routes).await;
            context = pages.get_combined_context().await;
        }
        truncate_chars(&context, self.settings.context_char_limit).to_string()
    }

    /// [`PROCESSING_FAILED`] only when every attempt errored, otherwise
    /// [`NO_PRECISE_ANSWER`].
    async fn ask_with_retries(&self, question: &str, context: &str) -> String {
        let mut failures = 0;
        for attempt in 1..=self.settings.max_attempts {
            match self.backend.ask(question, context).await {
                Ok(Some(answer)) => return answer,
                Ok(None) => tracing::debug!(attempt, "backend returned no answer"),
                Err(e) => {
                    tracing::warn!(attempt, error = %format!("{:#}", e), "answer request failed");
                    failures += 1;
                }
            }
        }

        if failures == self.settings.max_attempts {
            PROCESSING_FAILED.to_string()
        } else {
            NO_PRECISE_ANSWER.to_string()
        }
    }
}
