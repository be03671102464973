//! Core data models used throughout the assistant.
//!
//! These are the cached page texts and the chat transcripts that flow between
//! the scanner, the answer pipeline and the HTTP server.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Extracted text for one dashboard route, as stored in the page cache.
#[derive(Debug, Clone, Serialize)]
pub struct PageEntry {
    /// Route path (e.g. `/inventory`) or a caller-chosen key.
    pub key: String,
    pub text: String,
    pub digest: String,
    pub scanned_at: DateTime<Utc>,
}

/// Who wrote a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Sender::User),
            "bot" => Some(Sender::Bot),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn now(sender: Sender, text: impl Into<String>) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A named chat transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
}

/// Outcome of a scan pass over one or more routes.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    /// Keys whose text was stored.
    pub scanned: Vec<String>,
    /// Subset of `scanned` whose text differs from the previous scan.
    pub changed: Vec<String>,
    /// Keys that could not be fetched or read.
    pub failed: Vec<String>,
}
