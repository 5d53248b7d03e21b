//! Core data models used throughout docqa.
//!
//! These types represent the conversation turns, document chunks, and
//! retrieval results that flow between the job queue, the retrieval engine,
//! and the ingestion pipeline.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::QaError;

/// Longest accepted session identifier, in characters.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Metadata attached to a chunk (`source` plus extracted fields).
pub type Metadata = Map<String, Value>;

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = QaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Role::System),
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(QaError::validation(format!("unknown role: {other}"))),
        }
    }
}

/// One message in a conversation.
///
/// `duration` is the generation latency in seconds and is only set on
/// assistant turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            duration: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            duration: None,
        }
    }

    pub fn assistant(content: impl Into<String>, duration: f64) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            duration: Some(duration),
        }
    }
}

/// A bounded slice of a source document plus its embedding and metadata.
///
/// Produced once at ingestion time and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
}

impl Chunk {
    /// The `source` metadata field, if present.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// A chunk returned from similarity search with its cosine similarity.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity: f32,
}

/// A retrieval result: resolved source path plus the chunk's metadata.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub source_path: PathBuf,
    pub metadata: Metadata,
}

/// Terminal success value of a chat job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatReply {
    pub response: String,
    /// Generation latency in seconds, excluding time spent waiting for the backend.
    pub duration: f64,
}

/// Reject session ids that are empty, too long, or contain whitespace or
/// control characters.
pub fn validate_session_id(session_id: &str) -> Result<(), QaError> {
    if session_id.is_empty() {
        return Err(QaError::validation("session_id must not be empty"));
    }
    if session_id.chars().count() > MAX_SESSION_ID_LEN {
        return Err(QaError::validation(format!(
            "session_id longer than {MAX_SESSION_ID_LEN} characters"
        )));
    }
    if session_id
        .chars()
        .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(QaError::validation(
            "session_id must not contain whitespace or control characters",
        ));
    }
    Ok(())
}
