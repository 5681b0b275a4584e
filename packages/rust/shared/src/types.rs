//! Core domain types for doctrans translation sessions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DocTransError;

/// Generate a new time-sortable identifier (UUID v7).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Lifecycle status of a translation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Draft,
    Ready,
    Translating,
    Paused,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Ready => "ready",
            Self::Translating => "translating",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Statuses from which a stopped run may be resumed.
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Paused | Self::Failed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = DocTransError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "ready" => Ok(Self::Ready),
            "translating" => Ok(Self::Translating),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DocTransError::Storage(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}

/// Lifecycle status of a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChunkStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the chunk state machine allows `self -> next`.
    ///
    /// `processing -> pending` only happens when a run recovers claims left
    /// behind by a process that died mid-call. `completed -> processing` is a
    /// direct re-translation.
    pub fn can_transition_to(&self, next: ChunkStatus) -> bool {
        use ChunkStatus::*;
        matches!(
            (*self, next),
            (Pending, Processing)
                | (Failed, Processing)
                | (Completed, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Pending)
                | (Failed, Pending)
        )
    }

    /// Whether a run should pick this chunk up.
    pub fn needs_work(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ChunkStatus {
    type Err = DocTransError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(DocTransError::Storage(format!(
                "unknown chunk status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One document-translation job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Free-form glossary / custom dictionary handed to templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_dict: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub status: SessionStatus,
    pub total_chunks: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// A fresh draft session with no text attached.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            title: title.into(),
            memo: None,
            custom_dict: None,
            original_file_name: None,
            source_text: None,
            translated_text: None,
            status: SessionStatus::Draft,
            total_chunks: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A bounded slice of a session's source text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// Back-reference to the owning session.
    pub session_id: String,
    pub order: u32,
    pub source_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<String>,
    pub status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub retry_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u64>,
    /// Wall-clock time of the last attempt, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Chunk {
    /// A pending chunk at `order` for `session_id`.
    pub fn new(session_id: &str, order: u32, source_text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            session_id: session_id.to_string(),
            order,
            source_text: source_text.into(),
            translated_text: None,
            status: ChunkStatus::Pending,
            error_message: None,
            retry_count: 0,
            token_count: None,
            processing_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Completed with a stored translation.
    pub fn is_translated(&self) -> bool {
        self.status == ChunkStatus::Completed && self.translated_text.is_some()
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A prompt template rendering chunk context into a ChatML document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub title: String,
    pub source_language: String,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Raw template text.
    pub content: String,
}

// ---------------------------------------------------------------------------
// Progress & results
// ---------------------------------------------------------------------------

/// Session-wide progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub completed: u32,
    pub failed: u32,
    /// Everything neither completed nor failed (including in-flight chunks).
    pub pending: u32,
    pub total: u32,
    /// Rounded completion percentage, 0..=100.
    pub percent: u32,
}

impl Progress {
    /// Recompute counters from a chunk list.
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let total = chunks.len() as u32;
        let completed = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Completed)
            .count() as u32;
        let failed = chunks
            .iter()
            .filter(|c| c.status == ChunkStatus::Failed)
            .count() as u32;
        let percent = if total == 0 {
            0
        } else {
            ((completed as f64 * 100.0) / total as f64).round() as u32
        };
        Self {
            completed,
            failed,
            pending: total - completed - failed,
            total,
            percent,
        }
    }
}

/// Terminal outcome of one chunk attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChunkOutcome {
    Completed { translated_text: String },
    Failed { error_message: String },
}

/// Result of translating a single chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_id: String,
    pub order: u32,
    #[serde(flatten)]
    pub outcome: ChunkOutcome,
}

impl ChunkResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ChunkOutcome::Failed { .. })
    }
}

// ---------------------------------------------------------------------------
// Provider-neutral prompt
// ---------------------------------------------------------------------------

/// Speaker of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Model,
}

/// One ordered conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
}

/// A provider-neutral request: optional system instruction plus ordered turns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<String>,
    pub turns: Vec<Turn>,
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// A completed LLM generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub usage: Usage,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk_with(order: u32, status: ChunkStatus) -> Chunk {
        let mut c = Chunk::new("s1", order, format!("source {order}"));
        c.status = status;
        c
    }

    #[test]
    fn status_strings_roundtrip() {
        for status in [
            SessionStatus::Draft,
            SessionStatus::Ready,
            SessionStatus::Translating,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<SessionStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<ChunkStatus>().is_err());
    }

    #[test]
    fn chunk_state_machine() {
        assert!(ChunkStatus::Pending.can_transition_to(ChunkStatus::Processing));
        assert!(ChunkStatus::Processing.can_transition_to(ChunkStatus::Completed));
        assert!(ChunkStatus::Failed.can_transition_to(ChunkStatus::Pending));
        assert!(!ChunkStatus::Pending.can_transition_to(ChunkStatus::Completed));
        assert!(!ChunkStatus::Completed.can_transition_to(ChunkStatus::Failed));
        assert!(ChunkStatus::Completed.can_transition_to(ChunkStatus::Processing));
        assert!(!ChunkStatus::Completed.can_transition_to(ChunkStatus::Pending));
        assert!(!ChunkStatus::Processing.can_transition_to(ChunkStatus::Processing));
    }

    #[test]
    fn progress_counts() {
        let chunks = vec![
            chunk_with(0, ChunkStatus::Completed),
            chunk_with(1, ChunkStatus::Failed),
            chunk_with(2, ChunkStatus::Processing),
        ];
        let p = Progress::from_chunks(&chunks);
        assert_eq!(p.completed, 1);
        assert_eq!(p.failed, 1);
        assert_eq!(p.pending, 1);
        assert_eq!(p.total, 3);
        assert_eq!(p.percent, 33);

        assert_eq!(Progress::from_chunks(&[]).percent, 0);
    }

    #[test]
    fn chunk_result_serialization() {
        let r = ChunkResult {
            chunk_id: "c1".into(),
            order: 2,
            outcome: ChunkOutcome::Failed {
                error_message: "quota".into(),
            },
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error_message"], "quota");
        assert!(r.is_failed());
    }
}
