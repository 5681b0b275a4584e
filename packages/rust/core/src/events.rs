//! Progress events emitted while a session is translated.

use serde::Serialize;
use tokio::sync::broadcast;

use doctrans_shared::{Chunk, Progress, Session, SessionStatus};

/// Receiver of orchestrator progress events.
///
/// Emit calls happen inline on the translation task, so implementations
/// must return quickly and never block.
pub trait EventSink: Send + Sync {
    /// A chunk was claimed and its LLM call is about to start.
    fn chunk_start(&self, session_id: &str, chunk_id: &str, order: u32);
    /// A chunk reached a terminal state for this attempt.
    fn chunk_progress(&self, session_id: &str, chunk: &Chunk, progress: &Progress);
    /// The session status changed.
    fn session_status(&self, session_id: &str, status: SessionStatus, progress: &Progress);
    /// Every chunk is translated and the assembled text is stored.
    fn session_complete(&self, session_id: &str, session: &Session);
}

/// Owned form of an event, for transports that relay events elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TranslationEvent {
    ChunkStart {
        session_id: String,
        chunk_id: String,
        order: u32,
    },
    ChunkProgress {
        session_id: String,
        chunk: Chunk,
        progress: Progress,
    },
    SessionStatus {
        session_id: String,
        status: SessionStatus,
        progress: Progress,
    },
    SessionComplete {
        session_id: String,
        session: Session,
    },
}

impl TranslationEvent {
    pub fn session_id(&self) -> &str {
        match self {
            Self::ChunkStart { session_id, .. }
            | Self::ChunkProgress { session_id, .. }
            | Self::SessionStatus { session_id, .. }
            | Self::SessionComplete { session_id, .. } => session_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// No-op sink for headless/test usage.
pub struct SilentSink;

impl EventSink for SilentSink {
    fn chunk_start(&self, _session_id: &str, _chunk_id: &str, _order: u32) {}
    fn chunk_progress(&self, _session_id: &str, _chunk: &Chunk, _progress: &Progress) {}
    fn session_status(&self, _session_id: &str, _status: SessionStatus, _progress: &Progress) {}
    fn session_complete(&self, _session_id: &str, _session: &Session) {}
}

/// Fans events out to any number of subscribers.
///
/// Slow receivers lag and lose the oldest events rather than stalling the
/// translation loop. Events sent with no subscriber are dropped.
#[derive(Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<TranslationEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TranslationEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: TranslationEvent) {
        // Err only means nobody is listening.
        let _ = self.tx.send(event);
    }
}

impl EventSink for BroadcastSink {
    fn chunk_start(&self, session_id: &str, chunk_id: &str, order: u32) {
        self.send(TranslationEvent::ChunkStart {
            session_id: session_id.to_string(),
            chunk_id: chunk_id.to_string(),
            order,
        });
    }

    fn chunk_progress(&self, session_id: &str, chunk: &Chunk, progress: &Progress) {
        self.send(TranslationEvent::ChunkProgress {
            session_id: session_id.to_string(),
            chunk: chunk.clone(),
            progress: *progress,
        });
    }

    fn session_status(&self, session_id: &str, status: SessionStatus, progress: &Progress) {
        self.send(TranslationEvent::SessionStatus {
            session_id: session_id.to_string(),
            status,
            progress: *progress,
        });
    }

    fn session_complete(&self, session_id: &str, session: &Session) {
        self.send(TranslationEvent::SessionComplete {
            session_id: session_id.to_string(),
            session: session.clone(),
        });
    }
}
