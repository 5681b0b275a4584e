//! Session service: create, chunk, inspect, edit, assemble, and export.

use tracing::{debug, info, instrument};

use doctrans_shared::{
    Chunk, ChunkStatus, DocTransError, Progress, Result, Session, SessionStatus,
};
use doctrans_storage::{SessionPatch, Storage};
use doctrans_text::{normalize_source, split_into_chunks};

/// Separator placed between chunk translations in the assembled document.
pub const CHUNK_JOINER: &str = "\n\n";

/// Fields for a new session.
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub title: String,
    pub memo: Option<String>,
    pub custom_dict: Option<String>,
    pub original_file_name: Option<String>,
}

/// A session with its chunks and derived progress.
#[derive(Debug, Clone)]
pub struct SessionOverview {
    pub session: Session,
    pub chunks: Vec<Chunk>,
    pub progress: Progress,
}

/// Create a `draft` session.
pub async fn create_session(storage: &Storage, new: NewSession) -> Result<Session> {
    let title = new.title.trim();
    if title.is_empty() {
        return Err(DocTransError::validation("session title must not be empty"));
    }

    let mut session = Session::new(title);
    session.memo = new.memo;
    session.custom_dict = new.custom_dict;
    session.original_file_name = new.original_file_name;

    storage.insert_session(&session).await?;
    info!(session_id = %session.id, title = %session.title, "created session");
    Ok(session)
}

/// Split `source_text` into chunks and atomically replace the session's
/// chunk set. Moves the session to `ready`.
///
/// The session keeps `source_text` as uploaded; only the chunks are cut from
/// the normalized copy.
#[instrument(skip_all, fields(session_id = %session_id, target_size))]
pub async fn chunk_session(
    storage: &Storage,
    session_id: &str,
    source_text: &str,
    target_size: usize,
) -> Result<Session> {
    let session = require_session(storage, session_id).await?;
    if session.status == SessionStatus::Translating {
        return Err(DocTransError::validation(format!(
            "session {session_id} is translating; pause it before re-chunking"
        )));
    }

    let source = normalize_source(source_text);
    let pieces = split_into_chunks(&source, target_size);
    if pieces.is_empty() {
        return Err(DocTransError::validation(
            "source text contains nothing to translate",
        ));
    }

    let chunks: Vec<Chunk> = pieces
        .into_iter()
        .enumerate()
        .map(|(order, text)| Chunk::new(session_id, order as u32, text))
        .collect();

    storage.replace_chunks(session_id, source_text, &chunks).await?;
    info!(chunks = chunks.len(), chars = source.chars().count(), "chunked session");

    require_session(storage, session_id).await
}

/// The session, its ordered chunks, and progress counters.
pub async fn session_overview(storage: &Storage, session_id: &str) -> Result<SessionOverview> {
    let session = require_session(storage, session_id).await?;
    let chunks = storage.list_chunks(session_id).await?;
    let progress = Progress::from_chunks(&chunks);
    Ok(SessionOverview {
        session,
        chunks,
        progress,
    })
}

/// Edit title, memo, custom dictionary, or original file name.
pub async fn update_session_details(
    storage: &Storage,
    session_id: &str,
    patch: SessionPatch,
) -> Result<Session> {
    if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(DocTransError::validation("session title must not be empty"));
    }
    if !patch.is_empty() {
        storage.update_session_details(session_id, &patch).await?;
    }
    require_session(storage, session_id).await
}

/// Delete a session and its chunks.
pub async fn delete_session(storage: &Storage, session_id: &str) -> Result<()> {
    let session = require_session(storage, session_id).await?;
    if session.status == SessionStatus::Translating {
        return Err(DocTransError::validation(format!(
            "session {session_id} is translating; pause it before deleting"
        )));
    }
    storage.delete_session(session_id).await?;
    info!(session_id, "deleted session");
    Ok(())
}

/// The translated document of a completed session.
pub async fn export_translation(storage: &Storage, session_id: &str) -> Result<String> {
    let session = require_session(storage, session_id).await?;
    if session.status != SessionStatus::Completed {
        return Err(DocTransError::validation(format!(
            "session {session_id} is {}; only completed sessions can be exported",
            session.status
        )));
    }

    match session.translated_text {
        Some(text) => Ok(text),
        None => assemble_translation(storage, session_id).await?.ok_or_else(|| {
            DocTransError::validation(format!(
                "session {session_id} is marked completed but has untranslated chunks"
            ))
        }),
    }
}

/// Join every chunk translation in order and store the result on the session.
///
/// Returns `None`, and stores nothing, unless every chunk is completed
/// with a translation.
pub async fn assemble_translation(storage: &Storage, session_id: &str) -> Result<Option<String>> {
    let chunks = storage.list_chunks(session_id).await?;
    let Some(text) = join_translations(&chunks) else {
        debug!(session_id, "session not fully translated; skipping assembly");
        return Ok(None);
    };

    storage.set_translated_text(session_id, Some(&text)).await?;
    debug!(session_id, chars = text.chars().count(), "assembled translation");
    Ok(Some(text))
}

/// Chunk translations joined in order, if all chunks are translated.
pub fn join_translations(chunks: &[Chunk]) -> Option<String> {
    if chunks.is_empty() {
        return None;
    }

    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.order);

    let parts = ordered
        .into_iter()
        .map(|c| match (&c.status, &c.translated_text) {
            (ChunkStatus::Completed, Some(text)) => Some(text.as_str()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join(CHUNK_JOINER))
}

pub(crate) async fn require_session(storage: &Storage, session_id: &str) -> Result<Session> {
    storage
        .get_session(session_id)
        .await?
        .ok_or_else(|| DocTransError::not_found("session", session_id))
}

pub(crate) async fn require_chunk(storage: &Storage, chunk_id: &str) -> Result<Chunk> {
    storage
        .get_chunk(chunk_id)
        .await?
        .ok_or_else(|| DocTransError::not_found("chunk", chunk_id))
}
