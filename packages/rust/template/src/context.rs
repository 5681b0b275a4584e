//! Per-chunk render context.

use doctrans_shared::{Chunk, ChunkStatus, Session};
use serde_json::{Value, json};

/// What a template may see of one sibling chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkView {
    pub order: u32,
    pub source_text: String,
    pub translated_text: Option<String>,
    pub status: ChunkStatus,
}

impl ChunkView {
    /// Completed with a translation.
    pub fn is_translated(&self) -> bool {
        self.status == ChunkStatus::Completed && self.translated_text.is_some()
    }
}

impl From<&Chunk> for ChunkView {
    fn from(chunk: &Chunk) -> Self {
        Self {
            order: chunk.order,
            source_text: chunk.source_text.clone(),
            translated_text: chunk.translated_text.clone(),
            status: chunk.status,
        }
    }
}

/// Session fields exposed to templates as `session.*`.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub id: String,
    pub title: String,
    pub memo: Option<String>,
    pub custom_dict: Option<String>,
    pub original_file_name: Option<String>,
    pub total_chunks: u32,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            memo: session.memo.clone(),
            custom_dict: session.custom_dict.clone(),
            original_file_name: session.original_file_name.clone(),
            total_chunks: session.total_chunks,
        }
    }
}

/// The chunk being translated.
#[derive(Debug, Clone, PartialEq)]
pub struct CurrentChunk {
    pub order: u32,
    pub source_text: String,
}

/// The immediately preceding chunk, present only once it is translated.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviousChunk {
    pub order: u32,
    pub source_text: String,
    pub translated_text: String,
}

/// Everything a template can read while translating one chunk.
///
/// Built from a chunk snapshot, so it reflects whatever state the caller
/// passes in rather than what storage currently holds.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslationContext {
    pub session: SessionSummary,
    pub current: CurrentChunk,
    pub previous: Option<PreviousChunk>,
    /// All chunks of the session in ascending order.
    pub chunks: Vec<ChunkView>,
    pub current_order: u32,
}

impl TranslationContext {
    pub fn new(session: &Session, chunks: &[Chunk], current: &Chunk) -> Self {
        let mut views: Vec<ChunkView> = chunks.iter().map(ChunkView::from).collect();
        views.sort_by_key(|c| c.order);

        let previous = current
            .order
            .checked_sub(1)
            .and_then(|order| views.iter().find(|c| c.order == order))
            .filter(|c| c.is_translated())
            .and_then(|c| {
                c.translated_text.as_ref().map(|translated| PreviousChunk {
                    order: c.order,
                    source_text: c.source_text.clone(),
                    translated_text: translated.clone(),
                })
            });

        Self {
            session: SessionSummary::from(session),
            current: CurrentChunk {
                order: current.order,
                source_text: current.source_text.clone(),
            },
            previous,
            chunks: views,
            current_order: current.order,
        }
    }

    /// Root data object the template is evaluated against.
    pub fn to_value(&self) -> Value {
        let previous = match &self.previous {
            Some(p) => json!({
                "order": p.order,
                "sourceText": p.source_text,
                "translatedText": p.translated_text,
            }),
            None => Value::Null,
        };

        let chunks: Vec<Value> = self
            .chunks
            .iter()
            .map(|c| {
                json!({
                    "order": c.order,
                    "sourceText": c.source_text,
                    "translatedText": c.translated_text,
                    "status": c.status.as_str(),
                })
            })
            .collect();

        json!({
            "session": {
                "id": self.session.id,
                "title": self.session.title,
                "memo": self.session.memo,
                "customDict": self.session.custom_dict,
                "originalFileName": self.session.original_file_name,
                "totalChunks": self.session.total_chunks,
            },
            "current": {
                "order": self.current.order,
                "sourceText": self.current.source_text,
            },
            "previous": previous,
            "chunks": chunks,
            "chunkCount": self.chunks.len(),
            "currentOrder": self.current_order,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(statuses: &[(ChunkStatus, Option<&str>)]) -> (Session, Vec<Chunk>) {
        let mut session = Session::new("Novel");
        session.total_chunks = statuses.len() as u32;
        let chunks = statuses
            .iter()
            .enumerate()
            .map(|(i, (status, translated))| {
                let mut c = Chunk::new(&session.id, i as u32, format!("S{i}"));
                c.status = *status;
                c.translated_text = translated.map(str::to_string);
                c
            })
            .collect();
        (session, chunks)
    }

    #[test]
    fn previous_requires_completed_translation() {
        let (session, chunks) = fixture(&[
            (ChunkStatus::Completed, Some("T0")),
            (ChunkStatus::Pending, None),
        ]);
        let ctx = TranslationContext::new(&session, &chunks, &chunks[1]);
        let previous = ctx.previous.as_ref().expect("previous");
        assert_eq!(previous.translated_text, "T0");

        let (session, chunks) = fixture(&[
            (ChunkStatus::Failed, Some("stale")),
            (ChunkStatus::Pending, None),
        ]);
        let ctx = TranslationContext::new(&session, &chunks, &chunks[1]);
        assert!(ctx.previous.is_none());

        let ctx = TranslationContext::new(&session, &chunks, &chunks[0]);
        assert!(ctx.previous.is_none());
    }

    #[test]
    fn root_value_shape() {
        let (session, chunks) = fixture(&[(ChunkStatus::Pending, None)]);
        let ctx = TranslationContext::new(&session, &chunks, &chunks[0]);
        let value = ctx.to_value();
        assert_eq!(value["session"]["title"], "Novel");
        assert_eq!(value["current"]["sourceText"], "S0");
        assert!(value["previous"].is_null());
        assert_eq!(value["chunkCount"], 1);
        assert_eq!(value["currentOrder"], 0);
        assert_eq!(value["chunks"][0]["status"], "pending");
        assert!(value["chunks"][0]["translatedText"].is_null());
    }
}
