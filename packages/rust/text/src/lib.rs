//! Plain-text processing for doctrans.
//!
//! - [`split_into_chunks`] splits a source document into size-bounded pieces.
//! - [`clean_translation_output`] normalizes raw LLM output before it is stored.

mod chunker;
mod cleanup;

pub use chunker::{ChunkPiece, normalize_source, split_into_chunks, split_into_pieces};
pub use cleanup::clean_translation_output;
