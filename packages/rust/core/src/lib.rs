//! Core domain logic for doctrans.
//!
//! This crate ties together chunking, prompt templates, ChatML, the LLM
//! client, and storage into the translation workflow: sessions are created
//! and chunked by the [`session`] service, then driven chunk by chunk
//! through the LLM by the [`Translator`].

pub mod events;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
pub mod session;
pub mod templates;

pub use events::{BroadcastSink, EventSink, SilentSink, TranslationEvent};
pub use orchestrator::{RunHandle, RunSummary, Translator, pause_session};
pub use prompt::{PromptBuilder, build_prompt};
pub use registry::{RunGuard, RunRegistry};
pub use session::{NewSession, SessionOverview};
pub use templates::{DEFAULT_TEMPLATE_ID, default_template, resolve_template, save_template};
