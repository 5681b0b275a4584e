//! Translation orchestrator: drives chunks through the LLM one at a time.
//!
//! Two sources of truth are kept apart on purpose:
//!
//! - **Cancellation** comes from the session status in storage, re-read
//!   before every chunk. A pause issued by any process is seen at the next
//!   checkpoint.
//! - **Render context** comes from a local chunk snapshot patched after each
//!   chunk, so chunk N sees the translation this run just produced for N-1
//!   without reading it back.
//!
//! The two can disagree until the loop's own writes reconcile them.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use doctrans_llm::LlmClient;
use doctrans_shared::{
    Chunk, ChunkOutcome, ChunkResult, ChunkStatus, DocTransError, Progress, Result, Session,
    SessionStatus, Template,
};
use doctrans_storage::Storage;
use doctrans_template::{RenderOptions, TranslationContext};
use doctrans_text::clean_translation_output;

use crate::events::EventSink;
use crate::prompt::PromptBuilder;
use crate::registry::{RunGuard, RunRegistry};
use crate::session::{assemble_translation, require_chunk, require_session};
use crate::templates::resolve_template;

/// Mark a `translating` session as `paused`.
///
/// Needs no LLM client, so a separate process can pause a run it does not own.
pub async fn pause_session(
    storage: &Storage,
    events: &dyn EventSink,
    session_id: &str,
) -> Result<()> {
    let session = require_session(storage, session_id).await?;
    if session.status != SessionStatus::Translating {
        return Err(DocTransError::validation(format!(
            "cannot pause session {session_id}: status is {}, expected translating",
            session.status
        )));
    }
    let chunks = storage.list_chunks(session_id).await?;
    storage
        .update_session_status(session_id, SessionStatus::Paused)
        .await?;
    events.session_status(
        session_id,
        SessionStatus::Paused,
        &Progress::from_chunks(&chunks),
    );
    info!(session_id, "pause requested");
    Ok(())
}

/// Outcome of one orchestrator run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub session_id: String,
    pub final_status: SessionStatus,
    /// Chunks attempted by this run.
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
    /// The run stopped early because the session was paused.
    pub halted: bool,
}

/// A run executing in the background.
#[derive(Debug)]
pub struct RunHandle {
    session_id: String,
    handle: JoinHandle<Result<RunSummary>>,
}

impl RunHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to end.
    pub async fn wait(self) -> Result<RunSummary> {
        self.handle.await.map_err(|e| {
            DocTransError::Storage(format!(
                "translation task for session {} ended abnormally: {e}",
                self.session_id
            ))
        })?
    }
}

/// Coordinates storage, the LLM client, and event emission.
///
/// Cheap to clone; clones share the run registry, so single-flight holds
/// across every clone of one translator.
#[derive(Clone)]
pub struct Translator {
    storage: Arc<Storage>,
    llm: Arc<dyn LlmClient>,
    events: Arc<dyn EventSink>,
    registry: RunRegistry,
    strict_templates: bool,
}

impl Translator {
    pub fn new(storage: Arc<Storage>, llm: Arc<dyn LlmClient>, events: Arc<dyn EventSink>) -> Self {
        Self {
            storage,
            llm,
            events,
            registry: RunRegistry::new(),
            strict_templates: false,
        }
    }

    /// Render templates in strict mode.
    pub fn with_strict_templates(mut self, strict: bool) -> Self {
        self.strict_templates = strict;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    // -----------------------------------------------------------------------
    // Session-level operations
    // -----------------------------------------------------------------------

    /// Begin translating a freshly chunked (`ready`) session in the background.
    pub async fn start_translation(&self, session_id: &str, template_id: &str) -> Result<RunHandle> {
        let session = require_session(&self.storage, session_id).await?;
        if session.status != SessionStatus::Ready {
            return Err(DocTransError::validation(format!(
                "cannot start session {session_id}: status is {}, expected ready",
                session.status
            )));
        }
        let template = resolve_template(&self.storage, template_id).await?;
        let guard = self.registry.try_acquire(session_id)?;
        Ok(self.spawn_run(guard, template))
    }

    /// Continue a `paused` or `failed` session in the background.
    pub async fn resume_translation(&self, session_id: &str, template_id: &str) -> Result<RunHandle> {
        let session = require_session(&self.storage, session_id).await?;
        if !session.status.is_resumable() {
            return Err(DocTransError::validation(format!(
                "cannot resume session {session_id}: status is {}, expected paused or failed",
                session.status
            )));
        }
        let template = resolve_template(&self.storage, template_id).await?;
        let guard = self.registry.try_acquire(session_id)?;
        Ok(self.spawn_run(guard, template))
    }

    /// Ask a running session to stop after its in-flight chunk.
    ///
    /// Only flips the durable status; the loop notices at its next checkpoint.
    pub async fn pause_translation(&self, session_id: &str) -> Result<()> {
        pause_session(&self.storage, self.events.as_ref(), session_id).await
    }

    /// Translate every pending or failed chunk of a session, in order.
    pub async fn translate_all_pending_chunks(
        &self,
        session_id: &str,
        template: &Template,
    ) -> Result<RunSummary> {
        let _guard = self.registry.try_acquire(session_id)?;
        self.run_pending(session_id, template).await
    }

    fn spawn_run(&self, guard: RunGuard, template: Template) -> RunHandle {
        let session_id = guard.session_id().to_string();
        let translator = self.clone();
        let run_session = session_id.clone();

        let handle = tokio::spawn(async move {
            let _guard = guard;
            let result = translator.run_pending(&run_session, &template).await;
            if let Err(e) = &result {
                warn!(session_id = %run_session, error = %e, "translation run aborted");
            }
            result
        });

        RunHandle { session_id, handle }
    }

    #[instrument(skip_all, fields(session_id = %session_id, template_id = %template.id, model = %self.llm.model()))]
    async fn run_pending(&self, session_id: &str, template: &Template) -> Result<RunSummary> {
        let started = Instant::now();
        let session = require_session(&self.storage, session_id).await?;
        if session.status == SessionStatus::Draft {
            return Err(DocTransError::validation(format!(
                "session {session_id} has no chunks yet; import source text first"
            )));
        }

        // Safe: the registry guarantees no live run in this process owns them.
        let recovered = self.storage.reset_processing_chunks(session_id).await?;
        if recovered > 0 {
            warn!(recovered, "released chunks left in processing by an interrupted run");
        }

        let mut chunks = self.storage.list_chunks(session_id).await?;
        self.set_status(session_id, SessionStatus::Translating, &chunks).await?;

        let work: Vec<usize> = chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status.needs_work())
            .map(|(i, _)| i)
            .collect();

        let mut summary = RunSummary {
            session_id: session_id.to_string(),
            final_status: SessionStatus::Translating,
            processed: 0,
            completed: 0,
            failed: 0,
            halted: false,
        };

        if work.is_empty() {
            info!("no pending chunks; marking session completed");
            self.set_status(session_id, SessionStatus::Completed, &chunks).await?;
            assemble_translation(&self.storage, session_id).await?;
            summary.final_status = SessionStatus::Completed;
            return Ok(summary);
        }

        info!(total = chunks.len(), pending = work.len(), "translation run started");
        let builder = self.prompt_builder(template);

        for &index in &work {
            if self.current_status(session_id).await? == SessionStatus::Paused {
                info!(processed = summary.processed, "session paused; halting run");
                summary.halted = true;
                break;
            }

            let result = self
                .process_chunk(&builder, &session, &mut chunks, index)
                .await?;
            summary.processed += 1;
            if result.is_failed() {
                summary.failed += 1;
            } else {
                summary.completed += 1;
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;

        if self.current_status(session_id).await? == SessionStatus::Paused {
            // The pause already emitted its own status event.
            summary.final_status = SessionStatus::Paused;
            summary.halted = true;
            info!(processed = summary.processed, elapsed_ms, "translation run paused");
            return Ok(summary);
        }

        let final_status = if summary.processed < work.len() {
            SessionStatus::Paused
        } else if summary.failed > 0 {
            SessionStatus::Failed
        } else {
            SessionStatus::Completed
        };

        self.set_status(session_id, final_status, &chunks).await?;
        if final_status == SessionStatus::Completed {
            self.finish_session(session_id).await?;
        }

        summary.final_status = final_status;
        info!(
            status = %final_status,
            completed = summary.completed,
            failed = summary.failed,
            elapsed_ms,
            "translation run finished"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Chunk-level operations
    // -----------------------------------------------------------------------

    /// Retry one failed chunk and assemble the session if it was the last
    /// one outstanding.
    pub async fn retry_failed_chunk(&self, chunk_id: &str, template_id: &str) -> Result<ChunkResult> {
        let chunk = require_chunk(&self.storage, chunk_id).await?;
        if chunk.status != ChunkStatus::Failed {
            return Err(DocTransError::validation(format!(
                "chunk {chunk_id} is {}; only failed chunks can be retried",
                chunk.status
            )));
        }
        let template = resolve_template(&self.storage, template_id).await?;
        let _guard = self.registry.try_acquire(&chunk.session_id)?;

        self.storage
            .reset_chunk_pending(chunk_id, ChunkStatus::Failed)
            .await?;
        self.run_single(&chunk.session_id, chunk_id, &template).await
    }

    /// Translate one chunk directly, whatever its state unless it is in flight.
    pub async fn translate_chunk(&self, chunk_id: &str, template_id: &str) -> Result<ChunkResult> {
        let chunk = require_chunk(&self.storage, chunk_id).await?;
        if chunk.status == ChunkStatus::Processing {
            return Err(DocTransError::validation(format!(
                "chunk {chunk_id} is already being translated"
            )));
        }
        let template = resolve_template(&self.storage, template_id).await?;
        let _guard = self.registry.try_acquire(&chunk.session_id)?;

        self.run_single(&chunk.session_id, chunk_id, &template).await
    }

    #[instrument(skip_all, fields(session_id = %session_id, chunk_id = %chunk_id))]
    async fn run_single(
        &self,
        session_id: &str,
        chunk_id: &str,
        template: &Template,
    ) -> Result<ChunkResult> {
        let session = require_session(&self.storage, session_id).await?;
        let mut chunks = self.storage.list_chunks(session_id).await?;
        let index = chunks
            .iter()
            .position(|c| c.id == chunk_id)
            .ok_or_else(|| DocTransError::not_found("chunk", chunk_id))?;

        let builder = self.prompt_builder(template);
        let result = self
            .process_chunk(&builder, &session, &mut chunks, index)
            .await?;

        self.settle_session(session_id, &chunks).await?;
        Ok(result)
    }

    /// Bring the session status in line with its chunks after a single-chunk
    /// operation.
    async fn settle_session(&self, session_id: &str, chunks: &[Chunk]) -> Result<()> {
        let status = self.current_status(session_id).await?;
        let all_done = chunks.iter().all(Chunk::is_translated);

        match (all_done, status) {
            (true, SessionStatus::Completed) => {
                // Re-translated a chunk of a finished session.
                assemble_translation(&self.storage, session_id).await?;
            }
            (true, SessionStatus::Translating) => {
                // A full run owns this session and will finish it.
            }
            (true, _) => {
                self.set_status(session_id, SessionStatus::Completed, chunks).await?;
                self.finish_session(session_id).await?;
            }
            (false, SessionStatus::Completed) => {
                self.storage.set_translated_text(session_id, None).await?;
                self.set_status(session_id, SessionStatus::Failed, chunks).await?;
            }
            (false, _) => {
                debug!(session_id, "session still has outstanding chunks");
            }
        }
        Ok(())
    }

    /// Claim, translate, and record one chunk, patching `chunks[index]`.
    ///
    /// Prompt and provider failures become a failed chunk; anything else is
    /// returned and aborts the caller.
    async fn process_chunk(
        &self,
        builder: &PromptBuilder,
        session: &Session,
        chunks: &mut [Chunk],
        index: usize,
    ) -> Result<ChunkResult> {
        let session_id = session.id.as_str();
        let chunk_id = chunks[index].id.clone();
        let order = chunks[index].order;

        self.storage
            .mark_chunk_processing(&chunk_id, chunks[index].status)
            .await?;
        chunks[index].status = ChunkStatus::Processing;
        chunks[index].error_message = None;
        self.events.chunk_start(session_id, &chunk_id, order);
        debug!(chunk_id = %chunk_id, order, "translating chunk");

        let started = Instant::now();
        let ctx = TranslationContext::new(session, chunks, &chunks[index]);
        let attempt = self.attempt(builder, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match attempt {
            Ok((text, tokens)) => {
                self.storage
                    .complete_chunk(&chunk_id, &text, tokens, elapsed_ms)
                    .await?;
                let chunk = &mut chunks[index];
                chunk.status = ChunkStatus::Completed;
                chunk.translated_text = Some(text.clone());
                chunk.token_count = tokens;
                chunk.processing_time = Some(elapsed_ms);
                debug!(chunk_id = %chunk_id, order, elapsed_ms, "chunk translated");
                ChunkOutcome::Completed {
                    translated_text: text,
                }
            }
            Err(e) if e.is_chunk_scoped() => {
                let message = e.to_string();
                warn!(chunk_id = %chunk_id, order, error = %message, "chunk failed");
                self.storage
                    .fail_chunk(&chunk_id, &message, elapsed_ms)
                    .await?;
                let chunk = &mut chunks[index];
                chunk.status = ChunkStatus::Failed;
                chunk.error_message = Some(message.clone());
                chunk.retry_count += 1;
                chunk.processing_time = Some(elapsed_ms);
                ChunkOutcome::Failed {
                    error_message: message,
                }
            }
            Err(e) => return Err(e),
        };

        let progress = Progress::from_chunks(chunks);
        self.events.chunk_progress(session_id, &chunks[index], &progress);

        Ok(ChunkResult {
            chunk_id,
            order,
            outcome,
        })
    }

    /// Render, parse, adapt, call the LLM, and clean the output.
    async fn attempt(
        &self,
        builder: &PromptBuilder,
        ctx: &TranslationContext,
    ) -> Result<(String, Option<u64>)> {
        let prompt = builder.build(ctx)?;
        let generation = self.llm.generate_content(&prompt).await?;

        let text = clean_translation_output(&generation.text);
        if text.is_empty() {
            return Err(DocTransError::provider(
                None,
                Some("empty_response"),
                "model output was empty after cleanup",
            ));
        }

        let tokens = (generation.usage.total_tokens > 0).then_some(generation.usage.total_tokens);
        Ok((text, tokens))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn prompt_builder(&self, template: &Template) -> PromptBuilder {
        let options = if self.strict_templates {
            RenderOptions::strict()
        } else {
            RenderOptions::default()
        };
        PromptBuilder::with_options(template, options)
    }

    /// Durable status; the cancellation source of truth.
    async fn current_status(&self, session_id: &str) -> Result<SessionStatus> {
        self.storage
            .get_session_status(session_id)
            .await?
            .ok_or_else(|| DocTransError::not_found("session", session_id))
    }

    async fn set_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        chunks: &[Chunk],
    ) -> Result<()> {
        self.storage.update_session_status(session_id, status).await?;
        self.events
            .session_status(session_id, status, &Progress::from_chunks(chunks));
        Ok(())
    }

    /// Assemble and announce a session that just became completed.
    async fn finish_session(&self, session_id: &str) -> Result<()> {
        if assemble_translation(&self.storage, session_id).await?.is_none() {
            warn!(session_id, "completed session could not be assembled");
            return Ok(());
        }
        let session = require_session(&self.storage, session_id).await?;
        self.events.session_complete(session_id, &session);
        info!(session_id, "session complete");
        Ok(())
    }
}
