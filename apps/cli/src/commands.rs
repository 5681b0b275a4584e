//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use doctrans_core::session::{self, NewSession};
use doctrans_core::{
    DEFAULT_TEMPLATE_ID, EventSink, RunSummary, SilentSink, Translator, default_template,
    pause_session, save_template,
};
use doctrans_llm::OpenRouterClient;
use doctrans_shared::{
    AppConfig, Chunk, ChunkOutcome, ChunkStatus, LlmSettings, Progress, Session, SessionStatus,
    Template, database_path, init_config, load_config, new_id, validate_api_key,
};
use doctrans_storage::{SessionPatch, Storage};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// doctrans: translate long documents chunk by chunk with an LLM.
#[derive(Parser)]
#[command(
    name = "doctrans",
    version,
    about = "Translate long documents chunk by chunk with an LLM, with pause, resume, and retry.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `defaults.database_path`).
    #[arg(long, global = true, env = "DOCTRANS_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create, inspect, and delete translation sessions.
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Load a source document into a session and split it into chunks.
    Import {
        /// Session ID.
        id: String,

        /// UTF-8 text file to translate.
        file: PathBuf,

        /// Target chunk size in characters (defaults to `defaults.chunk_size`).
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Translate a session (starts a ready session or resumes a paused/failed one).
    Translate {
        /// Session ID.
        id: String,

        /// Template ID (defaults to `defaults.default_template`, then "default").
        #[arg(short, long)]
        template: Option<String>,

        /// Model ID (defaults to `openrouter.default_model`).
        #[arg(short, long)]
        model: Option<String>,

        /// Fail chunks whose template references unknown variables or helpers.
        #[arg(long)]
        strict: bool,
    },

    /// Pause a running translation after its in-flight chunk.
    Pause {
        /// Session ID.
        id: String,
    },

    /// Retry a failed chunk.
    Retry {
        /// Chunk ID.
        chunk_id: String,

        /// Template ID (defaults to `defaults.default_template`, then "default").
        #[arg(short, long)]
        template: Option<String>,

        /// Model ID (defaults to `openrouter.default_model`).
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Write the translated document of a completed session.
    Export {
        /// Session ID.
        id: String,

        /// Output file (defaults to stdout).
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Manage prompt templates.
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Session subcommands.
#[derive(Subcommand)]
pub(crate) enum SessionAction {
    /// Create a new draft session.
    New {
        /// Session title.
        #[arg(long)]
        title: String,

        /// Free-form notes handed to templates as `session.memo`.
        #[arg(long)]
        memo: Option<String>,

        /// Glossary file handed to templates as `session.customDict`.
        #[arg(long)]
        dict: Option<PathBuf>,
    },
    /// List all sessions.
    List,
    /// Show a session with per-chunk status.
    Show {
        /// Session ID.
        id: String,

        /// Print as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Delete a session and its chunks.
    Delete {
        /// Session ID.
        id: String,
    },
}

/// Template subcommands.
#[derive(Subcommand)]
pub(crate) enum TemplateAction {
    /// Add a template from a file.
    Add {
        /// Template file.
        file: PathBuf,

        /// Template ID (generated when omitted).
        #[arg(long)]
        id: Option<String>,

        #[arg(long)]
        title: String,

        #[arg(long)]
        source_lang: String,

        #[arg(long)]
        target_lang: String,

        #[arg(long)]
        description: Option<String>,
    },
    /// Install the built-in template under the ID "default".
    Default {
        /// Source language, or "auto".
        #[arg(long, default_value = "auto")]
        source_lang: String,

        /// Target language.
        #[arg(long, default_value = "English")]
        target_lang: String,
    },
    /// List templates.
    List,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "doctrans=info",
        1 => "doctrans=debug",
        _ => "doctrans=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let db = cli.db.as_deref();
    match cli.command {
        Command::Session { action } => match action {
            SessionAction::New { title, memo, dict } => {
                cmd_session_new(db, title, memo, dict.as_deref()).await
            }
            SessionAction::List => cmd_session_list(db).await,
            SessionAction::Show { id, json } => cmd_session_show(db, &id, json).await,
            SessionAction::Delete { id } => cmd_session_delete(db, &id).await,
        },
        Command::Import {
            id,
            file,
            chunk_size,
        } => cmd_import(db, &id, &file, chunk_size).await,
        Command::Translate {
            id,
            template,
            model,
            strict,
        } => cmd_translate(db, &id, template, model, strict).await,
        Command::Pause { id } => cmd_pause(db, &id).await,
        Command::Retry {
            chunk_id,
            template,
            model,
        } => cmd_retry(db, &chunk_id, template, model).await,
        Command::Export { id, out } => cmd_export(db, &id, out.as_deref()).await,
        Command::Template { action } => match action {
            TemplateAction::Add {
                file,
                id,
                title,
                source_lang,
                target_lang,
                description,
            } => {
                cmd_template_add(db, &file, id, title, source_lang, target_lang, description)
                    .await
            }
            TemplateAction::Default {
                source_lang,
                target_lang,
            } => cmd_template_default(db, &source_lang, &target_lang).await,
            TemplateAction::List => cmd_template_list(db).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn resolve_db_path(config: &AppConfig, db: Option<&Path>) -> Result<PathBuf> {
    match db {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(database_path(config)?),
    }
}

async fn open_storage(config: &AppConfig, db: Option<&Path>) -> Result<Storage> {
    let path = resolve_db_path(config, db)?;
    Ok(Storage::open(&path).await?)
}

async fn open_storage_readonly(config: &AppConfig, db: Option<&Path>) -> Result<Storage> {
    let path = resolve_db_path(config, db)?;
    Ok(Storage::open_readonly(&path).await?)
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).wrap_err_with(|| format!("cannot read '{}'", path.display()))
}

fn template_id(config: &AppConfig, explicit: Option<String>) -> String {
    explicit
        .or_else(|| config.defaults.default_template.clone())
        .unwrap_or_else(|| DEFAULT_TEMPLATE_ID.to_string())
}

/// Build a translator wired to OpenRouter and a progress bar.
fn build_translator(
    config: &AppConfig,
    storage: Arc<Storage>,
    model: Option<String>,
    total_chunks: u32,
) -> Result<(Translator, Arc<CliProgress>)> {
    validate_api_key(config)?;
    let mut settings = LlmSettings::from_config(config)?;
    if let Some(model) = model {
        settings.model = model;
    }
    info!(model = %settings.model, base_url = %settings.base_url, "using LLM provider");

    let llm = Arc::new(OpenRouterClient::new(settings)?);
    let progress = Arc::new(CliProgress::new(total_chunks));
    let translator = Translator::new(storage, llm, progress.clone());
    Ok((translator, progress))
}

// ---------------------------------------------------------------------------
// Session commands
// ---------------------------------------------------------------------------

async fn cmd_session_new(
    db: Option<&Path>,
    title: String,
    memo: Option<String>,
    dict: Option<&Path>,
) -> Result<()> {
    let config = load_config()?;
    let custom_dict = dict.map(read_text).transpose()?;
    let storage = open_storage(&config, db).await?;

    let session = session::create_session(
        &storage,
        NewSession {
            title,
            memo,
            custom_dict,
            original_file_name: None,
        },
    )
    .await?;

    println!("{}", session.id);
    Ok(())
}

async fn cmd_session_list(db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config, db).await?;
    let sessions = storage.list_sessions().await?;

    if sessions.is_empty() {
        println!("No sessions. Create one with `doctrans session new --title ...`.");
        return Ok(());
    }

    println!("{:<36}  {:<11}  {:>6}  TITLE", "ID", "STATUS", "CHUNKS");
    for s in &sessions {
        println!(
            "{:<36}  {:<11}  {:>6}  {}",
            s.id, s.status, s.total_chunks, s.title
        );
    }
    Ok(())
}

async fn cmd_session_show(db: Option<&Path>, id: &str, json: bool) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config, db).await?;
    let overview = session::session_overview(&storage, id).await?;

    if json {
        let value = serde_json::json!({
            "session": overview.session,
            "chunks": overview.chunks,
            "progress": overview.progress,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let s = &overview.session;
    let p = &overview.progress;
    println!();
    println!("  Title:    {}", s.title);
    println!("  ID:       {}", s.id);
    println!("  Status:   {}", s.status);
    if let Some(file) = &s.original_file_name {
        println!("  File:     {file}");
    }
    println!(
        "  Progress: {}/{} completed, {} failed, {} pending ({}%)",
        p.completed, p.total, p.failed, p.pending, p.percent
    );
    println!("  Updated:  {}", s.updated_at.to_rfc3339());
    println!();

    if !overview.chunks.is_empty() {
        println!("  {:>5}  {:<10}  {:>5}  {:>7}  ID / ERROR", "ORDER", "STATUS", "TRIES", "CHARS");
        for chunk in &overview.chunks {
            print_chunk_row(chunk);
        }
        println!();
    }
    Ok(())
}

fn print_chunk_row(chunk: &Chunk) {
    println!(
        "  {:>5}  {:<10}  {:>5}  {:>7}  {}",
        chunk.order,
        chunk.status,
        chunk.retry_count,
        chunk.source_text.chars().count(),
        chunk.id
    );
    if let Some(error) = &chunk.error_message {
        println!("  {:>34}  {error}", "");
    }
}

async fn cmd_session_delete(db: Option<&Path>, id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    session::delete_session(&storage, id).await?;
    println!("Deleted session {id}");
    Ok(())
}

async fn cmd_import(
    db: Option<&Path>,
    id: &str,
    file: &Path,
    chunk_size: Option<usize>,
) -> Result<()> {
    let config = load_config()?;
    let text = read_text(file)?;
    let storage = open_storage(&config, db).await?;
    let target_size = chunk_size.unwrap_or(config.defaults.chunk_size);

    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string());
    session::update_session_details(
        &storage,
        id,
        SessionPatch {
            original_file_name: file_name,
            ..Default::default()
        },
    )
    .await?;

    let session = session::chunk_session(&storage, id, &text, target_size).await?;
    println!(
        "Imported {} into {} chunks (target {target_size} chars). Session {} is {}.",
        file.display(),
        session.total_chunks,
        session.id,
        session.status
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Translation commands
// ---------------------------------------------------------------------------

async fn cmd_translate(
    db: Option<&Path>,
    id: &str,
    template: Option<String>,
    model: Option<String>,
    strict: bool,
) -> Result<()> {
    let config = load_config()?;
    let storage = Arc::new(open_storage(&config, db).await?);
    let session = session::session_overview(&storage, id).await?.session;
    let template_id = template_id(&config, template);

    let (translator, progress) =
        build_translator(&config, storage, model, session.total_chunks)?;
    let translator = translator.with_strict_templates(strict);

    let handle = match session.status {
        SessionStatus::Ready => translator.start_translation(id, &template_id).await?,
        SessionStatus::Paused | SessionStatus::Failed => {
            translator.resume_translation(id, &template_id).await?
        }
        SessionStatus::Draft => {
            return Err(eyre!(
                "session {id} has no source text yet; run `doctrans import {id} FILE` first"
            ));
        }
        SessionStatus::Completed => {
            return Err(eyre!(
                "session {id} is already completed; use `doctrans export {id}`"
            ));
        }
        SessionStatus::Translating => {
            return Err(eyre!(
                "session {id} is already translating. If no other doctrans process is running it, \
                 run `doctrans pause {id}` and translate again"
            ));
        }
    };

    info!(session_id = id, template_id = %template_id, "translation started");
    let wait = handle.wait();
    tokio::pin!(wait);

    let summary = tokio::select! {
        result = &mut wait => result?,
        _ = tokio::signal::ctrl_c() => {
            progress.note("Pausing after the in-flight chunk...");
            if let Err(e) = translator.pause_translation(id).await {
                warn!(error = %e, "pause request failed");
            }
            wait.await?
        }
    };

    progress.finish();
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    match summary.final_status {
        SessionStatus::Completed => println!("  Translation complete!"),
        SessionStatus::Paused => println!("  Translation paused."),
        SessionStatus::Failed => println!("  Translation finished with failures."),
        other => println!("  Translation stopped ({other})."),
    }
    println!("  Session:   {}", summary.session_id);
    println!("  Processed: {}", summary.processed);
    println!("  Completed: {}", summary.completed);
    println!("  Failed:    {}", summary.failed);
    match summary.final_status {
        SessionStatus::Completed => {
            println!("  Export with `doctrans export {}`", summary.session_id)
        }
        SessionStatus::Paused => {
            println!("  Resume with `doctrans translate {}`", summary.session_id)
        }
        SessionStatus::Failed => println!(
            "  Inspect with `doctrans session show {}`, then `doctrans retry CHUNK_ID` or `doctrans translate {}`",
            summary.session_id, summary.session_id
        ),
        _ => {}
    }
    println!();
}

async fn cmd_pause(db: Option<&Path>, id: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    pause_session(&storage, &SilentSink, id).await?;
    println!("Pause requested for session {id}; the run stops after its in-flight chunk.");
    Ok(())
}

async fn cmd_retry(
    db: Option<&Path>,
    chunk_id: &str,
    template: Option<String>,
    model: Option<String>,
) -> Result<()> {
    let config = load_config()?;
    let storage = Arc::new(open_storage(&config, db).await?);
    let template_id = template_id(&config, template);

    let (translator, progress) = build_translator(&config, storage, model, 1)?;
    let result = translator.retry_failed_chunk(chunk_id, &template_id).await?;
    progress.finish();

    match result.outcome {
        ChunkOutcome::Completed { .. } => {
            println!("Chunk {} (order {}) translated.", result.chunk_id, result.order)
        }
        ChunkOutcome::Failed { error_message } => {
            return Err(eyre!(
                "chunk {} (order {}) failed again: {error_message}",
                result.chunk_id,
                result.order
            ));
        }
    }
    Ok(())
}

async fn cmd_export(db: Option<&Path>, id: &str, out: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let text = session::export_translation(&storage, id).await?;

    match out {
        Some(path) => {
            std::fs::write(path, &text)
                .wrap_err_with(|| format!("cannot write '{}'", path.display()))?;
            eprintln!("Wrote {} characters to {}", text.chars().count(), path.display());
        }
        None => println!("{text}"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Template commands
// ---------------------------------------------------------------------------

async fn cmd_template_add(
    db: Option<&Path>,
    file: &Path,
    id: Option<String>,
    title: String,
    source_language: String,
    target_language: String,
    description: Option<String>,
) -> Result<()> {
    let config = load_config()?;
    let content = read_text(file)?;
    let storage = open_storage(&config, db).await?;

    let template = Template {
        id: id.unwrap_or_else(new_id),
        title,
        source_language,
        target_language,
        description,
        content,
    };
    save_template(&storage, &template).await?;
    println!("{}", template.id);
    Ok(())
}

async fn cmd_template_default(db: Option<&Path>, source: &str, target: &str) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let template = default_template(source, target);
    save_template(&storage, &template).await?;
    println!("Installed template '{}': {}", template.id, template.title);
    Ok(())
}

async fn cmd_template_list(db: Option<&Path>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage_readonly(&config, db).await?;
    let templates = storage.list_templates().await?;

    if templates.is_empty() {
        println!("No templates. Install the built-in one with `doctrans template default`.");
        return Ok(());
    }

    for t in &templates {
        println!(
            "{:<36}  {} → {}  {}",
            t.id, t.source_language, t.target_language, t.title
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI event sink
// ---------------------------------------------------------------------------

/// Progress bar fed by orchestrator events.
struct CliProgress {
    bar: ProgressBar,
}

impl CliProgress {
    fn new(total_chunks: u32) -> Self {
        let bar = ProgressBar::new(u64::from(total_chunks));
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        bar.set_style(style);
        bar.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { bar }
    }

    fn note(&self, message: &str) {
        self.bar.println(message);
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn show(&self, progress: &Progress) {
        self.bar.set_length(u64::from(progress.total));
        self.bar
            .set_position(u64::from(progress.completed + progress.failed));
    }
}

impl EventSink for CliProgress {
    fn chunk_start(&self, _session_id: &str, _chunk_id: &str, order: u32) {
        self.bar.set_message(format!("translating chunk {order}"));
    }

    fn chunk_progress(&self, _session_id: &str, chunk: &Chunk, progress: &Progress) {
        self.show(progress);
        if chunk.status == ChunkStatus::Failed {
            self.bar.println(format!(
                "  chunk {} failed: {}",
                chunk.order,
                chunk.error_message.as_deref().unwrap_or("unknown error")
            ));
        }
    }

    fn session_status(&self, _session_id: &str, status: SessionStatus, progress: &Progress) {
        self.show(progress);
        self.bar.set_message(status.to_string());
    }

    fn session_complete(&self, _session_id: &str, session: &Session) {
        let chars = session
            .translated_text
            .as_deref()
            .map_or(0, |t| t.chars().count());
        self.bar
            .set_message(format!("assembled {chars} characters"));
    }
}
