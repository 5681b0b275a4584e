//! Shared types, error model, and configuration for doctrans.
//!
//! This crate is the foundation depended on by all other doctrans crates.
//! It provides:
//! - [`DocTransError`], the unified error type
//! - Domain types ([`Session`], [`Chunk`], [`Template`], [`Progress`], [`Prompt`])
//! - Configuration ([`AppConfig`], [`LlmSettings`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, LlmSettings, OpenRouterConfig, config_dir, config_file_path,
    database_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{DocTransError, Result};
pub use types::{
    Chunk, ChunkOutcome, ChunkResult, ChunkStatus, Generation, Progress, Prompt, Session,
    SessionStatus, Template, Turn, TurnRole, Usage, new_id,
};
