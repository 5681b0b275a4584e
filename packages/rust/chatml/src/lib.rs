//! ChatML line protocol for doctrans.
//!
//! A rendered template is a ChatML document: role-tagged blocks delimited by
//! marker lines.
//!
//! ```text
//! # comments and blank lines are allowed between blocks
//! <|im_start|>SYSTEM
//! You translate English into French.
//! <|im_end|>
//! <|im_start|>USER
//! Hello
//! <|im_end|>
//! ```
//!
//! [`parse`] turns such a document into [`Message`]s, collecting every
//! problem instead of stopping at the first. [`to_prompt`] maps messages
//! onto the provider-neutral [`Prompt`](doctrans_shared::Prompt).

mod adapter;
mod parser;

use std::fmt;
use std::str::FromStr;

use doctrans_shared::DocTransError;
use serde::{Deserialize, Serialize};

pub use adapter::to_prompt;
pub use parser::{
    ParseError, ParseResult, ValidationReport, merge_consecutive_by_role, parse, stringify,
    validate,
};

/// Opening marker; the role name follows on the same line.
pub const START_MARKER: &str = "<|im_start|>";

/// Closing marker; must be alone on its line.
pub const END_MARKER: &str = "<|im_end|>";

/// Speaker of a ChatML block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    System,
    User,
    Assistant,
    Model,
    Alternative,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::System,
        Role::User,
        Role::Assistant,
        Role::Model,
        Role::Alternative,
    ];

    /// Canonical (uppercase) name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::User => "USER",
            Self::Assistant => "ASSISTANT",
            Self::Model => "MODEL",
            Self::Alternative => "ALTERNATIVE",
        }
    }

    /// Case-insensitive lookup.
    pub fn from_name(name: &str) -> Option<Role> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DocTransError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s).ok_or_else(|| {
            DocTransError::prompt_build(format!(
                "Invalid role \"{s}\" (expected one of SYSTEM, USER, ASSISTANT, MODEL, ALTERNATIVE)"
            ))
        })
    }
}

/// One role-tagged block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Block body, lines joined with `\n`. Inner blank lines are kept.
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}
