//! ChatML parser, serializer and validator.
//!
//! Parsing is a two-state scan (outside / inside a block) over LF-normalized
//! lines. Problems are accumulated and parsing continues, so one report shows
//! everything wrong with a template.

use std::fmt;

use doctrans_shared::{DocTransError, Result};

use crate::{END_MARKER, Message, Role, START_MARKER};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One parse or validation problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    /// 1-based line number, when the problem is tied to a line.
    pub line: Option<usize>,
    pub message: String,
}

impl ParseError {
    fn at(line: usize, message: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            message: message.into(),
        }
    }

    fn general(message: impl Into<String>) -> Self {
        Self {
            line: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "Line {line}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of [`parse`]. `success` is true iff `errors` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub success: bool,
    pub messages: Vec<Message>,
    pub errors: Vec<ParseError>,
}

impl ParseResult {
    /// Messages on success, otherwise a prompt-build error listing every problem.
    pub fn into_messages(self) -> Result<Vec<Message>> {
        if self.success {
            return Ok(self.messages);
        }
        let details = self
            .errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Err(DocTransError::prompt_build(format!("invalid ChatML: {details}")))
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ParseError>,
    /// Non-fatal findings, such as messages with empty content.
    pub warnings: Vec<String>,
}

// ---------------------------------------------------------------------------
// Line classification
// ---------------------------------------------------------------------------

enum Line<'a> {
    Start(&'a str),
    End,
    Other(&'a str),
}

fn classify(line: &str) -> Line<'_> {
    let trimmed = line.trim();
    if let Some(role) = trimmed.strip_prefix(START_MARKER) {
        Line::Start(role.trim())
    } else if trimmed == END_MARKER {
        Line::End
    } else {
        Line::Other(line)
    }
}

fn report(errors: &mut Vec<ParseError>, error: ParseError) {
    tracing::warn!(%error, "ChatML parse error");
    errors.push(error);
}

fn is_ignorable(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct OpenBlock<'a> {
    role: Option<Role>,
    start_line: usize,
    lines: Vec<&'a str>,
}

impl OpenBlock<'_> {
    /// Emit the block as a message; blocks with an invalid role are dropped.
    fn flush(self, messages: &mut Vec<Message>) {
        if let Some(role) = self.role {
            messages.push(Message::new(role, self.lines.join("\n")));
        }
    }
}

/// Parse a ChatML document.
pub fn parse(input: &str) -> ParseResult {
    let normalized = input.replace("\r\n", "\n");
    let mut messages = Vec::new();
    let mut errors = Vec::new();
    let mut open: Option<OpenBlock<'_>> = None;

    for (index, line) in normalized.split('\n').enumerate() {
        let line_no = index + 1;

        match classify(line) {
            Line::Start(role_name) => {
                if let Some(previous) = open.take() {
                    report(
                        &mut errors,
                        ParseError::at(
                            line_no,
                            format!(
                                "Unexpected {START_MARKER} inside the block opened on line {}",
                                previous.start_line
                            ),
                        ),
                    );
                    previous.flush(&mut messages);
                }

                let role = Role::from_name(role_name);
                if role.is_none() {
                    report(
                        &mut errors,
                        ParseError::at(line_no, format!("Invalid role \"{role_name}\"")),
                    );
                }
                open = Some(OpenBlock {
                    role,
                    start_line: line_no,
                    lines: Vec::new(),
                });
            }
            Line::End => match open.take() {
                Some(block) => block.flush(&mut messages),
                None => report(
                    &mut errors,
                    ParseError::at(line_no, format!("Unexpected {END_MARKER} with no open block")),
                ),
            },
            Line::Other(text) => match open.as_mut() {
                Some(block) => block.lines.push(text),
                None if is_ignorable(text) => {}
                None => report(
                    &mut errors,
                    ParseError::at(line_no, "Text outside of a message block"),
                ),
            },
        }
    }

    if let Some(block) = open.take() {
        report(
            &mut errors,
            ParseError::at(
                block.start_line,
                format!("Block is never closed with {END_MARKER}"),
            ),
        );
        block.flush(&mut messages);
    }

    if messages.is_empty() {
        report(
            &mut errors,
            ParseError::general("No valid ChatML messages found"),
        );
    }

    ParseResult {
        success: errors.is_empty(),
        messages,
        errors,
    }
}

// ---------------------------------------------------------------------------
// Serializer
// ---------------------------------------------------------------------------

/// Serialize messages into a ChatML document; the inverse of [`parse`].
///
/// Fails rather than emitting a document that would parse differently.
pub fn stringify(messages: &[Message]) -> Result<String> {
    let mut blocks = Vec::with_capacity(messages.len());

    for (index, message) in messages.iter().enumerate() {
        let content = message.content.replace("\r\n", "\n");
        if let Some(offset) = content
            .split('\n')
            .position(|line| !matches!(classify(line), Line::Other(_)))
        {
            return Err(DocTransError::prompt_build(format!(
                "Message {index}: content line {} is a ChatML marker",
                offset + 1
            )));
        }
        blocks.push(format!(
            "{START_MARKER}{}\n{content}\n{END_MARKER}",
            message.role
        ));
    }

    Ok(blocks.join("\n"))
}

// ---------------------------------------------------------------------------
// Validator
// ---------------------------------------------------------------------------

/// Structural checks plus every [`parse`] diagnostic.
pub fn validate(input: &str) -> ValidationReport {
    let normalized = input.replace("\r\n", "\n");
    let mut errors = Vec::new();

    let (starts, ends) = normalized
        .split('\n')
        .fold((0usize, 0usize), |(s, e), line| match classify(line) {
            Line::Start(_) => (s + 1, e),
            Line::End => (s, e + 1),
            Line::Other(_) => (s, e),
        });
    if starts != ends {
        errors.push(ParseError::general(format!(
            "Mismatched markers: {starts} {START_MARKER} vs {ends} {END_MARKER}"
        )));
    }

    let significant: Vec<(usize, &str)> = normalized
        .split('\n')
        .enumerate()
        .filter(|(_, line)| !is_ignorable(line))
        .collect();
    if let Some(&(index, line)) = significant.first() {
        if !matches!(classify(line), Line::Start(_)) {
            errors.push(ParseError::at(
                index + 1,
                format!("First non-comment line must be a {START_MARKER} tag"),
            ));
        }
    }
    if let Some(&(index, line)) = significant.last() {
        if !matches!(classify(line), Line::End) {
            errors.push(ParseError::at(
                index + 1,
                format!("Last non-comment line must be {END_MARKER}"),
            ));
        }
    }

    let parsed = parse(&normalized);
    for error in parsed.errors {
        if !errors.contains(&error) {
            errors.push(error);
        }
    }

    let warnings = parsed
        .messages
        .iter()
        .enumerate()
        .filter(|(_, m)| m.content.trim().is_empty())
        .map(|(i, m)| format!("Message {i} ({}) has empty content", m.role))
        .collect();

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

// ---------------------------------------------------------------------------
// Post-processing
// ---------------------------------------------------------------------------

/// Concatenate the contents of adjacent messages that share a role.
///
/// No separator is inserted between merged contents.
pub fn merge_consecutive_by_role(messages: Vec<Message>) -> Vec<Message> {
    let mut merged: Vec<Message> = Vec::with_capacity(messages.len());

    for message in messages {
        match merged.last_mut() {
            Some(last) if last.role == message.role => last.content.push_str(&message.content),
            _ => merged.push(message),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stringify_then_parse_roundtrips() {
        let messages = vec![
            Message::new(Role::System, "Be terse."),
            Message::new(Role::User, "Hi"),
        ];
        let doc = stringify(&messages).unwrap();
        assert_eq!(
            doc,
            "<|im_start|>SYSTEM\nBe terse.\n<|im_end|>\n<|im_start|>USER\nHi\n<|im_end|>"
        );

        let parsed = parse(&doc);
        assert!(parsed.success, "{:?}", parsed.errors);
        assert_eq!(parsed.messages, messages);
    }

    #[test]
    fn roundtrip_keeps_blank_lines_and_empty_content() {
        let messages = vec![
            Message::new(Role::User, "line one\n\nline three\n"),
            Message::new(Role::Model, ""),
            Message::new(Role::Alternative, "  indented"),
        ];
        let parsed = parse(&stringify(&messages).unwrap());
        assert!(parsed.success);
        assert_eq!(parsed.messages, messages);
    }

    #[test]
    fn invalid_role_is_reported_and_dropped() {
        let result = parse("<|im_start|>BOGUS\nx\n<|im_end|>");
        assert!(!result.success);
        assert!(result.messages.is_empty());
        assert!(result.errors.iter().any(|e| e.message.contains("Invalid role")));
        assert!(
            result
                .errors
                .iter()
                .any(|e| e.message == "No valid ChatML messages found")
        );
        assert!(!result.errors.iter().any(|e| e.message.contains("Unexpected")));
    }

    #[test]
    fn comments_only_is_an_error() {
        let result = parse("# comment\n");
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].message, "No valid ChatML messages found");
    }

    #[test]
    fn comments_between_blocks_are_fine() {
        let input = "# header\n<|im_start|>system\nA\n<|im_end|>\n\n# note\n  \n<|im_start|>User\nB\n<|im_end|>\n# trailer";
        let result = parse(input);
        assert!(result.success, "{:?}", result.errors);
        assert_eq!(result.messages.len(), 2);
        assert_eq!(result.messages[1].role, Role::User);
    }

    #[test]
    fn markers_tolerate_surrounding_whitespace_and_crlf() {
        let result = parse("  <|im_start|>USER  \r\nHi\r\n\t<|im_end|>\r\n");
        assert!(result.success);
        assert_eq!(result.messages, vec![Message::new(Role::User, "Hi")]);
    }

    #[test]
    fn nested_start_flushes_previous_block() {
        let result = parse("<|im_start|>USER\na\n<|im_start|>MODEL\nb\n<|im_end|>");
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].line, Some(3));
        assert_eq!(
            result.messages,
            vec![Message::new(Role::User, "a"), Message::new(Role::Model, "b")]
        );
    }

    #[test]
    fn stray_end_and_stray_text_are_line_numbered() {
        let result = parse("<|im_end|>\nhello\n<|im_start|>USER\nok\n<|im_end|>");
        assert!(!result.success);
        assert_eq!(result.messages.len(), 1);
        let rendered: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
        assert!(rendered[0].starts_with("Line 1: Unexpected <|im_end|>"));
        assert_eq!(rendered[1], "Line 2: Text outside of a message block");
    }

    #[test]
    fn unclosed_block_is_still_flushed() {
        let result = parse("<|im_start|>USER\ndangling");
        assert!(!result.success);
        assert_eq!(result.messages, vec![Message::new(Role::User, "dangling")]);
        assert!(result.errors[0].message.contains("never closed"));
    }

    #[test]
    fn into_messages_reports_all_errors() {
        let err = parse("junk\n<|im_start|>NOPE\n<|im_end|>")
            .into_messages()
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Line 1: Text outside"));
        assert!(text.contains("Invalid role \"NOPE\""));
    }

    #[test]
    fn stringify_rejects_marker_content() {
        let err = stringify(&[
            Message::new(Role::User, "fine"),
            Message::new(Role::User, "a\n<|im_end|>\nb"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("Message 1: content line 2"));
    }

    #[test]
    fn validate_checks_shape_and_warns_on_empty() {
        let report = validate("<|im_start|>SYSTEM\n\n<|im_end|>\n<|im_start|>USER\nHi\n<|im_end|>");
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(report.warnings.len(), 1);
        assert!(report.warnings[0].contains("SYSTEM"));

        let report = validate("<|im_start|>USER\nHi\n<|im_end|>\n<|im_start|>USER\nagain");
        assert!(!report.valid);
        assert!(report.errors.iter().any(|e| e.message.starts_with("Mismatched markers")));
        assert!(report.errors.iter().any(|e| e.message.starts_with("Last non-comment")));
    }

    #[test]
    fn validate_requires_leading_start_tag() {
        let report = validate("# ok\npreamble\n<|im_start|>USER\nHi\n<|im_end|>");
        assert!(!report.valid);
        assert_eq!(report.errors[0].line, Some(2));
    }

    #[test]
    fn merge_joins_adjacent_same_role() {
        let merged = merge_consecutive_by_role(vec![
            Message::new(Role::User, "a"),
            Message::new(Role::User, "b"),
            Message::new(Role::Model, "c"),
            Message::new(Role::User, "d"),
        ]);
        assert_eq!(
            merged,
            vec![
                Message::new(Role::User, "ab"),
                Message::new(Role::Model, "c"),
                Message::new(Role::User, "d"),
            ]
        );
    }
}
