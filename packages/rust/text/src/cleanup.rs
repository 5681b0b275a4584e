//! Cleanup pipeline for raw LLM translation output.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! Models sometimes echo protocol markers or leave HTML comments behind;
//! those lines never belong in a stored translation.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw model output.
pub fn clean_translation_output(raw: &str) -> String {
    let mut result = normalize_newlines(raw);

    result = strip_protocol_markers(&result);
    result = strip_comment_lines(&result);
    result = collapse_blank_runs(&result);
    result = result.trim().to_string();

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Normalize line endings
// ---------------------------------------------------------------------------

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n")
}

// ---------------------------------------------------------------------------
// Pass 2: Drop echoed ChatML markers
// ---------------------------------------------------------------------------

/// Remove lines that are nothing but `<|im_start|>ROLE` or `<|im_end|>`.
fn strip_protocol_markers(text: &str) -> String {
    static MARKER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^\s*(?:<\|im_start\|>\s*[A-Za-z]*|<\|im_end\|>)\s*$").expect("valid regex")
    });

    drop_matching_lines(text, &MARKER_RE)
}

// ---------------------------------------------------------------------------
// Pass 3: Drop HTML comment lines
// ---------------------------------------------------------------------------

/// Remove lines that consist only of a single-line HTML comment.
fn strip_comment_lines(text: &str) -> String {
    static COMMENT_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\s*<!--.*?-->\s*$").expect("valid regex"));

    drop_matching_lines(text, &COMMENT_RE)
}

fn drop_matching_lines(text: &str, re: &Regex) -> String {
    text.split('\n')
        .filter(|line| !re.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 4: Collapse blank runs
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into a single blank line.
fn collapse_blank_runs(text: &str) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut blank_run: Vec<&str> = Vec::new();

    for line in text.split('\n') {
        if line.trim().is_empty() {
            blank_run.push(line);
            continue;
        }
        flush_blank_run(&mut blank_run, &mut out);
        out.push(line);
    }
    flush_blank_run(&mut blank_run, &mut out);

    out.join("\n")
}

fn flush_blank_run<'a>(run: &mut Vec<&'a str>, out: &mut Vec<&'a str>) {
    if run.len() >= 3 {
        out.push("");
    } else {
        out.extend(run.iter().copied());
    }
    run.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_marker_lines() {
        let input = "<|im_start|>ASSISTANT\nBonjour\n<|im_end|>";
        assert_eq!(clean_translation_output(input), "Bonjour");
    }

    #[test]
    fn keeps_inline_marker_text() {
        let input = "use <|im_end|> to close a block";
        assert_eq!(strip_protocol_markers(input), input);
    }

    #[test]
    fn strips_comment_lines() {
        let input = "<!-- translated by model -->\nHola\n  <!-- end -->  ";
        assert_eq!(clean_translation_output(input), "Hola");
    }

    #[test]
    fn keeps_comments_inside_text() {
        let input = "a <!-- b --> c";
        assert_eq!(strip_comment_lines(input), input);
    }

    #[test]
    fn collapses_long_blank_runs_only() {
        assert_eq!(collapse_blank_runs("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_runs("a\n\n\nb"), "a\n\n\nb");
    }

    #[test]
    fn full_pipeline_normalizes_crlf_and_trims() {
        let input = "\r\n<|im_start|>MODEL\r\nLine one\r\n\r\nLine two\r\n<|im_end|>\r\n\r\n";
        assert_eq!(clean_translation_output(input), "Line one\n\nLine two");
    }
}
