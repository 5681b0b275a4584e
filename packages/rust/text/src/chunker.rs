//! Paragraph-first document chunker.
//!
//! Text is split on blank lines into paragraphs, and paragraphs are packed
//! greedily into chunks of at most `target_size` characters. A paragraph that
//! is too large on its own is broken into sentences, and a sentence that is
//! still too large is force-cut at whitespace (or hard-cut when no usable
//! whitespace exists).
//!
//! Sizes are counted in `char`s, so CJK text is measured the same way a
//! reader would count it.

/// Separator placed between paragraphs when chunks are rejoined.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

/// Sentence-terminal punctuation that ends a sentence immediately.
const CJK_TERMINALS: [char; 3] = ['。', '？', '！'];

/// Sentence-terminal punctuation that needs trailing whitespace (or end of text).
const LATIN_TERMINALS: [char; 3] = ['.', '!', '?'];

/// Closing quotes and brackets that stay attached to a sentence terminal.
const CLOSERS: [char; 10] = ['"', '\'', '”', '’', '」', '』', '）', ')', ']', '》'];

/// One chunk of text plus the separator that preceded it in the source.
///
/// Concatenating `joiner + text` over every piece returned by
/// [`split_into_pieces`] reproduces [`normalize_source`] exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    pub text: String,
    /// `""` for the first piece and for hard cuts, `"\n\n"` at paragraph
    /// boundaries, otherwise the whitespace consumed between sentences.
    pub joiner: String,
}

impl ChunkPiece {
    fn new(text: impl Into<String>, joiner: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            joiner: joiner.into(),
        }
    }
}

/// Split `text` into ordered chunk texts of at most `target_size` characters.
///
/// Empty or whitespace-only input yields an empty list.
pub fn split_into_chunks(text: &str, target_size: usize) -> Vec<String> {
    split_into_pieces(text, target_size)
        .into_iter()
        .map(|piece| piece.text)
        .collect()
}

/// Like [`split_into_chunks`], but keeps the separator preceding each chunk.
pub fn split_into_pieces(text: &str, target_size: usize) -> Vec<ChunkPiece> {
    let target = target_size.max(1);
    let mut units: Vec<ChunkPiece> = Vec::new();

    for (index, paragraph) in paragraphs(text).into_iter().enumerate() {
        let joiner = if index == 0 { "" } else { PARAGRAPH_SEPARATOR };

        if char_len(&paragraph) <= target {
            units.push(ChunkPiece::new(paragraph, joiner));
            continue;
        }

        for (s_index, sentence) in split_sentences(&paragraph).into_iter().enumerate() {
            let lead = if s_index == 0 {
                joiner.to_string()
            } else {
                sentence.joiner
            };

            if char_len(&sentence.text) <= target {
                units.push(ChunkPiece::new(sentence.text, lead));
                continue;
            }

            let mut pieces = force_split(&sentence.text, target);
            if let Some(first) = pieces.first_mut() {
                first.joiner = lead;
            }
            units.extend(pieces);
        }
    }

    let chunks = pack(units, target);
    tracing::debug!(
        chunks = chunks.len(),
        target_size = target,
        "split text into chunks"
    );
    chunks
}

/// The text the chunker actually preserves: CRLF folded to LF and paragraphs
/// trimmed and separated by exactly one blank line.
pub fn normalize_source(text: &str) -> String {
    paragraphs(text).join(PARAGRAPH_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Splitting
// ---------------------------------------------------------------------------

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Trimmed, non-empty paragraphs separated by whitespace-only lines.
fn paragraphs(text: &str) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in normalized.split('\n') {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut out);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut out);

    out
}

fn flush_paragraph(lines: &mut Vec<&str>, out: &mut Vec<String>) {
    if lines.is_empty() {
        return;
    }
    let paragraph = lines.join("\n").trim().to_string();
    lines.clear();
    if !paragraph.is_empty() {
        out.push(paragraph);
    }
}

/// Sequential sentence scan. Each returned piece carries the whitespace that
/// separated it from the previous sentence.
fn split_sentences(paragraph: &str) -> Vec<ChunkPiece> {
    let chars: Vec<char> = paragraph.chars().collect();
    let mut out = Vec::new();
    let mut start = 0;
    let mut joiner = String::new();
    let mut i = 0;

    while i < chars.len() {
        if !is_terminal(chars[i]) {
            i += 1;
            continue;
        }

        let mut end = i;
        let mut cjk = false;
        while end < chars.len() && (is_terminal(chars[end]) || CLOSERS.contains(&chars[end])) {
            cjk |= CJK_TERMINALS.contains(&chars[end]);
            end += 1;
        }

        let at_boundary = end == chars.len() || chars[end].is_whitespace();
        if !cjk && !at_boundary {
            // "3.14", "e.g.x"
            i = end;
            continue;
        }

        let mut next = end;
        while next < chars.len() && chars[next].is_whitespace() {
            next += 1;
        }

        out.push(ChunkPiece::new(
            chars[start..end].iter().collect::<String>(),
            std::mem::take(&mut joiner),
        ));
        joiner = chars[end..next].iter().collect();
        start = next;
        i = next;
    }

    if start < chars.len() {
        out.push(ChunkPiece::new(
            chars[start..].iter().collect::<String>(),
            joiner,
        ));
    }

    out
}

fn is_terminal(c: char) -> bool {
    LATIN_TERMINALS.contains(&c) || CJK_TERMINALS.contains(&c)
}

/// Cut a run longer than `target` into pieces of at most `target` chars.
///
/// Cuts at the last whitespace run within the first `target + 1` chars when it
/// starts at or after half the budget; otherwise cuts exactly at `target`.
fn force_split(sentence: &str, target: usize) -> Vec<ChunkPiece> {
    let chars: Vec<char> = sentence.chars().collect();
    let mut out = Vec::new();
    let mut pos = 0;
    let mut joiner = String::new();

    while chars.len() - pos > target {
        let window = &chars[pos..pos + target + 1];
        let cut = window
            .iter()
            .rposition(|c| c.is_whitespace())
            .map(|mut s| {
                while s > 0 && window[s - 1].is_whitespace() {
                    s -= 1;
                }
                s
            })
            .filter(|&s| s > 0 && s >= target / 2);

        match cut {
            Some(split) => {
                let mut resume = pos + split;
                while resume < chars.len() && chars[resume].is_whitespace() {
                    resume += 1;
                }
                out.push(ChunkPiece::new(
                    chars[pos..pos + split].iter().collect::<String>(),
                    std::mem::take(&mut joiner),
                ));
                joiner = chars[pos + split..resume].iter().collect();
                pos = resume;
            }
            None => {
                out.push(ChunkPiece::new(
                    chars[pos..pos + target].iter().collect::<String>(),
                    std::mem::take(&mut joiner),
                ));
                pos += target;
            }
        }
    }

    if pos < chars.len() {
        out.push(ChunkPiece::new(chars[pos..].iter().collect::<String>(), joiner));
    }

    out
}

// ---------------------------------------------------------------------------
// Packing
// ---------------------------------------------------------------------------

/// Greedily merge units while `buffer + joiner + unit` stays within `target`.
fn pack(units: Vec<ChunkPiece>, target: usize) -> Vec<ChunkPiece> {
    let mut chunks: Vec<ChunkPiece> = Vec::new();
    let mut open_len = 0usize;

    for unit in units {
        let unit_len = char_len(&unit.text);
        let joined_len = open_len + char_len(&unit.joiner) + unit_len;

        match chunks.last_mut() {
            Some(last) if open_len > 0 && joined_len <= target => {
                last.text.push_str(&unit.joiner);
                last.text.push_str(&unit.text);
                open_len = joined_len;
            }
            _ => {
                open_len = unit_len;
                chunks.push(unit);
            }
        }
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejoin(pieces: &[ChunkPiece]) -> String {
        pieces
            .iter()
            .map(|p| format!("{}{}", p.joiner, p.text))
            .collect()
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(split_into_chunks("", 100).is_empty());
        assert!(split_into_chunks("  \n\n \t\n", 100).is_empty());
    }

    #[test]
    fn packs_small_paragraphs_together() {
        let chunks = split_into_chunks("A\n\nB\n\n\n  C  ", 4);
        assert_eq!(chunks, vec!["A\n\nB", "C"]);
    }

    #[test]
    fn oversized_paragraph_is_force_split() {
        let text = format!("Para one.\n\nPara two {}", "x".repeat(5000));
        let chunks = split_into_chunks(&text, 2000);
        assert!(chunks.len() >= 2);
        assert_eq!(chunks[0], "Para one.");
        assert!(chunks.iter().all(|c| c.chars().count() <= 2000));

        let pieces = split_into_pieces(&text, 2000);
        assert_eq!(rejoin(&pieces), text);
    }

    #[test]
    fn splits_on_sentences() {
        let chunks = split_into_chunks("One. Two. Three.", 10);
        assert_eq!(chunks, vec!["One. Two.", "Three."]);

        let pieces = split_into_pieces("One. Two. Three.", 10);
        assert_eq!(pieces[1].joiner, " ");
    }

    #[test]
    fn cjk_terminals_need_no_whitespace() {
        let chunks = split_into_chunks("你好。再见！", 4);
        assert_eq!(chunks, vec!["你好。", "再见！"]);
    }

    #[test]
    fn decimals_do_not_end_sentences() {
        let chunks = split_into_chunks("Pi is 3.14 exactly. Next one.", 20);
        assert_eq!(chunks, vec!["Pi is 3.14 exactly.", "Next one."]);
    }

    #[test]
    fn closing_quotes_stay_with_sentence() {
        let chunks = split_into_chunks("He said \"stop.\" Then left.", 16);
        assert_eq!(chunks, vec!["He said \"stop.\"", "Then left."]);
    }

    #[test]
    fn forced_cut_prefers_whitespace() {
        let pieces = split_into_pieces("aaaa bbbb cccc", 10);
        assert_eq!(
            pieces,
            vec![ChunkPiece::new("aaaa bbbb", ""), ChunkPiece::new("cccc", " ")]
        );
    }

    #[test]
    fn forced_cut_ignores_early_whitespace() {
        let pieces = split_into_pieces("ab cdefghijklmnop", 8);
        assert_eq!(pieces[0].text, "ab cdefg");
        assert_eq!(pieces[1].joiner, "");
        assert_eq!(rejoin(&pieces), "ab cdefghijklmnop");
    }

    #[test]
    fn crlf_is_normalized() {
        let chunks = split_into_chunks("one\r\ntwo\r\n\r\nthree", 100);
        assert_eq!(chunks, vec!["one\ntwo\n\nthree"]);
    }

    #[test]
    fn zero_target_still_makes_progress() {
        let chunks = split_into_chunks("abc", 0);
        assert_eq!(chunks, vec!["a", "b", "c"]);
    }

    #[test]
    fn pieces_rejoin_to_normalized_source() {
        let text = "Intro line.\r\n\r\n\
                    First sentence here. Second sentence is a little longer! Third?\n\
                    continued on the next line.\n\n\n\
                    长句子。另一个句子！最后一个？\n\n\
                    tail";
        for target in [5, 12, 30, 80, 1000] {
            let pieces = split_into_pieces(text, target);
            assert_eq!(rejoin(&pieces), normalize_source(text), "target {target}");
            assert!(
                pieces.iter().all(|p| p.text.chars().count() <= target),
                "target {target}"
            );
        }
    }
}
