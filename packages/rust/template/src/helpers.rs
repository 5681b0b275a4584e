//! The closed set of template helpers.
//!
//! Every helper registered with the engine goes through [`Helper::call`].
//! Chunk helpers read the `chunks`, `currentOrder` and `previous` entries of
//! the root data, so they behave the same wherever they appear in a block.

use serde::Serialize;
use serde_json::Value;

static NULL: Value = Value::Null;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Helper {
    // Chunk context
    Chunk,
    HasChunk,
    HasPrevious,
    HasTranslated,
    ChunkCount,
    CurrentOrder,
    IsFirstChunk,
    IsLastChunk,
    // Comparison
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    // Logic
    And,
    Or,
    Not,
    // Data
    Json,
    Join,
    Length,
    Slice,
}

impl Helper {
    pub const ALL: [Self; 21] = [
        Self::Chunk,
        Self::HasChunk,
        Self::HasPrevious,
        Self::HasTranslated,
        Self::ChunkCount,
        Self::CurrentOrder,
        Self::IsFirstChunk,
        Self::IsLastChunk,
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::And,
        Self::Or,
        Self::Not,
        Self::Json,
        Self::Join,
        Self::Length,
        Self::Slice,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Chunk => "chunk",
            Self::HasChunk => "hasChunk",
            Self::HasPrevious => "hasPrevious",
            Self::HasTranslated => "hasTranslated",
            Self::ChunkCount => "chunkCount",
            Self::CurrentOrder => "currentOrder",
            Self::IsFirstChunk => "isFirstChunk",
            Self::IsLastChunk => "isLastChunk",
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::Json => "json",
            Self::Join => "join",
            Self::Length => "length",
            Self::Slice => "slice",
        }
    }

    /// Evaluate with already-resolved arguments. Missing arguments read as `null`.
    ///
    /// `root` is the data the template renders against. Without chunk entries
    /// the chunk helpers see an empty session.
    pub fn call(self, args: &[Value], root: &Value) -> Value {
        let arg = |i: usize| args.get(i).unwrap_or(&NULL);
        let scope = ChunkScope::of(root);

        match self {
            Self::Chunk => {
                let field = match arg(1) {
                    Value::Null => "source".to_string(),
                    other => to_display(other),
                };
                scope
                    .sibling(arg(0))
                    .map(|c| chunk_field(c, &field))
                    .unwrap_or_default()
                    .into()
            }
            Self::HasChunk => scope.sibling(arg(0)).is_some().into(),
            Self::HasPrevious => root.get("previous").is_some_and(|p| !p.is_null()).into(),
            Self::HasTranslated => scope.sibling(arg(0)).is_some_and(is_translated).into(),
            Self::ChunkCount => scope.chunks.len().into(),
            Self::CurrentOrder => scope.current_order.unwrap_or(0).into(),
            Self::IsFirstChunk => (scope.current_order == Some(0)).into(),
            Self::IsLastChunk => scope.is_last().into(),

            Self::Eq => strict_equals(arg(0), arg(1)).into(),
            Self::Ne => (!strict_equals(arg(0), arg(1))).into(),
            Self::Gt => compare(arg(0), arg(1), |a, b| a > b).into(),
            Self::Gte => compare(arg(0), arg(1), |a, b| a >= b).into(),
            Self::Lt => compare(arg(0), arg(1), |a, b| a < b).into(),
            Self::Lte => compare(arg(0), arg(1), |a, b| a <= b).into(),

            Self::And => args.iter().all(is_truthy).into(),
            Self::Or => args.iter().any(is_truthy).into(),
            Self::Not => (!is_truthy(arg(0))).into(),

            Self::Json => json(arg(0), arg(1)).into(),
            Self::Join => join(arg(0), arg(1)).into(),
            Self::Length => length(arg(0)).into(),
            Self::Slice => slice(arg(0), arg(1), arg(2)),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk helpers
// ---------------------------------------------------------------------------

struct ChunkScope<'a> {
    chunks: &'a [Value],
    current_order: Option<i64>,
}

impl<'a> ChunkScope<'a> {
    fn of(root: &'a Value) -> Self {
        Self {
            chunks: root
                .get("chunks")
                .and_then(Value::as_array)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            current_order: root.get("currentOrder").and_then(Value::as_i64),
        }
    }

    /// Sibling at `currentOrder + offset`. Offsets that are not whole numbers,
    /// or that land outside the `i64` range, have no sibling.
    fn sibling(&self, offset: &Value) -> Option<&'a Value> {
        let offset = to_number(offset)?;
        if offset.fract() != 0.0 {
            return None;
        }
        let target = self.current_order?.checked_add(offset as i64)?;
        self.chunks.iter().find(|c| order_of(c) == Some(target))
    }

    fn is_last(&self) -> bool {
        let max = self.chunks.iter().filter_map(order_of).max();
        max.is_some() && max == self.current_order
    }
}

fn order_of(chunk: &Value) -> Option<i64> {
    chunk.get("order").and_then(Value::as_i64)
}

fn is_translated(chunk: &Value) -> bool {
    chunk.get("status").and_then(Value::as_str) == Some("completed")
        && chunk.get("translatedText").is_some_and(Value::is_string)
}

fn chunk_field(chunk: &Value, field: &str) -> String {
    let key = match field {
        "source" | "sourceText" => "sourceText",
        "translated" | "translatedText" => "translatedText",
        "status" => "status",
        _ => return String::new(),
    };
    chunk
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ---------------------------------------------------------------------------
// Coercions
// ---------------------------------------------------------------------------

/// `String(value)`, except that `null` renders as the empty string.
pub(crate) fn to_display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(to_display).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// JS truthiness: `[]` and `{}` are truthy.
pub(crate) fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// `Number(value)`. `null`, objects, arrays and unparsable strings fail; the
/// empty string is `0`.
fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|f| !f.is_nan())
            }
        }
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// `===`, comparing numbers by value regardless of integer/float storage.
fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// Comparison & data helpers
// ---------------------------------------------------------------------------

fn compare(a: &Value, b: &Value, op: fn(f64, f64) -> bool) -> bool {
    match (to_number(a), to_number(b)) {
        (Some(a), Some(b)) => op(a, b),
        _ => false,
    }
}

fn json(value: &Value, indent: &Value) -> String {
    let indent = to_number(indent).unwrap_or(0.0).clamp(0.0, 10.0) as usize;
    if indent == 0 {
        return serde_json::to_string(value).unwrap_or_default();
    }

    let spaces = " ".repeat(indent);
    let formatter = serde_json::ser::PrettyFormatter::with_indent(spaces.as_bytes());
    let mut buf = Vec::new();
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

fn join(value: &Value, separator: &Value) -> String {
    let separator = match separator {
        Value::Null => ", ".to_string(),
        other => to_display(other),
    };
    match value {
        Value::Array(items) => items
            .iter()
            .map(to_display)
            .collect::<Vec<_>>()
            .join(&separator),
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

fn length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        _ => 0,
    }
}

/// `Array.prototype.slice` / `String.prototype.slice` index rules.
fn slice(value: &Value, start: &Value, end: &Value) -> Value {
    let bounds = |len: usize| {
        let resolve = |v: &Value, default: usize| -> usize {
            match to_number(v) {
                _ if v.is_null() => default,
                Some(n) if n < 0.0 => (len as f64 + n.trunc()).max(0.0) as usize,
                Some(n) => (n.trunc() as usize).min(len),
                None => 0,
            }
        };
        let from = resolve(start, 0);
        let to = resolve(end, len);
        (from, to.max(from))
    };

    match value {
        Value::String(s) => {
            let chars: Vec<char> = s.chars().collect();
            let (from, to) = bounds(chars.len());
            Value::String(chars[from..to].iter().collect())
        }
        Value::Array(items) => {
            let (from, to) = bounds(items.len());
            Value::Array(items[from..to].to_vec())
        }
        _ => Value::Null,
    }
}
