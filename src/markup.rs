//! Turns the assistant's pseudo-markdown into typed display segments.
//!
//! The model is instructed to use `• ` bullets, `1. ` numbered items and
//! `**bold**` headings. [`render`] recognizes exactly those in one
//! left-to-right pass:
//!
//! - a bullet runs from `• ` to the next `• `, a blank line, or the end;
//! - a numbered item runs from `N. ` to a newline followed by the next
//!   `N. `, a bullet, a blank line, or the end;
//! - `**text**` is bold only inside plain text, never inside list items;
//! - everything else is plain text, with neighbouring plain pieces merged.
//!
//! Anything that does not fully match degrades to plain text.

use serde::{Deserialize, Serialize};

const BULLET_MARKER: &str = "• ";
const NUMBER_SEPARATOR: &str = ". ";
const BOLD_DELIMITER: &str = "**";
const BLANK_LINE: &str = "\n\n";

/// One typed chunk of a rendered bot message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DisplaySegment {
    PlainText { text: String },
    BoldText { text: String },
    BulletItem { text: String },
    NumberedItem { ordinal: u32, text: String },
}

impl DisplaySegment {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn bold(text: impl Into<String>) -> Self {
        Self::BoldText { text: text.into() }
    }

    pub fn bullet(text: impl Into<String>) -> Self {
        Self::BulletItem { text: text.into() }
    }

    pub fn numbered(ordinal: u32, text: impl Into<String>) -> Self {
        Self::NumberedItem {
            ordinal,
            text: text.into(),
        }
    }

    /// The segment's content without any markup.
    pub fn text(&self) -> &str {
        match self {
            Self::PlainText { text }
            | Self::BoldText { text }
            | Self::BulletItem { text }
            | Self::NumberedItem { text, .. } => text,
        }
    }
}

/// Render one message into display segments.
///
/// Empty input yields no segments. Input without any markup yields a single
/// [`DisplaySegment::PlainText`] holding the whole input.
pub fn render(text: &str) -> Vec<DisplaySegment> {
    let mut segments = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if let Some(content) = rest.strip_prefix(BULLET_MARKER) {
            let end = bullet_end(content);
            segments.push(DisplaySegment::bullet(content[..end].trim_end()));
            rest = skip_item_separator(&content[end..]);
        } else if let Some((ordinal, content)) = numbered_marker(rest) {
            let end = numbered_end(content);
            segments.push(DisplaySegment::numbered(ordinal, content[..end].trim_end()));
            rest = skip_item_separator(&content[end..]);
        } else {
            let end = next_marker(rest).unwrap_or(rest.len());
            push_inline(&mut segments, &rest[..end]);
            rest = &rest[end..];
        }
    }

    segments
}

/// Parses a leading `N. ` marker, returning the ordinal and the text after it.
fn numbered_marker(text: &str) -> Option<(u32, &str)> {
    let digits = text.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let content = text[digits..].strip_prefix(NUMBER_SEPARATOR)?;
    let ordinal = text[..digits].parse().ok()?;
    Some((ordinal, content))
}

/// Byte offset of the first list marker after the start of `text`.
fn next_marker(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    text.char_indices().skip(1).map(|(i, _)| i).find(|&i| {
        let tail = &text[i..];
        tail.starts_with(BULLET_MARKER)
            || (!bytes[i - 1].is_ascii_digit() && numbered_marker(tail).is_some())
    })
}

fn bullet_end(content: &str) -> usize {
    [content.find(BULLET_MARKER), content.find(BLANK_LINE)]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(content.len())
}

fn numbered_end(content: &str) -> usize {
    let next_item = content
        .match_indices('\n')
        .map(|(i, _)| i)
        .find(|&i| numbered_marker(&content[i + 1..]).is_some());

    [next_item, content.find(BULLET_MARKER), content.find(BLANK_LINE)]
        .into_iter()
        .flatten()
        .min()
        .unwrap_or(content.len())
}

/// The newline between two list items belongs to neither of them.
fn skip_item_separator(rest: &str) -> &str {
    match rest.strip_prefix('\n') {
        Some(next) if next.starts_with(BULLET_MARKER) || numbered_marker(next).is_some() => next,
        _ => rest,
    }
}

/// Splits a plain span into plain and bold segments.
fn push_inline(segments: &mut Vec<DisplaySegment>, text: &str) {
    let mut rest = text;

    while let Some(open) = rest.find(BOLD_DELIMITER) {
        let inner = &rest[open + BOLD_DELIMITER.len()..];
        match inner.find(BOLD_DELIMITER) {
            Some(close) if close > 0 && !inner[..close].contains('\n') => {
                push_plain(segments, &rest[..open]);
                segments.push(DisplaySegment::bold(&inner[..close]));
                rest = &inner[close + BOLD_DELIMITER.len()..];
            }
            // Not a pair: this delimiter is literal text.
            Some(_) => {
                push_plain(segments, &rest[..open + BOLD_DELIMITER.len()]);
                rest = inner;
            }
            None => break,
        }
    }

    push_plain(segments, rest);
}

fn push_plain(segments: &mut Vec<DisplaySegment>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(DisplaySegment::PlainText { text: last }) = segments.last_mut() {
        last.push_str(text);
    } else {
        segments.push(DisplaySegment::plain(text));
    }
}
