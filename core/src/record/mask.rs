//! Maskable strings
//!
//! A maskable string is split into alternating visible and hidden segments.
//! Hidden segments carry the replacement text shown in their place.
//!
//! ```text
//! record stream:  varuint(n) { kind:u8 text [replacement if hidden] }*n
//! visible part:   varuint(n) { kind:u8 (text | replacement) }*n
//! hidden part:    varuint(h) { text }*h
//! ```

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{FieldError, StreamError};
use crate::stream::{ReadStream, WriteStream};

const VISIBLE: u8 = 0;
const HIDDEN: u8 = 1;
const DEFAULT_REPLACEMENT: &str = "*";

/// Regex-driven masking of string fields
///
/// Capture groups referenced as `$n` or `${n}` in the substitution stay
/// visible; the other groups are hidden. Text outside any group stays
/// visible. A hidden group is shown as the substitution literal following the
/// nearest visible group before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskRule {
    /// Regular expression with capture groups
    pub pattern: String,
    /// Template describing the masked rendering
    pub substitution: String,
}

impl MaskRule {
    /// Create a rule
    pub fn new(pattern: impl Into<String>, substitution: impl Into<String>) -> Self {
        MaskRule { pattern: pattern.into(), substitution: substitution.into() }
    }

    /// Compile the pattern and substitution
    pub fn compile(&self) -> Result<CompiledMask, String> {
        let regex = Regex::new(&self.pattern).map_err(|e| e.to_string())?;
        let groups = regex.captures_len() - 1;
        let tokens = tokenize(&self.substitution)?;

        let mut visible = BTreeSet::new();
        for token in &tokens {
            if let Token::Group(n) = token {
                if *n == 0 || *n > groups {
                    return Err(format!("substitution references missing group ${}", n));
                }
                visible.insert(*n);
            }
        }

        let replacements = (1..=groups)
            .map(|group| {
                if visible.contains(&group) {
                    return String::new();
                }
                replacement_for(group, &visible, &tokens)
            })
            .collect();

        Ok(CompiledMask { regex, groups, visible, replacements })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Group(usize),
}

fn tokenize(substitution: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = substitution.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            literal.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        if !braced && chars.peek() == Some(&'$') {
            chars.next();
            literal.push('$');
            continue;
        }

        let mut digits = String::new();
        while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
            digits.push(*d);
            chars.next();
        }
        if braced && chars.next() != Some('}') {
            return Err("unterminated group reference".to_string());
        }
        let group = digits.parse().map_err(|_| format!("invalid group reference in '{}'", substitution))?;

        if !literal.is_empty() {
            tokens.push(Token::Literal(std::mem::take(&mut literal)));
        }
        tokens.push(Token::Group(group));
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

fn replacement_for(group: usize, visible: &BTreeSet<usize>, tokens: &[Token]) -> String {
    let anchor = visible.range(..group).next_back().copied();
    let start = match anchor {
        Some(anchor) => tokens.iter().position(|t| *t == Token::Group(anchor)).map(|i| i + 1),
        None => Some(0),
    };
    match start.and_then(|i| tokens.get(i)) {
        Some(Token::Literal(text)) => text.clone(),
        _ => DEFAULT_REPLACEMENT.to_string(),
    }
}

/// A compiled [`MaskRule`]
#[derive(Debug, Clone)]
pub struct CompiledMask {
    regex: Regex,
    groups: usize,
    visible: BTreeSet<usize>,
    replacements: Vec<String>,
}

/// Caller-supplied hidden byte range of a string
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskInterval {
    /// First hidden byte
    pub start: usize,
    /// End of the hidden range, exclusive
    pub end: usize,
    /// Text shown in place of the hidden range
    pub replacement: String,
}

impl MaskInterval {
    /// Create an interval
    pub fn new(start: usize, end: usize, replacement: impl Into<String>) -> Self {
        MaskInterval { start, end, replacement: replacement.into() }
    }
}

/// One segment of a masked string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskSegment {
    /// Always disclosed
    Visible(String),
    /// Disclosed only in plain mode
    Hidden {
        /// Original text
        text: String,
        /// Text shown instead
        replacement: String,
    },
}

/// A string split into visible and hidden segments
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaskedText {
    segments: Vec<MaskSegment>,
}

impl MaskedText {
    /// A string without hidden parts
    pub fn plain(text: &str) -> Self {
        let mut masked = MaskedText::default();
        masked.push_visible(text);
        masked
    }

    /// Hide the given byte ranges of `text`
    pub fn from_intervals(text: &str, intervals: &[MaskInterval], path: &str) -> Result<Self, FieldError> {
        let invalid = |reason: String| FieldError::InvalidMask { path: path.to_string(), reason };

        let mut masked = MaskedText::default();
        let mut cursor = 0;
        for interval in intervals {
            if interval.start < cursor || interval.start >= interval.end || interval.end > text.len() {
                return Err(invalid(format!(
                    "interval {}..{} is unordered, empty or out of bounds",
                    interval.start, interval.end
                )));
            }
            if !text.is_char_boundary(interval.start) || !text.is_char_boundary(interval.end) {
                return Err(invalid(format!("interval {}..{} splits a character", interval.start, interval.end)));
            }
            masked.push_visible(&text[cursor..interval.start]);
            masked.push_hidden(&text[interval.start..interval.end], &interval.replacement);
            cursor = interval.end;
        }
        masked.push_visible(&text[cursor..]);
        Ok(masked)
    }

    /// Apply a compiled rule to `text`; a string the pattern does not match
    /// stays fully visible
    pub fn from_rule(text: &str, mask: &CompiledMask, path: &str) -> Result<Self, FieldError> {
        let captures = match mask.regex.captures(text) {
            Some(captures) => captures,
            None => return Ok(MaskedText::plain(text)),
        };

        let mut groups: Vec<_> = (1..=mask.groups)
            .filter_map(|g| captures.get(g).map(|m| (g, m.start(), m.end())))
            .collect();
        groups.sort_by_key(|&(_, start, _)| start);

        let mut masked = MaskedText::default();
        let mut cursor = 0;
        for (group, start, end) in groups {
            if start < cursor {
                return Err(FieldError::InvalidMask {
                    path: path.to_string(),
                    reason: "mask pattern groups overlap".to_string(),
                });
            }
            masked.push_visible(&text[cursor..start]);
            if mask.visible.contains(&group) {
                masked.push_visible(&text[start..end]);
            } else {
                masked.push_hidden(&text[start..end], &mask.replacements[group - 1]);
            }
            cursor = end;
        }
        masked.push_visible(&text[cursor..]);
        Ok(masked)
    }

    fn push_visible(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(MaskSegment::Visible(last)) = self.segments.last_mut() {
            last.push_str(text);
        } else {
            self.segments.push(MaskSegment::Visible(text.to_string()));
        }
    }

    fn push_hidden(&mut self, text: &str, replacement: &str) {
        if text.is_empty() {
            return;
        }
        self.segments.push(MaskSegment::Hidden { text: text.to_string(), replacement: replacement.to_string() });
    }

    /// Segments in order
    pub fn segments(&self) -> &[MaskSegment] {
        &self.segments
    }

    /// The original string
    pub fn full_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                MaskSegment::Visible(text) | MaskSegment::Hidden { text, .. } => text.as_str(),
            })
            .collect()
    }

    /// The string with hidden parts replaced
    pub fn masked_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                MaskSegment::Visible(text) => text.as_str(),
                MaskSegment::Hidden { replacement, .. } => replacement.as_str(),
            })
            .collect()
    }

    /// Write the segments into the record stream
    pub fn write(&self, out: &mut WriteStream) {
        out.write_varuint(self.segments.len() as u64);
        for segment in &self.segments {
            match segment {
                MaskSegment::Visible(text) => {
                    out.write_byte(VISIBLE);
                    out.write_string(text);
                }
                MaskSegment::Hidden { text, replacement } => {
                    out.write_byte(HIDDEN);
                    out.write_string(text);
                    out.write_string(replacement);
                }
            }
        }
    }

    /// Read segments written by [`MaskedText::write`]
    pub fn read(input: &mut ReadStream<'_>, max_length: usize) -> Result<Self, StreamError> {
        let count = read_count(input, max_length)?;
        let mut segments = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            let segment = match input.read_byte()? {
                VISIBLE => MaskSegment::Visible(read_limited(input, max_length)?),
                HIDDEN => MaskSegment::Hidden {
                    text: read_limited(input, max_length)?,
                    replacement: read_limited(input, max_length)?,
                },
                tag => return Err(StreamError::UnknownTag(tag)),
            };
            segments.push(segment);
        }
        Ok(MaskedText { segments })
    }

    /// Commitment encoding of what a masked disclosure reveals
    pub fn visible_bytes(&self) -> Vec<u8> {
        let mut out = WriteStream::new();
        out.write_varuint(self.segments.len() as u64);
        for segment in &self.segments {
            match segment {
                MaskSegment::Visible(text) => {
                    out.write_byte(VISIBLE);
                    out.write_string(text);
                }
                MaskSegment::Hidden { replacement, .. } => {
                    out.write_byte(HIDDEN);
                    out.write_string(replacement);
                }
            }
        }
        out.into_bytes()
    }

    /// Commitment encoding of the hidden texts
    pub fn hidden_bytes(&self) -> Vec<u8> {
        let hidden: Vec<&str> = self
            .segments
            .iter()
            .filter_map(|s| match s {
                MaskSegment::Hidden { text, .. } => Some(text.as_str()),
                MaskSegment::Visible(_) => None,
            })
            .collect();

        let mut out = WriteStream::new();
        out.write_varuint(hidden.len() as u64);
        for text in hidden {
            out.write_string(text);
        }
        out.into_bytes()
    }

    /// Rebuild the segments from both disclosed parts
    pub fn from_parts(visible: &[u8], hidden: &[u8]) -> Result<Self, StreamError> {
        let mut input = ReadStream::new(hidden);
        let hidden_count = read_count(&mut input, hidden.len())?;
        let mut hidden_texts = Vec::with_capacity(hidden_count);
        for _ in 0..hidden_count {
            hidden_texts.push(input.read_string()?);
        }
        input.finish()?;

        let mut hidden_texts = hidden_texts.into_iter();
        let mut segments = Vec::new();
        for (kind, text) in read_visible(visible)? {
            segments.push(match kind {
                VISIBLE => MaskSegment::Visible(text),
                _ => MaskSegment::Hidden {
                    text: hidden_texts.next().ok_or(StreamError::NonCanonical("missing hidden segment"))?,
                    replacement: text,
                },
            });
        }
        if hidden_texts.next().is_some() {
            return Err(StreamError::NonCanonical("unused hidden segment"));
        }
        Ok(MaskedText { segments })
    }

    /// Render the masked string from its visible part alone
    pub fn render_visible(visible: &[u8]) -> Result<String, StreamError> {
        Ok(read_visible(visible)?.into_iter().map(|(_, text)| text).collect())
    }
}

fn read_visible(visible: &[u8]) -> Result<Vec<(u8, String)>, StreamError> {
    let mut input = ReadStream::new(visible);
    let count = read_count(&mut input, visible.len())?;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        let kind = input.read_byte()?;
        if kind != VISIBLE && kind != HIDDEN {
            return Err(StreamError::UnknownTag(kind));
        }
        parts.push((kind, input.read_string()?));
    }
    input.finish()?;
    Ok(parts)
}

fn read_count(input: &mut ReadStream<'_>, max: usize) -> Result<usize, StreamError> {
    let count = usize::try_from(input.read_varuint()?).map_err(|_| StreamError::Overflow)?;
    if count > max {
        return Err(StreamError::Exhausted { needed: count, remaining: input.remaining() });
    }
    Ok(count)
}

fn read_limited(input: &mut ReadStream<'_>, max_length: usize) -> Result<String, StreamError> {
    let length = read_count(input, max_length)?;
    input.read_fixed_string(length)
}
