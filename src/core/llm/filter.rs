//! Character-level filter that strips hidden reasoning spans from an
//! incrementally arriving token stream.
//!
//! Reasoning-capable models wrap internal deliberation in
//! `<think>...</think>` markers that must never reach the client, while
//! everything else should be forwarded as early as possible. The markers can
//! straddle arbitrary token boundaries, so the filter runs one character at
//! a time, buffering at most one partial marker. Leading whitespace before
//! the first visible character is suppressed.
//!
//! A simpler whole-string variant, [`strip_hidden_spans`], produces the copy
//! persisted to conversation history.

use std::sync::LazyLock;

use regex::Regex;

const START_MARKER: &str = "<think>";
const END_MARKER: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterMode {
    /// Before the first visible character: whitespace is discarded.
    LeadingSkip,
    /// Verbatim passthrough, watching for the start marker.
    Normal,
    /// Inside a hidden span; `from_leading` remembers the state to resume
    /// once the end marker is consumed.
    Hidden { from_leading: bool },
}

/// Streaming reasoning-span filter.
#[derive(Debug)]
pub struct ResponseFilter {
    mode: FilterMode,
    /// Partial marker match, never longer than the marker being tracked.
    pending: String,
}

impl Default for ResponseFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ResponseFilter {
    pub fn new() -> Self {
        Self {
            mode: FilterMode::LeadingSkip,
            pending: String::new(),
        }
    }

    /// Feed a chunk of model output, returning the text that became visible.
    pub fn push(&mut self, chunk: &str) -> String {
        let mut out = String::new();
        for c in chunk.chars() {
            self.push_char(c, &mut out);
        }
        out
    }

    /// Signal end of stream, flushing any buffered partial match.
    ///
    /// A pending buffer is emitted as literal text in Normal mode,
    /// discarded inside a hidden span, and suppressed when no visible
    /// character ever arrived.
    pub fn finish(&mut self) -> String {
        let mut out = String::new();
        if matches!(self.mode, FilterMode::Normal) {
            out.push_str(&self.pending);
        }
        self.pending.clear();
        out
    }

    fn marker(&self) -> &'static str {
        match self.mode {
            FilterMode::Hidden { .. } => END_MARKER,
            _ => START_MARKER,
        }
    }

    fn push_char(&mut self, c: char, out: &mut String) {
        if !self.pending.is_empty() {
            self.pending.push(c);
            let marker = self.marker();

            if self.pending == marker {
                self.pending.clear();
                self.mode = match self.mode {
                    FilterMode::Hidden { from_leading: true } => FilterMode::LeadingSkip,
                    FilterMode::Hidden { from_leading: false } => FilterMode::Normal,
                    FilterMode::LeadingSkip => FilterMode::Hidden { from_leading: true },
                    FilterMode::Normal => FilterMode::Hidden { from_leading: false },
                };
                return;
            }
            if marker.starts_with(self.pending.as_str()) {
                return;
            }

            // The match broke. Release the head character under the owning
            // state's rules and re-scan the remainder (including the
            // character that broke the match) fresh.
            let buffered: Vec<char> = self.pending.drain(..).collect();
            let mut chars = buffered.into_iter();
            let head = chars.next().expect("pending was non-empty");
            self.release(head, out);
            for rest in chars {
                self.push_char(rest, out);
            }
            return;
        }

        let marker_start = self.marker().chars().next().expect("markers are non-empty");
        match self.mode {
            FilterMode::LeadingSkip => {
                if c.is_whitespace() {
                    return;
                }
                if c == marker_start {
                    self.pending.push(c);
                    return;
                }
                out.push(c);
                self.mode = FilterMode::Normal;
            }
            FilterMode::Normal => {
                if c == marker_start {
                    self.pending.push(c);
                    return;
                }
                out.push(c);
            }
            FilterMode::Hidden { .. } => {
                if c == marker_start {
                    self.pending.push(c);
                }
            }
        }
    }

    /// Emit or discard one character released from a failed marker match.
    fn release(&mut self, c: char, out: &mut String) {
        match self.mode {
            FilterMode::Hidden { .. } => {}
            FilterMode::LeadingSkip => {
                if !c.is_whitespace() {
                    out.push(c);
                    self.mode = FilterMode::Normal;
                }
            }
            FilterMode::Normal => out.push(c),
        }
    }
}

static HIDDEN_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>").expect("hidden span pattern is valid"));

static BLANK_LINES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("blank line pattern is valid"));

/// Remove every non-overlapping hidden span from a complete string, collapse
/// the blank lines this leaves behind, and trim. Used for the persisted copy
/// of a reply, not for live display.
pub fn strip_hidden_spans(text: &str) -> String {
    let stripped = HIDDEN_SPAN.replace_all(text, "");
    let collapsed = BLANK_LINES.replace_all(&stripped, "\n");
    collapsed.trim().to_string()
}
