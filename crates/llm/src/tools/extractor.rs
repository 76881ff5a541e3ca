//! Inline extraction of XML tool calls from a streaming byte flow.
//!
//! The extractor is an explicit state machine driven by `feed`, so its
//! behavior is deterministic on arbitrary chunk boundaries: a `<tool_call>`
//! tag split across chunks is never leaked to the client, and text that
//! merely looks like the start of a tag is flushed as soon as a mismatching
//! character arrives.

use crate::{
    messages::canonical::Delta,
    tools::id_map::synthesize_call_id,
};

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const NAME_OPEN: &str = "<name>";
const NAME_CLOSE: &str = "</name>";
const ARGS_OPEN: &str = "<arguments>";
const ARGS_CLOSE: &str = "</arguments>";
const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Forwarding text; the tail may hold a partial `<tool_call>` or
    /// `<think>` prefix (at most 10 characters).
    PassThrough,
    /// Inside a `<think>` block: text passes through, tool-call detection is
    /// suppressed until `</think>`.
    Think,
    /// Saw `<tool_call>`; accumulating the header until `<arguments>` opens.
    /// Nothing is emitted yet, so a malformed header can degrade to text.
    CallHeader,
    /// Streaming argument bytes for the call at `index`.
    Arguments { index: usize },
    /// Arguments closed; awaiting `</tool_call>`.
    Trailer { index: usize },
}

/// Streaming tool-call extractor.
///
/// Feed upstream text with [`feed`](Self::feed); call
/// [`finish`](Self::finish) exactly once when the upstream closes to flush
/// buffered text and close any half-open call.
#[derive(Debug)]
pub struct StreamingExtractor {
    state: State,
    buf: String,
    calls: usize,
}

impl Default for StreamingExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingExtractor {
    pub fn new() -> Self {
        Self {
            state: State::PassThrough,
            buf: String::new(),
            calls: 0,
        }
    }

    /// Number of tool calls started so far.
    pub fn calls_extracted(&self) -> usize {
        self.calls
    }

    /// Consumes one upstream text chunk, appending produced deltas to `out`.
    pub fn feed(&mut self, chunk: &str, out: &mut Vec<Delta>) {
        self.buf.push_str(chunk);
        self.drain(out);
    }

    /// Flushes the machine at end of stream.
    ///
    /// Buffered text that never became a complete tag comes out as a final
    /// text delta. A call that already produced a `ToolCallStart` is closed
    /// with its end delta; one that had not emitted anything degrades to raw
    /// text.
    pub fn finish(&mut self, out: &mut Vec<Delta>) {
        match self.state {
            State::PassThrough | State::Think => {
                Self::emit_text(out, std::mem::take(&mut self.buf));
            }
            State::CallHeader => {
                // The start was never announced, so the raw bytes flush whole.
                let raw = format!("{TOOL_CALL_OPEN}{}", self.buf);
                self.buf.clear();
                Self::emit_text(out, raw);
            }
            State::Arguments { index } => {
                let tail = std::mem::take(&mut self.buf);
                if !tail.is_empty() {
                    out.push(Delta::ToolCallArguments {
                        index,
                        fragment: tail,
                    });
                }
                out.push(Delta::ToolCallEnd { index });
            }
            State::Trailer { index } => {
                self.buf.clear();
                out.push(Delta::ToolCallEnd { index });
            }
        }

        self.state = State::PassThrough;
    }

    fn drain(&mut self, out: &mut Vec<Delta>) {
        loop {
            match self.state {
                State::PassThrough => {
                    let tool = self.buf.find(TOOL_CALL_OPEN);
                    let think = self.buf.find(THINK_OPEN);

                    match (tool, think) {
                        (Some(t), Some(k)) if k < t => self.enter_think(k, out),
                        (None, Some(k)) => self.enter_think(k, out),
                        (Some(t), _) => {
                            Self::emit_text(out, self.buf[..t].to_string());
                            self.buf.drain(..t + TOOL_CALL_OPEN.len());
                            self.state = State::CallHeader;
                        }
                        (None, None) => {
                            self.flush_with_holdback(out, &[TOOL_CALL_OPEN, THINK_OPEN]);
                            return;
                        }
                    }
                }
                State::Think => match self.buf.find(THINK_CLOSE) {
                    Some(i) => {
                        let end = i + THINK_CLOSE.len();
                        Self::emit_text(out, self.buf[..end].to_string());
                        self.buf.drain(..end);
                        self.state = State::PassThrough;
                    }
                    None => {
                        self.flush_with_holdback(out, &[THINK_CLOSE]);
                        return;
                    }
                },
                State::CallHeader => {
                    if !self.drain_call_header(out) {
                        return;
                    }
                }
                State::Arguments { index } => match self.buf.find(ARGS_CLOSE) {
                    Some(i) => {
                        if i > 0 {
                            out.push(Delta::ToolCallArguments {
                                index,
                                fragment: self.buf[..i].to_string(),
                            });
                        }
                        self.buf.drain(..i + ARGS_CLOSE.len());
                        self.state = State::Trailer { index };
                    }
                    None => {
                        let keep = holdback_len(&self.buf, &[ARGS_CLOSE]);
                        let emit_to = self.buf.len() - keep;
                        if emit_to > 0 {
                            let fragment: String = self.buf.drain(..emit_to).collect();
                            out.push(Delta::ToolCallArguments { index, fragment });
                        }
                        return;
                    }
                },
                State::Trailer { index } => {
                    let rest = self.buf.trim_start();

                    if rest.is_empty() {
                        self.buf.clear();
                        return;
                    }

                    if let Some(stripped) = rest.strip_prefix(TOOL_CALL_CLOSE) {
                        self.buf = stripped.to_string();
                        self.state = State::PassThrough;
                        out.push(Delta::ToolCallEnd { index });
                        continue;
                    }

                    if TOOL_CALL_CLOSE.starts_with(rest) {
                        // Partial closing tag: wait for more bytes.
                        self.buf = rest.to_string();
                        return;
                    }

                    // Garbage between the arguments and the closing tag: end
                    // the call and fall back to pass-through.
                    self.buf = rest.to_string();
                    self.state = State::PassThrough;
                    out.push(Delta::ToolCallEnd { index });
                }
            }
        }
    }

    /// Scans the call header for `<name>...</name>` followed by
    /// `<arguments>`. Returns false when more input is needed.
    fn drain_call_header(&mut self, out: &mut Vec<Delta>) -> bool {
        // A close tag before any arguments means the block is malformed;
        // nothing was emitted yet, so the whole block degrades to text.
        if let Some(close) = self.buf.find(TOOL_CALL_CLOSE)
            && self.buf.find(ARGS_OPEN).is_none_or(|a| a > close)
        {
            let end = close + TOOL_CALL_CLOSE.len();
            let raw = format!("{TOOL_CALL_OPEN}{}", &self.buf[..end]);
            self.buf.drain(..end);
            self.state = State::PassThrough;
            Self::emit_text(out, raw);
            return true;
        }

        let Some(args_at) = self.buf.find(ARGS_OPEN) else {
            return false;
        };

        let header = &self.buf[..args_at];
        let name = header.find(NAME_OPEN).and_then(|n0| {
            header[n0..]
                .find(NAME_CLOSE)
                .map(|n1| header[n0 + NAME_OPEN.len()..n0 + n1].trim().to_string())
        });

        match name {
            Some(name) if !name.is_empty() => {
                let index = self.calls;
                self.calls += 1;

                out.push(Delta::ToolCallStart {
                    index,
                    id: synthesize_call_id(),
                    name,
                });

                self.buf.drain(..args_at + ARGS_OPEN.len());
                self.state = State::Arguments { index };
            }
            _ => {
                // No usable name before the arguments: degrade to text.
                let end = args_at + ARGS_OPEN.len();
                let raw = format!("{TOOL_CALL_OPEN}{}", &self.buf[..end]);
                self.buf.drain(..end);
                self.state = State::PassThrough;
                Self::emit_text(out, raw);
            }
        }

        true
    }

    fn enter_think(&mut self, open_at: usize, out: &mut Vec<Delta>) {
        let end = open_at + THINK_OPEN.len();
        Self::emit_text(out, self.buf[..end].to_string());
        self.buf.drain(..end);
        self.state = State::Think;
    }

    /// Emits everything except the longest tail that could still become one
    /// of `tags`.
    fn flush_with_holdback(&mut self, out: &mut Vec<Delta>, tags: &[&str]) {
        let keep = holdback_len(&self.buf, tags);
        let emit_to = self.buf.len() - keep;

        if emit_to > 0 {
            let text: String = self.buf.drain(..emit_to).collect();
            Self::emit_text(out, text);
        }
    }

    fn emit_text(out: &mut Vec<Delta>, text: String) {
        if !text.is_empty() {
            out.push(Delta::Text(text));
        }
    }
}

/// Length of the longest suffix of `s` that is a proper prefix of any tag.
fn holdback_len(s: &str, tags: &[&str]) -> usize {
    let max = tags
        .iter()
        .map(|t| t.len() - 1)
        .max()
        .unwrap_or(0)
        .min(s.len());

    for k in (1..=max).rev() {
        if !s.is_char_boundary(s.len() - k) {
            continue;
        }

        let suffix = &s[s.len() - k..];
        if tags.iter().any(|t| t.len() > k && t.starts_with(suffix)) {
            return k;
        }
    }

    0
}
