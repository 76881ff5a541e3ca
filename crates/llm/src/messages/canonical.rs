//! Protocol-agnostic canonical message types.
//!
//! These types are the middle format every wire codec converts through. They
//! can represent OpenAI Chat Completions, Anthropic Messages and Gemini
//! generateContent payloads without losing the order of content parts.

use serde_json::Value;

/// The fully decoded, protocol-agnostic chat request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    /// Client-requested model name, before any mapping.
    pub model: String,

    /// System instruction.
    ///
    /// OpenAI carries this as leading `system` messages, Anthropic as a
    /// top-level field, Gemini as `systemInstruction`. Multiple system
    /// messages are joined with newlines on decode.
    pub system: Option<String>,

    /// Conversation messages in order.
    pub messages: Vec<Message>,

    /// Declared tools. Empty when the client declared none.
    pub tools: Vec<ToolDeclaration>,

    /// How the model should use tools.
    pub tool_choice: Option<ToolChoice>,

    /// Whether the client requested a streamed response.
    pub stream: bool,

    /// Passthrough sampling parameters.
    pub temperature: Option<f32>,
    /// Nucleus sampling.
    pub top_p: Option<f32>,
    /// Generation cap. Anthropic requires it on the wire; the codec fills a
    /// default when absent here.
    pub max_tokens: Option<u32>,
    /// Stop sequences.
    pub stop: Option<Vec<String>>,

    /// The canonical reasoning knob.
    pub reasoning_effort: Option<ReasoningEffort>,
}

/// A single message in the canonical conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Who produced the message.
    pub role: Role,
    /// Ordered content parts. Order is preserved through every transcoding.
    pub parts: Vec<ContentPart>,
}

impl Message {
    /// A plain-text message.
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text { text: text.into() }],
        }
    }

    /// Concatenation of all text parts.
    pub fn joined_text(&self) -> String {
        let mut out = String::new();

        for part in &self.parts {
            if let ContentPart::Text { text } = part {
                out.push_str(text);
            }
        }

        out
    }
}

/// Canonical message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// System instruction carried as a message (normalized into
    /// [`ChatRequest::system`] on decode).
    System,
    /// End-user input.
    User,
    /// Model output.
    Assistant,
    /// Tool execution result.
    Tool,
}

/// One part of a message's content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    /// Plain text.
    Text {
        /// The text.
        text: String,
    },

    /// Image reference.
    Image {
        /// Where the image data lives.
        source: ImageSource,
    },

    /// A tool invocation requested by the assistant.
    ToolUse {
        /// Client-facing call ID.
        id: String,
        /// Tool name.
        name: String,
        /// Arguments as JSON text. Forwarded faithfully even when it is not
        /// valid JSON, so clients can surface the model's formatting error.
        arguments: String,
    },

    /// The result of a tool invocation.
    ToolResult {
        /// ID of the call this result answers.
        tool_call_id: String,
        /// Tool name, when the wire format carries it. Gemini correlates
        /// results by name rather than ID.
        name: Option<String>,
        /// Result payload as text.
        content: String,
        /// Whether the tool reported an error.
        is_error: Option<bool>,
    },
}

/// Image payload location.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    /// Remote image.
    Url {
        /// The image URL.
        url: String,
    },
    /// Inline base64 data.
    Base64 {
        /// MIME type, e.g. `image/png`.
        media_type: String,
        /// Base64-encoded bytes.
        data: String,
    },
}

/// A declared tool the model may invoke.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: Option<String>,
    /// JSON-Schema object describing the parameters. User-defined at runtime,
    /// kept opaque.
    pub parameters: Value,
}

/// How the model should use the declared tools.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolChoice {
    /// Model decides.
    Auto,
    /// Tools must not be used.
    None,
    /// At least one tool must be used.
    Required,
    /// A specific tool must be used.
    Specific(String),
}

/// The fully decoded, protocol-agnostic response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    /// Response identifier.
    pub id: String,
    /// Model that actually produced the response.
    pub model: String,
    /// Text and tool-call parts, interleaved in production order.
    pub content: Vec<ContentPart>,
    /// Why generation stopped.
    pub finish_reason: FinishReason,
    /// Token accounting, zeroed when the upstream omits it.
    pub usage: Usage,
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// Natural end of turn.
    Stop,
    /// Token limit reached.
    Length,
    /// The model invoked tools.
    ToolCalls,
    /// Output was filtered.
    ContentFilter,
    /// The stream terminated abnormally.
    Error,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    /// Input tokens.
    pub prompt_tokens: u32,
    /// Output tokens.
    pub completion_tokens: u32,
    /// Sum of both.
    pub total_tokens: u32,
}

/// One element of a streamed response.
///
/// A response stream is a finite, non-restartable sequence of deltas ending
/// with exactly one [`Delta::Done`].
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Append to the running assistant text.
    Text(String),

    /// Begin the tool call at ordinal `index`.
    ToolCallStart {
        /// Per-response ordinal of this call.
        index: usize,
        /// Client-facing call ID.
        id: String,
        /// Tool name.
        name: String,
    },

    /// Append to the argument buffer of the call at `index`. Concatenated
    /// fragments yield the full argument text.
    ToolCallArguments {
        /// Ordinal of the call being extended.
        index: usize,
        /// JSON fragment.
        fragment: String,
    },

    /// The call at `index` is complete.
    ToolCallEnd {
        /// Ordinal of the completed call.
        index: usize,
    },

    /// Terminal element; no deltas follow.
    Done(FinishReason),
}

/// The canonical reasoning knob.
///
/// OpenAI expresses reasoning as an effort enum, Anthropic and Gemini as a
/// thinking token budget. The two forms map exactly through
/// [`budget_tokens`](Self::budget_tokens) and
/// [`from_budget`](Self::from_budget).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningEffort {
    /// 2048 thinking tokens.
    Low,
    /// 8192 thinking tokens.
    Medium,
    /// 16384 thinking tokens.
    High,
}

impl ReasoningEffort {
    /// The thinking budget this effort level encodes to.
    pub fn budget_tokens(self) -> u32 {
        match self {
            ReasoningEffort::Low => 2048,
            ReasoningEffort::Medium => 8192,
            ReasoningEffort::High => 16384,
        }
    }

    /// Buckets a numeric budget by nearest-below threshold.
    pub fn from_budget(tokens: u32) -> Self {
        if tokens <= 2048 {
            ReasoningEffort::Low
        } else if tokens <= 8192 {
            ReasoningEffort::Medium
        } else {
            ReasoningEffort::High
        }
    }

    /// Wire spelling used by OpenAI's `reasoning_effort` field.
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }

    /// Parses the OpenAI wire spelling.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effort_budget_mapping_is_exact() {
        assert_eq!(ReasoningEffort::Low.budget_tokens(), 2048);
        assert_eq!(ReasoningEffort::Medium.budget_tokens(), 8192);
        assert_eq!(ReasoningEffort::High.budget_tokens(), 16384);
    }

    #[test]
    fn budget_roundtrip_is_identity_on_effort() {
        for effort in [
            ReasoningEffort::Low,
            ReasoningEffort::Medium,
            ReasoningEffort::High,
        ] {
            assert_eq!(ReasoningEffort::from_budget(effort.budget_tokens()), effort);
        }
    }

    #[test]
    fn budget_buckets_by_nearest_below() {
        assert_eq!(ReasoningEffort::from_budget(0), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_budget(2048), ReasoningEffort::Low);
        assert_eq!(ReasoningEffort::from_budget(2049), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_budget(8192), ReasoningEffort::Medium);
        assert_eq!(ReasoningEffort::from_budget(8193), ReasoningEffort::High);
        assert_eq!(ReasoningEffort::from_budget(1_000_000), ReasoningEffort::High);
    }

    #[test]
    fn effort_wire_spelling_roundtrips() {
        for effort in [
            ReasoningEffort::Low,
            ReasoningEffort::Medium,
            ReasoningEffort::High,
        ] {
            assert_eq!(ReasoningEffort::parse(effort.as_str()), Some(effort));
        }

        assert_eq!(ReasoningEffort::parse("extreme"), None);
    }
}
