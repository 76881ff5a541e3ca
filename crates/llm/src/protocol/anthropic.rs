//! Anthropic Messages wire format.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::ProxyError,
    messages::canonical::{
        ChatRequest, ChatResponse, ContentPart, Delta, FinishReason, ImageSource, Message,
        ReasoningEffort, Role, ToolChoice, ToolDeclaration, Usage,
    },
    protocol::SseFrame,
};

/// `max_tokens` is required on the Anthropic wire; requests that arrive
/// through another protocol without a cap get this value.
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Messages request as received on `/v1/messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesRequest {
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<ThinkingConfig>,
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

/// System prompt: a plain string or text blocks (the latter appear when
/// clients attach cache-control markers).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl SystemPrompt {
    fn into_text(self) -> String {
        match self {
            SystemPrompt::Text(text) => text,
            SystemPrompt::Blocks(blocks) => blocks
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: WireRole,
    pub content: MessageContent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSourceWire,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
    Thinking {
        thinking: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        signature: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ImageSourceWire {
    Base64 { media_type: String, data: String },
    Url { url: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ToolResultBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResultBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: String,
}

impl ToolResultContent {
    fn into_text(self) -> String {
        match self {
            ToolResultContent::Text(text) => text,
            ToolResultContent::Blocks(blocks) => blocks
                .into_iter()
                .map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Tool declaration in the flat `{name, description, input_schema}` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolWire {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolChoiceWire {
    Auto,
    Any,
    None,
    Tool { name: String },
}

/// Extended-thinking configuration carrying the numeric budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkingConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget_tokens: Option<u32>,
}

/// Buffered messages response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub model: String,
    pub content: Vec<ContentBlock>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: UsageWire,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageWire {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

/// Error body in the Anthropic wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl From<ProxyError> for ErrorResponse {
    fn from(error: ProxyError) -> Self {
        let kind = match error.error_type() {
            "authentication_error" => "authentication_error",
            "invalid_request_error" => "invalid_request_error",
            "not_found_error" => "not_found_error",
            "rate_limit_error" => "rate_limit_error",
            "timeout_error" => "api_error",
            _ => "api_error",
        };

        Self {
            kind: "error".to_string(),
            error: ErrorBody {
                kind: kind.to_string(),
                message: error.client_message(),
            },
        }
    }
}

/// Decode an Anthropic request into the canonical model.
///
/// Tool results live inside user messages on this wire; runs of
/// `tool_result` blocks split out into canonical tool messages so the other
/// codecs see them in their native place, with part order preserved.
pub fn decode_request(wire: MessagesRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(wire.messages.len());

    for msg in wire.messages {
        match msg.content {
            MessageContent::Text(text) => {
                let role = decode_role(msg.role);
                messages.push(Message::text(role, text));
            }
            MessageContent::Blocks(blocks) => {
                decode_blocks(msg.role, blocks, &mut messages);
            }
        }
    }

    ChatRequest {
        model: wire.model,
        system: wire.system.map(SystemPrompt::into_text),
        messages,
        tools: wire
            .tools
            .into_iter()
            .flatten()
            .map(|tool| ToolDeclaration {
                name: tool.name,
                description: tool.description,
                parameters: tool.input_schema,
            })
            .collect(),
        tool_choice: wire.tool_choice.map(|choice| match choice {
            ToolChoiceWire::Auto => ToolChoice::Auto,
            ToolChoiceWire::Any => ToolChoice::Required,
            ToolChoiceWire::None => ToolChoice::None,
            ToolChoiceWire::Tool { name } => ToolChoice::Specific(name),
        }),
        stream: wire.stream.unwrap_or(false),
        temperature: wire.temperature,
        top_p: wire.top_p,
        max_tokens: Some(wire.max_tokens),
        stop: wire.stop_sequences,
        reasoning_effort: wire
            .thinking
            .filter(|t| t.kind == "enabled")
            .and_then(|t| t.budget_tokens)
            .map(ReasoningEffort::from_budget),
    }
}

fn decode_role(role: WireRole) -> Role {
    match role {
        WireRole::User => Role::User,
        WireRole::Assistant => Role::Assistant,
    }
}

fn decode_blocks(role: WireRole, blocks: Vec<ContentBlock>, out: &mut Vec<Message>) {
    let mut current: Option<Message> = None;

    let mut flush = |current: &mut Option<Message>| {
        if let Some(message) = current.take()
            && !message.parts.is_empty()
        {
            out.push(message);
        }
    };

    for block in blocks {
        let (target_role, part) = match block {
            ContentBlock::Text { text } => (decode_role(role), ContentPart::Text { text }),
            ContentBlock::Thinking { thinking, .. } => {
                (decode_role(role), ContentPart::Text { text: thinking })
            }
            ContentBlock::Image { source } => (
                decode_role(role),
                ContentPart::Image {
                    source: match source {
                        ImageSourceWire::Base64 { media_type, data } => {
                            ImageSource::Base64 { media_type, data }
                        }
                        ImageSourceWire::Url { url } => ImageSource::Url { url },
                    },
                },
            ),
            ContentBlock::ToolUse { id, name, input } => (
                decode_role(role),
                ContentPart::ToolUse {
                    id,
                    name,
                    arguments: input.to_string(),
                },
            ),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => (
                Role::Tool,
                ContentPart::ToolResult {
                    tool_call_id: tool_use_id,
                    name: None,
                    content: content.map(ToolResultContent::into_text).unwrap_or_default(),
                    is_error,
                },
            ),
        };

        match &mut current {
            Some(message) if message.role == target_role => message.parts.push(part),
            _ => {
                flush(&mut current);
                current = Some(Message {
                    role: target_role,
                    parts: vec![part],
                });
            }
        }
    }

    flush(&mut current);
}

/// Encode a canonical request for an Anthropic upstream.
pub fn encode_request(request: &ChatRequest) -> MessagesRequest {
    let mut messages: Vec<WireMessage> = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        let (role, blocks) = match message.role {
            // A canonical system message outside the system field is rare; it
            // folds into the user turn to keep the wire alternation valid.
            Role::System | Role::User | Role::Tool => {
                (WireRole::User, encode_user_blocks(&message.parts))
            }
            Role::Assistant => (WireRole::Assistant, encode_assistant_blocks(&message.parts)),
        };

        if blocks.is_empty() {
            continue;
        }

        // Anthropic expects alternating roles; adjacent same-role messages
        // (e.g. a user turn followed by tool results) merge into one.
        match messages.last_mut() {
            Some(last) if last.role == role => {
                if let MessageContent::Blocks(existing) = &mut last.content {
                    existing.extend(blocks);
                }
            }
            _ => messages.push(WireMessage {
                role,
                content: MessageContent::Blocks(blocks),
            }),
        }
    }

    MessagesRequest {
        model: request.model.clone(),
        max_tokens: request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        messages,
        system: request.system.clone().map(SystemPrompt::Text),
        stream: Some(request.stream),
        temperature: request.temperature,
        top_p: request.top_p,
        stop_sequences: request.stop.clone(),
        tools: if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|tool| ToolWire {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.parameters.clone(),
                    })
                    .collect(),
            )
        },
        tool_choice: request.tool_choice.as_ref().map(|choice| match choice {
            ToolChoice::Auto => ToolChoiceWire::Auto,
            ToolChoice::Required => ToolChoiceWire::Any,
            ToolChoice::None => ToolChoiceWire::None,
            ToolChoice::Specific(name) => ToolChoiceWire::Tool { name: name.clone() },
        }),
        thinking: request.reasoning_effort.map(|effort| ThinkingConfig {
            kind: "enabled".to_string(),
            budget_tokens: Some(effort.budget_tokens()),
        }),
    }
}

fn encode_user_blocks(parts: &[ContentPart]) -> Vec<ContentBlock> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
            ContentPart::Image { source } => Some(ContentBlock::Image {
                source: match source {
                    ImageSource::Url { url } => ImageSourceWire::Url { url: url.clone() },
                    ImageSource::Base64 { media_type, data } => ImageSourceWire::Base64 {
                        media_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
            }),
            ContentPart::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => Some(ContentBlock::ToolResult {
                tool_use_id: tool_call_id.clone(),
                content: Some(ToolResultContent::Text(content.clone())),
                is_error: *is_error,
            }),
            ContentPart::ToolUse { .. } => None,
        })
        .collect()
}

fn encode_assistant_blocks(parts: &[ContentPart]) -> Vec<ContentBlock> {
    parts
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
            ContentPart::ToolUse {
                id,
                name,
                arguments,
            } => Some(ContentBlock::ToolUse {
                id: id.clone(),
                name: name.clone(),
                input: parse_arguments(arguments),
            }),
            _ => None,
        })
        .collect()
}

/// Tool arguments travel as JSON text canonically; this wire wants a value.
/// Unparseable text is wrapped as a JSON string rather than dropped.
pub(crate) fn parse_arguments(arguments: &str) -> Value {
    serde_json::from_str(arguments).unwrap_or_else(|_| Value::String(arguments.to_string()))
}

/// Decode a buffered Anthropic response into the canonical model.
pub fn decode_response(wire: MessagesResponse) -> ChatResponse {
    let content = wire
        .content
        .into_iter()
        .filter_map(|block| match block {
            ContentBlock::Text { text } => Some(ContentPart::Text { text }),
            ContentBlock::Thinking { thinking, .. } => Some(ContentPart::Text { text: thinking }),
            ContentBlock::ToolUse { id, name, input } => Some(ContentPart::ToolUse {
                id,
                name,
                arguments: input.to_string(),
            }),
            _ => None,
        })
        .collect();

    ChatResponse {
        id: wire.id,
        model: wire.model,
        content,
        finish_reason: decode_stop_reason(wire.stop_reason.as_deref()),
        usage: Usage {
            prompt_tokens: wire.usage.input_tokens,
            completion_tokens: wire.usage.output_tokens,
            total_tokens: wire.usage.input_tokens + wire.usage.output_tokens,
        },
    }
}

fn decode_stop_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("max_tokens") => FinishReason::Length,
        Some("tool_use") => FinishReason::ToolCalls,
        Some("refusal") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn encode_stop_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::Error => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolCalls => "tool_use",
        FinishReason::ContentFilter => "refusal",
    }
}

/// Encode a canonical response for an Anthropic client.
pub fn encode_response(response: &ChatResponse) -> MessagesResponse {
    MessagesResponse {
        id: response.id.clone(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        model: response.model.clone(),
        content: encode_assistant_blocks(&response.content),
        stop_reason: Some(encode_stop_reason(response.finish_reason).to_string()),
        stop_sequence: None,
        usage: UsageWire {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        },
    }
}

/// Typed streaming events of the Messages API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    MessageStart {
        message: MessageStartBody,
    },
    ContentBlockStart {
        index: usize,
        content_block: ContentBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<UsageDelta>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
}

impl StreamEvent {
    /// The SSE `event:` name for this event.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::MessageStart { .. } => "message_start",
            StreamEvent::ContentBlockStart { .. } => "content_block_start",
            StreamEvent::ContentBlockDelta { .. } => "content_block_delta",
            StreamEvent::ContentBlockStop { .. } => "content_block_stop",
            StreamEvent::MessageDelta { .. } => "message_delta",
            StreamEvent::MessageStop => "message_stop",
            StreamEvent::Ping => "ping",
            StreamEvent::Error { .. } => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageStartBody {
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub usage: UsageWire,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockDelta {
    TextDelta { text: String },
    InputJsonDelta { partial_json: String },
    ThinkingDelta { thinking: String },
    SignatureDelta { signature: String },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MessageDeltaBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageDelta {
    #[serde(default)]
    pub output_tokens: u32,
}

/// Stateful decoder for Anthropic streaming events.
///
/// Wire block indices are remapped to per-response tool-call ordinals so the
/// canonical delta indices stay dense regardless of interleaved text blocks.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    tool_blocks: HashMap<usize, usize>,
    next_ordinal: usize,
    pending_stop: Option<FinishReason>,
}

impl StreamDecoder {
    pub fn decode(&mut self, event: StreamEvent, out: &mut Vec<Delta>) {
        match event {
            StreamEvent::MessageStart { .. } | StreamEvent::Ping => {}
            StreamEvent::ContentBlockStart {
                index,
                content_block,
            } => match content_block {
                ContentBlock::ToolUse { id, name, .. } => {
                    let ordinal = self.next_ordinal;
                    self.next_ordinal += 1;
                    self.tool_blocks.insert(index, ordinal);

                    out.push(Delta::ToolCallStart {
                        index: ordinal,
                        id,
                        name,
                    });
                }
                ContentBlock::Text { text } if !text.is_empty() => {
                    out.push(Delta::Text(text));
                }
                _ => {}
            },
            StreamEvent::ContentBlockDelta { index, delta } => match delta {
                BlockDelta::TextDelta { text } => out.push(Delta::Text(text)),
                BlockDelta::ThinkingDelta { thinking } => out.push(Delta::Text(thinking)),
                BlockDelta::InputJsonDelta { partial_json } => {
                    if let Some(&ordinal) = self.tool_blocks.get(&index) {
                        out.push(Delta::ToolCallArguments {
                            index: ordinal,
                            fragment: partial_json,
                        });
                    }
                }
                BlockDelta::SignatureDelta { .. } => {}
            },
            StreamEvent::ContentBlockStop { index } => {
                if let Some(ordinal) = self.tool_blocks.remove(&index) {
                    out.push(Delta::ToolCallEnd { index: ordinal });
                }
            }
            StreamEvent::MessageDelta { delta, .. } => {
                if let Some(reason) = delta.stop_reason.as_deref() {
                    self.pending_stop = Some(decode_stop_reason(Some(reason)));
                }
            }
            StreamEvent::MessageStop => {
                out.push(Delta::Done(
                    self.pending_stop.take().unwrap_or(FinishReason::Stop),
                ));
            }
            StreamEvent::Error { error } => {
                log::warn!(
                    "Anthropic upstream stream error ({}): {}",
                    error.kind,
                    error.message
                );
                out.push(Delta::Done(FinishReason::Error));
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlock {
    Text(usize),
    Tool { canonical: usize, wire: usize },
}

/// Streaming encoder producing the Anthropic event lifecycle from canonical
/// deltas: `message_start`, block lifecycles, `message_delta`, `message_stop`.
pub struct StreamEncoder {
    id: String,
    model: String,
    started: bool,
    open: Option<OpenBlock>,
    next_block: usize,
    tool_blocks: HashMap<usize, usize>,
    saw_tool_call: bool,
}

impl StreamEncoder {
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            model,
            started: false,
            open: None,
            next_block: 0,
            tool_blocks: HashMap::new(),
            saw_tool_call: false,
        }
    }

    pub fn encode(&mut self, delta: &Delta) -> Vec<SseFrame> {
        let mut frames = Vec::new();

        if !self.started {
            self.started = true;
            self.push(
                &mut frames,
                StreamEvent::MessageStart {
                    message: MessageStartBody {
                        id: self.id.clone(),
                        kind: "message".to_string(),
                        role: "assistant".to_string(),
                        content: Vec::new(),
                        model: self.model.clone(),
                        stop_reason: None,
                        usage: UsageWire::default(),
                    },
                },
            );
        }

        match delta {
            Delta::Text(text) => {
                if !matches!(self.open, Some(OpenBlock::Text(_))) {
                    self.close_open_block(&mut frames);

                    let index = self.next_block;
                    self.next_block += 1;
                    self.open = Some(OpenBlock::Text(index));

                    self.push(
                        &mut frames,
                        StreamEvent::ContentBlockStart {
                            index,
                            content_block: ContentBlock::Text {
                                text: String::new(),
                            },
                        },
                    );
                }

                let Some(OpenBlock::Text(index)) = self.open else {
                    unreachable!("text block opened above");
                };

                self.push(
                    &mut frames,
                    StreamEvent::ContentBlockDelta {
                        index,
                        delta: BlockDelta::TextDelta { text: text.clone() },
                    },
                );
            }
            Delta::ToolCallStart { index, id, name } => {
                self.close_open_block(&mut frames);
                self.saw_tool_call = true;

                let wire = self.next_block;
                self.next_block += 1;
                self.tool_blocks.insert(*index, wire);
                self.open = Some(OpenBlock::Tool {
                    canonical: *index,
                    wire,
                });

                self.push(
                    &mut frames,
                    StreamEvent::ContentBlockStart {
                        index: wire,
                        content_block: ContentBlock::ToolUse {
                            id: id.clone(),
                            name: name.clone(),
                            input: Value::Object(serde_json::Map::new()),
                        },
                    },
                );
            }
            Delta::ToolCallArguments { index, fragment } => {
                if let Some(&wire) = self.tool_blocks.get(index) {
                    self.push(
                        &mut frames,
                        StreamEvent::ContentBlockDelta {
                            index: wire,
                            delta: BlockDelta::InputJsonDelta {
                                partial_json: fragment.clone(),
                            },
                        },
                    );
                }
            }
            Delta::ToolCallEnd { index } => {
                if let Some(wire) = self.tool_blocks.remove(index) {
                    if matches!(self.open, Some(OpenBlock::Tool { canonical, .. }) if canonical == *index)
                    {
                        self.open = None;
                    }
                    self.push(&mut frames, StreamEvent::ContentBlockStop { index: wire });
                }
            }
            Delta::Done(reason) => {
                self.close_open_block(&mut frames);

                if *reason == FinishReason::Error {
                    self.push(
                        &mut frames,
                        StreamEvent::Error {
                            error: ErrorBody {
                                kind: "api_error".to_string(),
                                message: "upstream stream terminated abnormally".to_string(),
                            },
                        },
                    );
                    return frames;
                }

                let reason = if self.saw_tool_call {
                    FinishReason::ToolCalls
                } else {
                    *reason
                };

                self.push(
                    &mut frames,
                    StreamEvent::MessageDelta {
                        delta: MessageDeltaBody {
                            stop_reason: Some(encode_stop_reason(reason).to_string()),
                            stop_sequence: None,
                        },
                        usage: Some(UsageDelta::default()),
                    },
                );
                self.push(&mut frames, StreamEvent::MessageStop);
            }
        }

        frames
    }

    fn close_open_block(&mut self, frames: &mut Vec<SseFrame>) {
        if let Some(open) = self.open.take() {
            let wire = match open {
                OpenBlock::Text(index) => index,
                OpenBlock::Tool { canonical, wire } => {
                    self.tool_blocks.remove(&canonical);
                    wire
                }
            };

            self.push(frames, StreamEvent::ContentBlockStop { index: wire });
        }
    }

    fn push(&self, frames: &mut Vec<SseFrame>, event: StreamEvent) {
        let name = event.name();
        let data = sonic_rs::to_string(&event).unwrap_or_else(|e| {
            log::error!("Failed to serialize Anthropic stream event: {e}");
            r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#
                .to_string()
        });

        frames.push(SseFrame::event(name, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_request_with_tool_results() {
        let wire: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1000,
            "system": "be helpful",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": [
                    {"type": "text", "text": "let me check"},
                    {"type": "tool_use", "id": "toolu_1", "name": "get_weather", "input": {"city": "Tokyo"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "sunny"}
                ]}
            ]
        }))
        .unwrap();

        let request = decode_request(wire);

        assert_eq!(request.system.as_deref(), Some("be helpful"));
        assert_eq!(request.max_tokens, Some(1000));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[2].role, Role::Tool);
        assert_eq!(
            request.messages[1].parts[1],
            ContentPart::ToolUse {
                id: "toolu_1".into(),
                name: "get_weather".into(),
                arguments: r#"{"city":"Tokyo"}"#.into(),
            }
        );
    }

    #[test]
    fn mixed_user_content_splits_on_tool_results_in_order() {
        let wire: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "messages": [
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "42"},
                    {"type": "text", "text": "and now?"}
                ]}
            ]
        }))
        .unwrap();

        let request = decode_request(wire);

        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, Role::Tool);
        assert_eq!(request.messages[1].role, Role::User);
    }

    #[test]
    fn thinking_budget_maps_to_reasoning_effort() {
        let wire: MessagesRequest = serde_json::from_value(json!({
            "model": "claude-sonnet-4",
            "messages": [{"role": "user", "content": "hi"}],
            "thinking": {"type": "enabled", "budget_tokens": 8192}
        }))
        .unwrap();

        assert_eq!(
            decode_request(wire).reasoning_effort,
            Some(ReasoningEffort::Medium)
        );
    }

    #[test]
    fn encode_request_merges_adjacent_user_turns() {
        let request = ChatRequest {
            model: "claude-sonnet-4".into(),
            system: None,
            messages: vec![
                Message {
                    role: Role::Tool,
                    parts: vec![ContentPart::ToolResult {
                        tool_call_id: "call_1".into(),
                        name: None,
                        content: "42".into(),
                        is_error: None,
                    }],
                },
                Message::text(Role::User, "next question"),
            ],
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            reasoning_effort: Some(ReasoningEffort::High),
        };

        let wire = encode_request(&request);

        assert_eq!(wire.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(wire.messages.len(), 1);
        assert_eq!(wire.messages[0].role, WireRole::User);
        assert_eq!(wire.thinking.as_ref().unwrap().budget_tokens, Some(16384));

        let MessageContent::Blocks(blocks) = &wire.messages[0].content else {
            panic!("expected block content");
        };
        assert_eq!(blocks.len(), 2);
    }

    #[test]
    fn malformed_tool_arguments_survive_as_string_input() {
        assert_eq!(
            parse_arguments("{not json"),
            Value::String("{not json".into())
        );
    }

    #[test]
    fn stream_decoder_remaps_block_indices_to_ordinals() {
        let mut decoder = StreamDecoder::default();
        let mut out = Vec::new();

        let events = [
            json!({"type": "message_start", "message": {"id": "msg_1", "type": "message", "role": "assistant", "content": [], "model": "claude", "usage": {"input_tokens": 1, "output_tokens": 0}}}),
            json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "hi"}}),
            json!({"type": "content_block_stop", "index": 0}),
            json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "toolu_1", "name": "f", "input": {}}}),
            json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"a\":1}"}}),
            json!({"type": "content_block_stop", "index": 1}),
            json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 7}}),
            json!({"type": "message_stop"}),
        ];

        for event in events {
            let event: StreamEvent = serde_json::from_value(event).unwrap();
            decoder.decode(event, &mut out);
        }

        assert_eq!(
            out,
            vec![
                Delta::Text("hi".into()),
                Delta::ToolCallStart {
                    index: 0,
                    id: "toolu_1".into(),
                    name: "f".into()
                },
                Delta::ToolCallArguments {
                    index: 0,
                    fragment: "{\"a\":1}".into()
                },
                Delta::ToolCallEnd { index: 0 },
                Delta::Done(FinishReason::ToolCalls),
            ]
        );
    }

    #[test]
    fn stream_encoder_emits_full_event_lifecycle() {
        let mut encoder = StreamEncoder::new("msg_1".into(), "claude".into());
        let mut frames = Vec::new();

        frames.extend(encoder.encode(&Delta::Text("checking".into())));
        frames.extend(encoder.encode(&Delta::ToolCallStart {
            index: 0,
            id: "call_1".into(),
            name: "get_weather".into(),
        }));
        frames.extend(encoder.encode(&Delta::ToolCallArguments {
            index: 0,
            fragment: r#"{"city":"Tokyo"}"#.into(),
        }));
        frames.extend(encoder.encode(&Delta::ToolCallEnd { index: 0 }));
        frames.extend(encoder.encode(&Delta::Done(FinishReason::ToolCalls)));

        let names: Vec<_> = frames.iter().filter_map(|f| f.event).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );

        assert!(frames[4].data.contains(r#""type":"tool_use""#));
        assert!(frames[5].data.contains("input_json_delta"));
        assert!(frames[7].data.contains(r#""stop_reason":"tool_use""#));
    }
}
