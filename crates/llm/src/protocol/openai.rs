//! OpenAI Chat Completions wire format.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{ProxyError, Result},
    messages::canonical::{
        ChatRequest, ChatResponse, ContentPart, Delta, FinishReason, ImageSource, Message,
        ReasoningEffort, Role, ToolChoice, ToolDeclaration, Usage,
    },
    protocol::SseFrame,
    tools::id_map::synthesize_call_id,
};

/// Chat completion request as received on `/v1/chat/completions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoiceWire>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<StopSequences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// A single message in the OpenAI conversation shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    /// Newer alias for `system` used by reasoning models.
    Developer,
    User,
    Assistant,
    Tool,
}

/// Message content: a plain string or typed parts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<RequestContentPart>),
}

impl MessageContent {
    fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let RequestContentPart::Text { text } = part {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

/// Assistant tool call: `function.arguments` is a JSON string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// Tool declaration wrapped in the `{type: "function", function: {...}}` shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDeclaration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoiceWire {
    Mode(String),
    Specific {
        #[serde(rename = "type")]
        kind: String,
        function: FunctionName,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionName {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StopSequences {
    One(String),
    Many(Vec<String>),
}

/// Buffered chat completion response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageWire {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// Streaming chunk as carried in `data:` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageWire>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<ChatRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<StreamingToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingToolCall {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<StreamingFunction>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingFunction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

/// Model listing entry for `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub object: String,
    pub data: Vec<Model>,
}

/// Decode an OpenAI request into the canonical model.
///
/// Leading and interleaved `system`/`developer` messages are hoisted into the
/// canonical system field, joined with newlines. A tool message without a
/// `tool_call_id` is malformed: nothing could ever correlate its result back
/// to the call it answers.
pub fn decode_request(wire: ChatCompletionRequest) -> Result<ChatRequest> {
    let mut system_parts = Vec::new();
    let mut messages = Vec::with_capacity(wire.messages.len());

    for msg in wire.messages {
        match msg.role {
            ChatRole::System | ChatRole::Developer => {
                if let Some(content) = msg.content {
                    system_parts.push(content.joined_text());
                }
            }
            ChatRole::User | ChatRole::Assistant => {
                let role = if msg.role == ChatRole::User {
                    Role::User
                } else {
                    Role::Assistant
                };

                let mut parts = Vec::new();

                match msg.content {
                    Some(MessageContent::Text(text)) => {
                        if !text.is_empty() {
                            parts.push(ContentPart::Text { text });
                        }
                    }
                    Some(MessageContent::Parts(wire_parts)) => {
                        for part in wire_parts {
                            match part {
                                RequestContentPart::Text { text } => {
                                    parts.push(ContentPart::Text { text });
                                }
                                RequestContentPart::ImageUrl { image_url } => {
                                    parts.push(ContentPart::Image {
                                        source: ImageSource::Url { url: image_url.url },
                                    });
                                }
                            }
                        }
                    }
                    None => {}
                }

                for call in msg.tool_calls.into_iter().flatten() {
                    parts.push(ContentPart::ToolUse {
                        id: call.id,
                        name: call.function.name,
                        arguments: call.function.arguments,
                    });
                }

                messages.push(Message { role, parts });
            }
            ChatRole::Tool => {
                let Some(tool_call_id) = msg.tool_call_id else {
                    return Err(ProxyError::MalformedRequest(
                        "tool message is missing the required tool_call_id field".to_string(),
                    ));
                };

                messages.push(Message {
                    role: Role::Tool,
                    parts: vec![ContentPart::ToolResult {
                        tool_call_id,
                        name: msg.name,
                        content: msg.content.map(|c| c.joined_text()).unwrap_or_default(),
                        is_error: None,
                    }],
                });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(system_parts.join("\n"))
    };

    Ok(ChatRequest {
        model: wire.model,
        system,
        messages,
        tools: wire
            .tools
            .into_iter()
            .flatten()
            .map(|tool| ToolDeclaration {
                name: tool.function.name,
                description: tool.function.description,
                parameters: tool.function.parameters,
            })
            .collect(),
        tool_choice: wire.tool_choice.map(decode_tool_choice),
        stream: wire.stream.unwrap_or(false),
        temperature: wire.temperature,
        top_p: wire.top_p,
        max_tokens: wire.max_tokens,
        stop: wire.stop.map(|stop| match stop {
            StopSequences::One(s) => vec![s],
            StopSequences::Many(many) => many,
        }),
        reasoning_effort: wire
            .reasoning_effort
            .as_deref()
            .and_then(ReasoningEffort::parse),
    })
}

fn decode_tool_choice(wire: ToolChoiceWire) -> ToolChoice {
    match wire {
        ToolChoiceWire::Mode(mode) => match mode.as_str() {
            "none" => ToolChoice::None,
            "required" => ToolChoice::Required,
            _ => ToolChoice::Auto,
        },
        ToolChoiceWire::Specific { function, .. } => ToolChoice::Specific(function.name),
    }
}

/// Encode a canonical request for an OpenAI upstream.
pub fn encode_request(request: &ChatRequest) -> ChatCompletionRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);

    if let Some(system) = &request.system {
        messages.push(ChatMessage {
            role: ChatRole::System,
            content: Some(MessageContent::Text(system.clone())),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        });
    }

    for message in &request.messages {
        encode_message(message, &mut messages);
    }

    ChatCompletionRequest {
        model: request.model.clone(),
        messages,
        tools: if request.tools.is_empty() {
            None
        } else {
            Some(
                request
                    .tools
                    .iter()
                    .map(|tool| Tool {
                        kind: "function".to_string(),
                        function: FunctionDeclaration {
                            name: tool.name.clone(),
                            description: tool.description.clone(),
                            parameters: tool.parameters.clone(),
                        },
                    })
                    .collect(),
            )
        },
        tool_choice: request.tool_choice.as_ref().map(|choice| match choice {
            ToolChoice::Auto => ToolChoiceWire::Mode("auto".to_string()),
            ToolChoice::None => ToolChoiceWire::Mode("none".to_string()),
            ToolChoice::Required => ToolChoiceWire::Mode("required".to_string()),
            ToolChoice::Specific(name) => ToolChoiceWire::Specific {
                kind: "function".to_string(),
                function: FunctionName { name: name.clone() },
            },
        }),
        stream: Some(request.stream),
        temperature: request.temperature,
        top_p: request.top_p,
        max_tokens: request.max_tokens,
        stop: request.stop.clone().map(StopSequences::Many),
        reasoning_effort: request.reasoning_effort.map(|e| e.as_str().to_string()),
    }
}

fn encode_message(message: &Message, out: &mut Vec<ChatMessage>) {
    match message.role {
        Role::System => {
            out.push(ChatMessage {
                role: ChatRole::System,
                content: Some(MessageContent::Text(message.joined_text())),
                tool_calls: None,
                tool_call_id: None,
                name: None,
            });
        }
        Role::Assistant => {
            let text = message.joined_text();
            let tool_calls: Vec<ToolCall> = message
                .parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::ToolUse {
                        id,
                        name,
                        arguments,
                    } => Some(ToolCall {
                        id: id.clone(),
                        kind: "function".to_string(),
                        function: FunctionCall {
                            name: name.clone(),
                            arguments: arguments.clone(),
                        },
                    }),
                    _ => None,
                })
                .collect();

            out.push(ChatMessage {
                role: ChatRole::Assistant,
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(text))
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
                name: None,
            });
        }
        Role::User | Role::Tool => {
            // Tool results become their own `tool` messages; everything else
            // batches into user messages, preserving order.
            let mut pending: Vec<RequestContentPart> = Vec::new();

            for part in &message.parts {
                match part {
                    ContentPart::Text { text } => {
                        pending.push(RequestContentPart::Text { text: text.clone() });
                    }
                    ContentPart::Image { source } => {
                        let url = match source {
                            ImageSource::Url { url } => url.clone(),
                            ImageSource::Base64 { media_type, data } => {
                                format!("data:{media_type};base64,{data}")
                            }
                        };
                        pending.push(RequestContentPart::ImageUrl {
                            image_url: ImageUrl { url },
                        });
                    }
                    ContentPart::ToolResult {
                        tool_call_id,
                        name,
                        content,
                        ..
                    } => {
                        flush_user_parts(&mut pending, out);
                        out.push(ChatMessage {
                            role: ChatRole::Tool,
                            content: Some(MessageContent::Text(content.clone())),
                            tool_calls: None,
                            tool_call_id: Some(tool_call_id.clone()),
                            name: name.clone(),
                        });
                    }
                    ContentPart::ToolUse { .. } => {}
                }
            }

            flush_user_parts(&mut pending, out);
        }
    }
}

fn flush_user_parts(pending: &mut Vec<RequestContentPart>, out: &mut Vec<ChatMessage>) {
    if pending.is_empty() {
        return;
    }

    let parts = std::mem::take(pending);
    let content = if parts.iter().all(|p| matches!(p, RequestContentPart::Text { .. })) {
        let mut text = String::new();
        for part in &parts {
            if let RequestContentPart::Text { text: t } = part {
                text.push_str(t);
            }
        }
        MessageContent::Text(text)
    } else {
        MessageContent::Parts(parts)
    };

    out.push(ChatMessage {
        role: ChatRole::User,
        content: Some(content),
        tool_calls: None,
        tool_call_id: None,
        name: None,
    });
}

/// Decode a buffered OpenAI response into the canonical model.
pub fn decode_response(wire: ChatCompletionResponse) -> ChatResponse {
    let mut content = Vec::new();
    let mut finish_reason = FinishReason::Stop;

    if let Some(choice) = wire.choices.into_iter().next() {
        if let Some(text) = choice.message.content {
            let text = text.joined_text();
            if !text.is_empty() {
                content.push(ContentPart::Text { text });
            }
        }

        for call in choice.message.tool_calls.into_iter().flatten() {
            content.push(ContentPart::ToolUse {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            });
        }

        finish_reason = decode_finish_reason(choice.finish_reason.as_deref());
    }

    ChatResponse {
        id: wire.id,
        model: wire.model,
        content,
        finish_reason,
        usage: wire.usage.map(decode_usage).unwrap_or_default(),
    }
}

fn decode_usage(usage: UsageWire) -> Usage {
    Usage {
        prompt_tokens: usage.prompt_tokens,
        completion_tokens: usage.completion_tokens,
        total_tokens: usage.total_tokens,
    }
}

fn decode_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

fn encode_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::Error => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolCalls => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}

/// Encode a canonical response for an OpenAI client.
pub fn encode_response(response: &ChatResponse) -> ChatCompletionResponse {
    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for part in &response.content {
        match part {
            ContentPart::Text { text: t } => text.push_str(t),
            ContentPart::ToolUse {
                id,
                name,
                arguments,
            } => tool_calls.push(ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.clone(),
                    arguments: arguments.clone(),
                },
            }),
            _ => {}
        }
    }

    ChatCompletionResponse {
        id: response.id.clone(),
        object: "chat.completion".to_string(),
        created: unix_timestamp(),
        model: response.model.clone(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: ChatRole::Assistant,
                content: if text.is_empty() && !tool_calls.is_empty() {
                    None
                } else {
                    Some(MessageContent::Text(text))
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
                name: None,
            },
            finish_reason: Some(encode_finish_reason(response.finish_reason).to_string()),
        }],
        usage: Some(UsageWire {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
        }),
    }
}

pub(crate) fn unix_timestamp() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Stateful decoder for OpenAI streaming chunks.
///
/// OpenAI has no explicit end-of-call marker: a call ends when the next one
/// starts or when `finish_reason` arrives, so the decoder tracks the open
/// call to synthesize [`Delta::ToolCallEnd`].
#[derive(Debug, Default)]
pub struct StreamDecoder {
    open_call: Option<usize>,
}

impl StreamDecoder {
    pub fn decode(&mut self, chunk: ChatCompletionChunk, out: &mut Vec<Delta>) {
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content
                && !content.is_empty()
            {
                out.push(Delta::Text(content));
            }

            for call in choice.delta.tool_calls.into_iter().flatten() {
                let starts_new_call =
                    call.id.is_some() || call.function.as_ref().is_some_and(|f| f.name.is_some());

                if starts_new_call {
                    if let Some(open) = self.open_call.take() {
                        out.push(Delta::ToolCallEnd { index: open });
                    }

                    self.open_call = Some(call.index);

                    let function = call.function.unwrap_or_default();
                    out.push(Delta::ToolCallStart {
                        index: call.index,
                        id: call.id.unwrap_or_else(synthesize_call_id),
                        name: function.name.unwrap_or_default(),
                    });

                    if let Some(arguments) = function.arguments
                        && !arguments.is_empty()
                    {
                        out.push(Delta::ToolCallArguments {
                            index: call.index,
                            fragment: arguments,
                        });
                    }
                } else if let Some(arguments) = call.function.and_then(|f| f.arguments)
                    && !arguments.is_empty()
                {
                    out.push(Delta::ToolCallArguments {
                        index: call.index,
                        fragment: arguments,
                    });
                }
            }

            if let Some(reason) = choice.finish_reason {
                if let Some(open) = self.open_call.take() {
                    out.push(Delta::ToolCallEnd { index: open });
                }

                out.push(Delta::Done(decode_finish_reason(Some(reason.as_str()))));
            }
        }
    }
}

/// Streaming encoder producing OpenAI SSE frames from canonical deltas.
pub struct StreamEncoder {
    id: String,
    model: String,
    created: u64,
    role_sent: bool,
}

impl StreamEncoder {
    pub fn new(id: String, model: String) -> Self {
        Self {
            id,
            model,
            created: unix_timestamp(),
            role_sent: false,
        }
    }

    pub fn encode(&mut self, delta: &Delta) -> Vec<SseFrame> {
        match delta {
            Delta::Text(text) => {
                let role = self.role_chunk();
                vec![self.chunk_frame(
                    ChunkDelta {
                        role,
                        content: Some(text.clone()),
                        tool_calls: None,
                    },
                    None,
                )]
            }
            Delta::ToolCallStart { index, id, name } => {
                let role = self.role_chunk();
                vec![self.chunk_frame(
                    ChunkDelta {
                        role,
                        content: None,
                        tool_calls: Some(vec![StreamingToolCall {
                            index: *index,
                            id: Some(id.clone()),
                            kind: Some("function".to_string()),
                            function: Some(StreamingFunction {
                                name: Some(name.clone()),
                                arguments: Some(String::new()),
                            }),
                        }]),
                    },
                    None,
                )]
            }
            Delta::ToolCallArguments { index, fragment } => {
                let role = self.role_chunk();
                vec![self.chunk_frame(
                    ChunkDelta {
                        role,
                        content: None,
                        tool_calls: Some(vec![StreamingToolCall {
                            index: *index,
                            id: None,
                            kind: None,
                            function: Some(StreamingFunction {
                                name: None,
                                arguments: Some(fragment.clone()),
                            }),
                        }]),
                    },
                    None,
                )]
            }
            // OpenAI has no end-of-call event; the call closes implicitly.
            Delta::ToolCallEnd { .. } => Vec::new(),
            Delta::Done(reason) => {
                vec![
                    self.chunk_frame(ChunkDelta::default(), Some(encode_finish_reason(*reason))),
                    SseFrame::data("[DONE]".to_string()),
                ]
            }
        }
    }

    fn role_chunk(&mut self) -> Option<ChatRole> {
        if self.role_sent {
            None
        } else {
            self.role_sent = true;
            Some(ChatRole::Assistant)
        }
    }

    fn chunk_frame(&self, delta: ChunkDelta, finish_reason: Option<&str>) -> SseFrame {
        let chunk = ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage: None,
        };

        SseFrame::data(sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
            log::error!("Failed to serialize OpenAI chunk: {e}");
            r#"{"error":"serialization failed"}"#.to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request_from_json(value: serde_json::Value) -> ChatRequest {
        let wire: ChatCompletionRequest = serde_json::from_value(value).unwrap();
        decode_request(wire).unwrap()
    }

    #[test]
    fn decodes_simple_request() {
        let request = request_from_json(json!({
            "model": "gpt-4",
            "messages": [{"role": "user", "content": "hi"}]
        }));

        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.system, None);
        assert_eq!(request.messages, vec![Message::text(Role::User, "hi")]);
        assert!(!request.stream);
        assert!(request.tools.is_empty());
    }

    #[test]
    fn hoists_system_messages() {
        let request = request_from_json(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "one"},
                {"role": "developer", "content": "two"},
                {"role": "user", "content": "hi"}
            ]
        }));

        assert_eq!(request.system.as_deref(), Some("one\ntwo"));
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn decodes_tool_declarations_and_calls() {
        let request = request_from_json(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {"name": "get_weather", "arguments": "{\"city\":\"Tokyo\"}"}
                }]},
                {"role": "tool", "tool_call_id": "call_abc", "content": "sunny"}
            ],
            "tools": [{
                "type": "function",
                "function": {
                    "name": "get_weather",
                    "description": "Weather lookup",
                    "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
                }
            }]
        }));

        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.tools[0].name, "get_weather");

        assert_eq!(
            request.messages[1].parts,
            vec![ContentPart::ToolUse {
                id: "call_abc".into(),
                name: "get_weather".into(),
                arguments: "{\"city\":\"Tokyo\"}".into(),
            }]
        );
        assert_eq!(
            request.messages[2].parts,
            vec![ContentPart::ToolResult {
                tool_call_id: "call_abc".into(),
                name: None,
                content: "sunny".into(),
                is_error: None,
            }]
        );
    }

    #[test]
    fn tool_message_without_call_id_is_malformed() {
        let wire: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "user", "content": "weather?"},
                {"role": "tool", "content": "sunny"}
            ]
        }))
        .unwrap();

        let error = decode_request(wire).unwrap_err();
        assert!(matches!(error, ProxyError::MalformedRequest(_)));
    }

    #[test]
    fn request_roundtrip_preserves_structure() {
        let original = request_from_json(json!({
            "model": "gpt-4",
            "messages": [
                {"role": "system", "content": "be nice"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "checking", "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "f", "arguments": "{}"}
                }]},
                {"role": "tool", "tool_call_id": "call_1", "content": "42"}
            ],
            "temperature": 0.5,
            "stop": ["END"],
            "reasoning_effort": "high"
        }));

        let roundtripped = decode_request(encode_request(&original)).unwrap();
        assert_eq!(roundtripped, original);
    }

    #[test]
    fn decodes_response_with_interleaved_tool_calls() {
        let wire: ChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 0,
            "model": "gpt-4",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "hello",
                    "tool_calls": [{
                        "id": "call_9",
                        "type": "function",
                        "function": {"name": "f", "arguments": "{\"a\":1}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
        }))
        .unwrap();

        let response = decode_response(wire);

        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.total_tokens, 8);
        assert_eq!(response.content.len(), 2);
        assert!(matches!(&response.content[0], ContentPart::Text { text } if text == "hello"));
    }

    #[test]
    fn stream_decoder_synthesizes_call_end() {
        let mut decoder = StreamDecoder::default();
        let mut out = Vec::new();

        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "id": "call_a", "type": "function",
                "function": {"name": "f", "arguments": ""}
            }]}}]
        }))
        .unwrap();
        decoder.decode(chunk, &mut out);

        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {"tool_calls": [{
                "index": 0, "function": {"arguments": "{\"x\":1}"}
            }]}}]
        }))
        .unwrap();
        decoder.decode(chunk, &mut out);

        let chunk: ChatCompletionChunk = serde_json::from_value(json!({
            "id": "c", "object": "chat.completion.chunk", "created": 0, "model": "m",
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
        }))
        .unwrap();
        decoder.decode(chunk, &mut out);

        assert_eq!(
            out,
            vec![
                Delta::ToolCallStart {
                    index: 0,
                    id: "call_a".into(),
                    name: "f".into()
                },
                Delta::ToolCallArguments {
                    index: 0,
                    fragment: "{\"x\":1}".into()
                },
                Delta::ToolCallEnd { index: 0 },
                Delta::Done(FinishReason::ToolCalls),
            ]
        );
    }

    #[test]
    fn stream_encoder_terminates_with_done_marker() {
        let mut encoder = StreamEncoder::new("id".into(), "m".into());

        let frames = encoder.encode(&Delta::Text("hi".into()));
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.contains(r#""content":"hi""#));
        assert!(frames[0].data.contains(r#""role":"assistant""#));

        // Role is only sent once.
        let frames = encoder.encode(&Delta::Text("!".into()));
        assert!(!frames[0].data.contains("role"));

        let frames = encoder.encode(&Delta::Done(FinishReason::Stop));
        assert_eq!(frames.len(), 2);
        assert!(frames[0].data.contains(r#""finish_reason":"stop""#));
        assert_eq!(frames[1].data, "[DONE]");
    }
}
