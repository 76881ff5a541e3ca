//! Google Gemini generateContent wire format.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    error::ProxyError,
    messages::canonical::{
        ChatRequest, ChatResponse, ContentPart, Delta, FinishReason, ImageSource, Message,
        ReasoningEffort, Role, ToolChoice, ToolDeclaration, Usage,
    },
    protocol::SseFrame,
    tools::id_map::synthesize_call_id,
};

/// Request body for `models/{model}:generateContent`.
///
/// The model name travels in the URL, not the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolWire>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

/// One part of a content entry. Variants are disambiguated by their single
/// field, which is how the wire format itself works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Part {
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponse,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: Blob,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionResponse {
    pub name: String,
    #[serde(default)]
    pub response: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_config: Option<ThinkingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThinkingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_budget: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolWire {
    #[serde(default)]
    pub function_declarations: Vec<FunctionDeclaration>,
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
#[serde(rename_all = "camelCase")]
pub struct ToolConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_calling_config: Option<FunctionCallingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionCallingConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_function_names: Option<Vec<String>>,
}

/// generateContent response; streaming chunks reuse the same shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

/// Error body in the Gemini wire format.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: u16,
    pub message: String,
    pub status: String,
}

impl From<ProxyError> for ErrorResponse {
    fn from(error: ProxyError) -> Self {
        let code = error.status_code().as_u16();
        let status = match code {
            400 => "INVALID_ARGUMENT",
            401 => "UNAUTHENTICATED",
            403 => "PERMISSION_DENIED",
            404 => "NOT_FOUND",
            429 => "RESOURCE_EXHAUSTED",
            504 => "DEADLINE_EXCEEDED",
            502 | 503 => "UNAVAILABLE",
            _ => "INTERNAL",
        };

        Self {
            error: ErrorBody {
                code,
                message: error.client_message(),
                status: status.to_string(),
            },
        }
    }
}

/// Decode a Gemini request into the canonical model.
///
/// Gemini carries no tool-call IDs; calls and their responses correlate by
/// function name, so the name doubles as the canonical call ID on this path.
pub fn decode_request(model: String, wire: GenerateContentRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(wire.contents.len());

    for content in wire.contents {
        let role = match content.role.as_deref() {
            Some("model") => Role::Assistant,
            _ => Role::User,
        };

        let mut current = Message {
            role,
            parts: Vec::new(),
        };

        for part in content.parts {
            match part {
                Part::Text { text } => current.parts.push(ContentPart::Text { text }),
                Part::InlineData { inline_data } => current.parts.push(ContentPart::Image {
                    source: ImageSource::Base64 {
                        media_type: inline_data.mime_type,
                        data: inline_data.data,
                    },
                }),
                Part::FunctionCall { function_call } => current.parts.push(ContentPart::ToolUse {
                    id: function_call.name.clone(),
                    name: function_call.name,
                    arguments: function_call.args.to_string(),
                }),
                Part::FunctionResponse { function_response } => {
                    // Function responses become their own tool message.
                    if !current.parts.is_empty() {
                        messages.push(std::mem::replace(
                            &mut current,
                            Message {
                                role,
                                parts: Vec::new(),
                            },
                        ));
                    }

                    messages.push(Message {
                        role: Role::Tool,
                        parts: vec![ContentPart::ToolResult {
                            tool_call_id: function_response.name.clone(),
                            name: Some(function_response.name),
                            content: function_response.response.to_string(),
                            is_error: None,
                        }],
                    });
                }
            }
        }

        if !current.parts.is_empty() {
            messages.push(current);
        }
    }

    let generation = wire.generation_config.unwrap_or_default();

    ChatRequest {
        model,
        system: wire.system_instruction.map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| match part {
                    Part::Text { text } => Some(text),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n")
        }),
        messages,
        tools: wire
            .tools
            .into_iter()
            .flatten()
            .flat_map(|tool| tool.function_declarations)
            .map(|decl| ToolDeclaration {
                name: decl.name,
                description: decl.description,
                parameters: decl.parameters,
            })
            .collect(),
        tool_choice: wire
            .tool_config
            .and_then(|c| c.function_calling_config)
            .map(|config| match config.mode.as_str() {
                "NONE" => ToolChoice::None,
                "ANY" => match config
                    .allowed_function_names
                    .as_ref()
                    .and_then(|names| (names.len() == 1).then(|| names[0].clone()))
                {
                    Some(name) => ToolChoice::Specific(name),
                    None => ToolChoice::Required,
                },
                _ => ToolChoice::Auto,
            }),
        stream: false,
        temperature: generation.temperature,
        top_p: generation.top_p,
        max_tokens: generation.max_output_tokens,
        stop: generation.stop_sequences,
        reasoning_effort: generation
            .thinking_config
            .and_then(|t| t.thinking_budget)
            .map(ReasoningEffort::from_budget),
    }
}

/// Encode a canonical request for a Gemini upstream.
pub fn encode_request(request: &ChatRequest) -> GenerateContentRequest {
    let mut contents: Vec<Content> = Vec::with_capacity(request.messages.len());

    for message in &request.messages {
        let (role, parts) = match message.role {
            Role::Assistant => ("model", encode_parts(message, request)),
            Role::System | Role::User | Role::Tool => ("user", encode_parts(message, request)),
        };

        if parts.is_empty() {
            continue;
        }

        // Adjacent same-role entries merge; Gemini rejects unbalanced turns.
        match contents.last_mut() {
            Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
            _ => contents.push(Content {
                role: Some(role.to_string()),
                parts,
            }),
        }
    }

    let generation_config = GenerationConfig {
        temperature: request.temperature,
        top_p: request.top_p,
        max_output_tokens: request.max_tokens,
        stop_sequences: request.stop.clone(),
        thinking_config: request.reasoning_effort.map(|effort| ThinkingConfig {
            thinking_budget: Some(effort.budget_tokens()),
        }),
    };

    let has_generation_config = generation_config.temperature.is_some()
        || generation_config.top_p.is_some()
        || generation_config.max_output_tokens.is_some()
        || generation_config.stop_sequences.is_some()
        || generation_config.thinking_config.is_some();

    GenerateContentRequest {
        contents,
        system_instruction: request.system.as_ref().map(|system| Content {
            role: None,
            parts: vec![Part::Text {
                text: system.clone(),
            }],
        }),
        generation_config: has_generation_config.then_some(generation_config),
        tools: if request.tools.is_empty() {
            None
        } else {
            Some(vec![ToolWire {
                function_declarations: request
                    .tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: tool.parameters.clone(),
                    })
                    .collect(),
            }])
        },
        tool_config: request.tool_choice.as_ref().map(|choice| ToolConfig {
            function_calling_config: Some(match choice {
                ToolChoice::Auto => FunctionCallingConfig {
                    mode: "AUTO".to_string(),
                    allowed_function_names: None,
                },
                ToolChoice::None => FunctionCallingConfig {
                    mode: "NONE".to_string(),
                    allowed_function_names: None,
                },
                ToolChoice::Required => FunctionCallingConfig {
                    mode: "ANY".to_string(),
                    allowed_function_names: None,
                },
                ToolChoice::Specific(name) => FunctionCallingConfig {
                    mode: "ANY".to_string(),
                    allowed_function_names: Some(vec![name.clone()]),
                },
            }),
        }),
    }
}

fn encode_parts(message: &Message, request: &ChatRequest) -> Vec<Part> {
    message
        .parts
        .iter()
        .map(|part| match part {
            ContentPart::Text { text } => Part::Text { text: text.clone() },
            ContentPart::Image { source } => match source {
                ImageSource::Base64 { media_type, data } => Part::InlineData {
                    inline_data: Blob {
                        mime_type: media_type.clone(),
                        data: data.clone(),
                    },
                },
                // Gemini has no URL image part; the reference degrades to text.
                ImageSource::Url { url } => Part::Text { text: url.clone() },
            },
            ContentPart::ToolUse { name, arguments, .. } => Part::FunctionCall {
                function_call: FunctionCall {
                    name: name.clone(),
                    args: super::anthropic::parse_arguments(arguments),
                },
            },
            ContentPart::ToolResult {
                tool_call_id,
                name,
                content,
                ..
            } => Part::FunctionResponse {
                function_response: FunctionResponse {
                    name: name
                        .clone()
                        .or_else(|| resolve_call_name(request, tool_call_id))
                        .unwrap_or_else(|| tool_call_id.clone()),
                    response: encode_result_payload(content),
                },
            },
        })
        .collect()
}

/// Finds the tool name for a call ID by scanning earlier assistant turns.
fn resolve_call_name(request: &ChatRequest, tool_call_id: &str) -> Option<String> {
    for message in &request.messages {
        for part in &message.parts {
            if let ContentPart::ToolUse { id, name, .. } = part
                && id == tool_call_id
            {
                return Some(name.clone());
            }
        }
    }

    None
}

/// The wire wants an object; bare text wraps under a `result` key.
fn encode_result_payload(content: &str) -> Value {
    match serde_json::from_str::<Value>(content) {
        Ok(value @ Value::Object(_)) => value,
        Ok(value) => json!({ "result": value }),
        Err(_) => json!({ "result": content }),
    }
}

/// Decode a buffered Gemini response into the canonical model.
pub fn decode_response(model: &str, wire: GenerateContentResponse) -> ChatResponse {
    let mut content = Vec::new();
    let mut finish_reason = FinishReason::Stop;
    let mut saw_call = false;

    if let Some(candidate) = wire.candidates.into_iter().next() {
        for part in candidate.content.into_iter().flat_map(|c| c.parts) {
            match part {
                Part::Text { text } => content.push(ContentPart::Text { text }),
                Part::FunctionCall { function_call } => {
                    saw_call = true;
                    content.push(ContentPart::ToolUse {
                        id: synthesize_call_id(),
                        name: function_call.name,
                        arguments: function_call.args.to_string(),
                    });
                }
                _ => {}
            }
        }

        finish_reason = decode_finish_reason(candidate.finish_reason.as_deref());
    }

    if saw_call {
        finish_reason = FinishReason::ToolCalls;
    }

    let usage = wire.usage_metadata.unwrap_or_default();

    ChatResponse {
        id: wire
            .response_id
            .unwrap_or_else(|| format!("gemini-{}", synthesize_call_id())),
        model: wire.model_version.unwrap_or_else(|| model.to_string()),
        content,
        finish_reason,
        usage: Usage {
            prompt_tokens: usage.prompt_token_count,
            completion_tokens: usage.candidates_token_count,
            total_tokens: usage.total_token_count,
        },
    }
}

fn decode_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY") | Some("RECITATION") | Some("PROHIBITED_CONTENT") => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Stop,
    }
}

fn encode_finish_reason(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolCalls | FinishReason::Error => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
    }
}

/// Encode a canonical response for a Gemini client.
pub fn encode_response(response: &ChatResponse) -> GenerateContentResponse {
    let parts = response
        .content
        .iter()
        .filter_map(|part| match part {
            ContentPart::Text { text } => Some(Part::Text { text: text.clone() }),
            ContentPart::ToolUse { name, arguments, .. } => Some(Part::FunctionCall {
                function_call: FunctionCall {
                    name: name.clone(),
                    args: super::anthropic::parse_arguments(arguments),
                },
            }),
            _ => None,
        })
        .collect();

    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Some(Content {
                role: Some("model".to_string()),
                parts,
            }),
            finish_reason: Some(encode_finish_reason(response.finish_reason).to_string()),
            index: Some(0),
        }],
        usage_metadata: Some(UsageMetadata {
            prompt_token_count: response.usage.prompt_tokens,
            candidates_token_count: response.usage.completion_tokens,
            total_token_count: response.usage.total_tokens,
        }),
        model_version: Some(response.model.clone()),
        response_id: Some(response.id.clone()),
    }
}

/// Stateful decoder for Gemini streaming chunks.
///
/// Function calls arrive whole in a single chunk, so each one expands to the
/// full start/arguments/end delta triple.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    next_ordinal: usize,
    saw_call: bool,
}

impl StreamDecoder {
    pub fn decode(&mut self, chunk: GenerateContentResponse, out: &mut Vec<Delta>) {
        for candidate in chunk.candidates {
            for part in candidate.content.into_iter().flat_map(|c| c.parts) {
                match part {
                    Part::Text { text } => {
                        if !text.is_empty() {
                            out.push(Delta::Text(text));
                        }
                    }
                    Part::FunctionCall { function_call } => {
                        let index = self.next_ordinal;
                        self.next_ordinal += 1;
                        self.saw_call = true;

                        out.push(Delta::ToolCallStart {
                            index,
                            id: synthesize_call_id(),
                            name: function_call.name,
                        });
                        out.push(Delta::ToolCallArguments {
                            index,
                            fragment: function_call.args.to_string(),
                        });
                        out.push(Delta::ToolCallEnd { index });
                    }
                    _ => {}
                }
            }

            if let Some(reason) = candidate.finish_reason.as_deref() {
                let finish = if self.saw_call {
                    FinishReason::ToolCalls
                } else {
                    decode_finish_reason(Some(reason))
                };

                out.push(Delta::Done(finish));
            }
        }
    }
}

struct PendingCall {
    name: String,
    arguments: String,
}

/// Streaming encoder producing Gemini SSE chunks from canonical deltas.
///
/// Gemini clients expect complete `functionCall` parts, so argument fragments
/// buffer until [`Delta::ToolCallEnd`] closes the call.
pub struct StreamEncoder {
    model: String,
    pending: std::collections::HashMap<usize, PendingCall>,
    emitted_done: bool,
}

impl StreamEncoder {
    pub fn new(model: String) -> Self {
        Self {
            model,
            pending: std::collections::HashMap::new(),
            emitted_done: false,
        }
    }

    pub fn encode(&mut self, delta: &Delta) -> Vec<SseFrame> {
        match delta {
            Delta::Text(text) => {
                vec![self.chunk_frame(
                    vec![Part::Text { text: text.clone() }],
                    None,
                )]
            }
            Delta::ToolCallStart { index, name, .. } => {
                self.pending.insert(
                    *index,
                    PendingCall {
                        name: name.clone(),
                        arguments: String::new(),
                    },
                );
                Vec::new()
            }
            Delta::ToolCallArguments { index, fragment } => {
                if let Some(call) = self.pending.get_mut(index) {
                    call.arguments.push_str(fragment);
                }
                Vec::new()
            }
            Delta::ToolCallEnd { index } => match self.pending.remove(index) {
                Some(call) => {
                    let args = if call.arguments.is_empty() {
                        Value::Object(serde_json::Map::new())
                    } else {
                        super::anthropic::parse_arguments(&call.arguments)
                    };

                    vec![self.chunk_frame(
                        vec![Part::FunctionCall {
                            function_call: FunctionCall {
                                name: call.name,
                                args,
                            },
                        }],
                        None,
                    )]
                }
                None => Vec::new(),
            },
            Delta::Done(reason) => {
                if self.emitted_done {
                    return Vec::new();
                }
                self.emitted_done = true;

                vec![self.chunk_frame(Vec::new(), Some(encode_finish_reason(*reason)))]
            }
        }
    }

    fn chunk_frame(&self, parts: Vec<Part>, finish_reason: Option<&str>) -> SseFrame {
        let chunk = GenerateContentResponse {
            candidates: vec![Candidate {
                content: Some(Content {
                    role: Some("model".to_string()),
                    parts,
                }),
                finish_reason: finish_reason.map(str::to_string),
                index: Some(0),
            }],
            usage_metadata: None,
            model_version: Some(self.model.clone()),
            response_id: None,
        };

        SseFrame::data(sonic_rs::to_string(&chunk).unwrap_or_else(|e| {
            log::error!("Failed to serialize Gemini chunk: {e}");
            r#"{"error":"serialization failed"}"#.to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_request_with_function_history() {
        let wire: GenerateContentRequest = serde_json::from_value(json!({
            "systemInstruction": {"parts": [{"text": "be brief"}]},
            "contents": [
                {"role": "user", "parts": [{"text": "weather in Tokyo?"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {"city": "Tokyo"}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "get_weather", "response": {"result": "sunny"}}}]}
            ],
            "tools": [{"functionDeclarations": [{"name": "get_weather", "parameters": {"type": "object"}}]}],
            "generationConfig": {"temperature": 0.2, "thinkingConfig": {"thinkingBudget": 2048}}
        }))
        .unwrap();

        let request = decode_request("gemini-2.0-flash".to_string(), wire);

        assert_eq!(request.system.as_deref(), Some("be brief"));
        assert_eq!(request.tools.len(), 1);
        assert_eq!(request.reasoning_effort, Some(ReasoningEffort::Low));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.messages[2].role, Role::Tool);
    }

    #[test]
    fn function_responses_resolve_names_from_history() {
        let request = ChatRequest {
            model: "gemini-2.0-flash".into(),
            system: None,
            messages: vec![
                Message {
                    role: Role::Assistant,
                    parts: vec![ContentPart::ToolUse {
                        id: "call_abc".into(),
                        name: "get_weather".into(),
                        arguments: "{}".into(),
                    }],
                },
                Message {
                    role: Role::Tool,
                    parts: vec![ContentPart::ToolResult {
                        tool_call_id: "call_abc".into(),
                        name: None,
                        content: "sunny".into(),
                        is_error: None,
                    }],
                },
            ],
            tools: Vec::new(),
            tool_choice: None,
            stream: false,
            temperature: None,
            top_p: None,
            max_tokens: None,
            stop: None,
            reasoning_effort: None,
        };

        let wire = encode_request(&request);

        let Part::FunctionResponse { function_response } = &wire.contents[1].parts[0] else {
            panic!("expected a functionResponse part");
        };
        assert_eq!(function_response.name, "get_weather");
        assert_eq!(function_response.response, json!({"result": "sunny"}));
    }

    #[test]
    fn response_function_calls_get_synthesized_ids() {
        let wire: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "checking"},
                    {"functionCall": {"name": "get_weather", "args": {"city": "Paris"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 4, "candidatesTokenCount": 6, "totalTokenCount": 10}
        }))
        .unwrap();

        let response = decode_response("gemini-2.0-flash", wire);

        assert_eq!(response.finish_reason, FinishReason::ToolCalls);
        assert_eq!(response.usage.total_tokens, 10);

        let ContentPart::ToolUse { id, name, .. } = &response.content[1] else {
            panic!("expected a tool use part");
        };
        assert_eq!(name, "get_weather");
        assert!(id.starts_with("call_"));
        assert_eq!(id.len(), "call_".len() + 24);
    }

    #[test]
    fn stream_decoder_expands_calls_to_delta_triples() {
        let mut decoder = StreamDecoder::default();
        let mut out = Vec::new();

        let chunk: GenerateContentResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "f", "args": {"x": 1}}}
            ]}, "finishReason": "STOP"}]
        }))
        .unwrap();
        decoder.decode(chunk, &mut out);

        assert_eq!(out.len(), 4);
        assert!(matches!(out[0], Delta::ToolCallStart { index: 0, .. }));
        assert!(
            matches!(&out[1], Delta::ToolCallArguments { fragment, .. } if fragment == r#"{"x":1}"#)
        );
        assert!(matches!(out[2], Delta::ToolCallEnd { index: 0 }));
        assert_eq!(out[3], Delta::Done(FinishReason::ToolCalls));
    }

    #[test]
    fn stream_encoder_buffers_arguments_until_call_end() {
        let mut encoder = StreamEncoder::new("gemini-2.0-flash".into());

        assert!(
            encoder
                .encode(&Delta::ToolCallStart {
                    index: 0,
                    id: "call_1".into(),
                    name: "f".into(),
                })
                .is_empty()
        );
        assert!(
            encoder
                .encode(&Delta::ToolCallArguments {
                    index: 0,
                    fragment: r#"{"a":"#.into(),
                })
                .is_empty()
        );
        assert!(
            encoder
                .encode(&Delta::ToolCallArguments {
                    index: 0,
                    fragment: "1}".into(),
                })
                .is_empty()
        );

        let frames = encoder.encode(&Delta::ToolCallEnd { index: 0 });
        assert_eq!(frames.len(), 1);
        assert!(frames[0].data.contains("functionCall"));
        assert!(frames[0].data.contains(r#""a":1"#));

        let frames = encoder.encode(&Delta::Done(FinishReason::ToolCalls));
        assert!(frames[0].data.contains(r#""finishReason":"STOP""#));
    }
}
