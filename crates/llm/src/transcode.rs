//! Format transcoder: any wire format to any other, through the canonical
//! model. Pure composition of the codecs in [`crate::protocol`].

use config::ServiceType;

use crate::{
    error::{ProxyError, Result},
    messages::canonical::{ChatRequest, ChatResponse},
    protocol::{anthropic, gemini, openai},
};

/// One of the three supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Openai,
    Anthropic,
    Gemini,
}

impl From<ServiceType> for WireFormat {
    fn from(service_type: ServiceType) -> Self {
        match service_type {
            ServiceType::Openai => WireFormat::Openai,
            ServiceType::Anthropic => WireFormat::Anthropic,
            ServiceType::Gemini => WireFormat::Gemini,
        }
    }
}

/// Decode request bytes in `format` into the canonical model.
///
/// Gemini requests carry the model in the URL rather than the body, so it
/// arrives through `model_hint`.
pub fn decode_request(format: WireFormat, model_hint: &str, body: &[u8]) -> Result<ChatRequest> {
    match format {
        WireFormat::Openai => {
            let wire = parse(body)?;
            openai::decode_request(wire)
        }
        WireFormat::Anthropic => {
            let wire = parse(body)?;
            Ok(anthropic::decode_request(wire))
        }
        WireFormat::Gemini => {
            let wire = parse(body)?;
            Ok(gemini::decode_request(model_hint.to_string(), wire))
        }
    }
}

/// Encode a canonical request as bytes in `format`.
pub fn encode_request(format: WireFormat, request: &ChatRequest) -> Result<Vec<u8>> {
    match format {
        WireFormat::Openai => serialize(&openai::encode_request(request)),
        WireFormat::Anthropic => serialize(&anthropic::encode_request(request)),
        WireFormat::Gemini => serialize(&gemini::encode_request(request)),
    }
}

/// Decode response bytes in `format` into the canonical model.
pub fn decode_response(format: WireFormat, model_hint: &str, body: &[u8]) -> Result<ChatResponse> {
    match format {
        WireFormat::Openai => {
            let wire = parse(body)?;
            Ok(openai::decode_response(wire))
        }
        WireFormat::Anthropic => {
            let wire = parse(body)?;
            Ok(anthropic::decode_response(wire))
        }
        WireFormat::Gemini => {
            let wire = parse(body)?;
            Ok(gemini::decode_response(model_hint, wire))
        }
    }
}

/// Encode a canonical response as bytes in `format`.
pub fn encode_response(format: WireFormat, response: &ChatResponse) -> Result<Vec<u8>> {
    match format {
        WireFormat::Openai => serialize(&openai::encode_response(response)),
        WireFormat::Anthropic => serialize(&anthropic::encode_response(response)),
        WireFormat::Gemini => serialize(&gemini::encode_response(response)),
    }
}

/// Translate request bytes from one wire format to another.
pub fn transcode_request(
    from: WireFormat,
    to: WireFormat,
    model_hint: &str,
    body: &[u8],
) -> Result<Vec<u8>> {
    let canonical = decode_request(from, model_hint, body)?;
    encode_request(to, &canonical)
}

fn parse<T: serde::de::DeserializeOwned>(body: &[u8]) -> Result<T> {
    sonic_rs::from_slice(body).map_err(|e| ProxyError::MalformedRequest(e.to_string()))
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    sonic_rs::to_vec(value).map_err(|e| {
        log::error!("Failed to serialize wire payload: {e}");
        ProxyError::Internal(None)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::canonical::{
        ContentPart, FinishReason, Message, ReasoningEffort, Role, ToolDeclaration, Usage,
    };
    use serde_json::json;

    /// A canonical request every format can represent without loss: system
    /// hoisted, `max_tokens` set (required on the Anthropic wire), and tool
    /// call IDs equal to tool names (Gemini correlates by name).
    fn portable_request() -> ChatRequest {
        ChatRequest {
            model: "test-model".into(),
            system: Some("be useful".into()),
            messages: vec![
                Message::text(Role::User, "what's the weather in Tokyo?"),
                Message {
                    role: Role::Assistant,
                    parts: vec![
                        ContentPart::Text {
                            text: "checking".into(),
                        },
                        ContentPart::ToolUse {
                            id: "get_weather".into(),
                            name: "get_weather".into(),
                            arguments: r#"{"city":"Tokyo"}"#.into(),
                        },
                    ],
                },
                Message {
                    role: Role::Tool,
                    parts: vec![ContentPart::ToolResult {
                        tool_call_id: "get_weather".into(),
                        name: Some("get_weather".into()),
                        content: r#"{"result":"sunny"}"#.into(),
                        is_error: None,
                    }],
                },
                Message::text(Role::User, "thanks, and in Paris?"),
            ],
            tools: vec![ToolDeclaration {
                name: "get_weather".into(),
                description: Some("Weather lookup".into()),
                parameters: json!({
                    "type": "object",
                    "properties": {"city": {"type": "string"}},
                    "required": ["city"]
                }),
            }],
            tool_choice: None,
            stream: false,
            temperature: Some(0.3),
            top_p: None,
            max_tokens: Some(1024),
            stop: None,
            reasoning_effort: Some(ReasoningEffort::Medium),
        }
    }

    fn content_kinds(messages: &[Message]) -> Vec<&'static str> {
        messages
            .iter()
            .flat_map(|m| m.parts.iter())
            .map(|part| match part {
                ContentPart::Text { .. } => "text",
                ContentPart::Image { .. } => "image",
                ContentPart::ToolUse { .. } => "tool_use",
                ContentPart::ToolResult { .. } => "tool_result",
            })
            .collect()
    }

    #[test]
    fn request_roundtrips_through_every_format() {
        let original = portable_request();

        for format in [WireFormat::Openai, WireFormat::Anthropic, WireFormat::Gemini] {
            let bytes = encode_request(format, &original).unwrap();
            let decoded = decode_request(format, "test-model", &bytes).unwrap();

            assert_eq!(decoded.model, original.model, "{format:?}");
            assert_eq!(decoded.system, original.system, "{format:?}");
            assert_eq!(decoded.tools, original.tools, "{format:?}");
            assert_eq!(decoded.temperature, original.temperature, "{format:?}");
            assert_eq!(decoded.max_tokens, original.max_tokens, "{format:?}");
            assert_eq!(
                decoded.reasoning_effort, original.reasoning_effort,
                "{format:?}"
            );

            // Content part order is preserved exactly.
            assert_eq!(
                content_kinds(&decoded.messages),
                content_kinds(&original.messages),
                "{format:?}"
            );
        }
    }

    #[test]
    fn transcode_preserves_part_order_between_formats() {
        let original = portable_request();
        let openai_bytes = encode_request(WireFormat::Openai, &original).unwrap();

        for target in [WireFormat::Anthropic, WireFormat::Gemini] {
            let transcoded =
                transcode_request(WireFormat::Openai, target, "test-model", &openai_bytes).unwrap();
            let decoded = decode_request(target, "test-model", &transcoded).unwrap();

            assert_eq!(
                content_kinds(&decoded.messages),
                content_kinds(&original.messages),
                "{target:?}"
            );
        }
    }

    #[test]
    fn response_roundtrips_through_every_format() {
        let original = ChatResponse {
            id: "resp_1".into(),
            model: "test-model".into(),
            content: vec![
                ContentPart::Text {
                    text: "here you go".into(),
                },
                ContentPart::ToolUse {
                    id: "get_weather".into(),
                    name: "get_weather".into(),
                    arguments: r#"{"city":"Tokyo"}"#.into(),
                },
            ],
            finish_reason: FinishReason::ToolCalls,
            usage: Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        };

        for format in [WireFormat::Openai, WireFormat::Anthropic, WireFormat::Gemini] {
            let bytes = encode_response(format, &original).unwrap();
            let decoded = decode_response(format, "test-model", &bytes).unwrap();

            assert_eq!(decoded.finish_reason, original.finish_reason, "{format:?}");
            assert_eq!(decoded.usage, original.usage, "{format:?}");
            assert_eq!(decoded.content.len(), original.content.len(), "{format:?}");
            assert!(
                matches!(&decoded.content[0], ContentPart::Text { text } if text == "here you go"),
                "{format:?}"
            );
            assert!(
                matches!(&decoded.content[1], ContentPart::ToolUse { name, .. } if name == "get_weather"),
                "{format:?}"
            );
        }
    }

    #[test]
    fn malformed_bytes_fail_with_malformed_request() {
        let error = decode_request(WireFormat::Openai, "", b"{not json").unwrap_err();
        assert!(matches!(error, ProxyError::MalformedRequest(_)));
    }
}
