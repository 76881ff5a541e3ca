//! Extraction of `<tool_call>` blocks from a completed assistant message.

use crate::tools::id_map::synthesize_call_id;

const TOOL_CALL_OPEN: &str = "<tool_call>";
const TOOL_CALL_CLOSE: &str = "</tool_call>";
const NAME_OPEN: &str = "<name>";
const NAME_CLOSE: &str = "</name>";
const ARGS_OPEN: &str = "<arguments>";
const ARGS_CLOSE: &str = "</arguments>";
const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

/// One segment of a parsed assistant message, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    /// Ordinary assistant text, including any `<think>` blocks verbatim.
    Text(String),
    /// A structured tool invocation.
    ToolCall(ToolInvocation),
}

/// A tool invocation extracted from the XML sublanguage.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Freshly synthesized client-facing ID.
    pub id: String,
    /// Tool name, trimmed.
    pub name: String,
    /// Raw arguments text. Kept verbatim even when it is not valid JSON so
    /// the client sees exactly what the model produced.
    pub arguments: String,
}

/// Parses a completed assistant message into interleaved text segments and
/// tool invocations.
///
/// Scanning does not occur inside `<think>...</think>` blocks; their content
/// (tags included) passes through as text. Malformed blocks degrade to text
/// rather than being dropped.
pub fn parse_assistant_text(text: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut pending_text = String::new();
    let mut rest = text;

    loop {
        let tool = rest.find(TOOL_CALL_OPEN);
        let think = rest.find(THINK_OPEN);

        match (tool, think) {
            (Some(t), Some(k)) if k < t => consume_think(&mut rest, &mut pending_text, k),
            (None, Some(k)) => consume_think(&mut rest, &mut pending_text, k),
            (Some(t), _) => {
                pending_text.push_str(&rest[..t]);
                rest = &rest[t..];

                match parse_tool_call(rest) {
                    Some((invocation, consumed)) => {
                        flush_text(&mut pending_text, &mut segments);
                        segments.push(Segment::ToolCall(invocation));
                        rest = &rest[consumed..];
                    }
                    None => {
                        // Unparseable block: keep the raw bytes visible.
                        pending_text.push_str(rest);
                        rest = "";
                    }
                }
            }
            (None, None) => {
                pending_text.push_str(rest);
                break;
            }
        }
    }

    flush_text(&mut pending_text, &mut segments);
    segments
}

fn consume_think(rest: &mut &str, pending_text: &mut String, open_at: usize) {
    let after_open = open_at + THINK_OPEN.len();

    match rest[after_open..].find(THINK_CLOSE) {
        Some(close) => {
            let end = after_open + close + THINK_CLOSE.len();
            pending_text.push_str(&rest[..end]);
            *rest = &rest[end..];
        }
        None => {
            // Unterminated think block swallows the remainder as text.
            pending_text.push_str(rest);
            *rest = "";
        }
    }
}

fn flush_text(pending: &mut String, segments: &mut Vec<Segment>) {
    if !pending.is_empty() {
        segments.push(Segment::Text(std::mem::take(pending)));
    }
}

/// Parses one block starting at a `<tool_call>` tag. Returns the invocation
/// and the number of bytes consumed, or `None` when the block is malformed.
fn parse_tool_call(block: &str) -> Option<(ToolInvocation, usize)> {
    let inner_start = TOOL_CALL_OPEN.len();
    let close = block[inner_start..].find(TOOL_CALL_CLOSE)?;
    let inner = &block[inner_start..inner_start + close];

    let name_open = inner.find(NAME_OPEN)?;
    let name_close = inner[name_open..].find(NAME_CLOSE)? + name_open;
    let name = inner[name_open + NAME_OPEN.len()..name_close].trim();

    if name.is_empty() {
        return None;
    }

    let arguments = match inner.find(ARGS_OPEN) {
        Some(args_open) => {
            let args_close = inner[args_open..].find(ARGS_CLOSE)? + args_open;
            inner[args_open + ARGS_OPEN.len()..args_close].trim()
        }
        // A call without an arguments element gets an empty object.
        None => "{}",
    };

    if serde_json::from_str::<serde_json::Value>(arguments).is_err() {
        log::warn!("tool call '{name}' has arguments that are not valid JSON, forwarding verbatim");
    }

    Some((
        ToolInvocation {
            id: synthesize_call_id(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        },
        inner_start + close + TOOL_CALL_CLOSE.len(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calls(segments: &[Segment]) -> Vec<&ToolInvocation> {
        segments
            .iter()
            .filter_map(|s| match s {
                Segment::ToolCall(call) => Some(call),
                Segment::Text(_) => None,
            })
            .collect()
    }

    #[test]
    fn plain_text_stays_one_segment() {
        let segments = parse_assistant_text("just a normal reply");

        assert_eq!(segments, vec![Segment::Text("just a normal reply".into())]);
    }

    #[test]
    fn extracts_a_call_with_surrounding_text() {
        let segments = parse_assistant_text(
            "Let me check.\n<tool_call>\n  <name>get_weather</name>\n  <arguments>{\"city\": \"Tokyo\"}</arguments>\n</tool_call>",
        );

        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], Segment::Text("Let me check.\n".into()));

        let call = &calls(&segments)[0];
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, "{\"city\": \"Tokyo\"}");
        assert!(call.id.starts_with("call_"));
    }

    #[test]
    fn extracts_consecutive_calls_in_order() {
        let segments = parse_assistant_text(
            "<tool_call><name>a</name><arguments>{\"n\":1}</arguments></tool_call>\
             <tool_call><name>b</name><arguments>{\"n\":2}</arguments></tool_call>",
        );

        let calls = calls(&segments);
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].name, "a");
        assert_eq!(calls[1].name, "b");
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[test]
    fn think_blocks_suppress_scanning_and_stay_text() {
        let segments = parse_assistant_text(
            "<think>should I call get_weather? <tool_call> would be the way. Yes.</think>\
             <tool_call><name>get_weather</name><arguments>{\"city\":\"Paris\"}</arguments></tool_call>",
        );

        // One call, not two; the think block is intact text.
        let extracted = calls(&segments);
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted[0].arguments, "{\"city\":\"Paris\"}");

        let Segment::Text(text) = &segments[0] else {
            panic!("expected leading text segment");
        };
        assert!(text.starts_with("<think>"));
        assert!(text.contains("<tool_call> would be the way"));
        assert!(text.ends_with("</think>"));
    }

    #[test]
    fn malformed_json_arguments_are_forwarded_verbatim() {
        let segments = parse_assistant_text(
            "<tool_call><name>f</name><arguments>{city: Tokyo}</arguments></tool_call>",
        );

        let call = &calls(&segments)[0];
        assert_eq!(call.arguments, "{city: Tokyo}");
    }

    #[test]
    fn missing_arguments_element_defaults_to_empty_object() {
        let segments =
            parse_assistant_text("<tool_call><name>refresh</name></tool_call>");

        assert_eq!(calls(&segments)[0].arguments, "{}");
    }

    #[test]
    fn unterminated_block_degrades_to_text() {
        let input = "before <tool_call><name>f</name><arguments>{";
        let segments = parse_assistant_text(input);

        assert_eq!(segments, vec![Segment::Text(input.into())]);
    }

    #[test]
    fn name_is_trimmed() {
        let segments = parse_assistant_text(
            "<tool_call><name>\n  get_weather  \n</name><arguments>{}</arguments></tool_call>",
        );

        assert_eq!(calls(&segments)[0].name, "get_weather");
    }
}
