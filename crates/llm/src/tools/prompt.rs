//! Synthesis of the injected tool-calling system prompt.

use std::fmt::Write;

use serde_json::Value;

use crate::messages::canonical::{ToolChoice, ToolDeclaration};

/// The literal opening tag whose appearance switches the streaming extractor
/// from pass-through to capture.
pub const TRIGGER_TAG: &str = "<tool_call>";

/// Which prompt rendition to inject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptVariant {
    /// Worked examples, think-tag guidance and rationale. The default.
    Detailed,
    /// Roughly a third of the characters. Cheaper, less reliable formatting
    /// on weaker models.
    Optimized,
}

/// Builds the system prompt describing the declared tools and the XML
/// grammar the model must use to call them.
///
/// A custom `template` replaces the built-in text; its `{tools}` placeholder
/// receives the rendered tool list.
pub fn synthesize(
    tools: &[ToolDeclaration],
    variant: PromptVariant,
    template: Option<&str>,
) -> String {
    let tools_list = render_tools_list(tools);

    if let Some(template) = template {
        log::debug!("using custom prompt template from configuration");
        return template.replace("{tools}", &tools_list);
    }

    match variant {
        PromptVariant::Detailed => detailed_template(&tools_list),
        PromptVariant::Optimized => optimized_template(&tools_list),
    }
}

fn detailed_template(tools_list: &str) -> String {
    format!(
        r#"You have access to the following tools:

{tools_list}

To call a tool, emit a block in EXACTLY this XML form, at any point in your reply:

<tool_call>
  <name>TOOL_NAME</name>
  <arguments>{{"parameter": "value"}}</arguments>
</tool_call>

RULES:
1. The literal opening tag <tool_call> starts a tool call. Everything outside tool-call blocks is ordinary text shown to the user.
2. <name> contains exactly one tool name from the list above, nothing else.
3. <arguments> contains a single valid JSON object matching the tool's parameters. No prose, no markdown fences, no trailing commas.
4. To call several tools, emit several <tool_call> blocks one after another.
5. Stop immediately after the final </tool_call>. The results will be sent back to you before you continue.
6. You may reason privately inside <think>...</think> blocks anywhere outside tool calls. Never open a tool call inside a think block.
7. Results of earlier calls appear in the conversation wrapped in <tool_result>...</tool_result> blocks. Read them before deciding to call again.

EXAMPLE:
User: What's the weather in Tokyo?
Assistant: Let me look that up.
<tool_call>
  <name>get_weather</name>
  <arguments>{{"city": "Tokyo", "unit": "celsius"}}</arguments>
</tool_call>

EXAMPLE with reasoning:
<think>The user wants both cities, so I need two calls.</think>
<tool_call>
  <name>get_weather</name>
  <arguments>{{"city": "Paris"}}</arguments>
</tool_call>
<tool_call>
  <name>get_weather</name>
  <arguments>{{"city": "London"}}</arguments>
</tool_call>

WRONG - never do any of these:
- Describing a call ("I would call get_weather with city=Tokyo") instead of emitting the block.
- Wrapping the block in ``` fences or extra XML elements.
- Putting text between </name> and <arguments>, or after </tool_call> when a result is still pending.
- Inventing tool names or parameter keys. Use them exactly as declared, including case and punctuation.

Use the tools whenever they can answer the question better than you can from memory."#
    )
}

fn optimized_template(tools_list: &str) -> String {
    format!(
        r#"You can call these tools:

{tools_list}

Call format, exact:

<tool_call>
  <name>TOOL_NAME</name>
  <arguments>{{"parameter": "value"}}</arguments>
</tool_call>

<arguments> holds one valid JSON object. Multiple calls: repeat the block. Text outside blocks goes to the user; stop after the last </tool_call>. Prior results appear as <tool_result> blocks. Use exact tool and parameter names."#
    )
}

/// Renders one numbered entry per tool: description, parameter summary,
/// required list and per-parameter details pulled from the JSON schema.
fn render_tools_list(tools: &[ToolDeclaration]) -> String {
    let mut out = String::new();

    for (i, tool) in tools.iter().enumerate() {
        if i > 0 {
            out.push_str("\n\n");
        }

        let _ = write!(out, "{}. <tool name=\"{}\">", i + 1, tool.name);

        match tool.description.as_deref().filter(|d| !d.is_empty()) {
            Some(description) => {
                let _ = write!(out, "\n   Description: {description}");
            }
            None => out.push_str("\n   Description: None"),
        }

        let properties = tool.parameters.get("properties").and_then(Value::as_object);
        let required: Vec<&str> = tool
            .parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let summary = properties
            .map(|props| {
                props
                    .iter()
                    .map(|(name, schema)| {
                        format!("{name} ({})", type_of(schema))
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "None".to_string());

        let _ = write!(out, "\n   Parameters: {summary}");
        let _ = write!(
            out,
            "\n   Required: {}",
            if required.is_empty() {
                "None".to_string()
            } else {
                required.join(", ")
            }
        );

        if let Some(props) = properties {
            for (name, schema) in props {
                let _ = write!(out, "\n   - {name}:");
                let _ = write!(out, "\n     type: {}", type_of(schema));
                let _ = write!(
                    out,
                    "\n     required: {}",
                    if required.contains(&name.as_str()) {
                        "yes"
                    } else {
                        "no"
                    }
                );

                if let Some(description) = schema.get("description").and_then(Value::as_str) {
                    let _ = write!(out, "\n     description: {description}");
                }
                if let Some(enum_values) = schema.get("enum") {
                    let _ = write!(out, "\n     enum: {enum_values}");
                }
                if let Some(default) = schema.get("default") {
                    let _ = write!(out, "\n     default: {default}");
                }
                if schema.get("type").and_then(Value::as_str) == Some("array")
                    && let Some(items_type) = schema
                        .get("items")
                        .and_then(|items| items.get("type"))
                        .and_then(Value::as_str)
                {
                    let _ = write!(out, "\n     items: {items_type}");
                }
            }
        }
    }

    if out.is_empty() {
        out.push_str("(no tools declared)");
    }

    out
}

fn type_of(schema: &Value) -> &str {
    schema.get("type").and_then(Value::as_str).unwrap_or("any")
}

/// A directive appended to the prompt when the client pinned tool usage.
pub fn tool_choice_hint(choice: &ToolChoice) -> Option<String> {
    match choice {
        ToolChoice::Auto => None,
        ToolChoice::None => {
            Some("\n\nFor this request, do NOT call any tool. Answer directly.".to_string())
        }
        ToolChoice::Required => Some(
            "\n\nFor this request, you MUST call at least one tool before answering.".to_string(),
        ),
        ToolChoice::Specific(name) => Some(format!(
            "\n\nFor this request, you MUST call the tool `{name}`."
        )),
    }
}

/// Renders an assistant tool call back into the XML sublanguage, for
/// replaying conversation history to an injected upstream.
pub fn render_tool_call_block(name: &str, arguments: &str) -> String {
    format!("<tool_call>\n  <name>{name}</name>\n  <arguments>{arguments}</arguments>\n</tool_call>")
}

/// Renders a tool result as the `<tool_result>` block the injected prompt
/// tells the model to expect.
pub fn render_tool_result_block(name: Option<&str>, content: &str) -> String {
    match name {
        Some(name) => format!("<tool_result name=\"{name}\">\n{content}\n</tool_result>"),
        None => format!("<tool_result>\n{content}\n</tool_result>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn weather_tool() -> ToolDeclaration {
        ToolDeclaration {
            name: "get_weather".into(),
            description: Some("Look up current weather".into()),
            parameters: json!({
                "type": "object",
                "properties": {
                    "city": {"type": "string", "description": "City name"},
                    "unit": {"type": "string", "enum": ["celsius", "fahrenheit"], "default": "celsius"}
                },
                "required": ["city"]
            }),
        }
    }

    #[test]
    fn detailed_prompt_contains_grammar_and_tool_details() {
        let prompt = synthesize(&[weather_tool()], PromptVariant::Detailed, None);

        assert!(prompt.contains("<tool_call>"));
        assert!(prompt.contains("<name>TOOL_NAME</name>"));
        assert!(prompt.contains("<arguments>"));
        assert!(prompt.contains("get_weather"));
        assert!(prompt.contains("Look up current weather"));
        assert!(prompt.contains("required: yes"));
        assert!(prompt.contains(r#"enum: ["celsius","fahrenheit"]"#));
        assert!(prompt.contains("<think>"));
    }

    #[test]
    fn optimized_prompt_is_much_shorter_but_keeps_the_grammar() {
        let tools = [weather_tool()];
        let detailed = synthesize(&tools, PromptVariant::Detailed, None);
        let optimized = synthesize(&tools, PromptVariant::Optimized, None);

        assert!(optimized.len() * 2 < detailed.len());
        assert!(optimized.contains("<tool_call>"));
        assert!(optimized.contains("<name>TOOL_NAME</name>"));
        assert!(optimized.contains("get_weather"));
    }

    #[test]
    fn custom_template_replaces_the_builtin_text() {
        let prompt = synthesize(
            &[weather_tool()],
            PromptVariant::Detailed,
            Some("Tools:\n{tools}\nGo."),
        );

        assert!(prompt.starts_with("Tools:\n"));
        assert!(prompt.ends_with("\nGo."));
        assert!(prompt.contains("get_weather"));
    }

    #[test]
    fn tool_choice_hints() {
        assert_eq!(tool_choice_hint(&ToolChoice::Auto), None);
        assert!(
            tool_choice_hint(&ToolChoice::Specific("get_weather".into()))
                .unwrap()
                .contains("`get_weather`")
        );
        assert!(tool_choice_hint(&ToolChoice::None).unwrap().contains("NOT"));
    }

    #[test]
    fn history_blocks_roundtrip_through_the_parser_grammar() {
        let block = render_tool_call_block("f", r#"{"x":1}"#);

        assert!(block.starts_with(TRIGGER_TAG));
        assert!(block.contains("<name>f</name>"));
        assert!(block.ends_with("</tool_call>"));
    }
}
