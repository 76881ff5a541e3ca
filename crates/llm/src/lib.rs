//! LLM protocol endpoints and the proxy pipeline behind them.
//!
//! Clients speak any of the three supported wire formats; each handler
//! decodes into the canonical model, routes through the upstream candidates,
//! and re-encodes the result in the caller's format, streaming or buffered.

use std::{collections::BTreeMap, convert::Infallible, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Response, Sse, sse::Event},
    routing::{get, post},
};
use axum_serde::Sonic;
use config::{Config, SharedConfig};
use futures::{StreamExt, stream};
use uuid::Uuid;

mod error;
mod http_client;
pub mod messages;
pub mod protocol;
mod provider;
mod proxy;
mod request;
mod router;
pub mod tools;
pub mod transcode;

pub use error::{AnthropicResult, GeminiResult, ProxyError, Result};

use error::{AnthropicErrorResponse, GeminiErrorResponse};
use messages::canonical::Delta;
use protocol::{SseFrame, anthropic, gemini, openai};
use provider::DeltaStream;
use proxy::{Proxy, ProxyReply};
use tools::id_map::ToolCallIdMap;
use transcode::WireFormat;

#[derive(Clone)]
struct AppState {
    config: SharedConfig,
    id_map: Arc<ToolCallIdMap>,
}

/// Creates the axum router for the client-facing LLM endpoints.
pub fn router(config: SharedConfig) -> Router {
    let state = AppState {
        config,
        id_map: Arc::new(ToolCallIdMap::new()),
    };

    Router::new()
        .route("/v1/chat/completions", post(chat_completions))
        .route("/v1/messages", post(anthropic_messages))
        .route("/v1beta/models/{model_action}", post(gemini_generate))
        .route("/v1/models", get(list_models))
        .with_state(state)
}

/// Handle OpenAI-format chat completion requests.
///
/// Supports both buffered and streaming responses; with `stream: true` the
/// reply is sent as SSE terminated by `data: [DONE]`.
async fn chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Sonic(wire): Sonic<openai::ChatCompletionRequest>,
) -> Result<Response> {
    let config = state.config.snapshot();
    let ctx = request::authenticate(&config, WireFormat::Openai, &headers, None)?;

    log::debug!(
        "OpenAI chat completions: model={}, messages={}, stream={}",
        wire.model,
        wire.messages.len(),
        wire.stream.unwrap_or(false)
    );

    let chat_request = openai::decode_request(wire)?;
    let model = chat_request.model.clone();
    let proxy = Proxy::new(config, state.id_map.clone());

    match proxy.execute(chat_request, ctx).await? {
        ProxyReply::Buffered(response) => {
            Ok(Json(openai::encode_response(&response)).into_response())
        }
        ProxyReply::Streaming(deltas) => {
            let mut encoder = openai::StreamEncoder::new(completion_id("chatcmpl"), model);

            Ok(sse_response(
                deltas,
                move |delta| encoder.encode(delta),
                openai_error_frame,
            ))
        }
    }
}

/// Handle Anthropic-format messages requests.
async fn anthropic_messages(
    State(state): State<AppState>,
    headers: HeaderMap,
    Sonic(wire): Sonic<anthropic::MessagesRequest>,
) -> AnthropicResult<Response> {
    let config = state.config.snapshot();
    let ctx = request::authenticate(&config, WireFormat::Anthropic, &headers, None)
        .map_err(AnthropicErrorResponse::from)?;

    log::debug!(
        "Anthropic messages: model={}, messages={}, stream={}",
        wire.model,
        wire.messages.len(),
        wire.stream.unwrap_or(false)
    );

    let chat_request = anthropic::decode_request(wire);
    let model = chat_request.model.clone();
    let proxy = Proxy::new(config, state.id_map.clone());

    match proxy
        .execute(chat_request, ctx)
        .await
        .map_err(AnthropicErrorResponse::from)?
    {
        ProxyReply::Buffered(response) => {
            Ok(Json(anthropic::encode_response(&response)).into_response())
        }
        ProxyReply::Streaming(deltas) => {
            let mut encoder = anthropic::StreamEncoder::new(completion_id("msg"), model);

            Ok(sse_response(
                deltas,
                move |delta| encoder.encode(delta),
                anthropic_error_frame,
            ))
        }
    }
}

/// Handle Gemini generateContent and streamGenerateContent requests.
///
/// The model and the action travel in one path segment (`model:action`), so
/// the segment is captured whole and split here.
async fn gemini_generate(
    State(state): State<AppState>,
    Path(model_action): Path<String>,
    Query(params): Query<BTreeMap<String, String>>,
    headers: HeaderMap,
    Sonic(wire): Sonic<gemini::GenerateContentRequest>,
) -> GeminiResult<Response> {
    let config = state.config.snapshot();

    let Some((model, action)) = model_action.split_once(':') else {
        return Err(ProxyError::MalformedRequest(format!(
            "expected 'model:action' in path, got '{model_action}'"
        ))
        .into());
    };

    let stream = match action {
        "generateContent" => false,
        "streamGenerateContent" => true,
        other => {
            return Err(ProxyError::MalformedRequest(format!(
                "unsupported action '{other}'"
            ))
            .into());
        }
    };

    let ctx = request::authenticate(
        &config,
        WireFormat::Gemini,
        &headers,
        params.get("key").map(String::as_str),
    )
    .map_err(GeminiErrorResponse::from)?;

    log::debug!("Gemini generateContent: model={model}, stream={stream}");

    let mut chat_request = gemini::decode_request(model.to_string(), wire);
    chat_request.stream = stream;

    let model = chat_request.model.clone();
    let proxy = Proxy::new(config, state.id_map.clone());

    match proxy
        .execute(chat_request, ctx)
        .await
        .map_err(GeminiErrorResponse::from)?
    {
        ProxyReply::Buffered(response) => {
            Ok(Json(gemini::encode_response(&response)).into_response())
        }
        ProxyReply::Streaming(deltas) => {
            let mut encoder = gemini::StreamEncoder::new(model);

            Ok(sse_response(
                deltas,
                move |delta| encoder.encode(delta),
                gemini_error_frame,
            ))
        }
    }
}

/// List the union of all configured models, deduplicated.
async fn list_models(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<openai::ModelsResponse>> {
    let config = state.config.snapshot();
    request::authenticate(&config, WireFormat::Openai, &headers, None)?;

    Ok(Json(model_union(&config)))
}

fn model_union(config: &Config) -> openai::ModelsResponse {
    let mut models: BTreeMap<String, String> = BTreeMap::new();

    for service in &config.upstream_services {
        for id in service.models.iter().chain(service.model_mapping.keys()) {
            models
                .entry(id.clone())
                .or_insert_with(|| service.name.clone());
        }
    }

    openai::ModelsResponse {
        object: "list".to_string(),
        data: models
            .into_iter()
            .map(|(id, owned_by)| openai::Model {
                id,
                object: "model".to_string(),
                created: 0,
                owned_by,
            })
            .collect(),
    }
}

fn completion_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Builds an SSE response from a canonical delta stream, encoding every
/// delta with the caller's wire encoder. Errors become a format-appropriate
/// terminal event rather than an HTTP status; headers are long gone by then.
fn sse_response<E>(
    deltas: DeltaStream,
    mut encode: E,
    error_frame: fn(ProxyError) -> SseFrame,
) -> Response
where
    E: FnMut(&Delta) -> Vec<SseFrame> + Send + 'static,
{
    let events = deltas
        .map(move |item| match item {
            Ok(delta) => encode(&delta),
            Err(error) => {
                log::error!("stream error: {error}");
                vec![error_frame(error)]
            }
        })
        .map(stream::iter)
        .flatten()
        .map(|frame| {
            let event = Event::default().data(frame.data);
            let event = match frame.event {
                Some(name) => event.event(name),
                None => event,
            };

            Ok::<_, Infallible>(event)
        });

    Sse::new(events).into_response()
}

fn openai_error_frame(error: ProxyError) -> SseFrame {
    let body = serde_json::json!({
        "error": {
            "message": error.client_message(),
            "type": error.error_type(),
            "code": error.status_code().as_u16(),
        }
    });

    SseFrame::data(body.to_string())
}

fn anthropic_error_frame(error: ProxyError) -> SseFrame {
    let body = anthropic::ErrorResponse::from(error);

    SseFrame::event(
        "error",
        serde_json::to_string(&body).unwrap_or_else(|_| {
            r#"{"type":"error","error":{"type":"internal_error","message":"serialization failed"}}"#
                .to_string()
        }),
    )
}

fn gemini_error_frame(error: ProxyError) -> SseFrame {
    let body = gemini::ErrorResponse::from(error);

    SseFrame::data(serde_json::to_string(&body).unwrap_or_else(|_| {
        r#"{"error":{"code":500,"message":"serialization failed","status":"INTERNAL"}}"#.to_string()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn model_union_deduplicates_across_services() {
        let config: Config = toml::from_str(indoc! {r#"
            [[upstream_services]]
            name = "a"
            service_type = "openai"
            base_url = "https://a.example/v1"
            api_key = "sk-a"
            models = ["gpt-4", "gpt-4o"]

            [upstream_services.model_mapping]
            "gpt-4-alias" = "gpt-4"

            [[upstream_services]]
            name = "b"
            service_type = "anthropic"
            base_url = "https://b.example/v1"
            api_key = "sk-b"
            models = ["gpt-4", "claude-sonnet-4"]
        "#})
        .unwrap();

        let listing = model_union(&config);

        let ids: Vec<_> = listing.data.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["claude-sonnet-4", "gpt-4", "gpt-4-alias", "gpt-4o"]);

        // The first service advertising a model owns it in the listing.
        let gpt4 = listing.data.iter().find(|m| m.id == "gpt-4").unwrap();
        assert_eq!(gpt4.owned_by, "a");
    }
}
