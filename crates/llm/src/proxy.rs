//! The proxy pipeline: route, inject, forward, extract, re-encode.

use std::{collections::HashMap, sync::Arc, time::Duration};

use config::ConfigHandle;
use futures::{StreamExt, future, stream};

use crate::{
    error::{ProxyError, Result},
    messages::canonical::{ChatRequest, ChatResponse, ContentPart, Delta, FinishReason, Role},
    provider::{self, DeltaStream},
    request::RequestContext,
    router::{self, Candidate},
    tools::{
        extractor::StreamingExtractor,
        id_map::ToolCallIdMap,
        parser::{self, Segment},
        prompt::{self, PromptVariant},
    },
};

/// Outcome of one proxied request.
pub(crate) enum ProxyReply {
    Buffered(ChatResponse),
    Streaming(DeltaStream),
}

/// One request's view of the pipeline, pinned to a configuration snapshot.
pub(crate) struct Proxy {
    config: ConfigHandle,
    id_map: Arc<ToolCallIdMap>,
}

impl Proxy {
    pub fn new(config: ConfigHandle, id_map: Arc<ToolCallIdMap>) -> Self {
        Self { config, id_map }
    }

    /// Routes the request through the candidate list and drives the chosen
    /// upstream. The configured total deadline bounds candidate selection
    /// and, for streams, each gap between upstream bytes.
    pub async fn execute(
        &self,
        mut request: ChatRequest,
        ctx: RequestContext,
    ) -> Result<ProxyReply> {
        self.resolve_result_names(&mut request);

        let candidates = router::candidates(&self.config, &request.model);
        log::debug!(
            "resolved {} candidate(s) for model '{}'",
            candidates.len(),
            request.model
        );

        let requested_model = request.model.clone();
        let deadline = self.config.server.timeout;

        if request.stream {
            let stream = tokio::time::timeout(
                deadline,
                router::try_each(&candidates, &requested_model, |candidate| {
                    self.attempt_stream(candidate, &request, &ctx)
                }),
            )
            .await
            .map_err(|_| ProxyError::DeadlineExceeded)??;

            Ok(ProxyReply::Streaming(stream))
        } else {
            let response = tokio::time::timeout(
                deadline,
                router::try_each(&candidates, &requested_model, |candidate| {
                    self.attempt_complete(candidate, &request, &ctx)
                }),
            )
            .await
            .map_err(|_| ProxyError::DeadlineExceeded)??;

            Ok(ProxyReply::Buffered(response))
        }
    }

    async fn attempt_complete(
        &self,
        candidate: &Candidate<'_>,
        base: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<ChatResponse> {
        let (request, injected) = self.prepare_for(candidate, base);
        let driver = provider::driver_for(candidate.service, self.config.server.connect_timeout);

        let response = driver.complete(&request, ctx).await?;

        let response = if injected {
            self.postprocess_injected(response)
        } else {
            response
        };

        self.record_tool_ids(&response);

        Ok(response)
    }

    async fn attempt_stream(
        &self,
        candidate: &Candidate<'_>,
        base: &ChatRequest,
        ctx: &RequestContext,
    ) -> Result<DeltaStream> {
        let (request, injected) = self.prepare_for(candidate, base);
        let driver = provider::driver_for(candidate.service, self.config.server.connect_timeout);

        // Only the initial HTTP status can fail over; once the body streams,
        // failures propagate to the client as a terminal event.
        let inner = driver.stream(&request, ctx).await?;
        let inner = with_idle_timeout(inner, self.config.server.timeout);

        Ok(adapt_stream(inner, injected, self.id_map.clone()))
    }

    /// Clones the base request for one candidate: model rewrite, tool
    /// stripping, and the injected tool prompt when the service needs it.
    fn prepare_for(&self, candidate: &Candidate<'_>, base: &ChatRequest) -> (ChatRequest, bool) {
        let features = &self.config.features;
        let mut request = base.clone();
        request.model = candidate.model.clone();

        if !features.enable_function_calling && !request.tools.is_empty() {
            log::debug!("function calling disabled by configuration, dropping declared tools");
            request.tools.clear();
            request.tool_choice = None;
            return (request, false);
        }

        let inject = !request.tools.is_empty()
            && candidate
                .service
                .inject_function_calling
                .unwrap_or(features.inject_function_calling);

        if !inject {
            return (request, false);
        }

        let variant = if candidate.service.optimize_prompt || features.optimize_prompt {
            PromptVariant::Optimized
        } else {
            PromptVariant::Detailed
        };

        let mut tool_prompt = prompt::synthesize(
            &request.tools,
            variant,
            features.prompt_template.as_deref(),
        );

        if let Some(choice) = &request.tool_choice
            && let Some(hint) = prompt::tool_choice_hint(choice)
        {
            tool_prompt.push_str(&hint);
        }

        log::debug!(
            "injecting tool prompt for upstream '{}': {} tools, {} chars",
            candidate.service.name,
            request.tools.len(),
            tool_prompt.len()
        );

        request.system = Some(match request.system.take() {
            Some(existing) => format!("{tool_prompt}\n\n{existing}"),
            None => tool_prompt,
        });

        flatten_tool_history(&mut request);
        request.tools.clear();
        request.tool_choice = None;

        (request, true)
    }

    /// Fills in missing tool-result names from earlier calls in the same
    /// conversation, falling back to the cross-turn ID map.
    fn resolve_result_names(&self, request: &mut ChatRequest) {
        let mut names: HashMap<String, String> = HashMap::new();

        for message in &request.messages {
            for part in &message.parts {
                if let ContentPart::ToolUse { id, name, .. } = part {
                    names.insert(id.clone(), name.clone());
                }
            }
        }

        for message in &mut request.messages {
            for part in &mut message.parts {
                if let ContentPart::ToolResult {
                    tool_call_id,
                    name: name @ None,
                    ..
                } = part
                {
                    *name = names
                        .get(tool_call_id)
                        .cloned()
                        .or_else(|| self.id_map.resolve(tool_call_id));
                }
            }
        }
    }

    /// Parses XML tool calls out of an injected upstream's buffered answer.
    ///
    /// When the upstream answered with native tool calls despite the
    /// injection, the native calls win and XML in the text stays text.
    fn postprocess_injected(&self, mut response: ChatResponse) -> ChatResponse {
        let has_native = response
            .content
            .iter()
            .any(|part| matches!(part, ContentPart::ToolUse { .. }));

        if has_native {
            return response;
        }

        let mut content = Vec::with_capacity(response.content.len());
        let mut extracted = false;

        for part in response.content.drain(..) {
            match part {
                ContentPart::Text { text } => {
                    for segment in parser::parse_assistant_text(&text) {
                        match segment {
                            Segment::Text(text) => content.push(ContentPart::Text { text }),
                            Segment::ToolCall(call) => {
                                extracted = true;
                                content.push(ContentPart::ToolUse {
                                    id: call.id,
                                    name: call.name,
                                    arguments: call.arguments,
                                });
                            }
                        }
                    }
                }
                other => content.push(other),
            }
        }

        response.content = content;

        if extracted {
            response.finish_reason = FinishReason::ToolCalls;
        }

        response
    }

    /// Remembers `call id -> tool name` for every call in the response so a
    /// later turn can resolve results that arrive without a name.
    fn record_tool_ids(&self, response: &ChatResponse) {
        for part in &response.content {
            if let ContentPart::ToolUse { id, name, .. } = part {
                self.id_map.insert(id.clone(), name.clone());
            }
        }
    }
}

/// Rewrites tool-call history into the XML sublanguage for a prompt-only
/// upstream: assistant calls become `<tool_call>` text and tool messages
/// become user messages carrying `<tool_result>` text.
fn flatten_tool_history(request: &mut ChatRequest) {
    for message in &mut request.messages {
        match message.role {
            Role::Assistant => {
                for part in &mut message.parts {
                    if let ContentPart::ToolUse {
                        name, arguments, ..
                    } = part
                    {
                        *part = ContentPart::Text {
                            text: prompt::render_tool_call_block(name, arguments),
                        };
                    }
                }
            }
            Role::Tool => {
                message.role = Role::User;

                for part in &mut message.parts {
                    if let ContentPart::ToolResult { name, content, .. } = part {
                        *part = ContentPart::Text {
                            text: prompt::render_tool_result_block(name.as_deref(), content),
                        };
                    }
                }
            }
            Role::System | Role::User => {}
        }
    }
}

/// State for the streaming tool-call extraction adapter.
struct StreamState {
    extractor: Option<StreamingExtractor>,
    id_map: Arc<ToolCallIdMap>,
    native_tools_seen: bool,
    finished: bool,
}

impl StreamState {
    fn on_delta(&mut self, delta: Delta) -> Vec<Result<Delta>> {
        if self.finished {
            return Vec::new();
        }

        match delta {
            Delta::Text(text) => match &mut self.extractor {
                Some(extractor) if !self.native_tools_seen => {
                    let mut out = Vec::new();
                    extractor.feed(&text, &mut out);
                    self.record_and_wrap(out)
                }
                _ => vec![Ok(Delta::Text(text))],
            },
            Delta::ToolCallStart { .. }
            | Delta::ToolCallArguments { .. }
            | Delta::ToolCallEnd { .. } => {
                let mut out = Vec::new();

                // Native tool calls win over injected XML: stop extracting
                // and let any pending suspected trigger flush as text.
                if !self.native_tools_seen {
                    self.native_tools_seen = true;
                    if let Some(mut extractor) = self.extractor.take() {
                        extractor.finish(&mut out);
                    }
                }

                out.push(delta);
                self.record_and_wrap(out)
            }
            Delta::Done(reason) => {
                self.finished = true;

                let mut out = Vec::new();
                let reason = match self.extractor.take() {
                    Some(mut extractor) => {
                        extractor.finish(&mut out);
                        if extractor.calls_extracted() > 0 {
                            FinishReason::ToolCalls
                        } else {
                            reason
                        }
                    }
                    None => reason,
                };

                out.push(Delta::Done(reason));
                self.record_and_wrap(out)
            }
        }
    }

    fn on_error(&mut self, error: ProxyError) -> Vec<Result<Delta>> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        // Flush whatever text the extractor still buffers, then surface the
        // error as the terminal element.
        let mut out = Vec::new();
        if let Some(mut extractor) = self.extractor.take() {
            extractor.finish(&mut out);
        }

        let mut wrapped = self.record_and_wrap(out);
        wrapped.push(Err(error));
        wrapped
    }

    fn on_end(&mut self) -> Vec<Result<Delta>> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;

        // Upstream closed without a terminal chunk: flush and synthesize the
        // Done the client-side encoder needs.
        let mut out = Vec::new();
        let reason = match self.extractor.take() {
            Some(mut extractor) => {
                extractor.finish(&mut out);
                if extractor.calls_extracted() > 0 {
                    FinishReason::ToolCalls
                } else {
                    FinishReason::Stop
                }
            }
            None => FinishReason::Stop,
        };

        out.push(Delta::Done(reason));
        self.record_and_wrap(out)
    }

    fn record_and_wrap(&self, deltas: Vec<Delta>) -> Vec<Result<Delta>> {
        for delta in &deltas {
            if let Delta::ToolCallStart { id, name, .. } = delta {
                self.id_map.insert(id.clone(), name.clone());
            }
        }

        deltas.into_iter().map(Ok).collect()
    }
}

/// Wraps an upstream delta stream with XML extraction (when injected), ID
/// recording, and a guaranteed terminal element.
fn adapt_stream(inner: DeltaStream, injected: bool, id_map: Arc<ToolCallIdMap>) -> DeltaStream {
    let state = StreamState {
        extractor: injected.then(StreamingExtractor::new),
        id_map,
        native_tools_seen: false,
        finished: false,
    };

    let with_end = inner.map(Some).chain(stream::once(future::ready(None)));

    let adapted = with_end
        .scan(state, |state, item| {
            let batch = match item {
                Some(Ok(delta)) => state.on_delta(delta),
                Some(Err(error)) => state.on_error(error),
                None => state.on_end(),
            };

            future::ready(Some(batch))
        })
        .map(stream::iter)
        .flatten();

    Box::pin(adapted)
}

/// Bounds the gap between consecutive upstream items. Receipt of any item
/// pushes the deadline forward, so long streams are not cut off while they
/// keep producing.
fn with_idle_timeout(inner: DeltaStream, idle: Duration) -> DeltaStream {
    let timed = stream::unfold((inner, false), move |(mut inner, timed_out)| async move {
        if timed_out {
            return None;
        }

        match tokio::time::timeout(idle, inner.next()).await {
            Ok(Some(item)) => Some((item, (inner, false))),
            Ok(None) => None,
            Err(_) => Some((Err(ProxyError::DeadlineExceeded), (inner, true))),
        }
    });

    Box::pin(timed)
}
