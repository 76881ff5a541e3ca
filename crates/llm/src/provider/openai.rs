use std::time::Duration;

use async_trait::async_trait;
use config::UpstreamServiceConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::ExposeSecret;

use crate::{
    error::{ProxyError, Result},
    http_client::http_client,
    messages::canonical::{ChatRequest, ChatResponse, Delta},
    protocol::openai,
    provider::{DeltaStream, UpstreamDriver, auth_key, error_from_response},
    request::RequestContext,
};

pub(crate) struct OpenAiDriver {
    service: UpstreamServiceConfig,
    client: Client,
}

impl OpenAiDriver {
    pub fn new(service: UpstreamServiceConfig, connect_timeout: Duration) -> Self {
        Self {
            service,
            client: http_client(connect_timeout),
        }
    }

    async fn send(
        &self,
        request: &ChatRequest,
        ctx: &RequestContext,
        stream: bool,
    ) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.service.base_url);

        let mut wire = openai::encode_request(request);
        wire.stream = Some(stream);

        let body = sonic_rs::to_vec(&wire).map_err(|e| {
            log::error!("Failed to serialize OpenAI request: {e}");
            ProxyError::Internal(None)
        })?;

        let key = auth_key(&self.service, ctx);

        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()))
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| {
                ProxyError::Connection(format!(
                    "failed to reach upstream '{}': {e}",
                    self.service.name
                ))
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(&self.service.name, response).await);
        }

        Ok(response)
    }
}

#[async_trait]
impl UpstreamDriver for OpenAiDriver {
    async fn complete(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let response = self.send(request, ctx, false).await?;

        let text = response.text().await.map_err(|e| {
            ProxyError::Connection(format!(
                "failed to read response from '{}': {e}",
                self.service.name
            ))
        })?;

        let wire: openai::ChatCompletionResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse OpenAI response ({} bytes): {e}", text.len());
            ProxyError::Internal(None)
        })?;

        Ok(openai::decode_response(wire))
    }

    async fn stream(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<DeltaStream> {
        let response = self.send(request, ctx, true).await?;

        let service_name = self.service.name.clone();
        let mut decoder = openai::StreamDecoder::default();

        let deltas = response
            .bytes_stream()
            .eventsource()
            .map(move |event| -> Vec<Result<Delta>> {
                let event = match event {
                    Ok(event) => event,
                    Err(e) => {
                        return vec![Err(ProxyError::Connection(format!(
                            "stream error from '{service_name}': {e}"
                        )))];
                    }
                };

                if event.data == "[DONE]" {
                    return Vec::new();
                }

                match sonic_rs::from_str::<openai::ChatCompletionChunk>(&event.data) {
                    Ok(chunk) => {
                        let mut out = Vec::new();
                        decoder.decode(chunk, &mut out);
                        out.into_iter().map(Ok).collect()
                    }
                    Err(_) => {
                        log::warn!("Failed to parse OpenAI streaming chunk from '{service_name}'");
                        Vec::new()
                    }
                }
            })
            .map(futures::stream::iter)
            .flatten();

        Ok(Box::pin(deltas))
    }
}
