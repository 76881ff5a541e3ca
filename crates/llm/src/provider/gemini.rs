use std::time::Duration;

use async_trait::async_trait;
use config::UpstreamServiceConfig;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use secrecy::ExposeSecret;

use crate::{
    error::{ProxyError, Result},
    http_client::http_client,
    messages::canonical::{ChatRequest, ChatResponse, Delta},
    protocol::gemini,
    provider::{DeltaStream, UpstreamDriver, auth_key, error_from_response},
    request::RequestContext,
};

pub(crate) struct GeminiDriver {
    service: UpstreamServiceConfig,
    client: Client,
}

impl GeminiDriver {
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
        let key = auth_key(&self.service, ctx);

        let url = if stream {
            format!(
                "{}/models/{}:streamGenerateContent?alt=sse&key={}",
                self.service.base_url,
                request.model,
                key.expose_secret()
            )
        } else {
            format!(
                "{}/models/{}:generateContent?key={}",
                self.service.base_url,
                request.model,
                key.expose_secret()
            )
        };

        let wire = gemini::encode_request(request);

        let body = sonic_rs::to_vec(&wire).map_err(|e| {
            log::error!("Failed to serialize Gemini request: {e}");
            ProxyError::Internal(None)
        })?;

        let response = self
            .client
            .post(&url)
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
impl UpstreamDriver for GeminiDriver {
    async fn complete(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<ChatResponse> {
        let response = self.send(request, ctx, false).await?;

        let text = response.text().await.map_err(|e| {
            ProxyError::Connection(format!(
                "failed to read response from '{}': {e}",
                self.service.name
            ))
        })?;

        let wire: gemini::GenerateContentResponse = sonic_rs::from_str(&text).map_err(|e| {
            log::error!("Failed to parse Gemini response ({} bytes): {e}", text.len());
            ProxyError::Internal(None)
        })?;

        if wire.candidates.is_empty() {
            log::error!("Gemini upstream '{}' returned no candidates", self.service.name);
            return Err(ProxyError::Internal(None));
        }

        Ok(gemini::decode_response(&request.model, wire))
    }

    async fn stream(&self, request: &ChatRequest, ctx: &RequestContext) -> Result<DeltaStream> {
        let response = self.send(request, ctx, true).await?;

        let service_name = self.service.name.clone();
        let mut decoder = gemini::StreamDecoder::default();

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

                match sonic_rs::from_str::<gemini::GenerateContentResponse>(&event.data) {
                    Ok(chunk) => {
                        let mut out = Vec::new();
                        decoder.decode(chunk, &mut out);
                        out.into_iter().map(Ok).collect()
                    }
                    Err(_) => {
                        log::warn!("Failed to parse Gemini streaming chunk from '{service_name}'");
                        Vec::new()
                    }
                }
            })
            .map(futures::stream::iter)
            .flatten();

        Ok(Box::pin(deltas))
    }
}
