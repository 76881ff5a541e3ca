//! Wire codecs for the three supported LLM protocols.
//!
//! Each submodule owns the typed serde structs for one protocol and the
//! conversions to and from the canonical model: request decode/encode,
//! response decode/encode, a streaming chunk decoder and a streaming SSE
//! encoder. The encoders are small state machines driven by the canonical
//! [`Delta`](crate::messages::canonical::Delta) sequence; the same deltas
//! produce the idiomatic event sequence for each format.

pub mod anthropic;
pub mod gemini;
pub mod openai;

/// One server-sent event ready to be written to the client.
#[derive(Debug, Clone, PartialEq)]
pub struct SseFrame {
    /// SSE `event:` name. OpenAI and Gemini streams carry data-only frames;
    /// Anthropic names every event.
    pub event: Option<&'static str>,
    /// SSE `data:` payload.
    pub data: String,
}

impl SseFrame {
    pub(crate) fn data(data: String) -> Self {
        Self { event: None, data }
    }

    pub(crate) fn event(event: &'static str, data: String) -> Self {
        Self {
            event: Some(event),
            data,
        }
    }
}
