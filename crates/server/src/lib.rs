//! HTTP server assembly: router construction, bind, and serve.

use std::net::SocketAddr;

use axum::{Router, response::Html, routing::get};
use config::SharedConfig;
use tokio::net::TcpListener;

mod error;

pub use error::{Error, Result};

pub struct ServeConfig {
    /// Address the server binds to.
    pub listen_address: SocketAddr,
    /// Shared configuration snapshot handle.
    pub config: SharedConfig,
}

/// Binds the listener and serves the proxy until the process ends.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
    }: ServeConfig,
) -> Result<()> {
    let app = Router::new().route("/", get(index)).merge(llm::router(config));

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(Error::Bind)?;

    log::info!("Toolify listening on http://{listen_address}");
    log::info!("OpenAI endpoint:    POST /v1/chat/completions");
    log::info!("Anthropic endpoint: POST /v1/messages");
    log::info!("Gemini endpoint:    POST /v1beta/models/{{model}}:generateContent");

    axum::serve(listener, app).await.map_err(Error::Server)?;

    Ok(())
}

async fn index() -> Html<&'static str> {
    Html(concat!(
        "<h1>Toolify</h1>",
        "<p>Protocol-bridging reverse proxy for LLM APIs. ",
        "POST to /v1/chat/completions, /v1/messages, ",
        "or /v1beta/models/{model}:generateContent.</p>"
    ))
}
