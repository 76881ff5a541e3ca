use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Could not bind to the configured listen address.
    #[error("failed to bind the listen address: {0}")]
    Bind(std::io::Error),

    /// The HTTP server terminated with an error.
    #[error("server error: {0}")]
    Server(std::io::Error),
}
