use thiserror::Error;

/// The four error kinds the control/data plane can produce.
///
/// Kept distinct from `anyhow::Error` so session-handling code can match on
/// kind (e.g. "close the session" vs "log and keep reading") without string
/// sniffing. The binary entry point still collapses everything into
/// `anyhow::Result` at the top, same as the teacher crate does.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("malformed RTSP request: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("H.264 framer error: {0}")]
    Framer(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;
