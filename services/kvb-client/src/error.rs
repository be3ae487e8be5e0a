#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Connection timeout")]
    ConnectTimeout,
    #[error("Request timeout")]
    RequestTimeout,
    #[error("WebSocket disconnected")]
    Disconnected,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("server error: {0}")]
    Server(String),
}
