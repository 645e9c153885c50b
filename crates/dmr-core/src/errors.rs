/// Core error type for the relay bridge.
///
/// The platform adapter maps its HTTP/gateway failures into this type so the
/// core can handle failures consistently (user-facing message vs fault).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
