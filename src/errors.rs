use thiserror::Error;

/// All failure modes the engine can produce, from manifest rejection down to
/// per-tile fetch/decode failures and configuration misuse.
#[derive(Debug, Error)]
pub enum TileEngineError {
    #[error("unsupported asset: {0}")]
    UnsupportedAsset(String),

    #[error("malformed manifest: {0}")]
    Manifest(String),

    #[error("tile fetch failed: {0}")]
    Fetch(String),

    #[error("tile content decode failed: {0}")]
    Decode(String),

    #[error("cache could not meet configured screen-space error budget: {0}")]
    Budget(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Attaches a human-readable location to an arbitrary fallible result at the
/// point it crosses into a [`TileEngineError`].
pub trait TileContext<T> {
    fn fetch_context(self, msg: &str) -> Result<T, TileEngineError>;
    fn decode_context(self, msg: &str) -> Result<T, TileEngineError>;
    fn manifest_context(self, msg: &str) -> Result<T, TileEngineError>;
}

impl<T, E> TileContext<T> for Result<T, E>
where
    E: std::fmt::Display,
{
    fn fetch_context(self, msg: &str) -> Result<T, TileEngineError> {
        self.map_err(|e| TileEngineError::Fetch(format!("{msg}: {e}")))
    }

    fn decode_context(self, msg: &str) -> Result<T, TileEngineError> {
        self.map_err(|e| TileEngineError::Decode(format!("{msg}: {e}")))
    }

    fn manifest_context(self, msg: &str) -> Result<T, TileEngineError> {
        self.map_err(|e| TileEngineError::Manifest(format!("{msg}: {e}")))
    }
}

pub type Result<T> = std::result::Result<T, TileEngineError>;
