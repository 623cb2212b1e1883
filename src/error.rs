use crate::providers::ProviderError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    ConfigValidation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid model spec {spec:?}: expected provider:model")]
    ModelSpec { spec: String },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("provider review: {0}")]
    Provider(#[from] ProviderError),

    #[error("invalid JSON array: {0}")]
    Parse(String),

    #[error("repair pass failed: {error} (original error: {original})")]
    Repair { error: String, original: String },

    #[error("response validation failed after repair: {0}")]
    RepairValidation(String),

    #[error("rules file: {0}")]
    Rules(String),

    #[error("cache: {0}")]
    Cache(String),

    #[error("chunk {index}: {source}")]
    Chunk { index: usize, source: Box<Error> },

    #[error("{label}: {source}")]
    Compare { label: String, source: Box<Error> },

    #[error("review task failed: {0}")]
    Task(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True when the underlying failure is an authentication error from a
    /// provider. Callers use this to pick the auth/config exit path instead
    /// of the generic runtime one.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Provider(p) => p.is_auth(),
            Error::Chunk { source, .. } => source.is_auth(),
            Error::Compare { source, .. } => source.is_auth(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
