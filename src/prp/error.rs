use thiserror::Error;

/// Coarse classification callers use to decide between retrying, recording a
/// per-record failure, or aborting the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Connection,
    Authentication,
    Validation,
    Config,
}

#[derive(Debug, Error)]
pub enum PrpError {
    /// Network failure, timeout, or a server error that outlived the retries.
    #[error("PRP connection error: {0}")]
    Connection(String),

    #[error("PRP authentication error: {0}")]
    Authentication(String),

    /// Malformed JSON, an unexpected envelope, or a missing required field.
    #[error("PRP data validation error: {0}")]
    Validation(String),

    #[error("PRP configuration error: {0}")]
    Config(String),
}

impl PrpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrpError::Connection(_) => ErrorKind::Connection,
            PrpError::Authentication(_) => ErrorKind::Authentication,
            PrpError::Validation(_) => ErrorKind::Validation,
            PrpError::Config(_) => ErrorKind::Config,
        }
    }

    /// Configuration problems make every further call pointless.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Config
    }
}

impl From<reqwest::Error> for PrpError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            PrpError::Config(e.to_string())
        } else if e.is_decode() {
            PrpError::Validation(e.to_string())
        } else {
            PrpError::Connection(e.to_string())
        }
    }
}

pub type PrpResult<T> = Result<T, PrpError>;
