use thiserror::Error;

use crate::prp::PrpError;
use crate::store::StoreError;

pub mod result;
pub mod service;

pub use result::{AuditEntry, Outcome, SyncResult};
pub use service::{SyncOptions, SyncService};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Prp(#[from] PrpError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sync configuration error: {0}")]
    Config(String),

    #[error("{0} not found in PRP")]
    NotFound(String),

    #[error("a PRP sync is already running")]
    AlreadyRunning,

    /// A record breaks a sync rule, e.g. it is listed twice.
    #[error("sync rule violated: {0}")]
    Business(String),
}

impl SyncError {
    /// Fatal errors abort the whole run instead of being recorded per record.
    pub fn is_fatal(&self) -> bool {
        match self {
            SyncError::Config(_) => true,
            SyncError::Prp(e) => e.is_fatal(),
            _ => false,
        }
    }
}
