use async_trait::async_trait;
use thiserror::Error;

use crate::model::user::{User, UserChange};

pub mod memory;
pub mod mysql;

pub use memory::MemoryUserStore;
pub use mysql::MySqlUserStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Local user persistence as seen by PRP sync and the admin surface.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_employee_id(&self, employee_id: &str) -> StoreResult<Option<User>>;

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>>;

    async fn username_exists(&self, username: &str) -> StoreResult<bool>;

    /// Writes one department batch. Each change succeeds or fails on its
    /// own and the returned results line up with `changes`. The outer error
    /// means the batch as a whole could not be written.
    async fn commit_batch(&self, changes: &[UserChange]) -> StoreResult<Vec<StoreResult<()>>>;

    /// Non-blocking advisory lock guarding sync runs. Returns `false` when
    /// another holder already has it.
    async fn try_lock_sync(&self) -> StoreResult<bool>;

    async fn unlock_sync(&self) -> StoreResult<()>;
}
