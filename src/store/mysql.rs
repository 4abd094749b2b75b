use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlConnection};
use sqlx::{Acquire, MySqlPool};
use sqlx::pool::PoolConnection;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::model::user::{User, UserChange};
use crate::store::{StoreError, StoreResult, UserStore};

const SYNC_LOCK_NAME: &str = "pims_prp_sync";

const USER_COLUMNS: &str = r#"
    id, username, password, role_id, employee_id, first_name, last_name,
    email, designation, office, phone, photo, is_active, is_active_employee,
    is_prp_managed, prp_last_sync
"#;

pub struct MySqlUserStore {
    pool: MySqlPool,
    /// `GET_LOCK` is scoped to a session, so the connection that took it is
    /// parked here until release.
    lock_conn: Mutex<Option<PoolConnection<MySql>>>,
}

impl MySqlUserStore {
    pub fn new(pool: MySqlPool) -> Self {
        Self {
            pool,
            lock_conn: Mutex::new(None),
        }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }

    async fn fetch_one_where(&self, column: &str, value: &str) -> StoreResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ? LIMIT 1");
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!(error = %e, column, "Failed to fetch user");
                StoreError::from(e)
            })?;
        Ok(user)
    }
}

#[async_trait]
impl UserStore for MySqlUserStore {
    async fn find_by_employee_id(&self, employee_id: &str) -> StoreResult<Option<User>> {
        self.fetch_one_where("employee_id", employee_id).await
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        self.fetch_one_where("username", username).await
    }

    async fn username_exists(&self, username: &str) -> StoreResult<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ? LIMIT 1)",
        )
        .bind(username)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn commit_batch(&self, changes: &[UserChange]) -> StoreResult<Vec<StoreResult<()>>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let mut results = Vec::with_capacity(changes.len());

        for change in changes {
            // nested begin is a SAVEPOINT, so one bad row only undoes itself
            let mut savepoint = tx.begin().await?;
            match write_change(&mut savepoint, change).await {
                Ok(()) => {
                    savepoint.commit().await?;
                    results.push(Ok(()));
                }
                Err(e) => {
                    savepoint.rollback().await?;
                    warn!(error = %e, "User change rejected by database");
                    results.push(Err(classify(e)));
                }
            }
        }

        tx.commit().await?;
        debug!(changes = changes.len(), "Committed user batch");
        Ok(results)
    }

    async fn try_lock_sync(&self) -> StoreResult<bool> {
        let mut guard = self.lock_conn.lock().await;
        if guard.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: Option<i64> = sqlx::query_scalar("SELECT GET_LOCK(?, 0)")
            .bind(SYNC_LOCK_NAME)
            .fetch_one(&mut *conn)
            .await?;

        if acquired == Some(1) {
            *guard = Some(conn);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn unlock_sync(&self) -> StoreResult<()> {
        if let Some(mut conn) = self.lock_conn.lock().await.take() {
            sqlx::query("SELECT RELEASE_LOCK(?)")
                .bind(SYNC_LOCK_NAME)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

async fn write_change(conn: &mut MySqlConnection, change: &UserChange) -> Result<(), sqlx::Error> {
    match change {
        UserChange::Create(new) => {
            sqlx::query(
                r#"
                INSERT INTO users
                    (username, password, role_id, employee_id, first_name, last_name,
                     email, designation, office, phone, photo, is_active,
                     is_active_employee, is_prp_managed, prp_last_sync)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, TRUE, ?)
                "#,
            )
            .bind(&new.username)
            .bind(&new.password)
            .bind(new.role_id)
            .bind(&new.employee_id)
            .bind(&new.first_name)
            .bind(&new.last_name)
            .bind(&new.email)
            .bind(&new.designation)
            .bind(&new.office)
            .bind(&new.phone)
            .bind(&new.photo)
            .bind(new.is_active)
            .bind(new.is_active_employee)
            .bind(new.prp_last_sync)
            .execute(&mut *conn)
            .await?;
        }
        UserChange::Update(update) => {
            let done = sqlx::query(
                r#"
                UPDATE users
                SET first_name = ?, last_name = ?, email = ?, designation = ?,
                    office = ?, phone = ?, photo = ?, is_active = ?,
                    is_active_employee = ?, is_prp_managed = TRUE, prp_last_sync = ?
                WHERE id = ?
                "#,
            )
            .bind(&update.first_name)
            .bind(&update.last_name)
            .bind(&update.email)
            .bind(&update.designation)
            .bind(&update.office)
            .bind(&update.phone)
            .bind(&update.photo)
            .bind(update.is_active)
            .bind(update.is_active_employee)
            .bind(update.prp_last_sync)
            .bind(update.id)
            .execute(&mut *conn)
            .await?;
            if done.rows_affected() == 0 {
                return Err(sqlx::Error::RowNotFound);
            }
        }
    }
    Ok(())
}

fn classify(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        // duplicate key
        if db_err.code().as_deref() == Some("23000") {
            return StoreError::Conflict(db_err.message().to_string());
        }
    }
    if matches!(e, sqlx::Error::RowNotFound) {
        return StoreError::NotFound("user row".to_string());
    }
    StoreError::from(e)
}
