use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::user::{User, UserChange};
use crate::store::{StoreError, StoreResult, UserStore};

#[derive(Default)]
struct State {
    users: Vec<User>,
    next_id: u64,
    sync_locked: bool,
}

/// Process-local user store for tests and offline runs.
#[derive(Default)]
pub struct MemoryUserStore {
    state: Mutex<State>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `user` as-is apart from the id, which is assigned here.
    pub async fn insert(&self, mut user: User) -> User {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        user.id = state.next_id;
        state.users.push(user.clone());
        user
    }

    pub async fn users(&self) -> Vec<User> {
        self.state.lock().await.users.clone()
    }

    pub async fn get(&self, id: u64) -> Option<User> {
        let state = self.state.lock().await;
        state.users.iter().find(|u| u.id == id).cloned()
    }

    pub async fn set_active(&self, id: u64, active: bool) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("user {id}")))?;
        user.is_active = active;
        Ok(())
    }
}

fn validate(state: &State, change: &UserChange) -> StoreResult<()> {
    match change {
        UserChange::Create(new) => {
            if state
                .users
                .iter()
                .any(|u| u.username.eq_ignore_ascii_case(&new.username))
            {
                return Err(StoreError::Conflict(format!(
                    "username {} already exists",
                    new.username
                )));
            }
            if state
                .users
                .iter()
                .any(|u| u.employee_id.as_deref() == Some(new.employee_id.as_str()))
            {
                return Err(StoreError::Conflict(format!(
                    "employee {} already linked",
                    new.employee_id
                )));
            }
        }
        UserChange::Update(update) => {
            if !state.users.iter().any(|u| u.id == update.id) {
                return Err(StoreError::NotFound(format!("user {}", update.id)));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_employee_id(&self, employee_id: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.employee_id.as_deref() == Some(employee_id))
            .cloned())
    }

    async fn find_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .iter()
            .find(|u| u.username.eq_ignore_ascii_case(username))
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> StoreResult<bool> {
        Ok(self.find_by_username(username).await?.is_some())
    }

    async fn commit_batch(&self, changes: &[UserChange]) -> StoreResult<Vec<StoreResult<()>>> {
        let mut state = self.state.lock().await;
        let mut results = Vec::with_capacity(changes.len());

        for change in changes {
            if let Err(e) = validate(&state, change) {
                results.push(Err(e));
                continue;
            }
            match change {
                UserChange::Create(new) => {
                    state.next_id += 1;
                    let user = User {
                        id: state.next_id,
                        username: new.username.clone(),
                        password: new.password.clone(),
                        role_id: new.role_id,
                        employee_id: Some(new.employee_id.clone()),
                        first_name: new.first_name.clone(),
                        last_name: new.last_name.clone(),
                        email: new.email.clone(),
                        designation: new.designation.clone(),
                        office: new.office.clone(),
                        phone: new.phone.clone(),
                        photo: new.photo.clone(),
                        is_active: new.is_active,
                        is_active_employee: new.is_active_employee,
                        is_prp_managed: true,
                        prp_last_sync: Some(new.prp_last_sync),
                    };
                    state.users.push(user);
                }
                UserChange::Update(update) => {
                    if let Some(user) = state.users.iter_mut().find(|u| u.id == update.id) {
                        update.apply_to(user);
                    }
                }
            }
            results.push(Ok(()));
        }
        Ok(results)
    }

    async fn try_lock_sync(&self) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        if state.sync_locked {
            return Ok(false);
        }
        state.sync_locked = true;
        Ok(true)
    }

    async fn unlock_sync(&self) -> StoreResult<()> {
        self.state.lock().await.sync_locked = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::user::NewUser;
    use chrono::Utc;

    fn new_user(username: &str, employee_id: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            password: "hash".to_string(),
            role_id: 3,
            employee_id: employee_id.to_string(),
            first_name: "A".to_string(),
            last_name: String::new(),
            email: None,
            designation: None,
            office: None,
            phone: None,
            photo: None,
            is_active: true,
            is_active_employee: true,
            prp_last_sync: Utc::now(),
        }
    }

    #[tokio::test]
    async fn rejected_change_leaves_the_rest_of_the_batch() {
        let store = MemoryUserStore::new();
        let changes = vec![
            UserChange::Create(new_user("a", "1")),
            UserChange::Create(new_user("A", "2")),
            UserChange::Create(new_user("b", "1")),
            UserChange::Create(new_user("c", "3")),
        ];

        let results = store.commit_batch(&changes).await.unwrap();

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(StoreError::Conflict(_))));
        assert!(matches!(results[2], Err(StoreError::Conflict(_))));
        assert!(results[3].is_ok());
        let mut usernames: Vec<String> =
            store.users().await.into_iter().map(|u| u.username).collect();
        usernames.sort();
        assert_eq!(usernames, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn sync_lock_is_exclusive() {
        let store = MemoryUserStore::new();
        assert!(store.try_lock_sync().await.unwrap());
        assert!(!store.try_lock_sync().await.unwrap());
        store.unlock_sync().await.unwrap();
        assert!(store.try_lock_sync().await.unwrap());
    }
}
