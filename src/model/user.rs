use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: u64,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub role_id: u8,
    /// Portal `userId` for accounts created or adopted by PRP sync.
    pub employee_id: Option<String>,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub designation: Option<String>,
    pub office: Option<String>,
    pub phone: Option<String>,
    #[serde(skip_serializing)]
    pub photo: Option<Vec<u8>>,
    pub is_active: bool,
    pub is_active_employee: bool,
    pub is_prp_managed: bool,
    pub prp_last_sync: Option<DateTime<Utc>>,
}

/// A user about to be inserted by sync.
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    /// Argon2 hash.
    pub password: String,
    pub role_id: u8,
    pub employee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub designation: Option<String>,
    pub office: Option<String>,
    pub phone: Option<String>,
    pub photo: Option<Vec<u8>>,
    pub is_active: bool,
    pub is_active_employee: bool,
    pub prp_last_sync: DateTime<Utc>,
}

/// Portal-owned columns written on every update. Sync always writes the full
/// set so the SQL stays static.
#[derive(Debug, Clone, PartialEq)]
pub struct UserUpdate {
    pub id: u64,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub designation: Option<String>,
    pub office: Option<String>,
    pub phone: Option<String>,
    pub photo: Option<Vec<u8>>,
    pub is_active: bool,
    pub is_active_employee: bool,
    pub prp_last_sync: DateTime<Utc>,
}

impl UserUpdate {
    pub fn apply_to(&self, user: &mut User) {
        user.first_name = self.first_name.clone();
        user.last_name = self.last_name.clone();
        user.email = self.email.clone();
        user.designation = self.designation.clone();
        user.office = self.office.clone();
        user.phone = self.phone.clone();
        user.photo = self.photo.clone();
        user.is_active = self.is_active;
        user.is_active_employee = self.is_active_employee;
        user.is_prp_managed = true;
        user.prp_last_sync = Some(self.prp_last_sync);
    }
}

/// One write in a department batch.
#[derive(Debug, Clone, PartialEq)]
pub enum UserChange {
    Create(NewUser),
    Update(UserUpdate),
}
