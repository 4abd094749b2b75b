use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::OnceCell;
use tracing::{debug, error, info, instrument, warn};

use crate::auth::password::hash_password;
use crate::model::role::Role;
use crate::model::user::{NewUser, User, UserChange, UserUpdate};
use crate::prp::mapper::{MappedEmployee, MapperSettings, map_employee};
use crate::prp::photo::PhotoLimits;
use crate::prp::{EmployeeRecord, PrpClient, PrpDepartment, PrpEmployee, PrpError};
use crate::store::UserStore;
use crate::sync::SyncError;
use crate::sync::result::{AuditEntry, Outcome, SyncResult};

const MAX_USERNAME_ATTEMPTS: usize = 100;
const MAX_USERNAME_LEN: usize = 150;
// "_100"
const USERNAME_SUFFIX_ROOM: usize = 4;

#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Ignore the re-sync interval gate.
    pub force: bool,
    /// Plan and report without writing anything.
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub resync_interval: Duration,
    pub default_password: String,
    pub mapper: MapperSettings,
}

enum Planned {
    Change(UserChange, AuditEntry),
    Skip(AuditEntry),
}

#[derive(Default)]
struct BatchPlan {
    changes: Vec<UserChange>,
    pending: Vec<AuditEntry>,
    seen_employee_ids: HashSet<String>,
    reserved_usernames: HashSet<String>,
}

/// One-way PRP → local user synchronization.
pub struct SyncService {
    client: Arc<PrpClient>,
    store: Arc<dyn UserStore>,
    settings: SyncSettings,
    default_password_hash: OnceCell<String>,
    running: Arc<AtomicBool>,
}

/// Held for the length of one sync run. Dropping it without `release`
/// (the run's future was cancelled) still frees the flag and the store lock.
struct RunGuard {
    store: Arc<dyn UserStore>,
    running: Arc<AtomicBool>,
    /// Set once the store lock is held.
    locked: bool,
    armed: bool,
}

impl RunGuard {
    async fn release(mut self) {
        if self.locked {
            if let Err(e) = self.store.unlock_sync().await {
                warn!(error = %e, "Failed to release sync lock");
            }
        }
        self.armed = false;
        self.running.store(false, Ordering::Release);
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if !self.locked {
            self.running.store(false, Ordering::Release);
            return;
        }
        warn!("Sync run cancelled, releasing sync lock");
        let store = self.store.clone();
        let running = self.running.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.unlock_sync().await {
                        warn!(error = %e, "Failed to release sync lock");
                    }
                    running.store(false, Ordering::Release);
                });
            }
            Err(_) => running.store(false, Ordering::Release),
        }
    }
}

impl SyncService {
    pub fn new(client: Arc<PrpClient>, store: Arc<dyn UserStore>) -> Self {
        let config = client.config();
        let settings = SyncSettings {
            resync_interval: config.resync_interval,
            default_password: config.default_password.clone(),
            mapper: MapperSettings {
                phone_country_code: config.phone_country_code.clone(),
                photo: PhotoLimits {
                    max_dimension: config.photo_max_dimension,
                    max_bytes: config.photo_max_bytes,
                },
            },
        };

        Self {
            client,
            store,
            settings,
            default_password_hash: OnceCell::new(),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn client(&self) -> &PrpClient {
        &self.client
    }

    /// Sync every department the portal lists.
    #[instrument(name = "prp_sync_all", skip(self))]
    pub async fn sync_all(&self, options: SyncOptions) -> Result<SyncResult, SyncError> {
        let guard = self.acquire().await?;
        let outcome = self.run_all(options).await;
        guard.release().await;
        outcome
    }

    #[instrument(name = "prp_sync_department", skip(self))]
    pub async fn sync_department(
        &self,
        department_id: u64,
        options: SyncOptions,
    ) -> Result<SyncResult, SyncError> {
        let guard = self.acquire().await?;
        let outcome = self.run_department(department_id, options).await;
        guard.release().await;
        outcome
    }

    /// Sync a single employee, looking in `department_hint` only when given.
    #[instrument(name = "prp_sync_user", skip(self))]
    pub async fn sync_user(
        &self,
        employee_id: &str,
        department_hint: Option<u64>,
        options: SyncOptions,
    ) -> Result<SyncResult, SyncError> {
        let guard = self.acquire().await?;
        let outcome = self.run_user(employee_id, department_hint, options).await;
        guard.release().await;
        outcome
    }

    async fn run_all(&self, options: SyncOptions) -> Result<SyncResult, SyncError> {
        let departments = self.client.departments().await?;
        let mut result = SyncResult::new(options.dry_run);

        info!(departments = departments.len(), force = options.force, dry_run = options.dry_run, "Starting PRP sync");

        for department in departments.iter() {
            self.sync_fetched_department(department, options, &mut result)
                .await?;
        }

        info!(
            created = result.created,
            updated = result.updated,
            skipped = result.skipped,
            errors = result.errors,
            "PRP sync finished"
        );
        Ok(result)
    }

    async fn run_department(
        &self,
        department_id: u64,
        options: SyncOptions,
    ) -> Result<SyncResult, SyncError> {
        let department = self
            .client
            .department(department_id)
            .await?
            .ok_or_else(|| SyncError::NotFound(format!("department {department_id}")))?;

        let mut result = SyncResult::new(options.dry_run);
        self.sync_fetched_department(&department, options, &mut result)
            .await?;
        Ok(result)
    }

    async fn run_user(
        &self,
        employee_id: &str,
        department_hint: Option<u64>,
        options: SyncOptions,
    ) -> Result<SyncResult, SyncError> {
        let departments = self.client.departments().await?;
        let candidates: Vec<&PrpDepartment> = match department_hint {
            Some(id) => {
                let department = departments
                    .iter()
                    .find(|d| d.id == id)
                    .ok_or_else(|| SyncError::NotFound(format!("department {id}")))?;
                vec![department]
            }
            None => departments.iter().collect(),
        };

        let mut last_error: Option<PrpError> = None;
        for department in candidates {
            let employees = match self.client.employees(department.id).await {
                Ok(employees) => employees,
                Err(e) if e.is_fatal() || department_hint.is_some() => return Err(e.into()),
                Err(e) => {
                    warn!(department_id = department.id, error = %e, "Skipping department while searching for employee");
                    last_error = Some(e);
                    continue;
                }
            };

            let found = employees.iter().find(|record| match record {
                Ok(employee) => employee.user_id == employee_id,
                Err(rejected) => rejected.user_id == employee_id,
            });
            if let Some(employee) = found {
                let mut result = SyncResult::new(options.dry_run);
                result.departments = 1;
                self.sync_batch(department, std::slice::from_ref(employee), options, &mut result)
                    .await?;
                return Ok(result);
            }
        }

        match last_error {
            Some(e) => Err(e.into()),
            None => Err(SyncError::NotFound(format!("employee {employee_id}"))),
        }
    }

    /// Fetches one department's employees and syncs them. Fetch failures are
    /// recorded against the department unless they are fatal.
    async fn sync_fetched_department(
        &self,
        department: &PrpDepartment,
        options: SyncOptions,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        result.departments += 1;

        let employees = match self.client.employees(department.id).await {
            Ok(employees) => employees,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                error!(department_id = department.id, kind = %e.kind(), error = %e, "Failed to fetch department employees");
                result.record(AuditEntry::department_error(department.id, e.to_string()));
                return Ok(());
            }
        };

        self.sync_batch(department, &employees, options, result).await
    }

    /// Plans every employee of one department, then commits the planned
    /// changes in a single transaction. A change the store rejects becomes
    /// an error entry without undoing its siblings.
    async fn sync_batch(
        &self,
        department: &PrpDepartment,
        employees: &[EmployeeRecord],
        options: SyncOptions,
        result: &mut SyncResult,
    ) -> Result<(), SyncError> {
        let now = Utc::now();
        let mut plan = BatchPlan::default();

        for record in employees {
            let employee = match record {
                Ok(employee) => employee,
                Err(rejected) => {
                    warn!(
                        department_id = department.id,
                        employee_id = %rejected.user_id,
                        reason = %rejected.reason,
                        "Unreadable PRP employee row"
                    );
                    let e = PrpError::Validation(format!("unreadable employee row: {}", rejected.reason));
                    result.record(AuditEntry::new(
                        Outcome::Error,
                        rejected.user_id.as_str(),
                        rejected.name.as_str(),
                        Some(department.id),
                        e.to_string(),
                    ));
                    continue;
                }
            };

            match self
                .plan_employee(employee, department, now, options, &mut plan)
                .await
            {
                Ok(Planned::Change(change, entry)) => {
                    plan.changes.push(change);
                    plan.pending.push(entry);
                }
                Ok(Planned::Skip(entry)) => {
                    debug!(employee_id = ?entry.employee_id, detail = %entry.detail, "Skipped");
                    result.record(entry);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    error!(
                        department_id = department.id,
                        employee_id = %employee.user_id,
                        error = %e,
                        "Failed to sync employee"
                    );
                    result.record(AuditEntry::new(
                        Outcome::Error,
                        employee.user_id.as_str(),
                        employee.name_eng.as_str(),
                        Some(department.id),
                        e.to_string(),
                    ));
                }
            }
        }

        if plan.changes.is_empty() {
            return Ok(());
        }

        if options.dry_run {
            for entry in plan.pending {
                result.record(entry);
            }
            return Ok(());
        }

        match self.store.commit_batch(&plan.changes).await {
            Ok(outcomes) => {
                let rejected = outcomes.iter().filter(|o| o.is_err()).count();
                info!(
                    department_id = department.id,
                    changes = plan.changes.len(),
                    rejected,
                    "Department batch committed"
                );
                for (entry, outcome) in plan.pending.into_iter().zip(outcomes) {
                    match outcome {
                        Ok(()) => result.record(entry),
                        Err(e) => {
                            error!(
                                department_id = department.id,
                                employee_id = ?entry.employee_id,
                                error = %e,
                                "Store rejected user change"
                            );
                            result.record(entry.into_error(format!("not saved: {e}")));
                        }
                    }
                }
            }
            Err(e) => {
                error!(department_id = department.id, error = %e, "Department batch rolled back");
                for entry in plan.pending {
                    result.record(entry.into_error(format!("batch rolled back: {e}")));
                }
            }
        }
        Ok(())
    }

    async fn plan_employee(
        &self,
        employee: &PrpEmployee,
        department: &PrpDepartment,
        now: DateTime<Utc>,
        options: SyncOptions,
        plan: &mut BatchPlan,
    ) -> Result<Planned, SyncError> {
        let mapped = map_employee(employee, Some(&department.name_eng), &self.settings.mapper)?;

        if !plan.seen_employee_ids.insert(mapped.employee_id.clone()) {
            return Err(SyncError::Business(format!(
                "employee {} is listed twice in department {}",
                mapped.employee_id, department.id
            )));
        }

        match self.store.find_by_employee_id(&mapped.employee_id).await? {
            None => self.plan_create(mapped, department, now, plan).await,
            Some(existing) => Ok(self.plan_update(existing, mapped, department, now, options)),
        }
    }

    async fn plan_create(
        &self,
        mapped: MappedEmployee,
        department: &PrpDepartment,
        now: DateTime<Utc>,
        plan: &mut BatchPlan,
    ) -> Result<Planned, SyncError> {
        let username = self
            .generate_username(&mapped, &mut plan.reserved_usernames)
            .await?;
        let password = self.default_password_hash().await?;

        let entry = AuditEntry::new(
            Outcome::Created,
            mapped.employee_id.as_str(),
            display_name(&mapped.first_name, &mapped.last_name),
            Some(department.id),
            format!("created as {username}"),
        );

        let user = NewUser {
            username,
            password,
            role_id: Role::Employee as u8,
            employee_id: mapped.employee_id,
            first_name: mapped.first_name,
            last_name: mapped.last_name,
            email: mapped.email,
            designation: mapped.designation,
            office: mapped.office,
            phone: mapped.phone,
            photo: mapped.photo,
            is_active: mapped.status.is_active,
            is_active_employee: mapped.status.is_active_employee,
            prp_last_sync: now,
        };

        Ok(Planned::Change(UserChange::Create(user), entry))
    }

    fn plan_update(
        &self,
        existing: User,
        mapped: MappedEmployee,
        department: &PrpDepartment,
        now: DateTime<Utc>,
        options: SyncOptions,
    ) -> Planned {
        let name = display_name(&mapped.first_name, &mapped.last_name);
        let skip = |detail: String| {
            Planned::Skip(AuditEntry::new(
                Outcome::Skipped,
                mapped.employee_id.as_str(),
                name.as_str(),
                Some(department.id),
                detail,
            ))
        };

        if !options.force {
            if let Some(last_sync) = existing.prp_last_sync {
                let age = now.signed_duration_since(last_sync);
                if age.to_std().is_ok_and(|age| age < self.settings.resync_interval)
                    || age < chrono::Duration::zero()
                {
                    return skip(format!(
                        "synced {} minute(s) ago",
                        age.num_minutes().max(0)
                    ));
                }
            }
        }

        let update = UserUpdate {
            id: existing.id,
            first_name: mapped.first_name.clone(),
            last_name: mapped.last_name.clone(),
            email: mapped.email.clone(),
            designation: mapped.designation.clone(),
            office: mapped.office.clone(),
            phone: mapped.phone.clone(),
            // a photo that failed to convert this time keeps the old one
            photo: mapped.photo.clone().or_else(|| existing.photo.clone()),
            is_active: resolve_active(&existing, mapped.status.is_active_employee),
            is_active_employee: mapped.status.is_active_employee,
            prp_last_sync: now,
        };

        let changed = changed_fields(&existing, &update);
        if changed.is_empty() {
            return skip("unchanged".to_string());
        }

        if mapped.status.is_active && !update.is_active {
            info!(employee_id = %mapped.employee_id, "Admin deactivation preserved");
        }

        let entry = AuditEntry::new(
            Outcome::Updated,
            mapped.employee_id.as_str(),
            name.as_str(),
            Some(department.id),
            format!("updated {}", changed.join(", ")),
        );
        Planned::Change(UserChange::Update(update), entry)
    }

    async fn generate_username(
        &self,
        mapped: &MappedEmployee,
        reserved: &mut HashSet<String>,
    ) -> Result<String, SyncError> {
        let base = username_base(mapped.email.as_deref(), &mapped.employee_id);

        for n in 1..=MAX_USERNAME_ATTEMPTS {
            let candidate = if n == 1 {
                base.clone()
            } else {
                format!("{base}_{n}")
            };
            if reserved.contains(&candidate) {
                continue;
            }
            if !self.store.username_exists(&candidate).await? {
                reserved.insert(candidate.clone());
                return Ok(candidate);
            }
        }

        Err(SyncError::Business(format!(
            "no free username for employee {}",
            mapped.employee_id
        )))
    }

    /// The shared default password is hashed once per service.
    async fn default_password_hash(&self) -> Result<String, SyncError> {
        self.default_password_hash
            .get_or_try_init(|| async {
                hash_password(&self.settings.default_password)
                    .map_err(|e| SyncError::Config(format!("cannot hash default password: {e}")))
            })
            .await
            .cloned()
    }

    async fn acquire(&self) -> Result<RunGuard, SyncError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(SyncError::AlreadyRunning);
        }
        let mut guard = RunGuard {
            store: self.store.clone(),
            running: self.running.clone(),
            locked: false,
            armed: true,
        };

        if !self.store.try_lock_sync().await? {
            return Err(SyncError::AlreadyRunning);
        }
        guard.locked = true;
        Ok(guard)
    }
}

/// Admin override: portal "inactive" always deactivates, but an account
/// that is already inactive locally is never switched back on by sync.
fn resolve_active(existing: &User, prp_active: bool) -> bool {
    existing.is_active && prp_active
}

fn changed_fields(existing: &User, update: &UserUpdate) -> Vec<&'static str> {
    let mut changed = Vec::new();
    if existing.first_name != update.first_name {
        changed.push("first_name");
    }
    if existing.last_name != update.last_name {
        changed.push("last_name");
    }
    if existing.email != update.email {
        changed.push("email");
    }
    if existing.designation != update.designation {
        changed.push("designation");
    }
    if existing.office != update.office {
        changed.push("office");
    }
    if existing.phone != update.phone {
        changed.push("phone");
    }
    if existing.photo != update.photo {
        changed.push("photo");
    }
    if existing.is_active != update.is_active {
        changed.push("is_active");
    }
    if existing.is_active_employee != update.is_active_employee {
        changed.push("is_active_employee");
    }
    if !existing.is_prp_managed {
        changed.push("is_prp_managed");
    }
    changed
}

fn sanitize_username(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect()
}

/// Email local part, else `prp_<userId>`, cut short enough that any `_N`
/// suffix still fits the column.
fn username_base(email: Option<&str>, employee_id: &str) -> String {
    let base = email
        .and_then(|email| email.split('@').next())
        .map(sanitize_username)
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| format!("prp_{}", sanitize_username(employee_id)));

    base.chars()
        .take(MAX_USERNAME_LEN - USERNAME_SUFFIX_ROOM)
        .collect()
}

fn display_name(first: &str, last: &str) -> String {
    if last.is_empty() {
        first.to_string()
    } else {
        format!("{first} {last}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(is_active: bool, is_active_employee: bool) -> User {
        User {
            id: 1,
            username: "jane".into(),
            password: String::new(),
            role_id: Role::Employee as u8,
            employee_id: Some("110".into()),
            first_name: "Jane".into(),
            last_name: "Doe".into(),
            email: None,
            designation: None,
            office: None,
            phone: None,
            photo: None,
            is_active,
            is_active_employee,
            is_prp_managed: true,
            prp_last_sync: None,
        }
    }

    #[test]
    fn locally_inactive_account_stays_inactive() {
        assert!(!resolve_active(&user(false, true), true));
        assert!(!resolve_active(&user(false, false), true));
    }

    #[test]
    fn portal_inactive_always_deactivates() {
        assert!(!resolve_active(&user(true, true), false));
        assert!(!resolve_active(&user(false, true), false));
        assert!(resolve_active(&user(true, true), true));
    }

    #[test]
    fn username_base_leaves_room_for_suffix() {
        let long_id = "9".repeat(200);
        let base = username_base(None, &long_id);

        assert!(base.starts_with("prp_999"));
        assert_eq!(base.len(), MAX_USERNAME_LEN - USERNAME_SUFFIX_ROOM);
        assert!(format!("{base}_{MAX_USERNAME_ATTEMPTS}").len() <= MAX_USERNAME_LEN);

        let long_email = format!("{}@parliament.gov.bd", "a".repeat(300));
        assert_eq!(
            username_base(Some(&long_email), "1").len(),
            MAX_USERNAME_LEN - USERNAME_SUFFIX_ROOM
        );
        assert_eq!(username_base(Some("Jane.Doe@x.bd"), "1"), "jane.doe");
        assert_eq!(username_base(Some("@x.bd"), "42"), "prp_42");
    }

    #[test]
    fn usernames_are_sanitized() {
        assert_eq!(sanitize_username(" Jane.Doe+HR "), "jane.doehr");
        assert_eq!(sanitize_username("১২৩"), "");
    }
}
