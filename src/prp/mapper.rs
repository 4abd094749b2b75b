//! Pure transformation from portal employee records to local user fields.

use crate::prp::error::{PrpError, PrpResult};
use crate::prp::phone::normalize_phone;
use crate::prp::photo::{PhotoLimits, process_photo};
use crate::prp::types::PrpEmployee;

/// Values the portal uses for an active employee.
const ACTIVE_STATUSES: [&str; 4] = ["active", "1", "true", "yes"];

#[derive(Debug, Clone)]
pub struct MapperSettings {
    pub phone_country_code: String,
    pub photo: PhotoLimits,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusFlags {
    /// Login switch; subject to the admin override during sync.
    pub is_active: bool,
    /// Employment status exactly as the portal reports it.
    pub is_active_employee: bool,
}

/// Local user attributes derived from one portal employee.
#[derive(Debug, Clone, PartialEq)]
pub struct MappedEmployee {
    pub employee_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub designation: Option<String>,
    pub office: Option<String>,
    pub phone: Option<String>,
    pub photo: Option<Vec<u8>>,
    pub status: StatusFlags,
}

/// Splits at the first whitespace boundary.
pub fn split_name(full_name: &str) -> (String, String) {
    let trimmed = full_name.trim();
    match trimmed.split_once(char::is_whitespace) {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (trimmed.to_string(), String::new()),
    }
}

pub fn status_flags(status: Option<&str>) -> StatusFlags {
    let active = status
        .map(|s| s.trim().to_ascii_lowercase())
        .is_some_and(|s| ACTIVE_STATUSES.contains(&s.as_str()));

    StatusFlags {
        is_active: active,
        is_active_employee: active,
    }
}

pub fn map_employee(
    employee: &PrpEmployee,
    office: Option<&str>,
    settings: &MapperSettings,
) -> PrpResult<MappedEmployee> {
    let employee_id = employee.user_id.trim();
    if employee_id.is_empty() {
        return Err(PrpError::Validation("employee record has no userId".to_string()));
    }
    if employee.name_eng.trim().is_empty() {
        return Err(PrpError::Validation(format!(
            "employee {employee_id} has no nameEng"
        )));
    }

    let (first_name, last_name) = split_name(&employee.name_eng);

    Ok(MappedEmployee {
        employee_id: employee_id.to_string(),
        first_name,
        last_name,
        email: non_empty(employee.email.as_deref()).map(str::to_lowercase),
        designation: non_empty(employee.designation_eng.as_deref()).map(str::to_string),
        office: non_empty(office).map(str::to_string),
        phone: employee
            .mobile
            .as_deref()
            .and_then(|m| normalize_phone(m, &settings.phone_country_code)),
        photo: employee
            .photo
            .as_deref()
            .filter(|p| !p.trim().is_empty())
            .and_then(|p| process_photo(p, settings.photo)),
        status: status_flags(employee.status.as_deref()),
    })
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
