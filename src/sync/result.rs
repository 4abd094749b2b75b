use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum_macros::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Created,
    Updated,
    Skipped,
    Error,
}

/// What happened to one portal record (or to a whole department when the
/// department itself could not be fetched).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub employee_id: Option<String>,
    pub name: Option<String>,
    pub department_id: Option<u64>,
    pub outcome: Outcome,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(
        outcome: Outcome,
        employee_id: impl Into<String>,
        name: impl Into<String>,
        department_id: Option<u64>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            employee_id: Some(employee_id.into()).filter(|id: &String| !id.is_empty()),
            name: Some(name.into()).filter(|n: &String| !n.is_empty()),
            department_id,
            outcome,
            detail: detail.into(),
        }
    }

    pub fn department_error(department_id: u64, detail: impl Into<String>) -> Self {
        Self {
            employee_id: None,
            name: None,
            department_id: Some(department_id),
            outcome: Outcome::Error,
            detail: detail.into(),
        }
    }

    /// Turns a planned create/update into an error once its batch failed.
    pub fn into_error(self, detail: impl Into<String>) -> Self {
        Self {
            outcome: Outcome::Error,
            detail: detail.into(),
            ..self
        }
    }

    fn label(&self) -> String {
        match (&self.employee_id, self.department_id) {
            (Some(id), _) => format!("employee {id}"),
            (None, Some(dept)) => format!("department {dept}"),
            (None, None) => "record".to_string(),
        }
    }
}

/// Counters plus the audit trail of one sync invocation. Never persisted.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub departments: usize,
    pub dry_run: bool,
    pub entries: Vec<AuditEntry>,
}

impl SyncResult {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn record(&mut self, entry: AuditEntry) {
        match entry.outcome {
            Outcome::Created => self.created += 1,
            Outcome::Updated => self.updated += 1,
            Outcome::Skipped => self.skipped += 1,
            Outcome::Error => self.errors += 1,
        }
        self.entries.push(entry);
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped + self.errors
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn entries_with(&self, outcome: Outcome) -> impl Iterator<Item = &AuditEntry> {
        self.entries.iter().filter(move |e| e.outcome == outcome)
    }

    pub fn first_errors(&self, n: usize) -> Vec<String> {
        self.entries_with(Outcome::Error)
            .take(n)
            .map(|e| format!("{}: {}", e.label(), e.detail))
            .collect()
    }

    pub fn summary(&self) -> String {
        let prefix = if self.dry_run { "[dry run] " } else { "" };
        format!(
            "{prefix}PRP sync finished: {} created, {} updated, {} skipped, {} errors across {} department(s)",
            self.created, self.updated, self.skipped, self.errors, self.departments
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_outcomes() {
        let mut result = SyncResult::new(false);
        result.record(AuditEntry::new(Outcome::Created, "1", "A", Some(1), "created"));
        result.record(AuditEntry::new(Outcome::Skipped, "2", "B", Some(1), "unchanged"));
        result.record(AuditEntry::new(Outcome::Error, "", "", Some(1), "no userId"));
        result.record(AuditEntry::department_error(4, "timeout"));
        result.departments = 2;

        assert_eq!((result.created, result.updated, result.skipped, result.errors), (1, 0, 1, 2));
        assert_eq!(result.total(), 4);
        assert_eq!(
            result.summary(),
            "PRP sync finished: 1 created, 0 updated, 1 skipped, 2 errors across 2 department(s)"
        );
        assert_eq!(
            result.first_errors(5),
            vec!["department 1: no userId".to_string(), "department 4: timeout".to_string()]
        );
        assert_eq!(result.first_errors(1).len(), 1);
    }

    #[test]
    fn failed_batch_entries_become_errors() {
        let entry = AuditEntry::new(Outcome::Created, "7", "C", None, "created").into_error("rolled back");
        assert_eq!(entry.outcome, Outcome::Error);
        assert_eq!(entry.employee_id.as_deref(), Some("7"));
        assert_eq!(entry.detail, "rolled back");
    }
}
