#[derive(Debug, Copy, Clone, Eq, PartialEq, strum_macros::Display)]
pub enum Role {
    Admin = 1,
    Hr = 2,
    Employee = 3,
    System = 4,
    ApiUser = 5,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Admin),
            2 => Some(Role::Hr),
            3 => Some(Role::Employee),
            4 => Some(Role::System),
            5 => Some(Role::ApiUser),
            _ => None,
        }
    }

    /// Roles allowed to trigger PRP sync.
    pub fn can_sync(self) -> bool {
        matches!(self, Role::Admin | Role::System)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_round_trip_through_from_id() {
        for role in [Role::Admin, Role::Hr, Role::Employee, Role::System, Role::ApiUser] {
            assert_eq!(Role::from_id(role as u8), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(6), None);
    }

    #[test]
    fn only_admin_and_system_may_sync() {
        assert!(Role::Admin.can_sync());
        assert!(Role::System.can_sync());
        assert!(!Role::Hr.can_sync());
        assert!(!Role::Employee.can_sync());
        assert!(!Role::ApiUser.can_sync());
    }
}
