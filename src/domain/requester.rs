//! The authenticated caller of an operation.

use serde::{Deserialize, Serialize};

use super::task::{OwnerId, Task};

/// Account type carried in the bearer credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    /// Regular account, scoped to its own tasks.
    #[default]
    User,
    /// Administrative account, exempt from owner scoping.
    Admin,
}

/// An authenticated requester.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    /// Identifier of the requesting user.
    pub user_id: OwnerId,
    /// Email address from the credential, if present.
    pub email: Option<String>,
    /// Account type.
    pub account_type: AccountType,
}

impl Requester {
    /// Creates a regular (non-privileged) requester.
    #[must_use]
    pub const fn user(user_id: OwnerId) -> Self {
        Self {
            user_id,
            email: None,
            account_type: AccountType::User,
        }
    }

    /// Creates a privileged requester.
    #[must_use]
    pub const fn admin(user_id: OwnerId) -> Self {
        Self {
            user_id,
            email: None,
            account_type: AccountType::Admin,
        }
    }

    /// Returns `true` if the requester bypasses owner scoping.
    #[must_use]
    pub const fn is_privileged(&self) -> bool {
        matches!(self.account_type, AccountType::Admin)
    }

    /// Returns `true` if the requester may read or write records of `owner_id`.
    #[must_use]
    pub fn can_access(&self, owner_id: &OwnerId) -> bool {
        self.is_privileged() || &self.user_id == owner_id
    }

    /// Returns `true` if the requester may read or write `task`.
    #[must_use]
    pub fn can_access_task(&self, task: &Task) -> bool {
        self.can_access(&task.owner_id)
    }

    /// Returns the owner constraint for listing and searching.
    ///
    /// `None` means unscoped (privileged requester).
    #[must_use]
    pub const fn owner_scope(&self) -> Option<OwnerId> {
        if self.is_privileged() {
            None
        } else {
            Some(self.user_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_user_is_scoped_to_own_records() {
        let owner = OwnerId::generate();
        let requester = Requester::user(owner);

        assert!(requester.can_access(&owner));
        assert!(!requester.can_access(&OwnerId::generate()));
        assert_eq!(requester.owner_scope(), Some(owner));
    }

    #[rstest]
    fn test_admin_spans_all_owners() {
        let requester = Requester::admin(OwnerId::generate());

        assert!(requester.is_privileged());
        assert!(requester.can_access(&OwnerId::generate()));
        assert_eq!(requester.owner_scope(), None);
    }

    #[rstest]
    #[case("\"admin\"", AccountType::Admin)]
    #[case("\"user\"", AccountType::User)]
    fn test_account_type_deserializes(#[case] raw: &str, #[case] expected: AccountType) {
        let parsed: AccountType = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed, expected);
    }
}
