//! Project/user directory lookups. The web app's project/user database is
//! explicitly out of scope; this module only defines the seam
//! `RealTimeManager::bootstrap` calls through, `ProjectAccess`, plus an
//! in-memory stand-in mirroring `updater::StubDocumentUpdater`.
//!
//! Grounded the same way as `updater`: a thin `async_trait` boundary in
//! front of state this crate doesn't own.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::client::capability::{
    CAN_EDIT_CONTENT, CAN_SEE_ALL_EDITOR_EVENTS, CAN_SEE_NON_RESTRICTED_EVENTS, CAN_SEE_OTHER_CLIENTS,
};
use crate::client::Capability;
use crate::realtime::claims::BootstrapClaims;
use crate::RtError;

/// Privilege level resolved from the claims' `accessSource`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PrivilegeLevel {
    Owner,
    ReadAndWrite,
    ReadOnly,
}

impl PrivilegeLevel {
    fn can_edit(self) -> bool {
        !matches!(self, PrivilegeLevel::ReadOnly)
    }
}

/// Resolves capabilities from `privilegeLevel` and `isRestrictedUser`. Pure
/// function, colocated with `PrivilegeLevel` rather than `client::capability`
/// because it's a project-access policy decision, not part of the
/// capability algebra itself.
pub fn resolve_capabilities(privilege_level: PrivilegeLevel, is_restricted_user: bool) -> Capability {
    let mut primes = vec![CAN_SEE_OTHER_CLIENTS, CAN_SEE_NON_RESTRICTED_EVENTS];
    if privilege_level.can_edit() {
        primes.push(CAN_EDIT_CONTENT);
    }
    if !is_restricted_user {
        primes.push(CAN_SEE_ALL_EDITOR_EVENTS);
    }
    Capability::from_primes(&primes)
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectDetails {
    pub id: Uuid,
    pub name: String,
    pub owner_id: Uuid,
    pub privilege_level: PrivilegeLevel,
    pub is_restricted_user: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPublicInfo {
    pub id: Uuid,
    pub display_name: String,
}

#[async_trait]
pub trait ProjectAccess: Send + Sync {
    /// Project metadata plus the access decision for this user, loaded
    /// using the claims' `{projectId, userId, epoch, epochUser,
    /// accessSource}`.
    async fn get_project_details(&self, claims: &BootstrapClaims) -> Result<ProjectDetails, RtError>;

    /// The bootstrapping user's public display info.
    async fn get_user_public_info(&self, claims: &BootstrapClaims) -> Result<UserPublicInfo, RtError>;
}

pub use stub::StubProjectAccess;

/// In-memory stand-in for the out-of-scope project/user directory. Seeded
/// explicitly by callers (tests, or `bin/server.rs` absent a real
/// collaborator) rather than defaulting to any particular access level;
/// an unseeded project is a `NotAuthorized` error, not a silent default.
mod stub {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct StubProjectAccess {
        projects: Mutex<HashMap<Uuid, ProjectDetails>>,
        users: Mutex<HashMap<Uuid, UserPublicInfo>>,
    }

    impl StubProjectAccess {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed_project(&self, details: ProjectDetails) {
            self.projects.lock().unwrap().insert(details.id, details);
        }

        pub fn seed_user(&self, info: UserPublicInfo) {
            self.users.lock().unwrap().insert(info.id, info);
        }
    }

    #[async_trait]
    impl ProjectAccess for StubProjectAccess {
        async fn get_project_details(&self, claims: &BootstrapClaims) -> Result<ProjectDetails, RtError> {
            self.projects
                .lock()
                .unwrap()
                .get(&claims.project_id)
                .cloned()
                .ok_or(RtError::NotAuthorized)
        }

        async fn get_user_public_info(&self, claims: &BootstrapClaims) -> Result<UserPublicInfo, RtError> {
            self.users
                .lock()
                .unwrap()
                .get(&claims.user_id)
                .cloned()
                .ok_or_else(|| RtError::InvalidState(format!("unknown user {}", claims.user_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_gets_edit_and_all_events() {
        let cap = resolve_capabilities(PrivilegeLevel::Owner, false);
        assert!(cap.includes(CAN_EDIT_CONTENT));
        assert!(cap.includes(CAN_SEE_ALL_EDITOR_EVENTS));
    }

    #[test]
    fn read_only_lacks_edit_content() {
        let cap = resolve_capabilities(PrivilegeLevel::ReadOnly, false);
        assert!(!cap.includes(CAN_EDIT_CONTENT));
        assert!(cap.includes(CAN_SEE_OTHER_CLIENTS));
    }

    #[test]
    fn restricted_user_lacks_all_editor_events() {
        let cap = resolve_capabilities(PrivilegeLevel::ReadAndWrite, true);
        assert!(cap.includes(CAN_SEE_OTHER_CLIENTS));
        assert!(cap.includes(CAN_SEE_NON_RESTRICTED_EVENTS));
        assert!(!cap.includes(CAN_SEE_ALL_EDITOR_EVENTS));
    }
}
