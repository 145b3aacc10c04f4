//! # Identity resolution.
//!
//! Turns the `user`/`group` names of a start request into numeric credentials
//! before anything is spawned. A name that does not resolve fails the start
//! with [`BossError::Validation`] naming the field, and no state is created.

use nix::unistd::{Group, User, getgid, getuid};

use crate::error::BossError;

/// Resolved OS credentials for a spawn.
///
/// `uid`/`gid` are `None` when the child keeps the supervisor's own credentials.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Identity {
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub user: Option<String>,
    pub group: Option<String>,
}

/// Maps user/group names to credentials.
///
/// Swappable through [`SupervisorBuilder::with_identity`](crate::SupervisorBuilder::with_identity).
pub trait IdentityResolver: Send + Sync + 'static {
    fn resolve(&self, user: Option<&str>, group: Option<&str>) -> Result<Identity, BossError>;
}

/// Resolver backed by the system user and group databases.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemIdentity;

impl IdentityResolver for SystemIdentity {
    fn resolve(&self, user: Option<&str>, group: Option<&str>) -> Result<Identity, BossError> {
        let mut id = Identity::default();

        if let Some(name) = user {
            let found = User::from_name(name)
                .map_err(|e| BossError::validation(format!("user lookup '{name}': {e}")))?
                .ok_or_else(|| BossError::validation(format!("unknown user '{name}'")))?;
            if found.uid != getuid() {
                id.uid = Some(found.uid.as_raw());
            }
            if group.is_none() && found.gid != getgid() {
                id.gid = Some(found.gid.as_raw());
            }
            id.user = Some(name.to_string());
        }

        if let Some(name) = group {
            let found = Group::from_name(name)
                .map_err(|e| BossError::validation(format!("group lookup '{name}': {e}")))?
                .ok_or_else(|| BossError::validation(format!("unknown group '{name}'")))?;
            if found.gid != getgid() {
                id.gid = Some(found.gid.as_raw());
            }
            id.group = Some(name.to_string());
        }

        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_names_keeps_current_credentials() {
        let id = SystemIdentity.resolve(None, None).unwrap();
        assert_eq!(id, Identity::default());
    }

    #[test]
    fn unknown_user_is_a_validation_error() {
        let err = SystemIdentity
            .resolve(Some("no-such-user-for-procvisor"), None)
            .unwrap_err();
        assert_eq!(err.as_label(), "boss_validation");
        assert!(err.to_string().contains("user"));
    }

    #[test]
    fn unknown_group_is_a_validation_error() {
        let err = SystemIdentity
            .resolve(None, Some("no-such-group-for-procvisor"))
            .unwrap_err();
        assert!(err.to_string().contains("group"));
    }

    #[test]
    fn resolving_the_current_user_changes_nothing() {
        let Some(me) = User::from_uid(getuid()).unwrap() else {
            return;
        };
        let id = SystemIdentity.resolve(Some(&me.name), None).unwrap();
        assert_eq!(id.uid, None);
        assert_eq!(id.user.as_deref(), Some(me.name.as_str()));
    }
}
