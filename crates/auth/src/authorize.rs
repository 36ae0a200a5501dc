//! Permission decision over a loaded user graph.
//!
//! - No IO
//! - No panics
//! - Exact, case-sensitive name match; no wildcards or hierarchy

use serde::Serialize;

use rbac_core::UserAccess;

/// Outcome of a permission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    /// Granted through the named role.
    Allowed { role: String },
    Denied,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Walk the user's roles and their permissions; the first live permission whose
/// name equals `permission` grants access.
pub fn decide(access: &UserAccess, permission: &str) -> Decision {
    for role in &access.roles {
        let granted = role
            .permissions
            .iter()
            .filter(|p| !p.is_deleted())
            .any(|p| p.name == permission);
        if granted {
            return Decision::Allowed {
                role: role.role.name.clone(),
            };
        }
    }
    Decision::Denied
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use rbac_core::{Permission, PermissionId, Role, RoleId, RoleWithPermissions, User, UserId};

    use super::*;

    fn perm(id: i64, name: &str) -> Permission {
        let now = Utc::now();
        Permission {
            id: PermissionId::new(id),
            name: name.to_string(),
            description: String::new(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    fn access(roles: Vec<(&str, Vec<Permission>)>) -> UserAccess {
        UserAccess {
            user: User {
                id: UserId::new(1),
                username: "alice".to_string(),
                credential: String::new(),
            },
            roles: roles
                .into_iter()
                .enumerate()
                .map(|(i, (name, permissions))| RoleWithPermissions {
                    role: Role {
                        id: RoleId::new(i as i64 + 1),
                        name: name.to_string(),
                        description: String::new(),
                    },
                    permissions,
                })
                .collect(),
        }
    }

    #[test]
    fn grants_through_any_role() {
        let a = access(vec![
            ("viewer", vec![perm(1, "read")]),
            ("editor", vec![perm(2, "write")]),
        ]);
        assert_eq!(
            decide(&a, "write"),
            Decision::Allowed {
                role: "editor".to_string()
            }
        );
        assert_eq!(decide(&a, "delete"), Decision::Denied);
    }

    #[test]
    fn match_is_exact_and_case_sensitive() {
        let a = access(vec![("editor", vec![perm(1, "write")])]);
        assert!(!decide(&a, "Write").is_allowed());
        assert!(!decide(&a, "writ").is_allowed());
        assert!(!decide(&a, "*").is_allowed());
    }

    #[test]
    fn deleted_permissions_never_grant() {
        let mut write = perm(1, "write");
        write.deleted_at = Some(Utc::now());
        let a = access(vec![("editor", vec![write])]);
        assert_eq!(decide(&a, "write"), Decision::Denied);
    }

    #[test]
    fn user_without_roles_is_denied() {
        assert_eq!(decide(&access(vec![]), "read"), Decision::Denied);
    }

    proptest! {
        #[test]
        fn single_role_grants_exactly_its_set(
            granted in proptest::collection::btree_set("[a-z]{1,6}", 0..8),
            asked in "[a-z]{1,6}",
        ) {
            let perms = granted
                .iter()
                .enumerate()
                .map(|(i, n)| perm(i as i64 + 1, n))
                .collect();
            let a = access(vec![("r", perms)]);
            prop_assert_eq!(decide(&a, &asked).is_allowed(), granted.contains(&asked));
        }
    }
}
