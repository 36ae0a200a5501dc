//! In-memory entity store.
//!
//! Intended for tests/dev. Mutations run copy-on-write: the closure works on a
//! clone of the state, which replaces the live state only if it returns `Ok`.
//! Readers never observe a half-applied association set.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use rbac_core::{
    Permission, PermissionId, Role, RoleId, RoleWithPermissions, User, UserAccess, UserId,
    UserWithRoles,
};

use super::{
    AdminSeed, BootstrapReport, EntityStore, StoreError, StoreResult, plan_replacement,
};

#[derive(Debug, Clone, Default)]
pub(crate) struct State {
    last_user_id: i64,
    last_role_id: i64,
    last_permission_id: i64,
    users: BTreeMap<UserId, User>,
    roles: BTreeMap<RoleId, Role>,
    permissions: BTreeMap<PermissionId, Permission>,
    user_roles: BTreeSet<(UserId, RoleId)>,
    role_permissions: BTreeSet<(RoleId, PermissionId)>,
}

impl State {
    fn user(&self, id: UserId) -> StoreResult<&User> {
        self.users
            .get(&id)
            .ok_or_else(|| StoreError::not_found(format!("user {id}")))
    }

    fn user_by_name(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    fn role(&self, id: RoleId) -> StoreResult<&Role> {
        self.roles
            .get(&id)
            .ok_or_else(|| StoreError::not_found(format!("role {id}")))
    }

    fn role_by_name(&self, name: &str) -> Option<&Role> {
        self.roles.values().find(|r| r.name == name)
    }

    fn live_permission(&self, id: PermissionId) -> StoreResult<&Permission> {
        self.permissions
            .get(&id)
            .filter(|p| !p.is_deleted())
            .ok_or_else(|| StoreError::not_found(format!("permission {id}")))
    }

    fn live_permission_by_name(&self, name: &str) -> Option<&Permission> {
        self.permissions
            .values()
            .find(|p| !p.is_deleted() && p.name == name)
    }

    fn roles_of(&self, user: UserId) -> Vec<Role> {
        self.user_roles
            .iter()
            .filter(|(u, _)| *u == user)
            .filter_map(|(_, r)| self.roles.get(r).cloned())
            .collect()
    }

    fn live_permissions_of(&self, role: RoleId) -> Vec<Permission> {
        self.role_permissions
            .iter()
            .filter(|(r, _)| *r == role)
            .filter_map(|(_, p)| self.permissions.get(p))
            .filter(|p| !p.is_deleted())
            .cloned()
            .collect()
    }

    fn with_roles(&self, user: &User) -> UserWithRoles {
        UserWithRoles {
            user: user.clone(),
            roles: self.roles_of(user.id),
        }
    }

    fn insert_user(&mut self, username: &str, credential: &str) -> StoreResult<User> {
        if self.user_by_name(username).is_some() {
            return Err(StoreError::conflict(format!("username '{username}'")));
        }
        self.last_user_id += 1;
        let user = User {
            id: UserId::new(self.last_user_id),
            username: username.to_string(),
            credential: credential.to_string(),
        };
        self.users.insert(user.id, user.clone());
        Ok(user)
    }

    fn insert_role(&mut self, name: &str, description: &str) -> StoreResult<Role> {
        if self.role_by_name(name).is_some() {
            return Err(StoreError::conflict(format!("role '{name}'")));
        }
        self.last_role_id += 1;
        let role = Role {
            id: RoleId::new(self.last_role_id),
            name: name.to_string(),
            description: description.to_string(),
        };
        self.roles.insert(role.id, role.clone());
        Ok(role)
    }

    fn insert_permission(&mut self, name: &str, description: &str) -> StoreResult<Permission> {
        if self.live_permission_by_name(name).is_some() {
            return Err(StoreError::conflict(format!("permission '{name}'")));
        }
        self.last_permission_id += 1;
        let now = Utc::now();
        let permission = Permission {
            id: PermissionId::new(self.last_permission_id),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.permissions.insert(permission.id, permission.clone());
        Ok(permission)
    }

    fn replace_user_roles(&mut self, user: UserId, roles: &[RoleId]) -> StoreResult<()> {
        self.user(user)?;
        let target: BTreeSet<RoleId> = roles.iter().copied().collect();
        for role in &target {
            self.role(*role)?;
        }
        let current: BTreeSet<RoleId> = self
            .user_roles
            .iter()
            .filter(|(u, _)| *u == user)
            .map(|(_, r)| *r)
            .collect();

        let plan = plan_replacement(&current, &target);
        for role in plan.remove {
            self.user_roles.remove(&(user, role));
        }
        for role in plan.insert {
            self.user_roles.insert((user, role));
        }
        Ok(())
    }

    fn replace_role_permissions(
        &mut self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> StoreResult<()> {
        self.role(role)?;
        let target: BTreeSet<PermissionId> = permissions.iter().copied().collect();
        for permission in &target {
            self.live_permission(*permission)?;
        }
        let current: BTreeSet<PermissionId> = self
            .role_permissions
            .iter()
            .filter(|(r, _)| *r == role)
            .map(|(_, p)| *p)
            .collect();

        let plan = plan_replacement(&current, &target);
        for permission in plan.remove {
            self.role_permissions.remove(&(role, permission));
        }
        for permission in plan.insert {
            self.role_permissions.insert((role, permission));
        }
        Ok(())
    }

    pub(crate) fn clear_user_roles(&mut self, user: UserId) {
        self.user_roles.retain(|(u, _)| *u != user);
    }

    fn remove_user(&mut self, user: UserId) -> StoreResult<()> {
        if self.user_roles.iter().any(|(u, _)| *u == user) {
            // Mirrors the foreign key on user_roles.user_id.
            return Err(StoreError::backend(format!(
                "user {user} still referenced by role associations"
            )));
        }
        self.users
            .remove(&user)
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found(format!("user {user}")))
    }
}

/// In-memory entity store.
#[derive(Debug, Default)]
pub struct InMemoryEntityStore {
    state: RwLock<State>,
}

impl InMemoryEntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> StoreResult<T>) -> StoreResult<T> {
        let state = self
            .state
            .read()
            .map_err(|_| StoreError::backend("lock poisoned"))?;
        f(&state)
    }

    /// Run `f` as one transaction: commit on `Ok`, discard every change on `Err`.
    pub(crate) fn transact<T>(
        &self,
        f: impl FnOnce(&mut State) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut state = self
            .state
            .write()
            .map_err(|_| StoreError::backend("lock poisoned"))?;

        let mut working = state.clone();
        let out = f(&mut working)?;
        *state = working;
        Ok(out)
    }
}

#[async_trait]
impl EntityStore for InMemoryEntityStore {
    async fn ping(&self) -> StoreResult<()> {
        self.read(|_| Ok(()))
    }

    async fn find_user_by_name(&self, username: &str) -> StoreResult<User> {
        self.read(|s| {
            s.user_by_name(username)
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("user '{username}'")))
        })
    }

    async fn find_user_by_id(&self, id: UserId) -> StoreResult<User> {
        self.read(|s| s.user(id).cloned())
    }

    async fn find_user_with_roles(&self, id: UserId) -> StoreResult<UserWithRoles> {
        self.read(|s| Ok(s.with_roles(s.user(id)?)))
    }

    async fn load_user_access(&self, id: UserId) -> StoreResult<UserAccess> {
        self.read(|s| {
            let user = s.user(id)?.clone();
            let roles = s
                .roles_of(id)
                .into_iter()
                .map(|role| RoleWithPermissions {
                    permissions: s.live_permissions_of(role.id),
                    role,
                })
                .collect();
            Ok(UserAccess { user, roles })
        })
    }

    async fn find_role_by_id(&self, id: RoleId) -> StoreResult<Role> {
        self.read(|s| s.role(id).cloned())
    }

    async fn find_role_by_name(&self, name: &str) -> StoreResult<Role> {
        self.read(|s| {
            s.role_by_name(name)
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("role '{name}'")))
        })
    }

    async fn find_role_with_permissions(&self, id: RoleId) -> StoreResult<RoleWithPermissions> {
        self.read(|s| {
            Ok(RoleWithPermissions {
                role: s.role(id)?.clone(),
                permissions: s.live_permissions_of(id),
            })
        })
    }

    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Permission> {
        self.read(|s| {
            s.live_permission_by_name(name)
                .cloned()
                .ok_or_else(|| StoreError::not_found(format!("permission '{name}'")))
        })
    }

    async fn create_user(&self, username: &str, credential: &str) -> StoreResult<User> {
        self.transact(|s| s.insert_user(username, credential))
    }

    async fn create_user_with_roles(
        &self,
        username: &str,
        credential: &str,
        roles: &[RoleId],
    ) -> StoreResult<User> {
        self.transact(|s| {
            let user = s.insert_user(username, credential)?;
            s.replace_user_roles(user.id, roles)?;
            Ok(user)
        })
    }

    async fn update_user(
        &self,
        id: UserId,
        username: &str,
        credential: Option<&str>,
    ) -> StoreResult<User> {
        self.transact(|s| {
            s.user(id)?;
            if s.user_by_name(username).is_some_and(|other| other.id != id) {
                return Err(StoreError::conflict(format!("username '{username}'")));
            }
            let user = s
                .users
                .get_mut(&id)
                .ok_or_else(|| StoreError::not_found(format!("user {id}")))?;
            user.username = username.to_string();
            if let Some(credential) = credential {
                user.credential = credential.to_string();
            }
            Ok(user.clone())
        })
    }

    async fn create_role(&self, name: &str, description: &str) -> StoreResult<Role> {
        self.transact(|s| s.insert_role(name, description))
    }

    async fn create_permission(&self, name: &str, description: &str) -> StoreResult<Permission> {
        self.transact(|s| s.insert_permission(name, description))
    }

    async fn soft_delete_permission(&self, id: PermissionId) -> StoreResult<()> {
        self.transact(|s| {
            s.live_permission(id)?;
            if let Some(p) = s.permissions.get_mut(&id) {
                let now = Utc::now();
                p.deleted_at = Some(now);
                p.updated_at = now;
            }
            Ok(())
        })
    }

    async fn assign_roles_to_user(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()> {
        self.transact(|s| s.replace_user_roles(user, roles))
    }

    async fn assign_permissions_to_role(
        &self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> StoreResult<()> {
        self.transact(|s| s.replace_role_permissions(role, permissions))
    }

    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        self.transact(|s| {
            s.user(id)?;
            s.clear_user_roles(id);
            s.remove_user(id)
        })
    }

    async fn list_users(&self) -> StoreResult<Vec<UserWithRoles>> {
        self.read(|s| Ok(s.users.values().map(|u| s.with_roles(u)).collect()))
    }

    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        self.read(|s| {
            Ok(s.permissions
                .values()
                .filter(|p| !p.is_deleted())
                .cloned()
                .collect())
        })
    }

    async fn bootstrap_admin(&self, seed: &AdminSeed) -> StoreResult<BootstrapReport> {
        self.transact(|s| {
            let mut report = BootstrapReport::default();

            let role = match s.role_by_name(&seed.role) {
                Some(role) => role.clone(),
                None => {
                    report.created_role = true;
                    s.insert_role(&seed.role, &seed.role_description)?
                }
            };

            let permission = match s.live_permission_by_name(&seed.permission) {
                Some(p) => p.clone(),
                None => {
                    report.created_permission = true;
                    s.insert_permission(&seed.permission, &seed.permission_description)?
                }
            };

            report.linked_role_permission = s.role_permissions.insert((role.id, permission.id));

            let user = match s.user_by_name(&seed.username) {
                Some(user) => user.clone(),
                None => {
                    report.created_user = true;
                    s.insert_user(&seed.username, &seed.credential)?
                }
            };

            report.linked_user_role = s.user_roles.insert((user.id, role.id));

            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed() -> AdminSeed {
        AdminSeed {
            username: "admin".to_string(),
            credential: "$argon2id$stub".to_string(),
            role: "admin".to_string(),
            role_description: "Administrator with full access".to_string(),
            permission: "write".to_string(),
            permission_description: "write blogs".to_string(),
        }
    }

    #[tokio::test]
    async fn duplicate_names_conflict() {
        let store = InMemoryEntityStore::new();
        store.create_user("alice", "x").await.unwrap();
        assert!(matches!(
            store.create_user("alice", "y").await,
            Err(StoreError::Conflict(_))
        ));

        store.create_role("editor", "").await.unwrap();
        assert!(matches!(
            store.create_role("editor", "again").await,
            Err(StoreError::Conflict(_))
        ));

        store.create_permission("write", "").await.unwrap();
        assert!(matches!(
            store.create_permission("write", "").await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn usernames_are_case_sensitive() {
        let store = InMemoryEntityStore::new();
        store.create_user("alice", "x").await.unwrap();
        store.create_user("Alice", "x").await.unwrap();
        assert_eq!(store.list_users().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn role_assignment_replaces_previous_set() {
        let store = InMemoryEntityStore::new();
        let user = store.create_user("alice", "x").await.unwrap();
        let a = store.create_role("a", "").await.unwrap();
        let b = store.create_role("b", "").await.unwrap();
        let c = store.create_role("c", "").await.unwrap();

        store.assign_roles_to_user(user.id, &[a.id, b.id, b.id]).await.unwrap();
        store.assign_roles_to_user(user.id, &[b.id, c.id]).await.unwrap();

        let loaded = store.find_user_with_roles(user.id).await.unwrap();
        assert_eq!(loaded.role_names(), vec!["b", "c"]);
        // Removing an association never removes the role itself.
        assert!(store.find_role_by_id(a.id).await.is_ok());
    }

    #[tokio::test]
    async fn failed_assignment_leaves_previous_set() {
        let store = InMemoryEntityStore::new();
        let role = store.create_role("editor", "").await.unwrap();
        let write = store.create_permission("write", "").await.unwrap();
        store.assign_permissions_to_role(role.id, &[write.id]).await.unwrap();

        let err = store
            .assign_permissions_to_role(role.id, &[PermissionId::new(999)])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        let loaded = store.find_role_with_permissions(role.id).await.unwrap();
        assert_eq!(loaded.permissions.len(), 1);
        assert_eq!(loaded.permissions[0].name, "write");
    }

    #[tokio::test]
    async fn delete_user_clears_associations_then_row() {
        let store = InMemoryEntityStore::new();
        let user = store.create_user("alice", "x").await.unwrap();
        let role = store.create_role("editor", "").await.unwrap();
        store.assign_roles_to_user(user.id, &[role.id]).await.unwrap();

        store.delete_user(user.id).await.unwrap();

        assert!(matches!(
            store.find_user_by_id(user.id).await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.find_role_by_id(role.id).await.is_ok());
        assert!(matches!(
            store.delete_user(user.id).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_user_rolls_back_when_second_step_fails() {
        let store = InMemoryEntityStore::new();
        let user = store.create_user("alice", "x").await.unwrap();
        let role = store.create_role("editor", "").await.unwrap();
        store.assign_roles_to_user(user.id, &[role.id]).await.unwrap();

        // Same steps as `delete_user`, with a failure injected between them.
        let result: StoreResult<()> = store.transact(|s| {
            s.user(user.id)?;
            s.clear_user_roles(user.id);
            Err(StoreError::backend("injected failure"))
        });
        assert!(result.is_err());

        let loaded = store.find_user_with_roles(user.id).await.unwrap();
        assert_eq!(loaded.role_names(), vec!["editor"]);
    }

    #[tokio::test]
    async fn row_delete_without_clearing_is_refused() {
        let store = InMemoryEntityStore::new();
        let user = store.create_user("alice", "x").await.unwrap();
        let role = store.create_role("editor", "").await.unwrap();
        store.assign_roles_to_user(user.id, &[role.id]).await.unwrap();

        let result = store.transact(|s| s.remove_user(user.id));
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert!(store.find_user_by_id(user.id).await.is_ok());
    }

    #[tokio::test]
    async fn soft_deleted_permission_is_hidden_and_name_reusable() {
        let store = InMemoryEntityStore::new();
        let role = store.create_role("editor", "").await.unwrap();
        let write = store.create_permission("write", "").await.unwrap();
        store.assign_permissions_to_role(role.id, &[write.id]).await.unwrap();

        store.soft_delete_permission(write.id).await.unwrap();

        assert!(store.list_permissions().await.unwrap().is_empty());
        assert!(
            store
                .find_role_with_permissions(role.id)
                .await
                .unwrap()
                .permissions
                .is_empty()
        );
        assert!(matches!(
            store.assign_permissions_to_role(role.id, &[write.id]).await,
            Err(StoreError::NotFound(_))
        ));

        let again = store.create_permission("write", "v2").await.unwrap();
        assert_ne!(again.id, write.id);
    }

    #[tokio::test]
    async fn listings_follow_insertion_order() {
        let store = InMemoryEntityStore::new();
        for name in ["carol", "alice", "bob"] {
            store.create_user(name, "x").await.unwrap();
        }
        let names: Vec<String> = store
            .list_users()
            .await
            .unwrap()
            .into_iter()
            .map(|u| u.user.username)
            .collect();
        assert_eq!(names, vec!["carol", "alice", "bob"]);
    }

    #[tokio::test]
    async fn update_user_checks_uniqueness() {
        let store = InMemoryEntityStore::new();
        let alice = store.create_user("alice", "x").await.unwrap();
        store.create_user("bob", "x").await.unwrap();

        assert!(matches!(
            store.update_user(alice.id, "bob", None).await,
            Err(StoreError::Conflict(_))
        ));

        let renamed = store.update_user(alice.id, "alicia", Some("y")).await.unwrap();
        assert_eq!(renamed.username, "alicia");
        assert_eq!(renamed.credential, "y");

        // Renaming to its own name is not a conflict.
        store.update_user(alice.id, "alicia", None).await.unwrap();
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = InMemoryEntityStore::new();

        let first = store.bootstrap_admin(&seed()).await.unwrap();
        assert!(first.created_role && first.created_permission && first.created_user);
        assert!(first.linked_role_permission && first.linked_user_role);

        let second = store.bootstrap_admin(&seed()).await.unwrap();
        assert!(!second.changed_anything());

        let users = store.list_users().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role_names(), vec!["admin"]);
        assert_eq!(store.list_permissions().await.unwrap().len(), 1);

        let admin = store.find_role_by_name("admin").await.unwrap();
        let admin = store.find_role_with_permissions(admin.id).await.unwrap();
        assert_eq!(admin.permissions.len(), 1);
        assert_eq!(admin.permissions[0].name, "write");
    }

    #[tokio::test]
    async fn bootstrap_links_preexisting_entities() {
        let store = InMemoryEntityStore::new();
        store.create_role("admin", "custom").await.unwrap();
        store.create_user("admin", "existing").await.unwrap();

        let report = store.bootstrap_admin(&seed()).await.unwrap();
        assert!(!report.created_role && !report.created_user);
        assert!(report.created_permission && report.linked_user_role);

        // Existing credential is left untouched.
        let admin = store.find_user_by_name("admin").await.unwrap();
        assert_eq!(admin.credential, "existing");
    }
}
