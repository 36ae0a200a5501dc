//! Postgres-backed entity store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (foreign key violation) | `23503` | `NotFound` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / network / other | N/A | `Backend` |
//!
//! ## Transactions
//!
//! Replace-semantics assignments, user deletion, user creation with roles and
//! bootstrap each run in one transaction. The target row is locked with
//! `FOR UPDATE` first so concurrent replacements of the same set serialize.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction};
use tracing::instrument;

use rbac_core::{
    Permission, PermissionId, Role, RoleId, RoleWithPermissions, User, UserAccess, UserId,
    UserWithRoles,
};

use super::{
    AdminSeed, BootstrapReport, EntityStore, StoreError, StoreResult, plan_replacement,
};

const SCHEMA: &str = include_str!("../../migrations/0001_rbac.sql");

/// Arbitrary key serializing concurrent bootstraps across processes.
const BOOTSTRAP_LOCK_KEY: i64 = 0x7262_6163_0001;

#[derive(Debug, Clone)]
pub struct PostgresEntityStore {
    pool: Arc<PgPool>,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect and apply the schema. Any failure here is fatal for the caller.
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        tracing::info!("schema applied");
        Ok(())
    }

    async fn begin(&self) -> StoreResult<Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }

    /// Read-only transaction with a single snapshot for multi-statement reads.
    async fn begin_snapshot(&self) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;
        Ok(tx)
    }
}

async fn commit(tx: Transaction<'static, Postgres>) -> StoreResult<()> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping
// ─────────────────────────────────────────────────────────────────────────────

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    Ok(User {
        id: UserId::new(row.try_get("id")?),
        username: row.try_get("username")?,
        credential: row.try_get("credential")?,
    })
}

fn role_from_row(row: &PgRow) -> Result<Role, sqlx::Error> {
    Ok(Role {
        id: RoleId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
    })
}

fn permission_from_row(row: &PgRow) -> Result<Permission, sqlx::Error> {
    Ok(Permission {
        id: PermissionId::new(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        deleted_at: row.try_get("deleted_at")?,
    })
}

fn decode<T>(
    operation: &str,
    row: &PgRow,
    f: fn(&PgRow) -> Result<T, sqlx::Error>,
) -> StoreResult<T> {
    f(row).map_err(|e| map_sqlx_error(operation, e))
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared statements
// ─────────────────────────────────────────────────────────────────────────────

async fn fetch_user(conn: &mut PgConnection, id: UserId, lock: bool) -> StoreResult<User> {
    let sql = if lock {
        "SELECT id, username, credential FROM users WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, username, credential FROM users WHERE id = $1"
    };
    let row = sqlx::query(sql)
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_user", e))?
        .ok_or_else(|| StoreError::not_found(format!("user {id}")))?;
    decode("fetch_user", &row, user_from_row)
}

async fn fetch_role(conn: &mut PgConnection, id: RoleId, lock: bool) -> StoreResult<Role> {
    let sql = if lock {
        "SELECT id, name, description FROM roles WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT id, name, description FROM roles WHERE id = $1"
    };
    let row = sqlx::query(sql)
        .bind(id.get())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("fetch_role", e))?
        .ok_or_else(|| StoreError::not_found(format!("role {id}")))?;
    decode("fetch_role", &row, role_from_row)
}

async fn roles_of(conn: &mut PgConnection, user: UserId) -> StoreResult<Vec<Role>> {
    let rows = sqlx::query(
        r#"
        SELECT r.id, r.name, r.description
        FROM roles r
        JOIN user_roles ur ON ur.role_id = r.id
        WHERE ur.user_id = $1
        ORDER BY r.id
        "#,
    )
    .bind(user.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("roles_of", e))?;

    rows.iter()
        .map(|row| decode("roles_of", row, role_from_row))
        .collect()
}

async fn live_permissions_of(conn: &mut PgConnection, role: RoleId) -> StoreResult<Vec<Permission>> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, p.name, p.description, p.created_at, p.updated_at, p.deleted_at
        FROM permissions p
        JOIN role_permissions rp ON rp.permission_id = p.id
        WHERE rp.role_id = $1 AND p.deleted_at IS NULL
        ORDER BY p.id
        "#,
    )
    .bind(role.get())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("live_permissions_of", e))?;

    rows.iter()
        .map(|row| decode("live_permissions_of", row, permission_from_row))
        .collect()
}

/// Fail with `NotFound` unless every id names an existing row.
async fn ensure_all_exist(
    conn: &mut PgConnection,
    sql: &str,
    what: &str,
    ids: &BTreeSet<i64>,
) -> StoreResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let wanted: Vec<i64> = ids.iter().copied().collect();
    let found: Vec<i64> = sqlx::query_scalar(sql)
        .bind(&wanted)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("ensure_all_exist", e))?;
    let found: BTreeSet<i64> = found.into_iter().collect();

    match ids.difference(&found).next() {
        Some(missing) => Err(StoreError::not_found(format!("{what} {missing}"))),
        None => Ok(()),
    }
}

async fn insert_user(conn: &mut PgConnection, username: &str, credential: &str) -> StoreResult<User> {
    let row = sqlx::query(
        "INSERT INTO users (username, credential) VALUES ($1, $2) RETURNING id, username, credential",
    )
    .bind(username)
    .bind(credential)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_write_error("insert_user", format!("username '{username}'"), e))?;
    decode("insert_user", &row, user_from_row)
}

/// Replace the junction rows owned by `owner` in `table` with `target`.
async fn replace_links(
    conn: &mut PgConnection,
    table: Junction,
    owner: i64,
    target: &BTreeSet<i64>,
) -> StoreResult<()> {
    let current: Vec<i64> = sqlx::query_scalar(table.select_current())
        .bind(owner)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("select_links", e))?;
    let current: BTreeSet<i64> = current.into_iter().collect();

    let plan = plan_replacement(&current, target);
    if plan.is_noop() {
        return Ok(());
    }

    if !plan.remove.is_empty() {
        sqlx::query(table.delete_some())
            .bind(owner)
            .bind(&plan.remove)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("delete_links", e))?;
    }
    if !plan.insert.is_empty() {
        sqlx::query(table.insert_many())
            .bind(owner)
            .bind(&plan.insert)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_links", e))?;
    }

    tracing::debug!(
        owner,
        inserted = plan.insert.len(),
        removed = plan.remove.len(),
        "junction set replaced"
    );
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum Junction {
    UserRoles,
    RolePermissions,
}

impl Junction {
    fn select_current(self) -> &'static str {
        match self {
            Junction::UserRoles => "SELECT role_id FROM user_roles WHERE user_id = $1",
            Junction::RolePermissions => {
                "SELECT permission_id FROM role_permissions WHERE role_id = $1"
            }
        }
    }

    fn delete_some(self) -> &'static str {
        match self {
            Junction::UserRoles => {
                "DELETE FROM user_roles WHERE user_id = $1 AND role_id = ANY($2)"
            }
            Junction::RolePermissions => {
                "DELETE FROM role_permissions WHERE role_id = $1 AND permission_id = ANY($2)"
            }
        }
    }

    fn insert_many(self) -> &'static str {
        match self {
            Junction::UserRoles => {
                "INSERT INTO user_roles (user_id, role_id) SELECT $1, UNNEST($2::BIGINT[])"
            }
            Junction::RolePermissions => {
                "INSERT INTO role_permissions (role_id, permission_id) SELECT $1, UNNEST($2::BIGINT[])"
            }
        }
    }
}

const ROLES_EXIST: &str = "SELECT id FROM roles WHERE id = ANY($1)";
const LIVE_PERMISSIONS_EXIST: &str =
    "SELECT id FROM permissions WHERE id = ANY($1) AND deleted_at IS NULL";

#[async_trait]
impl EntityStore for PostgresEntityStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ping", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn find_user_by_name(&self, username: &str) -> StoreResult<User> {
        let row = sqlx::query("SELECT id, username, credential FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user_by_name", e))?
            .ok_or_else(|| StoreError::not_found(format!("user '{username}'")))?;
        decode("find_user_by_name", &row, user_from_row)
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user_by_id(&self, id: UserId) -> StoreResult<User> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_user(&mut conn, id, false).await
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn find_user_with_roles(&self, id: UserId) -> StoreResult<UserWithRoles> {
        let mut tx = self.begin_snapshot().await?;
        let user = fetch_user(&mut tx, id, false).await?;
        let roles = roles_of(&mut tx, id).await?;
        commit(tx).await?;
        Ok(UserWithRoles { user, roles })
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn load_user_access(&self, id: UserId) -> StoreResult<UserAccess> {
        let mut tx = self.begin_snapshot().await?;
        let user = fetch_user(&mut tx, id, false).await?;
        let mut roles = Vec::new();
        for role in roles_of(&mut tx, id).await? {
            let permissions = live_permissions_of(&mut tx, role.id).await?;
            roles.push(RoleWithPermissions { role, permissions });
        }
        commit(tx).await?;
        Ok(UserAccess { user, roles })
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn find_role_by_id(&self, id: RoleId) -> StoreResult<Role> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_role(&mut conn, id, false).await
    }

    #[instrument(skip(self), err)]
    async fn find_role_by_name(&self, name: &str) -> StoreResult<Role> {
        let row = sqlx::query("SELECT id, name, description FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?
            .ok_or_else(|| StoreError::not_found(format!("role '{name}'")))?;
        decode("find_role_by_name", &row, role_from_row)
    }

    #[instrument(skip(self), fields(role_id = %id), err)]
    async fn find_role_with_permissions(&self, id: RoleId) -> StoreResult<RoleWithPermissions> {
        let mut tx = self.begin_snapshot().await?;
        let role = fetch_role(&mut tx, id, false).await?;
        let permissions = live_permissions_of(&mut tx, id).await?;
        commit(tx).await?;
        Ok(RoleWithPermissions { role, permissions })
    }

    #[instrument(skip(self), err)]
    async fn find_permission_by_name(&self, name: &str) -> StoreResult<Permission> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, created_at, updated_at, deleted_at
            FROM permissions
            WHERE name = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(name)
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permission_by_name", e))?
        .ok_or_else(|| StoreError::not_found(format!("permission '{name}'")))?;
        decode("find_permission_by_name", &row, permission_from_row)
    }

    #[instrument(skip(self, credential), err)]
    async fn create_user(&self, username: &str, credential: &str) -> StoreResult<User> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        insert_user(&mut conn, username, credential).await
    }

    #[instrument(skip(self, credential), err)]
    async fn create_user_with_roles(
        &self,
        username: &str,
        credential: &str,
        roles: &[RoleId],
    ) -> StoreResult<User> {
        let target: BTreeSet<i64> = roles.iter().map(|r| r.get()).collect();

        let mut tx = self.begin().await?;
        let user = insert_user(&mut tx, username, credential).await?;
        ensure_all_exist(&mut tx, ROLES_EXIST, "role", &target).await?;
        replace_links(&mut tx, Junction::UserRoles, user.id.get(), &target).await?;
        commit(tx).await?;
        Ok(user)
    }

    #[instrument(skip(self, credential), fields(user_id = %id), err)]
    async fn update_user(
        &self,
        id: UserId,
        username: &str,
        credential: Option<&str>,
    ) -> StoreResult<User> {
        let mut tx = self.begin().await?;
        fetch_user(&mut tx, id, true).await?;

        let row = sqlx::query(
            r#"
            UPDATE users
            SET username = $2,
                credential = COALESCE($3, credential),
                updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, credential
            "#,
        )
        .bind(id.get())
        .bind(username)
        .bind(credential)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_error("update_user", format!("username '{username}'"), e))?;

        let user = decode("update_user", &row, user_from_row)?;
        commit(tx).await?;
        Ok(user)
    }

    #[instrument(skip(self), err)]
    async fn create_role(&self, name: &str, description: &str) -> StoreResult<Role> {
        let row = sqlx::query(
            "INSERT INTO roles (name, description) VALUES ($1, $2) RETURNING id, name, description",
        )
        .bind(name)
        .bind(description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_write_error("create_role", format!("role '{name}'"), e))?;
        decode("create_role", &row, role_from_row)
    }

    #[instrument(skip(self), err)]
    async fn create_permission(&self, name: &str, description: &str) -> StoreResult<Permission> {
        let row = sqlx::query(
            r#"
            INSERT INTO permissions (name, description)
            VALUES ($1, $2)
            RETURNING id, name, description, created_at, updated_at, deleted_at
            "#,
        )
        .bind(name)
        .bind(description)
        .fetch_one(&*self.pool)
        .await
        .map_err(|e| map_write_error("create_permission", format!("permission '{name}'"), e))?;
        decode("create_permission", &row, permission_from_row)
    }

    #[instrument(skip(self), fields(permission_id = %id), err)]
    async fn soft_delete_permission(&self, id: PermissionId) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE permissions
            SET deleted_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id.get())
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("soft_delete_permission", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("permission {id}")));
        }
        Ok(())
    }

    #[instrument(skip(self, roles), fields(user_id = %user), err)]
    async fn assign_roles_to_user(&self, user: UserId, roles: &[RoleId]) -> StoreResult<()> {
        let target: BTreeSet<i64> = roles.iter().map(|r| r.get()).collect();

        let mut tx = self.begin().await?;
        fetch_user(&mut tx, user, true).await?;
        ensure_all_exist(&mut tx, ROLES_EXIST, "role", &target).await?;
        replace_links(&mut tx, Junction::UserRoles, user.get(), &target).await?;
        commit(tx).await
    }

    #[instrument(skip(self, permissions), fields(role_id = %role), err)]
    async fn assign_permissions_to_role(
        &self,
        role: RoleId,
        permissions: &[PermissionId],
    ) -> StoreResult<()> {
        let target: BTreeSet<i64> = permissions.iter().map(|p| p.get()).collect();

        let mut tx = self.begin().await?;
        fetch_role(&mut tx, role, true).await?;
        ensure_all_exist(&mut tx, LIVE_PERMISSIONS_EXIST, "permission", &target).await?;
        replace_links(&mut tx, Junction::RolePermissions, role.get(), &target).await?;
        commit(tx).await
    }

    #[instrument(skip(self), fields(user_id = %id), err)]
    async fn delete_user(&self, id: UserId) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        fetch_user(&mut tx, id, true).await?;

        sqlx::query("DELETE FROM user_roles WHERE user_id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("clear_user_roles", e))?;

        sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id.get())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("delete_user_row", e))?;

        commit(tx).await
    }

    #[instrument(skip(self), err)]
    async fn list_users(&self) -> StoreResult<Vec<UserWithRoles>> {
        let mut tx = self.begin_snapshot().await?;

        let user_rows = sqlx::query("SELECT id, username, credential FROM users ORDER BY id")
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("list_users", e))?;

        let link_rows = sqlx::query(
            r#"
            SELECT ur.user_id, r.id, r.name, r.description
            FROM user_roles ur
            JOIN roles r ON r.id = ur.role_id
            ORDER BY ur.user_id, r.id
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_user_roles", e))?;
        commit(tx).await?;

        let mut by_user: BTreeMap<i64, Vec<Role>> = BTreeMap::new();
        for row in &link_rows {
            let user_id: i64 = row
                .try_get("user_id")
                .map_err(|e| map_sqlx_error("list_user_roles", e))?;
            by_user
                .entry(user_id)
                .or_default()
                .push(decode("list_user_roles", row, role_from_row)?);
        }

        user_rows
            .iter()
            .map(|row| {
                let user = decode("list_users", row, user_from_row)?;
                let roles = by_user.remove(&user.id.get()).unwrap_or_default();
                Ok(UserWithRoles { user, roles })
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn list_permissions(&self) -> StoreResult<Vec<Permission>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, created_at, updated_at, deleted_at
            FROM permissions
            WHERE deleted_at IS NULL
            ORDER BY id
            "#,
        )
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_permissions", e))?;

        rows.iter()
            .map(|row| decode("list_permissions", row, permission_from_row))
            .collect()
    }

    #[instrument(skip(self, seed), fields(username = %seed.username), err)]
    async fn bootstrap_admin(&self, seed: &AdminSeed) -> StoreResult<BootstrapReport> {
        let mut report = BootstrapReport::default();
        let mut tx = self.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(BOOTSTRAP_LOCK_KEY)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("bootstrap_lock", e))?;

        let role_id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO roles (name, description) VALUES ($1, $2) ON CONFLICT (name) DO NOTHING RETURNING id",
        )
        .bind(&seed.role)
        .bind(&seed.role_description)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bootstrap_role", e))?;
        report.created_role = role_id.is_some();
        let role_id: i64 = match role_id {
            Some(id) => id,
            None => sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
                .bind(&seed.role)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("bootstrap_role", e))?,
        };

        let permission_id: Option<i64> = sqlx::query_scalar(
            r#"
            INSERT INTO permissions (name, description) VALUES ($1, $2)
            ON CONFLICT (name) WHERE deleted_at IS NULL DO NOTHING
            RETURNING id
            "#,
        )
        .bind(&seed.permission)
        .bind(&seed.permission_description)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bootstrap_permission", e))?;
        report.created_permission = permission_id.is_some();
        let permission_id: i64 = match permission_id {
            Some(id) => id,
            None => sqlx::query_scalar(
                "SELECT id FROM permissions WHERE name = $1 AND deleted_at IS NULL",
            )
            .bind(&seed.permission)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("bootstrap_permission", e))?,
        };

        report.linked_role_permission = sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bootstrap_role_permission", e))?
        .rows_affected()
            == 1;

        let user_id: Option<i64> = sqlx::query_scalar(
            "INSERT INTO users (username, credential) VALUES ($1, $2) ON CONFLICT (username) DO NOTHING RETURNING id",
        )
        .bind(&seed.username)
        .bind(&seed.credential)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bootstrap_user", e))?;
        report.created_user = user_id.is_some();
        let user_id: i64 = match user_id {
            Some(id) => id,
            None => sqlx::query_scalar("SELECT id FROM users WHERE username = $1")
                .bind(&seed.username)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| map_sqlx_error("bootstrap_user", e))?,
        };

        report.linked_user_role = sqlx::query(
            "INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(user_id)
        .bind(role_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("bootstrap_user_role", e))?
        .rows_affected()
            == 1;

        commit(tx).await?;
        Ok(report)
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                Some("23503") => StoreError::NotFound(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::backend(format!("connection pool closed in {operation}"))
        }
        sqlx::Error::RowNotFound => StoreError::not_found(operation.to_string()),
        other => StoreError::backend(format!("sqlx error in {operation}: {other}")),
    }
}

/// Like [`map_sqlx_error`], but names the entity on a unique violation.
fn map_write_error(operation: &str, entity: String, err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Conflict(entity);
    }
    map_sqlx_error(operation, err)
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}
