//! Postgres-backed implementation of the RBAC store.
//!
//! # What this module is
//! Implements [`RbacStore`] over two tables, `rbac_roles` and
//! `rbac_permissions`, created by the embedded migrations.
//!
//! # Key invariants
//! - The public role is stored as SQL `NULL`. Role filters render `IS NULL`
//!   for it explicitly; `role = ANY($1)` never matches a `NULL` row.
//! - Two unique indexes enforce one record per (role, collection, action),
//!   one of them partial over `role IS NULL`. Violations map to
//!   [`StoreError::Conflict`].
//! - Every write runs in a transaction. A silent write sets the
//!   transaction-local `rbac_sync.suppress_events`, which the row triggers
//!   check before calling `pg_notify`.
//!
//! # Events
//! Row triggers publish on the `rbac_sync_events` channel. The first
//! `subscribe` starts a listener task on a dedicated connection that turns
//! notifications into [`StoreEvent`](rbac_sync_core::StoreEvent)s for the
//! subscribed observers.
//!
//! # Security notes
//! - Database URLs may contain credentials; avoid logging them.
//! - Dynamic SQL is limited to filter fragments built with bound parameters.
use super::listener::{self, CHANNEL, Observers};
use crate::config::PostgresConfig;
use anyhow::anyhow;
use async_trait::async_trait;
use rbac_sync_core::{
    Action, ActionFilter, PermissionFilter, PermissionId, PermissionRecord, RbacStore, Role,
    RoleFilter, RoleRef, StoreError, StoreObserver, StoreResult, StoredPermission, WriteOptions,
};
use serde_json::Value;
use sqlx::postgres::{PgConnectOptions, PgListener, PgPoolOptions};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, Transaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

const PERMISSION_COLUMNS: &str =
    "id, role, collection, action, permissions, validation, presets, fields";

/// Durable RBAC store backed by Postgres.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
    observers: Observers,
    listener: Arc<Mutex<Option<JoinHandle<()>>>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbPermission {
    id: i64,
    role: Option<String>,
    collection: String,
    action: String,
    permissions: Option<Value>,
    validation: Option<Value>,
    presets: Option<Value>,
    fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, FromRow)]
struct DbRole {
    id: String,
    name: String,
    icon: String,
    description: String,
    enforce_two_factor: bool,
    external_id: Option<String>,
    ip_allowlist: Vec<String>,
    app_access: bool,
    admin_access: bool,
}

impl PostgresStore {
    /// Connect to Postgres and run the embedded migrations.
    ///
    /// # Errors
    /// - Connection, migration, or pool setup failures.
    /// - Connecting for longer than `connect_timeout_ms`.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, true).await
    }

    /// Connect without running migrations, for tests that manage the schema.
    #[cfg(any(test, feature = "pg-tests"))]
    pub async fn connect_without_migrations(pg: &PostgresConfig) -> StoreResult<Self> {
        Self::connect_internal(pg, false).await
    }

    async fn connect_internal(pg: &PostgresConfig, run_migrations: bool) -> StoreResult<Self> {
        // Avoid logging `pg.url` because it may contain credentials.
        let connect_options = PgConnectOptions::from_str(&pg.url).map_err(db_error)?;
        let connect = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options);
        let pool = tokio::time::timeout(Duration::from_millis(pg.connect_timeout_ms), connect)
            .await
            .map_err(|_| StoreError::Unexpected(anyhow!("postgres connect timed out")))?
            .map_err(db_error)?;

        if run_migrations {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|err| StoreError::Unexpected(err.into()))?;
        }

        Ok(Self {
            pool,
            observers: Arc::new(RwLock::new(Vec::new())),
            listener: Arc::new(Mutex::new(None)),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Stop the notification listener, if one is running.
    pub async fn close(&self) {
        if let Some(task) = self.listener.lock().await.take() {
            task.abort();
            let _ = task.await;
        }
        self.pool.close().await;
    }

    async fn begin(&self, opts: WriteOptions) -> StoreResult<Transaction<'static, Postgres>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        if !opts.emit_events {
            sqlx::query("SELECT set_config('rbac_sync.suppress_events', 'on', true)")
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }
        Ok(tx)
    }

    async fn start_listener(&self) -> StoreResult<()> {
        let mut guard = self.listener.lock().await;
        if guard.is_some() {
            return Ok(());
        }
        let mut pg_listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(db_error)?;
        pg_listener.listen(CHANNEL).await.map_err(db_error)?;
        let store: Arc<dyn RbacStore> = Arc::new(self.clone());
        *guard = Some(tokio::spawn(listener::run_listener(
            pg_listener,
            store,
            self.observers.clone(),
        )));
        tracing::info!(channel = CHANNEL, "listening for rbac changes");
        Ok(())
    }
}

/// Append `WHERE` conditions for `filter`. Every value is a bound parameter.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &PermissionFilter) {
    builder.push(" WHERE TRUE");
    if let Some(collection) = &filter.collection {
        builder.push(" AND collection = ").push_bind(collection.clone());
    }
    match &filter.role {
        RoleFilter::Any => {}
        RoleFilter::Is(RoleRef::Public) => {
            builder.push(" AND role IS NULL");
        }
        RoleFilter::Is(RoleRef::Named(id)) => {
            builder.push(" AND role = ").push_bind(id.clone());
        }
        RoleFilter::AnyOf(roles) => {
            let named: Vec<String> = roles
                .iter()
                .filter_map(|role| role.as_id().map(str::to_string))
                .collect();
            let public = roles.iter().any(RoleRef::is_public);
            match (named.is_empty(), public) {
                (true, false) => {
                    builder.push(" AND FALSE");
                }
                (true, true) => {
                    builder.push(" AND role IS NULL");
                }
                (false, false) => {
                    builder.push(" AND role = ANY(").push_bind(named).push(")");
                }
                (false, true) => {
                    builder
                        .push(" AND (role IS NULL OR role = ANY(")
                        .push_bind(named)
                        .push("))");
                }
            }
        }
    }
    match &filter.action {
        ActionFilter::Any => {}
        ActionFilter::Is(action) => {
            builder.push(" AND action = ").push_bind(action.as_str());
        }
        ActionFilter::NoneOf(actions) if actions.is_empty() => {}
        ActionFilter::NoneOf(actions) => {
            let actions: Vec<String> = actions
                .iter()
                .map(|action| action.as_str().to_string())
                .collect();
            builder
                .push(" AND NOT (action = ANY(")
                .push_bind(actions)
                .push("))");
        }
    }
}

fn push_limit(builder: &mut QueryBuilder<'_, Postgres>, limit: Option<usize>) {
    if let Some(limit) = limit {
        builder
            .push(" LIMIT ")
            .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    }
}

fn db_error(err: sqlx::Error) -> StoreError {
    if is_unique_violation(&err) {
        return StoreError::Conflict("permission slot already occupied".into());
    }
    StoreError::Unexpected(err.into())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn permission_from_db(row: DbPermission) -> StoreResult<StoredPermission> {
    let action: Action = row
        .action
        .parse()
        .map_err(|_| StoreError::Unexpected(anyhow!("unknown action {:?}", row.action)))?;
    Ok(StoredPermission {
        id: PermissionId(row.id),
        record: PermissionRecord {
            role: RoleRef::from(row.role),
            collection: row.collection,
            action,
            permissions: row.permissions,
            validation: row.validation,
            presets: row.presets,
            fields: row.fields,
        },
    })
}

fn role_from_db(row: DbRole) -> Role {
    Role {
        id: row.id,
        name: row.name,
        icon: row.icon,
        description: row.description,
        enforce_two_factor: row.enforce_two_factor,
        external_id: row.external_id,
        ip_allowlist: row.ip_allowlist,
        app_access: row.app_access,
        admin_access: row.admin_access,
    }
}

fn raw_ids(ids: &[PermissionId]) -> Vec<i64> {
    ids.iter().map(|id| id.0).collect()
}

#[async_trait]
impl RbacStore for PostgresStore {
    async fn create_permission(
        &self,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<PermissionId> {
        let mut tx = self.begin(opts).await?;
        let id: i64 = sqlx::query_scalar(
            r#"INSERT INTO rbac_permissions
                   (role, collection, action, permissions, validation, presets, fields)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               RETURNING id"#,
        )
        .bind(record.role.as_id())
        .bind(&record.collection)
        .bind(record.action.as_str())
        .bind(&record.permissions)
        .bind(&record.validation)
        .bind(&record.presets)
        .bind(&record.fields)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(PermissionId(id))
    }

    async fn read_permission(&self, id: PermissionId) -> StoreResult<StoredPermission> {
        let row = sqlx::query_as::<_, DbPermission>(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM rbac_permissions WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or_else(|| StoreError::NotFound(format!("permission {id}")))?;
        permission_from_db(row)
    }

    async fn permission_collections(
        &self,
        ids: &[PermissionId],
    ) -> StoreResult<Vec<(PermissionId, String)>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<(i64, String)> = sqlx::query_as(
            "SELECT id, collection FROM rbac_permissions WHERE id = ANY($1) ORDER BY id",
        )
        .bind(raw_ids(ids))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows
            .into_iter()
            .map(|(id, collection)| (PermissionId(id), collection))
            .collect())
    }

    async fn find_permissions(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<StoredPermission>> {
        let mut builder =
            QueryBuilder::new(format!("SELECT {PERMISSION_COLUMNS} FROM rbac_permissions"));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY id");
        push_limit(&mut builder, limit);
        let rows = builder
            .build_query_as::<DbPermission>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(permission_from_db).collect()
    }

    async fn find_permission_ids(
        &self,
        filter: &PermissionFilter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<PermissionId>> {
        let mut builder = QueryBuilder::new("SELECT id FROM rbac_permissions");
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY id");
        push_limit(&mut builder, limit);
        let ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(ids.into_iter().map(PermissionId).collect())
    }

    async fn update_permission(
        &self,
        id: PermissionId,
        record: PermissionRecord,
        opts: WriteOptions,
    ) -> StoreResult<()> {
        let mut tx = self.begin(opts).await?;
        let result = sqlx::query(
            r#"UPDATE rbac_permissions
               SET role = $2, collection = $3, action = $4, permissions = $5,
                   validation = $6, presets = $7, fields = $8
               WHERE id = $1"#,
        )
        .bind(id.0)
        .bind(record.role.as_id())
        .bind(&record.collection)
        .bind(record.action.as_str())
        .bind(&record.permissions)
        .bind(&record.validation)
        .bind(&record.presets)
        .bind(&record.fields)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("permission {id}")));
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn delete_permissions(
        &self,
        filter: &PermissionFilter,
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>> {
        let mut tx = self.begin(opts).await?;
        let mut builder = QueryBuilder::new("DELETE FROM rbac_permissions");
        push_filter(&mut builder, filter);
        builder.push(" RETURNING id");
        let mut ids: Vec<i64> = builder
            .build_query_scalar()
            .fetch_all(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        ids.sort_unstable();
        Ok(ids.into_iter().map(PermissionId).collect())
    }

    async fn delete_permissions_by_id(
        &self,
        ids: &[PermissionId],
        opts: WriteOptions,
    ) -> StoreResult<Vec<PermissionId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(opts).await?;
        let mut deleted: Vec<i64> =
            sqlx::query_scalar("DELETE FROM rbac_permissions WHERE id = ANY($1) RETURNING id")
                .bind(raw_ids(ids))
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        deleted.sort_unstable();
        Ok(deleted.into_iter().map(PermissionId).collect())
    }

    async fn list_roles(&self) -> StoreResult<Vec<Role>> {
        let rows = sqlx::query_as::<_, DbRole>(
            r#"SELECT id, name, icon, description, enforce_two_factor, external_id,
                      ip_allowlist, app_access, admin_access
               FROM rbac_roles ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(role_from_db).collect())
    }

    async fn upsert_roles(&self, roles: Vec<Role>, opts: WriteOptions) -> StoreResult<Vec<String>> {
        if roles.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(opts).await?;
        let mut ids = Vec::with_capacity(roles.len());
        for role in roles {
            sqlx::query(
                r#"INSERT INTO rbac_roles
                       (id, name, icon, description, enforce_two_factor, external_id,
                        ip_allowlist, app_access, admin_access)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                   ON CONFLICT (id) DO UPDATE SET
                       name = EXCLUDED.name,
                       icon = EXCLUDED.icon,
                       description = EXCLUDED.description,
                       enforce_two_factor = EXCLUDED.enforce_two_factor,
                       external_id = EXCLUDED.external_id,
                       ip_allowlist = EXCLUDED.ip_allowlist,
                       app_access = EXCLUDED.app_access,
                       admin_access = EXCLUDED.admin_access"#,
            )
            .bind(&role.id)
            .bind(&role.name)
            .bind(&role.icon)
            .bind(&role.description)
            .bind(role.enforce_two_factor)
            .bind(&role.external_id)
            .bind(&role.ip_allowlist)
            .bind(role.app_access)
            .bind(role.admin_access)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
            ids.push(role.id);
        }
        tx.commit().await.map_err(db_error)?;
        Ok(ids)
    }

    async fn delete_roles(&self, ids: &[String], opts: WriteOptions) -> StoreResult<Vec<String>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut tx = self.begin(opts).await?;
        let mut deleted: Vec<String> =
            sqlx::query_scalar("DELETE FROM rbac_roles WHERE id = ANY($1) RETURNING id")
                .bind(ids)
                .fetch_all(&mut *tx)
                .await
                .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        deleted.sort();
        Ok(deleted)
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT collection FROM rbac_permissions ORDER BY collection")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }

    async fn subscribe(&self, observer: Arc<dyn StoreObserver>) -> StoreResult<()> {
        self.observers.write().await.push(observer);
        self.start_listener().await
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
