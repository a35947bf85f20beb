//! Embedded storage backend: a file-backed SQLite database via sqlx.
//!
//! This is the default backend; it supports a single process. The schema is
//! semantically identical to the networked PostgreSQL backend.

use std::{path::Path, str::FromStr};

use anyhow::Context;
use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::{
    Row,
    sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow},
};

use crate::{
    models::Task,
    pagination,
    store::{Page, Storage, StorageTx},
};

mod account_setting;
mod attribute;
mod cluster;
mod container_instance;
mod elbv2;
mod schema;
mod service;
mod task;
mod task_definition;
mod task_log;
mod task_set;

#[cfg(test)]
mod tests;

pub struct SqliteStorage {
    pool: SqlitePool,
    clusters: cluster::ClusterRepo,
    task_definitions: task_definition::TaskDefinitionRepo,
    services: service::ServiceRepo,
    tasks: task::TaskRepo,
    task_sets: task_set::TaskSetRepo,
    container_instances: container_instance::ContainerInstanceRepo,
    attributes: attribute::AttributeRepo,
    account_settings: account_setting::AccountSettingRepo,
    elbv2: elbv2::ElbV2Repo,
    task_logs: task_log::TaskLogRepo,
}

impl SqliteStorage {
    /// Open (creating if missing) the database file at `path` and bootstrap
    /// the schema.
    pub async fn connect(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| Error::invalid_input(format!("invalid database path {path}: {e}")))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    /// In-memory database, used by tests and throwaway runs. A single pooled
    /// connection keeps every caller on the same database.
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Internal(e.into()))?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        schema::init(&pool).await?;
        Ok(Self {
            clusters: cluster::ClusterRepo::new(pool.clone()),
            task_definitions: task_definition::TaskDefinitionRepo::new(pool.clone()),
            services: service::ServiceRepo::new(pool.clone()),
            tasks: task::TaskRepo::new(pool.clone()),
            task_sets: task_set::TaskSetRepo::new(pool.clone()),
            container_instances: container_instance::ContainerInstanceRepo::new(pool.clone()),
            attributes: attribute::AttributeRepo::new(pool.clone()),
            account_settings: account_setting::AccountSettingRepo::new(pool.clone()),
            elbv2: elbv2::ElbV2Repo::new(pool.clone()),
            task_logs: task_log::TaskLogRepo::new(pool.clone()),
            pool,
        })
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    fn clusters(&self) -> &dyn crate::store::ClusterStore {
        &self.clusters
    }

    fn task_definitions(&self) -> &dyn crate::store::TaskDefinitionStore {
        &self.task_definitions
    }

    fn services(&self) -> &dyn crate::store::ServiceStore {
        &self.services
    }

    fn tasks(&self) -> &dyn crate::store::TaskStore {
        &self.tasks
    }

    fn task_sets(&self) -> &dyn crate::store::TaskSetStore {
        &self.task_sets
    }

    fn container_instances(&self) -> &dyn crate::store::ContainerInstanceStore {
        &self.container_instances
    }

    fn attributes(&self) -> &dyn crate::store::AttributeStore {
        &self.attributes
    }

    fn account_settings(&self) -> &dyn crate::store::AccountSettingStore {
        &self.account_settings
    }

    fn elbv2(&self) -> &dyn crate::store::ElbV2Store {
        &self.elbv2
    }

    fn task_logs(&self) -> &dyn crate::store::TaskLogStore {
        &self.task_logs
    }

    async fn begin_tx(&self) -> Result<Box<dyn StorageTx>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

/// sqlx rolls the inner transaction back when it is dropped uncommitted.
struct SqliteTx {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

#[async_trait]
impl StorageTx for SqliteTx {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    async fn create_task(&mut self, t: &Task) -> Result<()> {
        task::bind_insert(t).execute(&mut *self.tx).await?;
        Ok(())
    }

    async fn adjust_cluster_counters(
        &mut self,
        cluster_arn: &str,
        services_delta: i32,
        running_delta: i32,
        pending_delta: i32,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE clusters
            SET active_services_count = active_services_count + ?,
                running_tasks_count = running_tasks_count + ?,
                pending_tasks_count = pending_tasks_count + ?,
                updated_at = ?
            WHERE arn = ?
            "#,
        )
        .bind(services_delta)
        .bind(running_delta)
        .bind(pending_delta)
        .bind(chrono::Utc::now())
        .bind(cluster_arn)
        .execute(&mut *self.tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("cluster", cluster_arn));
        }
        Ok(())
    }
}

/// Split a window-function result set into `(items, next_token)`.
pub(crate) fn page_from_rows<T>(rows: &[SqliteRow], offset: i64) -> Result<Page<T>>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow>,
{
    let full_count: i64 = match rows.first() {
        Some(row) => row.try_get("full_count").map_err(Error::from)?,
        None => 0,
    };
    let items = rows
        .iter()
        .map(T::from_row)
        .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
    let token = pagination::next_token(offset, items.len(), full_count);
    Ok((items, token))
}
