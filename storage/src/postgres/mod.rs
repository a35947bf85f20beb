//! Networked storage backend: PostgreSQL behind a deadpool connection pool.
//!
//! Selected when configuration asks for the networked backend and supplies a
//! connection URL. Safe for concurrent emulator processes; the schema matches
//! the embedded backend semantically.

use async_trait::async_trait;
use deadpool_postgres::{Config as PgConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use kecs_common::{Error, Result};
use tokio_postgres::NoTls;

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

pub struct PostgresStorage {
    pool: Pool,
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

impl PostgresStorage {
    /// Connect to the database at `url` and bootstrap the schema.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut cfg = PgConfig::new();
        cfg.url = Some(url.to_string());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::invalid_input(format!("invalid storage url: {e}")))?;
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
impl Storage for PostgresStorage {
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
        let client = self.pool.get().await?;
        client.execute("BEGIN", &[]).await?;
        Ok(Box::new(PostgresTx {
            client: Some(client),
        }))
    }
}

struct PostgresTx {
    client: Option<deadpool_postgres::Object>,
}

impl PostgresTx {
    fn client(&self) -> &deadpool_postgres::Object {
        self.client
            .as_ref()
            .expect("transaction used after completion")
    }
}

impl Drop for PostgresTx {
    fn drop(&mut self) {
        // Uncommitted on drop: detach the connection from the pool and roll
        // back in the background so the pool never recycles a connection with
        // an open transaction.
        if let Some(object) = self.client.take() {
            let client = deadpool_postgres::Object::take(object);
            tokio::spawn(async move {
                if let Err(err) = client.execute("ROLLBACK", &[]).await {
                    tracing::warn!(error = %err, "rollback of dropped transaction failed");
                }
            });
        }
    }
}

#[async_trait]
impl StorageTx for PostgresTx {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        self.client().execute("COMMIT", &[]).await?;
        self.client = None;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        self.client().execute("ROLLBACK", &[]).await?;
        self.client = None;
        Ok(())
    }

    async fn create_task(&mut self, t: &Task) -> Result<()> {
        self.client()
            .execute(task::INSERT_SQL, &task::insert_params(t))
            .await?;
        Ok(())
    }

    async fn adjust_cluster_counters(
        &mut self,
        cluster_arn: &str,
        services_delta: i32,
        running_delta: i32,
        pending_delta: i32,
    ) -> Result<()> {
        let affected = self
            .client()
            .execute(
                r#"
                UPDATE clusters
                SET active_services_count = active_services_count + $1,
                    running_tasks_count = running_tasks_count + $2,
                    pending_tasks_count = pending_tasks_count + $3,
                    updated_at = NOW()
                WHERE arn = $4
                "#,
                &[&services_delta, &running_delta, &pending_delta, &cluster_arn],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("cluster", cluster_arn));
        }
        Ok(())
    }
}

/// Split a window-function result set into `(items, next_token)`.
pub(crate) fn page_from_rows<T>(
    rows: &[tokio_postgres::Row],
    offset: i64,
    map: impl Fn(&tokio_postgres::Row) -> T,
) -> Page<T> {
    let full_count: i64 = rows.first().map(|r| r.get("full_count")).unwrap_or(0);
    let items: Vec<T> = rows.iter().map(map).collect();
    let token = pagination::next_token(offset, items.len(), full_count);
    (items, token)
}

pub(crate) fn decode_offset(token: Option<&str>) -> Result<i64> {
    match token {
        Some(t) => pagination::decode_token(t),
        None => Ok(0),
    }
}
