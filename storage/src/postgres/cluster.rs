use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::Cluster,
    store::{ClusterStore, Page},
};

const COLUMNS: &str = "id, arn, name, status, region, account_id, configuration, settings, tags, \
     capacity_providers, default_capacity_provider_strategy, active_services_count, \
     running_tasks_count, pending_tasks_count, registered_container_instances_count, \
     k8s_cluster_name, created_at, updated_at";

fn from_row(row: &Row) -> Cluster {
    Cluster {
        id: row.get("id"),
        arn: row.get("arn"),
        name: row.get("name"),
        status: row.get("status"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        configuration: row.get("configuration"),
        settings: row.get("settings"),
        tags: row.get("tags"),
        capacity_providers: row.get("capacity_providers"),
        default_capacity_provider_strategy: row.get("default_capacity_provider_strategy"),
        active_services_count: row.get("active_services_count"),
        running_tasks_count: row.get("running_tasks_count"),
        pending_tasks_count: row.get("pending_tasks_count"),
        registered_container_instances_count: row.get("registered_container_instances_count"),
        k8s_cluster_name: row.get("k8s_cluster_name"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct ClusterRepo {
    pool: Pool,
}

impl ClusterRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn get_where(&self, predicate: &str, key: &str) -> Result<Option<Cluster>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM clusters WHERE {predicate} = $1");
        let row = client.query_opt(&sql, &[&key]).await?;
        Ok(row.as_ref().map(from_row))
    }
}

#[async_trait]
impl ClusterStore for ClusterRepo {
    async fn create(&self, c: &Cluster) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO clusters ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)"
        );
        client
            .execute(
                &sql,
                &[
                    &c.id,
                    &c.arn,
                    &c.name,
                    &c.status,
                    &c.region,
                    &c.account_id,
                    &c.configuration,
                    &c.settings,
                    &c.tags,
                    &c.capacity_providers,
                    &c.default_capacity_provider_strategy,
                    &c.active_services_count,
                    &c.running_tasks_count,
                    &c.pending_tasks_count,
                    &c.registered_container_instances_count,
                    &c.k8s_cluster_name,
                    &c.created_at,
                    &c.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Option<Cluster>> {
        self.get_where("name", name).await
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<Cluster>> {
        self.get_where("arn", arn).await
    }

    async fn update(&self, c: &Cluster) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                UPDATE clusters
                SET status = $1, configuration = $2, settings = $3, tags = $4,
                    capacity_providers = $5, default_capacity_provider_strategy = $6,
                    active_services_count = $7, running_tasks_count = $8,
                    pending_tasks_count = $9, registered_container_instances_count = $10,
                    k8s_cluster_name = $11, updated_at = NOW()
                WHERE arn = $12
                "#,
                &[
                    &c.status,
                    &c.configuration,
                    &c.settings,
                    &c.tags,
                    &c.capacity_providers,
                    &c.default_capacity_provider_strategy,
                    &c.active_services_count,
                    &c.running_tasks_count,
                    &c.pending_tasks_count,
                    &c.registered_container_instances_count,
                    &c.k8s_cluster_name,
                    &c.arn,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("cluster", &c.name));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM clusters WHERE name = $1", &[&name])
            .await?;
        if affected == 0 {
            return Err(Error::not_found("cluster", name));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM clusters ORDER BY name ASC");
        let rows = client.query(&sql, &[]).await?;
        Ok(rows.iter().map(from_row).collect())
    }

    async fn list_paginated(&self, limit: i64, token: Option<&str>) -> Result<Page<Cluster>> {
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM clusters \
             ORDER BY name ASC LIMIT $1 OFFSET $2"
        );
        let rows = client.query(&sql, &[&limit, &offset]).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }
}
