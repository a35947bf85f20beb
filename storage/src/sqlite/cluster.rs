use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{
    models::Cluster,
    pagination,
    store::{ClusterStore, Page},
};

const COLUMNS: &str = "id, arn, name, status, region, account_id, configuration, settings, tags, \
     capacity_providers, default_capacity_provider_strategy, active_services_count, \
     running_tasks_count, pending_tasks_count, registered_container_instances_count, \
     k8s_cluster_name, created_at, updated_at";

pub struct ClusterRepo {
    pool: SqlitePool,
}

impl ClusterRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn get_where(&self, predicate: &str, key: &str) -> Result<Option<Cluster>> {
        let sql = format!("SELECT {COLUMNS} FROM clusters WHERE {predicate} = ?");
        let cluster = sqlx::query_as::<_, Cluster>(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(cluster)
    }
}

#[async_trait]
impl ClusterStore for ClusterRepo {
    async fn create(&self, c: &Cluster) -> Result<()> {
        let sql = format!(
            "INSERT INTO clusters ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(c.id.as_str())
            .bind(c.arn.as_str())
            .bind(c.name.as_str())
            .bind(c.status.as_str())
            .bind(c.region.as_str())
            .bind(c.account_id.as_str())
            .bind(c.configuration.as_deref())
            .bind(c.settings.as_deref())
            .bind(c.tags.as_deref())
            .bind(c.capacity_providers.as_deref())
            .bind(c.default_capacity_provider_strategy.as_deref())
            .bind(c.active_services_count)
            .bind(c.running_tasks_count)
            .bind(c.pending_tasks_count)
            .bind(c.registered_container_instances_count)
            .bind(c.k8s_cluster_name.as_str())
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&self.pool)
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
        let result = sqlx::query(
            r#"
            UPDATE clusters
            SET status = ?, configuration = ?, settings = ?, tags = ?,
                capacity_providers = ?, default_capacity_provider_strategy = ?,
                active_services_count = ?, running_tasks_count = ?,
                pending_tasks_count = ?, registered_container_instances_count = ?,
                k8s_cluster_name = ?, updated_at = ?
            WHERE arn = ?
            "#,
        )
        .bind(c.status.as_str())
        .bind(c.configuration.as_deref())
        .bind(c.settings.as_deref())
        .bind(c.tags.as_deref())
        .bind(c.capacity_providers.as_deref())
        .bind(c.default_capacity_provider_strategy.as_deref())
        .bind(c.active_services_count)
        .bind(c.running_tasks_count)
        .bind(c.pending_tasks_count)
        .bind(c.registered_container_instances_count)
        .bind(c.k8s_cluster_name.as_str())
        .bind(chrono::Utc::now())
        .bind(c.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("cluster", &c.name));
        }
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM clusters WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("cluster", name));
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Cluster>> {
        let sql = format!("SELECT {COLUMNS} FROM clusters ORDER BY name ASC");
        let clusters = sqlx::query_as::<_, Cluster>(&sql).fetch_all(&self.pool).await?;
        Ok(clusters)
    }

    async fn list_paginated(&self, limit: i64, token: Option<&str>) -> Result<Page<Cluster>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM clusters \
             ORDER BY name ASC LIMIT ? OFFSET ?"
        );
        let rows = sqlx::query(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        super::page_from_rows(&rows, offset)
    }
}
