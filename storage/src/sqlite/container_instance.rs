use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{
    models::ContainerInstance,
    pagination,
    store::{ContainerInstanceStore, Page},
};

const COLUMNS: &str = "id, arn, cluster_arn, ec2_instance_id, status, agent_connected, \
     running_tasks_count, pending_tasks_count, attributes, registered_resources, \
     remaining_resources, version_info, tags, region, account_id, created_at, updated_at";

pub struct ContainerInstanceRepo {
    pool: SqlitePool,
}

impl ContainerInstanceRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContainerInstanceStore for ContainerInstanceRepo {
    async fn create(&self, ci: &ContainerInstance) -> Result<()> {
        let sql = format!(
            "INSERT INTO container_instances ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(ci.id.as_str())
            .bind(ci.arn.as_str())
            .bind(ci.cluster_arn.as_str())
            .bind(ci.ec2_instance_id.as_deref())
            .bind(ci.status.as_str())
            .bind(ci.agent_connected)
            .bind(ci.running_tasks_count)
            .bind(ci.pending_tasks_count)
            .bind(ci.attributes.as_deref())
            .bind(ci.registered_resources.as_deref())
            .bind(ci.remaining_resources.as_deref())
            .bind(ci.version_info.as_deref())
            .bind(ci.tags.as_deref())
            .bind(ci.region.as_str())
            .bind(ci.account_id.as_str())
            .bind(ci.created_at)
            .bind(ci.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<ContainerInstance>> {
        let sql = format!("SELECT {COLUMNS} FROM container_instances WHERE arn = ?");
        let ci = sqlx::query_as::<_, ContainerInstance>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ci)
    }

    async fn update(&self, ci: &ContainerInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE container_instances
            SET status = ?, agent_connected = ?, running_tasks_count = ?,
                pending_tasks_count = ?, attributes = ?, remaining_resources = ?,
                version_info = ?, tags = ?, updated_at = ?
            WHERE arn = ?
            "#,
        )
        .bind(ci.status.as_str())
        .bind(ci.agent_connected)
        .bind(ci.running_tasks_count)
        .bind(ci.pending_tasks_count)
        .bind(ci.attributes.as_deref())
        .bind(ci.remaining_resources.as_deref())
        .bind(ci.version_info.as_deref())
        .bind(ci.tags.as_deref())
        .bind(chrono::Utc::now())
        .bind(ci.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("container instance", &ci.arn));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM container_instances WHERE arn = ?")
            .bind(arn)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("container instance", arn));
        }
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<ContainerInstance>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM container_instances \
             WHERE cluster_arn = ?"
        );
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY arn ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql).bind(cluster_arn);
        if let Some(status) = status {
            query = query.bind(status);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        super::page_from_rows(&rows, offset)
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<ContainerInstance>> {
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; arns.len()].join(", ");
        let sql = format!("SELECT {COLUMNS} FROM container_instances WHERE arn IN ({placeholders})");
        let mut query = sqlx::query_as::<_, ContainerInstance>(&sql);
        for arn in arns {
            query = query.bind(arn.as_str());
        }
        let instances = query.fetch_all(&self.pool).await?;
        Ok(instances)
    }
}
