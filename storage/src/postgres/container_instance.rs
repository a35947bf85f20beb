use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::ContainerInstance,
    store::{ContainerInstanceStore, Page},
};

const COLUMNS: &str = "id, arn, cluster_arn, ec2_instance_id, status, agent_connected, \
     running_tasks_count, pending_tasks_count, attributes, registered_resources, \
     remaining_resources, version_info, tags, region, account_id, created_at, updated_at";

fn from_row(row: &Row) -> ContainerInstance {
    ContainerInstance {
        id: row.get("id"),
        arn: row.get("arn"),
        cluster_arn: row.get("cluster_arn"),
        ec2_instance_id: row.get("ec2_instance_id"),
        status: row.get("status"),
        agent_connected: row.get("agent_connected"),
        running_tasks_count: row.get("running_tasks_count"),
        pending_tasks_count: row.get("pending_tasks_count"),
        attributes: row.get("attributes"),
        registered_resources: row.get("registered_resources"),
        remaining_resources: row.get("remaining_resources"),
        version_info: row.get("version_info"),
        tags: row.get("tags"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct ContainerInstanceRepo {
    pool: Pool,
}

impl ContainerInstanceRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ContainerInstanceStore for ContainerInstanceRepo {
    async fn create(&self, ci: &ContainerInstance) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO container_instances ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        client
            .execute(
                &sql,
                &[
                    &ci.id,
                    &ci.arn,
                    &ci.cluster_arn,
                    &ci.ec2_instance_id,
                    &ci.status,
                    &ci.agent_connected,
                    &ci.running_tasks_count,
                    &ci.pending_tasks_count,
                    &ci.attributes,
                    &ci.registered_resources,
                    &ci.remaining_resources,
                    &ci.version_info,
                    &ci.tags,
                    &ci.region,
                    &ci.account_id,
                    &ci.created_at,
                    &ci.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<ContainerInstance>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM container_instances WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn update(&self, ci: &ContainerInstance) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                UPDATE container_instances
                SET status = $1, agent_connected = $2, running_tasks_count = $3,
                    pending_tasks_count = $4, attributes = $5, remaining_resources = $6,
                    version_info = $7, tags = $8, updated_at = NOW()
                WHERE arn = $9
                "#,
                &[
                    &ci.status,
                    &ci.agent_connected,
                    &ci.running_tasks_count,
                    &ci.pending_tasks_count,
                    &ci.attributes,
                    &ci.remaining_resources,
                    &ci.version_info,
                    &ci.tags,
                    &ci.arn,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("container instance", &ci.arn));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM container_instances WHERE arn = $1", &[&arn])
            .await?;
        if affected == 0 {
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
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM container_instances \
             WHERE cluster_arn = $1"
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&cluster_arn];
        if let Some(ref status) = status {
            params.push(status);
            sql.push_str(&format!(" AND status = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY arn ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<ContainerInstance>> {
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM container_instances WHERE arn = ANY($1)");
        let rows = client.query(&sql, &[&arns]).await?;
        Ok(rows.iter().map(from_row).collect())
    }
}
