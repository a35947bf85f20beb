use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{models::TaskSet, store::TaskSetStore};

const COLUMNS: &str = "id, arn, service_arn, cluster_arn, external_id, task_definition_arn, \
     launch_type, status, stability_status, scale_value, scale_unit, computed_desired_count, \
     started_by, region, account_id, created_at, updated_at";

fn from_row(row: &Row) -> TaskSet {
    TaskSet {
        id: row.get("id"),
        arn: row.get("arn"),
        service_arn: row.get("service_arn"),
        cluster_arn: row.get("cluster_arn"),
        external_id: row.get("external_id"),
        task_definition_arn: row.get("task_definition_arn"),
        launch_type: row.get("launch_type"),
        status: row.get("status"),
        stability_status: row.get("stability_status"),
        scale_value: row.get("scale_value"),
        scale_unit: row.get("scale_unit"),
        computed_desired_count: row.get("computed_desired_count"),
        started_by: row.get("started_by"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct TaskSetRepo {
    pool: Pool,
}

impl TaskSetRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskSetStore for TaskSetRepo {
    async fn create(&self, ts: &TaskSet) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO task_sets ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        client
            .execute(
                &sql,
                &[
                    &ts.id,
                    &ts.arn,
                    &ts.service_arn,
                    &ts.cluster_arn,
                    &ts.external_id,
                    &ts.task_definition_arn,
                    &ts.launch_type,
                    &ts.status,
                    &ts.stability_status,
                    &ts.scale_value,
                    &ts.scale_unit,
                    &ts.computed_desired_count,
                    &ts.started_by,
                    &ts.region,
                    &ts.account_id,
                    &ts.created_at,
                    &ts.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, service_arn: &str, id: &str) -> Result<Option<TaskSet>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM task_sets WHERE service_arn = $1 AND id = $2");
        let row = client.query_opt(&sql, &[&service_arn, &id]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn update(&self, ts: &TaskSet) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                UPDATE task_sets
                SET status = $1, stability_status = $2, scale_value = $3, scale_unit = $4,
                    computed_desired_count = $5, updated_at = NOW()
                WHERE service_arn = $6 AND id = $7
                "#,
                &[
                    &ts.status,
                    &ts.stability_status,
                    &ts.scale_value,
                    &ts.scale_unit,
                    &ts.computed_desired_count,
                    &ts.service_arn,
                    &ts.id,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("task set", &ts.id));
        }
        Ok(())
    }

    async fn delete(&self, service_arn: &str, id: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM task_sets WHERE service_arn = $1 AND id = $2",
                &[&service_arn, &id],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("task set", id));
        }
        Ok(())
    }

    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSet>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {COLUMNS} FROM task_sets WHERE service_arn = $1 ORDER BY created_at ASC"
        );
        let rows = client.query(&sql, &[&service_arn]).await?;
        Ok(rows.iter().map(from_row).collect())
    }
}
