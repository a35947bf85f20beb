use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{models::TaskSet, store::TaskSetStore};

const COLUMNS: &str = "id, arn, service_arn, cluster_arn, external_id, task_definition_arn, \
     launch_type, status, stability_status, scale_value, scale_unit, computed_desired_count, \
     started_by, region, account_id, created_at, updated_at";

pub struct TaskSetRepo {
    pool: SqlitePool,
}

impl TaskSetRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskSetStore for TaskSetRepo {
    async fn create(&self, ts: &TaskSet) -> Result<()> {
        let sql = format!(
            "INSERT INTO task_sets ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(ts.id.as_str())
            .bind(ts.arn.as_str())
            .bind(ts.service_arn.as_str())
            .bind(ts.cluster_arn.as_str())
            .bind(ts.external_id.as_deref())
            .bind(ts.task_definition_arn.as_str())
            .bind(ts.launch_type.as_str())
            .bind(ts.status.as_str())
            .bind(ts.stability_status.as_str())
            .bind(ts.scale_value)
            .bind(ts.scale_unit.as_str())
            .bind(ts.computed_desired_count)
            .bind(ts.started_by.as_deref())
            .bind(ts.region.as_str())
            .bind(ts.account_id.as_str())
            .bind(ts.created_at)
            .bind(ts.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, service_arn: &str, id: &str) -> Result<Option<TaskSet>> {
        let sql = format!("SELECT {COLUMNS} FROM task_sets WHERE service_arn = ? AND id = ?");
        let ts = sqlx::query_as::<_, TaskSet>(&sql)
            .bind(service_arn)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(ts)
    }

    async fn update(&self, ts: &TaskSet) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE task_sets
            SET status = ?, stability_status = ?, scale_value = ?, scale_unit = ?,
                computed_desired_count = ?, updated_at = ?
            WHERE service_arn = ? AND id = ?
            "#,
        )
        .bind(ts.status.as_str())
        .bind(ts.stability_status.as_str())
        .bind(ts.scale_value)
        .bind(ts.scale_unit.as_str())
        .bind(ts.computed_desired_count)
        .bind(chrono::Utc::now())
        .bind(ts.service_arn.as_str())
        .bind(ts.id.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("task set", &ts.id));
        }
        Ok(())
    }

    async fn delete(&self, service_arn: &str, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM task_sets WHERE service_arn = ? AND id = ?")
            .bind(service_arn)
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("task set", id));
        }
        Ok(())
    }

    async fn list(&self, service_arn: &str) -> Result<Vec<TaskSet>> {
        let sql =
            format!("SELECT {COLUMNS} FROM task_sets WHERE service_arn = ? ORDER BY created_at ASC");
        let sets = sqlx::query_as::<_, TaskSet>(&sql)
            .bind(service_arn)
            .fetch_all(&self.pool)
            .await?;
        Ok(sets)
    }
}
