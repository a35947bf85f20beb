use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::Result;
use tokio_postgres::Row;

use crate::{
    models::TaskLog,
    store::{TaskLogFilters, TaskLogStore},
};

const COLUMNS: &str = "id, task_arn, container_name, timestamp, log_line, log_level, created_at";

fn from_row(row: &Row) -> TaskLog {
    TaskLog {
        id: row.get("id"),
        task_arn: row.get("task_arn"),
        container_name: row.get("container_name"),
        timestamp: row.get("timestamp"),
        log_line: row.get("log_line"),
        log_level: row.get("log_level"),
        created_at: row.get("created_at"),
    }
}

pub struct TaskLogRepo {
    pool: Pool,
}

impl TaskLogRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogStore for TaskLogRepo {
    async fn save_logs(&self, logs: &[TaskLog]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let client = self.pool.get().await?;
        // One statement per batch keeps collection under its deadline even
        // for chatty containers.
        let mut sql = String::from(
            "INSERT INTO task_logs \
             (task_arn, container_name, timestamp, log_line, log_level, created_at) VALUES ",
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
            Vec::with_capacity(logs.len() * 6);
        for (i, log) in logs.iter().enumerate() {
            if i > 0 {
                sql.push_str(", ");
            }
            let base = i * 6;
            sql.push_str(&format!(
                "(${}, ${}, ${}, ${}, ${}, ${})",
                base + 1,
                base + 2,
                base + 3,
                base + 4,
                base + 5,
                base + 6
            ));
            params.push(&log.task_arn);
            params.push(&log.container_name);
            params.push(&log.timestamp);
            params.push(&log.log_line);
            params.push(&log.log_level);
            params.push(&log.created_at);
        }
        client.execute(&sql, &params).await?;
        Ok(())
    }

    async fn list(
        &self,
        task_arn: &str,
        filters: &TaskLogFilters,
        limit: i64,
    ) -> Result<Vec<TaskLog>> {
        let client = self.pool.get().await?;
        let mut sql = format!("SELECT {COLUMNS} FROM task_logs WHERE task_arn = $1");
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&task_arn];
        if let Some(ref container) = filters.container_name {
            params.push(container);
            sql.push_str(&format!(" AND container_name = ${}", params.len()));
        }
        if let Some(ref level) = filters.log_level {
            params.push(level);
            sql.push_str(&format!(" AND log_level = ${}", params.len()));
        }
        if let Some(ref since) = filters.since {
            params.push(since);
            sql.push_str(&format!(" AND timestamp >= ${}", params.len()));
        }
        if let Some(ref until) = filters.until {
            params.push(until);
            sql.push_str(&format!(" AND timestamp <= ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY timestamp ASC, id ASC LIMIT ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(rows.iter().map(from_row).collect())
    }

    async fn delete_orphaned(&self) -> Result<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM task_logs WHERE task_arn NOT IN (SELECT arn FROM tasks)",
                &[],
            )
            .await?;
        Ok(removed)
    }
}
