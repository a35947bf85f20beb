use async_trait::async_trait;
use kecs_common::Result;
use sqlx::sqlite::SqlitePool;

use crate::{
    models::TaskLog,
    store::{TaskLogFilters, TaskLogStore},
};

pub struct TaskLogRepo {
    pool: SqlitePool,
}

impl TaskLogRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskLogStore for TaskLogRepo {
    async fn save_logs(&self, logs: &[TaskLog]) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        // One statement per batch keeps collection under its deadline even
        // for chatty containers.
        let mut sql = String::from(
            "INSERT INTO task_logs \
             (task_arn, container_name, timestamp, log_line, log_level, created_at) VALUES ",
        );
        sql.push_str(&vec!["(?, ?, ?, ?, ?, ?)"; logs.len()].join(", "));
        let mut query = sqlx::query(&sql);
        for log in logs {
            query = query
                .bind(log.task_arn.as_str())
                .bind(log.container_name.as_str())
                .bind(log.timestamp)
                .bind(log.log_line.as_str())
                .bind(log.log_level.as_str())
                .bind(log.created_at);
        }
        query.execute(&self.pool).await?;
        Ok(())
    }

    async fn list(
        &self,
        task_arn: &str,
        filters: &TaskLogFilters,
        limit: i64,
    ) -> Result<Vec<TaskLog>> {
        let mut sql = String::from(
            "SELECT id, task_arn, container_name, timestamp, log_line, log_level, created_at \
             FROM task_logs WHERE task_arn = ?",
        );
        if filters.container_name.is_some() {
            sql.push_str(" AND container_name = ?");
        }
        if filters.log_level.is_some() {
            sql.push_str(" AND log_level = ?");
        }
        if filters.since.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if filters.until.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp ASC, id ASC LIMIT ?");
        let mut query = sqlx::query_as::<_, TaskLog>(&sql).bind(task_arn);
        if let Some(ref container) = filters.container_name {
            query = query.bind(container.as_str());
        }
        if let Some(ref level) = filters.log_level {
            query = query.bind(level.as_str());
        }
        if let Some(since) = filters.since {
            query = query.bind(since);
        }
        if let Some(until) = filters.until {
            query = query.bind(until);
        }
        let logs = query.bind(limit).fetch_all(&self.pool).await?;
        Ok(logs)
    }

    async fn delete_orphaned(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM task_logs WHERE task_arn NOT IN (SELECT arn FROM tasks)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
