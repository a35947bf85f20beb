use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kecs_common::{Error, Result};
use sqlx::sqlite::{SqliteArguments, SqlitePool};

use crate::{
    models::{Task, task_status},
    pagination,
    store::{Page, TaskFilters, TaskStore},
};

const COLUMNS: &str = "id, arn, cluster_arn, task_definition_arn, container_instance_arn, \
     last_status, desired_status, launch_type, connectivity, connectivity_at, containers, \
     overrides, attachments, attributes, started_by, group_name, stop_code, stopped_reason, \
     cpu, memory, pull_started_at, pull_stopped_at, started_at, stopping_at, stopped_at, \
     execution_stopped_at, pod_name, namespace, version, region, account_id, created_at, \
     updated_at";

const INSERT_SQL: &str = "INSERT INTO tasks (id, arn, cluster_arn, task_definition_arn, \
     container_instance_arn, last_status, desired_status, launch_type, connectivity, \
     connectivity_at, containers, overrides, attachments, attributes, started_by, group_name, \
     stop_code, stopped_reason, cpu, memory, pull_started_at, pull_stopped_at, started_at, \
     stopping_at, stopped_at, execution_stopped_at, pod_name, namespace, version, region, \
     account_id, created_at, updated_at) VALUES \
     (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)";

/// Bind every column of a task insert; shared with the transaction handle.
pub(crate) fn bind_insert(t: &Task) -> sqlx::query::Query<'_, sqlx::Sqlite, SqliteArguments<'_>> {
    sqlx::query(INSERT_SQL)
        .bind(t.id.as_str())
        .bind(t.arn.as_str())
        .bind(t.cluster_arn.as_str())
        .bind(t.task_definition_arn.as_str())
        .bind(t.container_instance_arn.as_deref())
        .bind(t.last_status.as_str())
        .bind(t.desired_status.as_str())
        .bind(t.launch_type.as_str())
        .bind(t.connectivity.as_deref())
        .bind(t.connectivity_at)
        .bind(t.containers.as_str())
        .bind(t.overrides.as_deref())
        .bind(t.attachments.as_deref())
        .bind(t.attributes.as_deref())
        .bind(t.started_by.as_deref())
        .bind(t.group_name.as_deref())
        .bind(t.stop_code.as_deref())
        .bind(t.stopped_reason.as_deref())
        .bind(t.cpu.as_deref())
        .bind(t.memory.as_deref())
        .bind(t.pull_started_at)
        .bind(t.pull_stopped_at)
        .bind(t.started_at)
        .bind(t.stopping_at)
        .bind(t.stopped_at)
        .bind(t.execution_stopped_at)
        .bind(t.pod_name.as_deref())
        .bind(t.namespace.as_deref())
        .bind(t.version)
        .bind(t.region.as_str())
        .bind(t.account_id.as_str())
        .bind(t.created_at)
        .bind(t.updated_at)
}

pub struct TaskRepo {
    pool: SqlitePool,
}

impl TaskRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for TaskRepo {
    async fn create(&self, t: &Task) -> Result<()> {
        bind_insert(t).execute(&self.pool).await?;
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Task>> {
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE arn = ?");
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn update(&self, t: &Task) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET container_instance_arn = ?, last_status = ?, desired_status = ?,
                connectivity = ?, connectivity_at = ?, containers = ?, attachments = ?,
                stop_code = ?, stopped_reason = ?, pull_started_at = ?, pull_stopped_at = ?,
                started_at = ?, stopping_at = ?, stopped_at = ?, execution_stopped_at = ?,
                pod_name = ?, namespace = ?, version = version + 1, updated_at = ?
            WHERE arn = ?
            "#,
        )
        .bind(t.container_instance_arn.as_deref())
        .bind(t.last_status.as_str())
        .bind(t.desired_status.as_str())
        .bind(t.connectivity.as_deref())
        .bind(t.connectivity_at)
        .bind(t.containers.as_str())
        .bind(t.attachments.as_deref())
        .bind(t.stop_code.as_deref())
        .bind(t.stopped_reason.as_deref())
        .bind(t.pull_started_at)
        .bind(t.pull_stopped_at)
        .bind(t.started_at)
        .bind(t.stopping_at)
        .bind(t.stopped_at)
        .bind(t.execution_stopped_at)
        .bind(t.pod_name.as_deref())
        .bind(t.namespace.as_deref())
        .bind(chrono::Utc::now())
        .bind(t.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("task", &t.arn));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM tasks WHERE arn = ?")
            .bind(arn)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("task", arn));
        }
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        filters: &TaskFilters,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Task>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM tasks WHERE cluster_arn = ?"
        );
        if filters.service_name.is_some() {
            sql.push_str(" AND started_by = 'ecs-svc/' || ?");
        }
        if filters.family.is_some() {
            sql.push_str(" AND task_definition_arn LIKE '%task-definition/' || ? || ':%'");
        }
        if filters.desired_status.is_some() {
            sql.push_str(" AND desired_status = ?");
        }
        if filters.started_by.is_some() {
            sql.push_str(" AND started_by = ?");
        }
        if filters.launch_type.is_some() {
            sql.push_str(" AND launch_type = ?");
        }
        sql.push_str(" ORDER BY created_at ASC, arn ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql).bind(cluster_arn);
        for filter in [
            &filters.service_name,
            &filters.family,
            &filters.desired_status,
            &filters.started_by,
            &filters.launch_type,
        ]
        .into_iter()
        .flatten()
        {
            query = query.bind(filter.as_str());
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        super::page_from_rows(&rows, offset)
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Task>> {
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; arns.len()].join(", ");
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE arn IN ({placeholders})");
        let mut query = sqlx::query_as::<_, Task>(&sql);
        for arn in arns {
            query = query.bind(arn.as_str());
        }
        let tasks = query.fetch_all(&self.pool).await?;
        Ok(tasks)
    }

    async fn count_running(&self, cluster_arn: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tasks WHERE cluster_arn = ? AND last_status != ? \
             AND desired_status != ?",
        )
        .bind(cluster_arn)
        .bind(task_status::STOPPED)
        .bind(task_status::STOPPED)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn delete_older_than(
        &self,
        cluster_arn: &str,
        before: DateTime<Utc>,
        status: &str,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE cluster_arn = ? AND last_status = ? \
             AND COALESCE(stopped_at, updated_at) < ?",
        )
        .bind(cluster_arn)
        .bind(status)
        .bind(before)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_stale(&self, cluster_arn: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let result =
            sqlx::query("DELETE FROM tasks WHERE cluster_arn = ? AND last_status = ? AND updated_at < ?")
                .bind(cluster_arn)
                .bind(task_status::STOPPED)
                .bind(cutoff)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}
