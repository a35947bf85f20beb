use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::{Row, types::ToSql};

use crate::{
    models::{Task, task_status},
    store::{Page, TaskFilters, TaskStore},
};

const COLUMNS: &str = "id, arn, cluster_arn, task_definition_arn, container_instance_arn, \
     last_status, desired_status, launch_type, connectivity, connectivity_at, containers, \
     overrides, attachments, attributes, started_by, group_name, stop_code, stopped_reason, \
     cpu, memory, pull_started_at, pull_stopped_at, started_at, stopping_at, stopped_at, \
     execution_stopped_at, pod_name, namespace, version, region, account_id, created_at, \
     updated_at";

pub(crate) const INSERT_SQL: &str = "INSERT INTO tasks (id, arn, cluster_arn, \
     task_definition_arn, container_instance_arn, last_status, desired_status, launch_type, \
     connectivity, connectivity_at, containers, overrides, attachments, attributes, started_by, \
     group_name, stop_code, stopped_reason, cpu, memory, pull_started_at, pull_stopped_at, \
     started_at, stopping_at, stopped_at, execution_stopped_at, pod_name, namespace, version, \
     region, account_id, created_at, updated_at) VALUES \
     ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, \
      $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33)";

/// Parameter list for a task insert; shared with the transaction handle.
pub(crate) fn insert_params(t: &Task) -> [&(dyn ToSql + Sync); 33] {
    [
        &t.id,
        &t.arn,
        &t.cluster_arn,
        &t.task_definition_arn,
        &t.container_instance_arn,
        &t.last_status,
        &t.desired_status,
        &t.launch_type,
        &t.connectivity,
        &t.connectivity_at,
        &t.containers,
        &t.overrides,
        &t.attachments,
        &t.attributes,
        &t.started_by,
        &t.group_name,
        &t.stop_code,
        &t.stopped_reason,
        &t.cpu,
        &t.memory,
        &t.pull_started_at,
        &t.pull_stopped_at,
        &t.started_at,
        &t.stopping_at,
        &t.stopped_at,
        &t.execution_stopped_at,
        &t.pod_name,
        &t.namespace,
        &t.version,
        &t.region,
        &t.account_id,
        &t.created_at,
        &t.updated_at,
    ]
}

fn from_row(row: &Row) -> Task {
    Task {
        id: row.get("id"),
        arn: row.get("arn"),
        cluster_arn: row.get("cluster_arn"),
        task_definition_arn: row.get("task_definition_arn"),
        container_instance_arn: row.get("container_instance_arn"),
        last_status: row.get("last_status"),
        desired_status: row.get("desired_status"),
        launch_type: row.get("launch_type"),
        connectivity: row.get("connectivity"),
        connectivity_at: row.get("connectivity_at"),
        containers: row.get("containers"),
        overrides: row.get("overrides"),
        attachments: row.get("attachments"),
        attributes: row.get("attributes"),
        started_by: row.get("started_by"),
        group_name: row.get("group_name"),
        stop_code: row.get("stop_code"),
        stopped_reason: row.get("stopped_reason"),
        cpu: row.get("cpu"),
        memory: row.get("memory"),
        pull_started_at: row.get("pull_started_at"),
        pull_stopped_at: row.get("pull_stopped_at"),
        started_at: row.get("started_at"),
        stopping_at: row.get("stopping_at"),
        stopped_at: row.get("stopped_at"),
        execution_stopped_at: row.get("execution_stopped_at"),
        pod_name: row.get("pod_name"),
        namespace: row.get("namespace"),
        version: row.get("version"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct TaskRepo {
    pool: Pool,
}

impl TaskRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for TaskRepo {
    async fn create(&self, t: &Task) -> Result<()> {
        let client = self.pool.get().await?;
        client.execute(INSERT_SQL, &insert_params(t)).await?;
        Ok(())
    }

    async fn get(&self, arn: &str) -> Result<Option<Task>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn update(&self, t: &Task) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                r#"
                UPDATE tasks
                SET container_instance_arn = $1, last_status = $2, desired_status = $3,
                    connectivity = $4, connectivity_at = $5, containers = $6, attachments = $7,
                    stop_code = $8, stopped_reason = $9, pull_started_at = $10,
                    pull_stopped_at = $11, started_at = $12, stopping_at = $13, stopped_at = $14,
                    execution_stopped_at = $15, pod_name = $16, namespace = $17,
                    version = version + 1, updated_at = NOW()
                WHERE arn = $18
                "#,
                &[
                    &t.container_instance_arn,
                    &t.last_status,
                    &t.desired_status,
                    &t.connectivity,
                    &t.connectivity_at,
                    &t.containers,
                    &t.attachments,
                    &t.stop_code,
                    &t.stopped_reason,
                    &t.pull_started_at,
                    &t.pull_stopped_at,
                    &t.started_at,
                    &t.stopping_at,
                    &t.stopped_at,
                    &t.execution_stopped_at,
                    &t.pod_name,
                    &t.namespace,
                    &t.arn,
                ],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("task", &t.arn));
        }
        Ok(())
    }

    async fn delete(&self, arn: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute("DELETE FROM tasks WHERE arn = $1", &[&arn])
            .await?;
        if affected == 0 {
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
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let service_started_by = filters.service_name.as_ref().map(|s| format!("ecs-svc/{s}"));
        let family_pattern = filters
            .family
            .as_ref()
            .map(|f| format!("%task-definition/{f}:%"));
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM tasks WHERE cluster_arn = $1"
        );
        let mut params: Vec<&(dyn ToSql + Sync)> = vec![&cluster_arn];
        if let Some(ref started_by) = service_started_by {
            params.push(started_by);
            sql.push_str(&format!(" AND started_by = ${}", params.len()));
        }
        if let Some(ref pattern) = family_pattern {
            params.push(pattern);
            sql.push_str(&format!(" AND task_definition_arn LIKE ${}", params.len()));
        }
        if let Some(ref desired) = filters.desired_status {
            params.push(desired);
            sql.push_str(&format!(" AND desired_status = ${}", params.len()));
        }
        if let Some(ref started_by) = filters.started_by {
            params.push(started_by);
            sql.push_str(&format!(" AND started_by = ${}", params.len()));
        }
        if let Some(ref launch_type) = filters.launch_type {
            params.push(launch_type);
            sql.push_str(&format!(" AND launch_type = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY created_at ASC, arn ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }

    async fn get_by_arns(&self, arns: &[String]) -> Result<Vec<Task>> {
        if arns.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM tasks WHERE arn = ANY($1)");
        let rows = client.query(&sql, &[&arns]).await?;
        Ok(rows.iter().map(from_row).collect())
    }

    async fn count_running(&self, cluster_arn: &str) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                "SELECT COUNT(*) AS n FROM tasks WHERE cluster_arn = $1 \
                 AND last_status != $2 AND desired_status != $2",
                &[&cluster_arn, &task_status::STOPPED],
            )
            .await?;
        Ok(row.get("n"))
    }

    async fn delete_older_than(
        &self,
        cluster_arn: &str,
        before: DateTime<Utc>,
        status: &str,
    ) -> Result<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM tasks WHERE cluster_arn = $1 AND last_status = $2 \
                 AND COALESCE(stopped_at, updated_at) < $3",
                &[&cluster_arn, &status, &before],
            )
            .await?;
        Ok(removed)
    }

    async fn delete_stale(&self, cluster_arn: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let client = self.pool.get().await?;
        let removed = client
            .execute(
                "DELETE FROM tasks WHERE cluster_arn = $1 AND last_status = $2 AND updated_at < $3",
                &[&cluster_arn, &task_status::STOPPED, &cutoff],
            )
            .await?;
        Ok(removed)
    }
}
