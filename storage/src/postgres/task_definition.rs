use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::TaskDefinition,
    store::{Page, TaskDefinitionStore},
};

const COLUMNS: &str = "id, arn, family, revision, status, region, account_id, \
     container_definitions, volumes, network_mode, requires_compatibilities, cpu, memory, \
     task_role_arn, execution_role_arn, placement_constraints, runtime_platform, ipc_mode, \
     pid_mode, tags, created_at, updated_at";

fn from_row(row: &Row) -> TaskDefinition {
    TaskDefinition {
        id: row.get("id"),
        arn: row.get("arn"),
        family: row.get("family"),
        revision: row.get("revision"),
        status: row.get("status"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        container_definitions: row.get("container_definitions"),
        volumes: row.get("volumes"),
        network_mode: row.get("network_mode"),
        requires_compatibilities: row.get("requires_compatibilities"),
        cpu: row.get("cpu"),
        memory: row.get("memory"),
        task_role_arn: row.get("task_role_arn"),
        execution_role_arn: row.get("execution_role_arn"),
        placement_constraints: row.get("placement_constraints"),
        runtime_platform: row.get("runtime_platform"),
        ipc_mode: row.get("ipc_mode"),
        pid_mode: row.get("pid_mode"),
        tags: row.get("tags"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct TaskDefinitionRepo {
    pool: Pool,
}

impl TaskDefinitionRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskDefinitionStore for TaskDefinitionRepo {
    async fn register(&self, td: &TaskDefinition) -> Result<TaskDefinition> {
        let mut client = self.pool.get().await?;
        // Revision allocation and insert happen in one transaction so two
        // concurrent registrations of the same family cannot share a revision.
        let tx = client.transaction().await?;
        let row = tx
            .query_one(
                "SELECT COALESCE(MAX(revision), 0) AS max_revision FROM task_definitions \
                 WHERE family = $1",
                &[&td.family],
            )
            .await?;
        let revision: i32 = row.get::<_, i32>("max_revision") + 1;

        let mut stored = td.clone();
        stored.revision = revision;
        stored.arn = format!(
            "arn:aws:ecs:{}:{}:task-definition/{}:{}",
            stored.region, stored.account_id, stored.family, revision
        );

        let sql = format!(
            "INSERT INTO task_definitions ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
              $19, $20, $21, $22)"
        );
        tx.execute(
            &sql,
            &[
                &stored.id,
                &stored.arn,
                &stored.family,
                &stored.revision,
                &stored.status,
                &stored.region,
                &stored.account_id,
                &stored.container_definitions,
                &stored.volumes,
                &stored.network_mode,
                &stored.requires_compatibilities,
                &stored.cpu,
                &stored.memory,
                &stored.task_role_arn,
                &stored.execution_role_arn,
                &stored.placement_constraints,
                &stored.runtime_platform,
                &stored.ipc_mode,
                &stored.pid_mode,
                &stored.tags,
                &stored.created_at,
                &stored.updated_at,
            ],
        )
        .await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>> {
        let client = self.pool.get().await?;
        let sql =
            format!("SELECT {COLUMNS} FROM task_definitions WHERE family = $1 AND revision = $2");
        let row = client.query_opt(&sql, &[&family, &revision]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinition>> {
        let client = self.pool.get().await?;
        let sql = format!("SELECT {COLUMNS} FROM task_definitions WHERE arn = $1");
        let row = client.query_opt(&sql, &[&arn]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn get_latest(&self, family: &str) -> Result<Option<TaskDefinition>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {COLUMNS} FROM task_definitions WHERE family = $1 AND status = 'ACTIVE' \
             ORDER BY revision DESC LIMIT 1"
        );
        let row = client.query_opt(&sql, &[&family]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn update(&self, td: &TaskDefinition) -> Result<()> {
        let client = self.pool.get().await?;
        // Task definitions are immutable after registration except for
        // status and tags.
        let affected = client
            .execute(
                "UPDATE task_definitions SET status = $1, tags = $2, updated_at = NOW() \
                 WHERE arn = $3",
                &[&td.status, &td.tags, &td.arn],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("task definition", &td.arn));
        }
        Ok(())
    }

    async fn delete(&self, family: &str, revision: i32) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM task_definitions WHERE family = $1 AND revision = $2",
                &[&family, &revision],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found(
                "task definition",
                &format!("{family}:{revision}"),
            ));
        }
        Ok(())
    }

    async fn list_revisions(
        &self,
        family: &str,
        status: Option<&str>,
    ) -> Result<Vec<TaskDefinition>> {
        let client = self.pool.get().await?;
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM task_definitions WHERE family = $1 AND status = $2 \
                     ORDER BY revision ASC"
                );
                client.query(&sql, &[&family, &status]).await?
            }
            None => {
                let sql = format!(
                    "SELECT {COLUMNS} FROM task_definitions WHERE family = $1 ORDER BY revision ASC"
                );
                client.query(&sql, &[&family]).await?
            }
        };
        Ok(rows.iter().map(from_row).collect())
    }

    async fn list_paginated(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<TaskDefinition>> {
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let prefix_pattern = family_prefix.map(|p| format!("{p}%"));
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM task_definitions WHERE TRUE"
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
        if let Some(ref pattern) = prefix_pattern {
            params.push(pattern);
            sql.push_str(&format!(" AND family LIKE ${}", params.len()));
        }
        if let Some(ref status) = status {
            params.push(status);
            sql.push_str(&format!(" AND status = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY family ASC, revision ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }

    async fn list_families(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<String>> {
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let prefix_pattern = family_prefix.map(|p| format!("{p}%"));
        let mut sql = String::from(
            "SELECT family, COUNT(*) OVER() AS full_count FROM \
             (SELECT DISTINCT family FROM task_definitions WHERE TRUE",
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
        if let Some(ref pattern) = prefix_pattern {
            params.push(pattern);
            sql.push_str(&format!(" AND family LIKE ${}", params.len()));
        }
        if let Some(ref status) = status {
            params.push(status);
            sql.push_str(&format!(" AND status = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(") AS families ORDER BY family ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        let families = super::page_from_rows(&rows, offset, |r| r.get::<_, String>("family"));
        Ok(families)
    }
}
