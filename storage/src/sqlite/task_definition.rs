use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::{Row, sqlite::SqlitePool};

use crate::{
    models::TaskDefinition,
    pagination,
    store::{Page, TaskDefinitionStore},
};

const COLUMNS: &str = "id, arn, family, revision, status, region, account_id, \
     container_definitions, volumes, network_mode, requires_compatibilities, cpu, memory, \
     task_role_arn, execution_role_arn, placement_constraints, runtime_platform, ipc_mode, \
     pid_mode, tags, created_at, updated_at";

pub struct TaskDefinitionRepo {
    pool: SqlitePool,
}

impl TaskDefinitionRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskDefinitionStore for TaskDefinitionRepo {
    async fn register(&self, td: &TaskDefinition) -> Result<TaskDefinition> {
        // Revision allocation and insert happen in one transaction so two
        // concurrent registrations of the same family cannot share a revision.
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT COALESCE(MAX(revision), 0) AS max_revision FROM task_definitions WHERE family = ?",
        )
        .bind(td.family.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let revision: i32 = row.try_get::<i32, _>("max_revision").map_err(Error::from)? + 1;

        let mut stored = td.clone();
        stored.revision = revision;
        stored.arn = format!(
            "arn:aws:ecs:{}:{}:task-definition/{}:{}",
            stored.region, stored.account_id, stored.family, revision
        );

        let sql = format!(
            "INSERT INTO task_definitions ({COLUMNS}) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        );
        sqlx::query(&sql)
            .bind(stored.id.as_str())
            .bind(stored.arn.as_str())
            .bind(stored.family.as_str())
            .bind(stored.revision)
            .bind(stored.status.as_str())
            .bind(stored.region.as_str())
            .bind(stored.account_id.as_str())
            .bind(stored.container_definitions.as_str())
            .bind(stored.volumes.as_deref())
            .bind(stored.network_mode.as_deref())
            .bind(stored.requires_compatibilities.as_deref())
            .bind(stored.cpu.as_deref())
            .bind(stored.memory.as_deref())
            .bind(stored.task_role_arn.as_deref())
            .bind(stored.execution_role_arn.as_deref())
            .bind(stored.placement_constraints.as_deref())
            .bind(stored.runtime_platform.as_deref())
            .bind(stored.ipc_mode.as_deref())
            .bind(stored.pid_mode.as_deref())
            .bind(stored.tags.as_deref())
            .bind(stored.created_at)
            .bind(stored.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(stored)
    }

    async fn get(&self, family: &str, revision: i32) -> Result<Option<TaskDefinition>> {
        let sql =
            format!("SELECT {COLUMNS} FROM task_definitions WHERE family = ? AND revision = ?");
        let td = sqlx::query_as::<_, TaskDefinition>(&sql)
            .bind(family)
            .bind(revision)
            .fetch_optional(&self.pool)
            .await?;
        Ok(td)
    }

    async fn get_by_arn(&self, arn: &str) -> Result<Option<TaskDefinition>> {
        let sql = format!("SELECT {COLUMNS} FROM task_definitions WHERE arn = ?");
        let td = sqlx::query_as::<_, TaskDefinition>(&sql)
            .bind(arn)
            .fetch_optional(&self.pool)
            .await?;
        Ok(td)
    }

    async fn get_latest(&self, family: &str) -> Result<Option<TaskDefinition>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM task_definitions WHERE family = ? AND status = 'ACTIVE' \
             ORDER BY revision DESC LIMIT 1"
        );
        let td = sqlx::query_as::<_, TaskDefinition>(&sql)
            .bind(family)
            .fetch_optional(&self.pool)
            .await?;
        Ok(td)
    }

    async fn update(&self, td: &TaskDefinition) -> Result<()> {
        // Task definitions are immutable after registration except for
        // status and tags.
        let result = sqlx::query(
            "UPDATE task_definitions SET status = ?, tags = ?, updated_at = ? WHERE arn = ?",
        )
        .bind(td.status.as_str())
        .bind(td.tags.as_deref())
        .bind(chrono::Utc::now())
        .bind(td.arn.as_str())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("task definition", &td.arn));
        }
        Ok(())
    }

    async fn delete(&self, family: &str, revision: i32) -> Result<()> {
        let result = sqlx::query("DELETE FROM task_definitions WHERE family = ? AND revision = ?")
            .bind(family)
            .bind(revision)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
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
        let mut sql = format!("SELECT {COLUMNS} FROM task_definitions WHERE family = ?");
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY revision ASC");
        let mut query = sqlx::query_as::<_, TaskDefinition>(&sql).bind(family);
        if let Some(status) = status {
            query = query.bind(status);
        }
        let revisions = query.fetch_all(&self.pool).await?;
        Ok(revisions)
    }

    async fn list_paginated(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<TaskDefinition>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM task_definitions WHERE 1=1"
        );
        if family_prefix.is_some() {
            sql.push_str(" AND family LIKE ? || '%'");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(" ORDER BY family ASC, revision ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql);
        if let Some(prefix) = family_prefix {
            query = query.bind(prefix);
        }
        if let Some(status) = status {
            query = query.bind(status);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        super::page_from_rows(&rows, offset)
    }

    async fn list_families(
        &self,
        family_prefix: Option<&str>,
        status: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<String>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = String::from(
            "SELECT family, COUNT(*) OVER() AS full_count FROM \
             (SELECT DISTINCT family FROM task_definitions WHERE 1=1",
        );
        if family_prefix.is_some() {
            sql.push_str(" AND family LIKE ? || '%'");
        }
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        sql.push_str(") ORDER BY family ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql);
        if let Some(prefix) = family_prefix {
            query = query.bind(prefix);
        }
        if let Some(status) = status {
            query = query.bind(status);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        let full_count: i64 = match rows.first() {
            Some(row) => row.try_get("full_count").map_err(Error::from)?,
            None => 0,
        };
        let families = rows
            .iter()
            .map(|r| r.try_get::<String, _>("family"))
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;
        let next = pagination::next_token(offset, families.len(), full_count);
        Ok((families, next))
    }
}
