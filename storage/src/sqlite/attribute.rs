use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{
    models::Attribute,
    pagination,
    store::{AttributeStore, Page},
};

const COLUMNS: &str =
    "id, name, value, target_type, target_id, cluster_arn, region, account_id, created_at, updated_at";

pub struct AttributeRepo {
    pool: SqlitePool,
}

impl AttributeRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttributeStore for AttributeRepo {
    async fn put(&self, a: &Attribute) -> Result<()> {
        let sql = format!(
            "INSERT INTO attributes ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (name, target_type, target_id, cluster_arn) \
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(a.id.as_str())
            .bind(a.name.as_str())
            .bind(a.value.as_deref())
            .bind(a.target_type.as_str())
            .bind(a.target_id.as_str())
            .bind(a.cluster_arn.as_str())
            .bind(a.region.as_str())
            .bind(a.account_id.as_str())
            .bind(a.created_at)
            .bind(a.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(
        &self,
        cluster_arn: &str,
        name: &str,
        target_type: &str,
        target_id: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM attributes WHERE cluster_arn = ? AND name = ? AND target_type = ? \
             AND target_id = ?",
        )
        .bind(cluster_arn)
        .bind(name)
        .bind(target_type)
        .bind(target_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found("attribute", name));
        }
        Ok(())
    }

    async fn list(
        &self,
        cluster_arn: &str,
        target_type: Option<&str>,
        attr_name: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<Attribute>> {
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM attributes WHERE cluster_arn = ?"
        );
        if target_type.is_some() {
            sql.push_str(" AND target_type = ?");
        }
        if attr_name.is_some() {
            sql.push_str(" AND name = ?");
        }
        sql.push_str(" ORDER BY name ASC, target_id ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql).bind(cluster_arn);
        if let Some(target_type) = target_type {
            query = query.bind(target_type);
        }
        if let Some(attr_name) = attr_name {
            query = query.bind(attr_name);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        super::page_from_rows(&rows, offset)
    }
}
