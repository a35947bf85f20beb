use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::Attribute,
    store::{AttributeStore, Page},
};

const COLUMNS: &str =
    "id, name, value, target_type, target_id, cluster_arn, region, account_id, created_at, updated_at";

fn from_row(row: &Row) -> Attribute {
    Attribute {
        id: row.get("id"),
        name: row.get("name"),
        value: row.get("value"),
        target_type: row.get("target_type"),
        target_id: row.get("target_id"),
        cluster_arn: row.get("cluster_arn"),
        region: row.get("region"),
        account_id: row.get("account_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct AttributeRepo {
    pool: Pool,
}

impl AttributeRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AttributeStore for AttributeRepo {
    async fn put(&self, a: &Attribute) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO attributes ({COLUMNS}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (name, target_type, target_id, cluster_arn) \
             DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at"
        );
        client
            .execute(
                &sql,
                &[
                    &a.id,
                    &a.name,
                    &a.value,
                    &a.target_type,
                    &a.target_id,
                    &a.cluster_arn,
                    &a.region,
                    &a.account_id,
                    &a.created_at,
                    &a.updated_at,
                ],
            )
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
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM attributes WHERE cluster_arn = $1 AND name = $2 \
                 AND target_type = $3 AND target_id = $4",
                &[&cluster_arn, &name, &target_type, &target_id],
            )
            .await?;
        if affected == 0 {
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
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM attributes WHERE cluster_arn = $1"
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = vec![&cluster_arn];
        if let Some(ref target_type) = target_type {
            params.push(target_type);
            sql.push_str(&format!(" AND target_type = ${}", params.len()));
        }
        if let Some(ref attr_name) = attr_name {
            params.push(attr_name);
            sql.push_str(&format!(" AND name = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(" ORDER BY name ASC, target_id ASC LIMIT ${}", params.len()));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }
}
