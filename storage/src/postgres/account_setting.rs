use async_trait::async_trait;
use deadpool_postgres::Pool;
use kecs_common::{Error, Result};
use tokio_postgres::Row;

use crate::{
    models::AccountSetting,
    store::{AccountSettingStore, Page},
};

const COLUMNS: &str = "id, principal_arn, name, value, created_at, updated_at";

fn from_row(row: &Row) -> AccountSetting {
    AccountSetting {
        id: row.get("id"),
        principal_arn: row.get("principal_arn"),
        name: row.get("name"),
        value: row.get("value"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub struct AccountSettingRepo {
    pool: Pool,
}

impl AccountSettingRepo {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountSettingStore for AccountSettingRepo {
    async fn put(&self, s: &AccountSetting) -> Result<()> {
        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO account_settings ({COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (principal_arn, name) \
             DO UPDATE SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at"
        );
        client
            .execute(
                &sql,
                &[
                    &s.id,
                    &s.principal_arn,
                    &s.name,
                    &s.value,
                    &s.created_at,
                    &s.updated_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, principal_arn: &str, name: &str) -> Result<Option<AccountSetting>> {
        let client = self.pool.get().await?;
        let sql =
            format!("SELECT {COLUMNS} FROM account_settings WHERE principal_arn = $1 AND name = $2");
        let row = client.query_opt(&sql, &[&principal_arn, &name]).await?;
        Ok(row.as_ref().map(from_row))
    }

    async fn delete(&self, principal_arn: &str, name: &str) -> Result<()> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "DELETE FROM account_settings WHERE principal_arn = $1 AND name = $2",
                &[&principal_arn, &name],
            )
            .await?;
        if affected == 0 {
            return Err(Error::not_found("account setting", name));
        }
        Ok(())
    }

    async fn list(
        &self,
        principal_arn: Option<&str>,
        name: Option<&str>,
        limit: i64,
        token: Option<&str>,
    ) -> Result<Page<AccountSetting>> {
        let offset = super::decode_offset(token)?;
        let client = self.pool.get().await?;
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM account_settings WHERE TRUE"
        );
        let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> = Vec::new();
        if let Some(ref principal_arn) = principal_arn {
            params.push(principal_arn);
            sql.push_str(&format!(" AND principal_arn = ${}", params.len()));
        }
        if let Some(ref name) = name {
            params.push(name);
            sql.push_str(&format!(" AND name = ${}", params.len()));
        }
        params.push(&limit);
        sql.push_str(&format!(
            " ORDER BY principal_arn ASC, name ASC LIMIT ${}",
            params.len()
        ));
        params.push(&offset);
        sql.push_str(&format!(" OFFSET ${}", params.len()));
        let rows = client.query(&sql, &params).await?;
        Ok(super::page_from_rows(&rows, offset, from_row))
    }
}
