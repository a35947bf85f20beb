use async_trait::async_trait;
use kecs_common::{Error, Result};
use sqlx::sqlite::SqlitePool;

use crate::{
    models::AccountSetting,
    pagination,
    store::{AccountSettingStore, Page},
};

const COLUMNS: &str = "id, principal_arn, name, value, created_at, updated_at";

pub struct AccountSettingRepo {
    pool: SqlitePool,
}

impl AccountSettingRepo {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountSettingStore for AccountSettingRepo {
    async fn put(&self, s: &AccountSetting) -> Result<()> {
        let sql = format!(
            "INSERT INTO account_settings ({COLUMNS}) VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (principal_arn, name) \
             DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
        );
        sqlx::query(&sql)
            .bind(s.id.as_str())
            .bind(s.principal_arn.as_str())
            .bind(s.name.as_str())
            .bind(s.value.as_str())
            .bind(s.created_at)
            .bind(s.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get(&self, principal_arn: &str, name: &str) -> Result<Option<AccountSetting>> {
        let sql = format!("SELECT {COLUMNS} FROM account_settings WHERE principal_arn = ? AND name = ?");
        let setting = sqlx::query_as::<_, AccountSetting>(&sql)
            .bind(principal_arn)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(setting)
    }

    async fn delete(&self, principal_arn: &str, name: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM account_settings WHERE principal_arn = ? AND name = ?")
            .bind(principal_arn)
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
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
        let offset = match token {
            Some(t) => pagination::decode_token(t)?,
            None => 0,
        };
        let mut sql = format!(
            "SELECT {COLUMNS}, COUNT(*) OVER() AS full_count FROM account_settings WHERE 1=1"
        );
        if principal_arn.is_some() {
            sql.push_str(" AND principal_arn = ?");
        }
        if name.is_some() {
            sql.push_str(" AND name = ?");
        }
        sql.push_str(" ORDER BY principal_arn ASC, name ASC LIMIT ? OFFSET ?");
        let mut query = sqlx::query(&sql);
        if let Some(principal_arn) = principal_arn {
            query = query.bind(principal_arn);
        }
        if let Some(name) = name {
            query = query.bind(name);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;
        super::page_from_rows(&rows, offset)
    }
}
