use chrono::Utc;
use kecs_common::{Error, Result};
use kecs_storage::models::AccountSetting;
use serde::{Deserialize, Serialize};

use super::EcsApi;

/// Principal that holds the account-wide defaults.
const DEFAULT_PRINCIPAL: &str = "default";

const KNOWN_SETTINGS: [&str; 6] = [
    "serviceLongArnFormat",
    "taskLongArnFormat",
    "containerInstanceLongArnFormat",
    "awsvpcTrunking",
    "containerInsights",
    "fargateFIPSMode",
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutAccountSettingRequest {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub principal_arn: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutAccountSettingDefaultRequest {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteAccountSettingRequest {
    pub name: String,
    #[serde(default)]
    pub principal_arn: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListAccountSettingsRequest {
    pub name: Option<String>,
    pub value: Option<String>,
    pub principal_arn: Option<String>,
    pub effective_settings: Option<bool>,
    pub max_results: Option<i64>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAccountSetting {
    pub name: String,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_arn: Option<String>,
}

fn to_wire(s: &AccountSetting) -> WireAccountSetting {
    WireAccountSetting {
        name: s.name.clone(),
        value: s.value.clone(),
        principal_arn: (s.principal_arn != DEFAULT_PRINCIPAL).then(|| s.principal_arn.clone()),
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettingResponse {
    pub setting: WireAccountSetting,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListAccountSettingsResponse {
    pub settings: Vec<WireAccountSetting>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
}

fn validate(name: &str, value: &str) -> Result<()> {
    if !KNOWN_SETTINGS.contains(&name) {
        return Err(Error::invalid_input(format!("unknown setting {name}")));
    }
    if value != "enabled" && value != "disabled" {
        return Err(Error::invalid_input(
            "setting value must be enabled or disabled",
        ));
    }
    Ok(())
}

impl EcsApi {
    async fn put_setting(&self, principal: &str, name: &str, value: &str) -> Result<AccountSetting> {
        validate(name, value)?;
        let now = Utc::now();
        let setting = AccountSetting {
            id: uuid::Uuid::new_v4().to_string(),
            principal_arn: principal.to_string(),
            name: name.to_string(),
            value: value.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.storage.account_settings().put(&setting).await?;
        Ok(setting)
    }

    pub async fn put_account_setting(
        &self,
        req: PutAccountSettingRequest,
    ) -> Result<AccountSettingResponse> {
        let principal = req.principal_arn.as_deref().unwrap_or(DEFAULT_PRINCIPAL);
        let setting = self.put_setting(principal, &req.name, &req.value).await?;
        Ok(AccountSettingResponse {
            setting: to_wire(&setting),
        })
    }

    pub async fn put_account_setting_default(
        &self,
        req: PutAccountSettingDefaultRequest,
    ) -> Result<AccountSettingResponse> {
        let setting = self
            .put_setting(DEFAULT_PRINCIPAL, &req.name, &req.value)
            .await?;
        Ok(AccountSettingResponse {
            setting: to_wire(&setting),
        })
    }

    pub async fn delete_account_setting(
        &self,
        req: DeleteAccountSettingRequest,
    ) -> Result<AccountSettingResponse> {
        let principal = req.principal_arn.as_deref().unwrap_or(DEFAULT_PRINCIPAL);
        let existing = self
            .storage
            .account_settings()
            .get(principal, &req.name)
            .await?
            .ok_or_else(|| Error::not_found("account setting", &req.name))?;
        self.storage
            .account_settings()
            .delete(principal, &req.name)
            .await?;
        Ok(AccountSettingResponse {
            setting: to_wire(&existing),
        })
    }

    pub async fn list_account_settings(
        &self,
        req: ListAccountSettingsRequest,
    ) -> Result<ListAccountSettingsResponse> {
        let (limit, _) =
            kecs_storage::pagination::page_window(req.max_results, req.next_token.as_deref())?;

        // Effective settings: per-principal overrides fall back to defaults.
        if req.effective_settings.unwrap_or(false) {
            let principal = req.principal_arn.as_deref().unwrap_or(DEFAULT_PRINCIPAL);
            let mut settings = Vec::new();
            for name in KNOWN_SETTINGS {
                let resolved = match self.storage.account_settings().get(principal, name).await? {
                    Some(setting) => Some(setting),
                    None => {
                        self.storage
                            .account_settings()
                            .get(DEFAULT_PRINCIPAL, name)
                            .await?
                    }
                };
                if let Some(setting) = resolved {
                    settings.push(to_wire(&setting));
                }
            }
            return Ok(ListAccountSettingsResponse {
                settings,
                next_token: None,
            });
        }

        let (settings, next_token) = self
            .storage
            .account_settings()
            .list(
                req.principal_arn.as_deref(),
                req.name.as_deref(),
                limit,
                req.next_token.as_deref(),
            )
            .await?;
        let settings = settings
            .iter()
            .filter(|s| req.value.as_deref().is_none_or(|v| s.value == v))
            .map(to_wire)
            .collect();
        Ok(ListAccountSettingsResponse {
            settings,
            next_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::api;
    use super::*;

    #[tokio::test]
    async fn put_is_an_upsert_and_validates_input() {
        let api = api().await;
        api.put_account_setting(PutAccountSettingRequest {
            name: "containerInsights".to_string(),
            value: "enabled".to_string(),
            principal_arn: None,
        })
        .await
        .unwrap();
        let updated = api
            .put_account_setting(PutAccountSettingRequest {
                name: "containerInsights".to_string(),
                value: "disabled".to_string(),
                principal_arn: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.setting.value, "disabled");

        assert!(matches!(
            api.put_account_setting(PutAccountSettingRequest {
                name: "nonsense".to_string(),
                value: "enabled".to_string(),
                principal_arn: None,
            })
            .await
            .unwrap_err(),
            Error::InvalidInput(_)
        ));
        assert!(matches!(
            api.put_account_setting(PutAccountSettingRequest {
                name: "containerInsights".to_string(),
                value: "sometimes".to_string(),
                principal_arn: None,
            })
            .await
            .unwrap_err(),
            Error::InvalidInput(_)
        ));
    }

    #[tokio::test]
    async fn effective_settings_fall_back_to_the_default_principal() {
        let api = api().await;
        api.put_account_setting_default(PutAccountSettingDefaultRequest {
            name: "containerInsights".to_string(),
            value: "enabled".to_string(),
        })
        .await
        .unwrap();
        let principal = "arn:aws:iam::000000000000:user/dev";
        api.put_account_setting(PutAccountSettingRequest {
            name: "taskLongArnFormat".to_string(),
            value: "disabled".to_string(),
            principal_arn: Some(principal.to_string()),
        })
        .await
        .unwrap();

        let effective = api
            .list_account_settings(ListAccountSettingsRequest {
                principal_arn: Some(principal.to_string()),
                effective_settings: Some(true),
                ..Default::default()
            })
            .await
            .unwrap();
        let by_name = |name: &str| {
            effective
                .settings
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.value.clone())
        };
        // Override wins where present, default fills the rest.
        assert_eq!(by_name("taskLongArnFormat").as_deref(), Some("disabled"));
        assert_eq!(by_name("containerInsights").as_deref(), Some("enabled"));
    }

    #[tokio::test]
    async fn delete_removes_the_override() {
        let api = api().await;
        api.put_account_setting(PutAccountSettingRequest {
            name: "awsvpcTrunking".to_string(),
            value: "enabled".to_string(),
            principal_arn: None,
        })
        .await
        .unwrap();
        api.delete_account_setting(DeleteAccountSettingRequest {
            name: "awsvpcTrunking".to_string(),
            principal_arn: None,
        })
        .await
        .unwrap();
        assert!(matches!(
            api.delete_account_setting(DeleteAccountSettingRequest {
                name: "awsvpcTrunking".to_string(),
                principal_arn: None,
            })
            .await
            .unwrap_err(),
            Error::NotFound(_)
        ));
    }
}
