//! CAPTCHA instances and the org-wide CAPTCHA settings.
//!
//! Both kinds exist only on next-generation tenants.

use super::{attributes, optional_str, remote_id, required_str, set_value, string_set};
use crate::error::{ApiResultExt, ProviderError, ProviderResult};
use crate::model::{Attributes, ChangeSet, ManagedObject};
use crate::state_machine::{
    CreateOp, CreateOptions, DeleteOp, Identity, ImportOp, ManagedResource, Observation,
    OpContext, ReadOp, UpdateGroup, UpdateOp,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use tenantform_client::ApiRequest;

const CAPTCHA_TYPES: &[&str] = &["HCAPTCHA", "RECAPTCHA_V2"];
const SECRET_KEY: &str = "secret_key";

/// A CAPTCHA provider registration. `secret_key` is never returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptchaResource;

impl CaptchaResource {
    fn body(desired: &Attributes) -> Value {
        json!({
            "name": desired.get("name"),
            "type": desired.get("type"),
            "siteKey": desired.get("site_key"),
            "secretKey": desired.get(SECRET_KEY),
        })
    }

    fn observe(body: &Value, obj: &ManagedObject) -> ProviderResult<Observation> {
        let id = remote_id(body, "captcha")?;
        let field = |name: &str| body.get(name).cloned().unwrap_or(Value::Null);
        let secret = obj
            .observed
            .as_ref()
            .and_then(|o| o.get(SECRET_KEY))
            .or_else(|| obj.desired.get(SECRET_KEY))
            .cloned()
            .unwrap_or(Value::Null);
        let observed = attributes([
            ("name", field("name")),
            ("type", field("type")),
            ("site_key", field("siteKey")),
            (SECRET_KEY, secret),
        ]);
        Ok(Observation::new(id, observed))
    }
}

impl Identity for CaptchaResource {
    fn kind(&self) -> &'static str {
        "captcha"
    }

    fn next_generation_only(&self) -> bool {
        true
    }

    fn validate(&self, desired: &Attributes) -> ProviderResult<()> {
        required_str(desired, "name")?;
        required_str(desired, "site_key")?;
        required_str(desired, SECRET_KEY)?;
        let captcha_type = required_str(desired, "type")?;
        if !CAPTCHA_TYPES.contains(&captcha_type) {
            return Err(ProviderError::validation(
                "type",
                format!("type must be one of {}", CAPTCHA_TYPES.join(", ")),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CreateOp for CaptchaResource {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _options: CreateOptions,
    ) -> ProviderResult<Observation> {
        let request = ApiRequest::post("/api/v1/captchas").body(Self::body(&obj.desired));
        let created: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &request)
            .await
            .op("create captcha")?;
        Self::observe(&created, obj)
    }
}

#[async_trait]
impl ReadOp for CaptchaResource {
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>> {
        let id = obj.id()?;
        let body: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &ApiRequest::get(format!("/api/v1/captchas/{id}")))
            .await
            .op(&format!("read captcha {id}"))?;
        Self::observe(&body, obj).map(Some)
    }
}

#[async_trait]
impl UpdateOp for CaptchaResource {
    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _group: &UpdateGroup,
        _changes: &ChangeSet,
    ) -> ProviderResult<()> {
        let id = obj.id()?;
        let request =
            ApiRequest::put(format!("/api/v1/captchas/{id}")).body(Self::body(&obj.desired));
        ctx.handle
            .transport()
            .send(ctx.call, &request)
            .await
            .op(&format!("update captcha {id}"))?;
        Ok(())
    }
}

#[async_trait]
impl DeleteOp for CaptchaResource {
    async fn delete(&self, ctx: &OpContext<'_>, obj: &ManagedObject) -> ProviderResult<()> {
        let id = obj.id()?;
        ctx.handle
            .transport()
            .send(ctx.call, &ApiRequest::delete(format!("/api/v1/captchas/{id}")))
            .await
            .op(&format!("delete captcha {id}"))?;
        Ok(())
    }
}

impl ImportOp for CaptchaResource {}

impl ManagedResource for CaptchaResource {}

const ORG_CAPTCHA_PATH: &str = "/api/v1/org/captcha";
/// The org settings are a singleton; this is its id.
pub const ORG_SETTINGS_ID: &str = "org_captcha";
const ENABLED_PAGES: &str = "enabled_pages";
const PAGES: &[&str] = &["SSR", "SSPR", "SIGN_IN"];

/// Which CAPTCHA the org uses and on which pages. The page set is written
/// whole on every change.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptchaOrgSettingsResource;

impl CaptchaOrgSettingsResource {
    async fn write(&self, ctx: &OpContext<'_>, desired: &Attributes) -> ProviderResult<Value> {
        let pages = string_set(desired, ENABLED_PAGES)?;
        let request = ApiRequest::put(ORG_CAPTCHA_PATH).body(json!({
            "captchaId": optional_str(desired, "captcha_id"),
            "enabledPages": set_value(&pages),
        }));
        ctx.handle
            .transport()
            .fetch(ctx.call, &request)
            .await
            .op("write org captcha settings")
    }

    fn observe(body: &Value) -> ProviderResult<Observation> {
        let pages: BTreeSet<String> = match body.get("enabledPages") {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).map(String::from).collect(),
            _ => BTreeSet::new(),
        };
        let observed = attributes([
            ("captcha_id", body.get("captchaId").cloned().unwrap_or(Value::Null)),
            (ENABLED_PAGES, set_value(&pages)),
        ]);
        Ok(Observation::new(ORG_SETTINGS_ID, observed))
    }
}

impl Identity for CaptchaOrgSettingsResource {
    fn kind(&self) -> &'static str {
        "captcha_org_settings"
    }

    fn next_generation_only(&self) -> bool {
        true
    }

    fn validate(&self, desired: &Attributes) -> ProviderResult<()> {
        let pages = string_set(desired, ENABLED_PAGES)?;
        if let Some(page) = pages.iter().find(|p| !PAGES.contains(&p.as_str())) {
            return Err(ProviderError::validation(
                ENABLED_PAGES,
                format!("unknown page '{page}', expected one of {}", PAGES.join(", ")),
            ));
        }
        if !pages.is_empty() && optional_str(desired, "captcha_id").is_none() {
            return Err(ProviderError::validation(
                "captcha_id",
                "captcha_id is required when pages are enabled",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl CreateOp for CaptchaOrgSettingsResource {
    async fn create(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _options: CreateOptions,
    ) -> ProviderResult<Observation> {
        let written = self.write(ctx, &obj.desired).await?;
        Self::observe(&written)
    }
}

#[async_trait]
impl ReadOp for CaptchaOrgSettingsResource {
    async fn read(
        &self,
        ctx: &OpContext<'_>,
        _obj: &ManagedObject,
    ) -> ProviderResult<Option<Observation>> {
        let body: Value = ctx
            .handle
            .transport()
            .fetch(ctx.call, &ApiRequest::get(ORG_CAPTCHA_PATH))
            .await
            .op("read org captcha settings")?;
        // Cleared settings read back as an empty object.
        if body.get("captchaId").map_or(true, Value::is_null) {
            return Ok(None);
        }
        Self::observe(&body).map(Some)
    }
}

#[async_trait]
impl UpdateOp for CaptchaOrgSettingsResource {
    async fn apply_group(
        &self,
        ctx: &OpContext<'_>,
        obj: &ManagedObject,
        _group: &UpdateGroup,
        _changes: &ChangeSet,
    ) -> ProviderResult<()> {
        self.write(ctx, &obj.desired).await.map(|_| ())
    }
}

#[async_trait]
impl DeleteOp for CaptchaOrgSettingsResource {
    async fn delete(&self, ctx: &OpContext<'_>, _obj: &ManagedObject) -> ProviderResult<()> {
        ctx.handle
            .transport()
            .send(ctx.call, &ApiRequest::delete(ORG_CAPTCHA_PATH))
            .await
            .op("clear org captcha settings")?;
        Ok(())
    }
}

impl ImportOp for CaptchaOrgSettingsResource {}

impl ManagedResource for CaptchaOrgSettingsResource {}
