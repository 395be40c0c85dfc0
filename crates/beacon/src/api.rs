//! Typed calls over a [`Transport`], one per server endpoint.

use std::collections::BTreeMap;

use beacon_core::error::ClientError;
use beacon_protocol::{
    AddAccountRequest, AskRequest, FieldSpec, Integration, IntegrationListResponse, LoginRequest,
    LoginResponse, ModelPageResponse, ModuleInfo, ModuleListResponse, ModuleUpdateRequest,
    Profile, ProviderFieldsResponse, ProviderState, Run, RunListResponse, SaveFieldsRequest,
    SubmitParamsRequest, SubmitResponse, TriggerResponse, WorkflowInfo, WorkflowListResponse,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::transport::{EventStream, Method, Transport};

/// Percent-encodes one path segment.
pub fn seg(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ClientError> {
    Ok(serde_json::from_value(value)?)
}

fn body<T: Serialize>(value: &T) -> Result<Option<Value>, ClientError> {
    Ok(Some(serde_json::to_value(value)?))
}

pub async fn login<T: Transport + ?Sized>(
    t: &T,
    email: &str,
    password: &str,
) -> Result<String, ClientError> {
    let req = LoginRequest {
        email: email.to_owned(),
        password: password.to_owned(),
    };
    let resp: LoginResponse = decode(t.request(Method::Post, "/auth/login", body(&req)?).await?)?;
    Ok(resp.token)
}

pub async fn list_integrations<T: Transport + ?Sized>(
    t: &T,
) -> Result<Vec<Integration>, ClientError> {
    let resp: IntegrationListResponse = decode(t.request(Method::Get, "/integrations", None).await?)?;
    Ok(resp.integrations)
}

pub async fn save_integration_fields<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    values: BTreeMap<String, String>,
) -> Result<(), ClientError> {
    let path = format!("/integrations/{}", seg(integration));
    t.request(Method::Put, &path, body(&SaveFieldsRequest { values })?)
        .await?;
    Ok(())
}

pub async fn provider_state<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
) -> Result<ProviderState, ClientError> {
    let path = format!("/integrations/{}/providers", seg(integration));
    decode(t.request(Method::Get, &path, None).await?)
}

pub async fn provider_fields<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    provider: &str,
) -> Result<Vec<FieldSpec>, ClientError> {
    let path = format!(
        "/integrations/{}/providers/{}/fields",
        seg(integration),
        seg(provider)
    );
    let resp: ProviderFieldsResponse = decode(t.request(Method::Get, &path, None).await?)?;
    Ok(resp.fields)
}

pub async fn add_account<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    provider: &str,
    request: &AddAccountRequest,
) -> Result<(), ClientError> {
    let path = format!(
        "/integrations/{}/providers/{}/accounts",
        seg(integration),
        seg(provider)
    );
    t.request(Method::Post, &path, body(request)?).await?;
    Ok(())
}

pub async fn delete_account<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    provider: &str,
    account: &str,
) -> Result<(), ClientError> {
    let path = format!(
        "/integrations/{}/providers/{}/accounts/{}",
        seg(integration),
        seg(provider),
        seg(account)
    );
    t.request(Method::Delete, &path, None).await?;
    Ok(())
}

pub async fn list_models<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    provider: &str,
    account: &str,
    limit: usize,
    cursor: Option<&str>,
) -> Result<ModelPageResponse, ClientError> {
    let mut path = format!(
        "/integrations/{}/providers/{}/accounts/{}/models?limit={limit}",
        seg(integration),
        seg(provider),
        seg(account)
    );
    if let Some(cursor) = cursor {
        path.push_str("&cursor=");
        path.push_str(&seg(cursor));
    }
    decode(t.request(Method::Get, &path, None).await?)
}

pub async fn save_profile<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    profile: &Profile,
) -> Result<(), ClientError> {
    let path = format!("/integrations/{}/profiles", seg(integration));
    t.request(Method::Post, &path, body(profile)?).await?;
    Ok(())
}

pub async fn delete_profile<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    name: &str,
) -> Result<(), ClientError> {
    let path = format!("/integrations/{}/profiles/{}", seg(integration), seg(name));
    t.request(Method::Delete, &path, None).await?;
    Ok(())
}

/// Saves `profile`. When it replaces a profile stored under another name the
/// old one is deleted first; a failure after that delete leaves neither.
/// An edit that keeps the name is a plain save, relying on the endpoint to
/// upsert by name.
pub async fn replace_profile<T: Transport + ?Sized>(
    t: &T,
    integration: &str,
    profile: &Profile,
    replaces: Option<&str>,
) -> Result<(), ClientError> {
    if let Some(old) = replaces.filter(|old| *old != profile.name) {
        delete_profile(t, integration, old).await?;
    }
    save_profile(t, integration, profile).await
}

pub async fn list_workflows<T: Transport + ?Sized>(
    t: &T,
) -> Result<Vec<WorkflowInfo>, ClientError> {
    let resp: WorkflowListResponse = decode(t.request(Method::Get, "/workflows", None).await?)?;
    Ok(resp.workflows)
}

pub async fn trigger_workflow<T: Transport + ?Sized>(
    t: &T,
    name: &str,
) -> Result<String, ClientError> {
    let path = format!("/workflows/{}/trigger", seg(name));
    let resp: TriggerResponse = decode(t.request(Method::Post, &path, None).await?)?;
    Ok(resp.run_id)
}

pub async fn list_runs<T: Transport + ?Sized>(t: &T) -> Result<Vec<Run>, ClientError> {
    let resp: RunListResponse = decode(t.request(Method::Get, "/runs", None).await?)?;
    Ok(resp.runs)
}

pub async fn run_detail<T: Transport + ?Sized>(t: &T, id: &str) -> Result<Run, ClientError> {
    let path = format!("/runs/{}", seg(id));
    decode(t.request(Method::Get, &path, None).await?)
}

pub async fn dismiss_run<T: Transport + ?Sized>(t: &T, id: &str) -> Result<(), ClientError> {
    let path = format!("/runs/{}/dismiss", seg(id));
    t.request(Method::Post, &path, None).await?;
    Ok(())
}

pub async fn list_modules<T: Transport + ?Sized>(t: &T) -> Result<Vec<ModuleInfo>, ClientError> {
    let resp: ModuleListResponse = decode(t.request(Method::Get, "/modules", None).await?)?;
    Ok(resp.modules)
}

pub async fn set_module_enabled<T: Transport + ?Sized>(
    t: &T,
    name: &str,
    enabled: bool,
) -> Result<(), ClientError> {
    let path = format!("/modules/{}", seg(name));
    t.request(Method::Put, &path, body(&ModuleUpdateRequest { enabled })?)
        .await?;
    Ok(())
}

pub async fn ask<T: Transport + ?Sized>(
    t: &T,
    request: &AskRequest,
    cancel: CancellationToken,
) -> Result<EventStream, ClientError> {
    t.stream("/ask", serde_json::to_value(request)?, cancel).await
}

pub async fn submit_params<T: Transport + ?Sized>(
    t: &T,
    request: &SubmitParamsRequest,
) -> Result<SubmitResponse, ClientError> {
    decode(t.request(Method::Post, "/params", body(request)?).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seg_encodes_reserved_characters() {
        assert_eq!(seg("openai"), "openai");
        assert_eq!(seg("my profile"), "my%20profile");
        assert_eq!(seg("a/b?c"), "a%2Fb%3Fc");
    }
}
