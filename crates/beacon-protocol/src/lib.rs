use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub const PROTOCOL_VERSION: &str = "0.1";

pub const CONFIG_TYPE_CREDENTIALS: &str = "credentials";
pub const CONFIG_TYPE_PROVIDERS: &str = "providers";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
}

/// Error body returned with HTTP 422.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ValidationErrorBody {
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generic error body for non-validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorBody {
    #[serde(default, alias = "message")]
    pub error: String,
}

/// A server-declared input field. Used both for credential integrations and
/// for the dynamic requirements of a provider account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Integration {
    pub name: String,
    pub config_type: String,
    #[serde(default)]
    pub configured: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<Profile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationListResponse {
    #[serde(default)]
    pub integrations: Vec<Integration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveFieldsRequest {
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub provider: String,
    pub account: String,
    pub model: String,
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAccount {
    pub provider: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub accounts: Vec<String>,
}

/// A provider the server knows how to connect, configured or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownProvider {
    pub provider: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProviderState {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub providers: Vec<ProviderAccount>,
    #[serde(default)]
    pub available: Vec<KnownProvider>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFieldsResponse {
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAccountRequest {
    pub account: String,
    #[serde(default)]
    pub values: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ModelInfo {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModelPageResponse {
    #[serde(default)]
    pub items: Vec<ModelInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowListResponse {
    #[serde(default)]
    pub workflows: Vec<WorkflowInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub run_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub output: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<RunResult>,
    #[serde(default)]
    pub needs_attention: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunListResponse {
    #[serde(default)]
    pub runs: Vec<Run>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleListResponse {
    #[serde(default)]
    pub modules: Vec<ModuleInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleUpdateRequest {
    pub enabled: bool,
}

/// Routing context the server attaches to a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RouteContext {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskRequest {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RouteContext>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamProperty {
    #[serde(rename = "type")]
    pub kind: ParamType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

/// A JSON-schema-like object describing structured parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParamSchema {
    #[serde(default)]
    pub properties: BTreeMap<String, ParamProperty>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Display order; keys not listed follow in name order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order: Vec<String>,
}

impl ParamSchema {
    pub fn ordered_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .order
            .iter()
            .filter(|k| self.properties.contains_key(*k))
            .cloned()
            .collect();
        for key in self.properties.keys() {
            if !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        keys
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedsInput {
    pub target: String,
    pub schema: ParamSchema,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub values: Map<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub errors: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// One decoded `data:` payload from the ask stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AskEvent {
    Route { context: RouteContext },
    Chunk { text: String },
    Done,
    NeedsInput(NeedsInput),
    Executed { result: Value },
    Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitParamsRequest {
    pub target: String,
    pub values: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitResponse {
    NeedsInput(NeedsInput),
    Executed { result: Value },
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_events_decode_from_tagged_json() {
        let chunk: AskEvent =
            serde_json::from_value(serde_json::json!({"type": "chunk", "text": "hi"})).unwrap();
        assert_eq!(
            chunk,
            AskEvent::Chunk {
                text: "hi".to_owned()
            }
        );

        let route: AskEvent = serde_json::from_value(serde_json::json!({
            "type": "route",
            "context": {"type": "skill", "target": "calendar"}
        }))
        .unwrap();
        assert_eq!(
            route,
            AskEvent::Route {
                context: RouteContext {
                    kind: Some("skill".to_owned()),
                    target: Some("calendar".to_owned()),
                }
            }
        );

        let done: AskEvent = serde_json::from_value(serde_json::json!({"type": "done"})).unwrap();
        assert_eq!(done, AskEvent::Done);
    }

    #[test]
    fn needs_input_event_carries_schema() {
        let evt: AskEvent = serde_json::from_value(serde_json::json!({
            "type": "needs_input",
            "target": "calendar.create",
            "schema": {
                "properties": {
                    "title": {"type": "string"},
                    "attendees": {"type": "array"}
                },
                "required": ["title"]
            }
        }))
        .unwrap();
        let AskEvent::NeedsInput(needs) = evt else {
            panic!("expected needs_input");
        };
        assert_eq!(needs.target, "calendar.create");
        assert_eq!(needs.schema.required, vec!["title".to_owned()]);
        assert_eq!(
            needs.schema.properties["attendees"].kind,
            ParamType::Array
        );
    }

    #[test]
    fn submit_response_uses_status_tag() {
        let resp: SubmitResponse = serde_json::from_value(serde_json::json!({
            "status": "executed",
            "result": {"ok": true}
        }))
        .unwrap();
        assert_eq!(
            resp,
            SubmitResponse::Executed {
                result: serde_json::json!({"ok": true})
            }
        );
    }

    #[test]
    fn ordered_keys_respects_declared_order_then_names() {
        let mut schema = ParamSchema::default();
        for key in ["b", "a", "c"] {
            schema.properties.insert(
                key.to_owned(),
                ParamProperty {
                    kind: ParamType::String,
                    title: None,
                    description: None,
                    enum_values: None,
                    format: None,
                    default: None,
                },
            );
        }
        schema.order = vec!["c".to_owned(), "missing".to_owned()];
        assert_eq!(schema.ordered_keys(), vec!["c", "a", "b"]);
    }
}
