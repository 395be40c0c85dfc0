use std::collections::BTreeMap;

use thiserror::Error;

/// Client-side validation failure. Produced before anything reaches the
/// network; keyed by form field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", summarize(.fields))]
pub struct ValidationError {
    pub fields: BTreeMap<String, String>,
}

impl ValidationError {
    pub fn single(key: &str, message: &str) -> Self {
        Self {
            fields: BTreeMap::from([(key.to_owned(), message.to_owned())]),
        }
    }
}

fn summarize(fields: &BTreeMap<String, String>) -> String {
    match fields.iter().next() {
        None => "invalid input".to_owned(),
        Some((key, msg)) if fields.len() == 1 => format!("{key}: {msg}"),
        Some((key, msg)) => format!("{key}: {msg} (+{} more)", fields.len() - 1),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unauthorized")]
    Auth,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("server rejected input: {}", server_summary(.message, .fields))]
    ServerValidation {
        message: Option<String>,
        fields: BTreeMap<String, String>,
    },
    #[error("{0}")]
    Execution(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported config type: {0}")]
    Unsupported(String),
    #[error("decode error: {0}")]
    Decode(String),
}

fn server_summary(message: &Option<String>, fields: &BTreeMap<String, String>) -> String {
    match message {
        Some(msg) if !msg.trim().is_empty() => msg.clone(),
        _ => summarize(fields),
    }
}

impl ClientError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Field-keyed messages for errors that belong inline on a form.
    pub fn field_errors(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Self::Validation(err) => Some(&err.fields),
            Self::ServerValidation { fields, .. } => Some(fields),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display_names_first_field() {
        let err = ValidationError::single("api_key", "required");
        assert_eq!(err.to_string(), "api_key: required");

        let err = ValidationError {
            fields: BTreeMap::from([
                ("a".to_owned(), "required".to_owned()),
                ("b".to_owned(), "required".to_owned()),
            ]),
        };
        assert_eq!(err.to_string(), "a: required (+1 more)");
    }

    #[test]
    fn field_errors_only_for_validation_kinds() {
        let err = ClientError::ServerValidation {
            message: None,
            fields: BTreeMap::from([("name".to_owned(), "taken".to_owned())]),
        };
        assert_eq!(err.field_errors().unwrap()["name"], "taken");
        assert_eq!(err.to_string(), "server rejected input: name: taken");
        assert!(ClientError::Auth.field_errors().is_none());
    }
}
