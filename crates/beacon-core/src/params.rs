//! Conversion between a server-declared parameter schema and a [`Form`].

use std::collections::BTreeMap;

use beacon_protocol::{NeedsInput, ParamProperty, ParamSchema, ParamType};
use serde_json::{Map, Number, Value};

use crate::error::ValidationError;
use crate::form::{Field, FieldKind, Form, FormValue, SelectOption, REQUIRED};

fn field_for(key: &str, prop: &ParamProperty, required: bool) -> Field {
    let label = prop.title.as_deref().unwrap_or(key);
    let field = match (prop.kind, prop.enum_values.as_ref()) {
        (ParamType::String, Some(values)) => Field::select(
            key,
            label,
            values.iter().map(SelectOption::plain).collect(),
        ),
        (ParamType::String, None) if prop.format.as_deref() == Some("password") => {
            Field::password(key, label)
        }
        (ParamType::Boolean, _) => Field::checkbox(key, label, false),
        (ParamType::Array | ParamType::Object, _) => Field::textarea(key, label),
        _ => Field::text(key, label),
    };
    field
        .required(required)
        .with_description(prop.description.clone())
}

fn render_value(field: &mut Field, kind: ParamType, value: &Value) {
    if value.is_null() {
        return;
    }
    match field.kind {
        FieldKind::Checkbox { ref mut checked } => {
            if let Some(b) = value.as_bool() {
                *checked = b;
            }
        }
        FieldKind::Select { .. } => {
            if let Some(s) = value.as_str() {
                field.select_value(s);
            }
        }
        _ => {
            let text = match (kind, value) {
                (ParamType::Array, Value::Array(items)) => items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
                (ParamType::Object, v) => {
                    serde_json::to_string_pretty(v).unwrap_or_else(|_| v.to_string())
                }
                (_, Value::String(s)) => s.clone(),
                (_, v) => v.to_string(),
            };
            field.text = text;
            field.cursor = field.text.chars().count();
        }
    }
}

/// Builds the parameter form: current values first, schema defaults as a
/// fallback, then any per-field errors the server attached.
pub fn form_from_needs(needs: &NeedsInput) -> Form {
    let schema = &needs.schema;
    let mut fields = Vec::new();
    for key in schema.ordered_keys() {
        let Some(prop) = schema.properties.get(&key) else {
            continue;
        };
        let mut field = field_for(&key, prop, schema.required.contains(&key));
        if let Some(value) = needs.values.get(&key).or(prop.default.as_ref()) {
            render_value(&mut field, prop.kind, value);
        }
        fields.push(field);
    }
    let mut form = Form::new(fields);
    form.apply_errors(&needs.errors);
    form
}

/// Rebuilds the form for a repeated request, carrying over what the user
/// already entered for keys that survive.
pub fn refresh_form(previous: &Form, needs: &NeedsInput) -> Form {
    let mut form = form_from_needs(needs);
    let errors: BTreeMap<_, _> = form
        .fields()
        .iter()
        .filter_map(|f| f.error.clone().map(|e| (f.key.clone(), e)))
        .collect();
    for old in previous.fields() {
        let Some(field) = form.field_mut(&old.key) else {
            continue;
        };
        if std::mem::discriminant(&field.kind) != std::mem::discriminant(&old.kind) {
            continue;
        }
        match old.value() {
            FormValue::Bool(b) => form.set_checked(&old.key, b),
            FormValue::Choice(Some(v)) => {
                field.select_value(&v);
            }
            FormValue::Choice(None) => {}
            FormValue::Text(t) => form.set_text(&old.key, t),
        }
    }
    form.apply_errors(&errors);
    form
}

fn parse_number(text: &str, integer_only: bool) -> Result<Value, &'static str> {
    if let Ok(i) = text.parse::<i64>() {
        return Ok(Value::Number(i.into()));
    }
    if integer_only {
        return Err("must be an integer");
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .ok_or("must be a number")
}

fn parse_field(prop: &ParamProperty, field: &Field) -> Result<Option<Value>, String> {
    match field.value() {
        FormValue::Bool(b) => return Ok(Some(Value::Bool(b))),
        FormValue::Choice(choice) => return Ok(choice.map(Value::String)),
        FormValue::Text(_) => {}
    }
    let text = field.text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value = match prop.kind {
        ParamType::String => Value::String(field.text.clone()),
        ParamType::Number => parse_number(text, false)?,
        ParamType::Integer => parse_number(text, true)?,
        ParamType::Boolean => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => return Err("must be true or false".to_owned()),
        },
        ParamType::Array => Value::Array(
            text.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(|l| Value::String(l.to_owned()))
                .collect(),
        ),
        ParamType::Object => match serde_json::from_str::<Value>(text) {
            Ok(v @ Value::Object(_)) => v,
            Ok(_) => return Err("must be a JSON object".to_owned()),
            Err(err) => return Err(format!("invalid JSON: {err}")),
        },
    };
    Ok(Some(value))
}

/// Reads typed values back out of the form. Marks offending fields and
/// returns a [`ValidationError`] when anything is missing or malformed.
pub fn values_from_form(
    schema: &ParamSchema,
    form: &mut Form,
) -> Result<Map<String, Value>, ValidationError> {
    form.clear_errors();
    let mut values = Map::new();
    let mut errors = BTreeMap::new();
    for key in schema.ordered_keys() {
        let (Some(prop), Some(field)) = (schema.properties.get(&key), form.field(&key)) else {
            continue;
        };
        match parse_field(prop, field) {
            Ok(Some(value)) => {
                values.insert(key, value);
            }
            Ok(None) if schema.required.contains(&key) => {
                errors.insert(key, REQUIRED.to_owned());
            }
            Ok(None) => {}
            Err(msg) => {
                errors.insert(key, msg);
            }
        }
    }
    if errors.is_empty() {
        Ok(values)
    } else {
        form.apply_errors(&errors);
        Err(ValidationError { fields: errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn needs(schema: Value, values: Value) -> NeedsInput {
        serde_json::from_value(json!({
            "target": "calendar.create",
            "schema": schema,
            "values": values,
        }))
        .unwrap()
    }

    fn schema() -> Value {
        json!({
            "properties": {
                "title": {"type": "string", "title": "Title"},
                "count": {"type": "integer"},
                "ratio": {"type": "number"},
                "urgent": {"type": "boolean"},
                "attendees": {"type": "array"},
                "meta": {"type": "object"},
                "color": {"type": "string", "enum": ["red", "blue"]},
                "secret": {"type": "string", "format": "password"}
            },
            "required": ["title"],
            "order": ["title"]
        })
    }

    #[test]
    fn field_kinds_follow_schema_types() {
        let form = form_from_needs(&needs(schema(), json!({})));
        assert_eq!(form.fields()[0].key, "title");
        assert_eq!(form.field("title").unwrap().label, "Title");
        assert!(form.field("title").unwrap().required);
        assert_eq!(form.field("count").unwrap().kind, FieldKind::Text);
        assert!(matches!(
            form.field("urgent").unwrap().kind,
            FieldKind::Checkbox { checked: false }
        ));
        assert_eq!(form.field("attendees").unwrap().kind, FieldKind::TextArea);
        assert_eq!(form.field("meta").unwrap().kind, FieldKind::TextArea);
        assert_eq!(form.field("color").unwrap().options().len(), 2);
        assert_eq!(form.field("secret").unwrap().kind, FieldKind::Password);
    }

    #[test]
    fn values_round_trip() {
        let values = json!({
            "title": "Standup",
            "count": 3,
            "ratio": 0.5,
            "urgent": true,
            "attendees": ["ana", "bo"],
            "meta": {"room": "4B", "floor": 2},
            "color": "blue",
            "secret": "hunter2"
        });
        let needs = needs(schema(), values.clone());
        let mut form = form_from_needs(&needs);
        assert_eq!(form.text("attendees"), "ana\nbo");
        let got = values_from_form(&needs.schema, &mut form).unwrap();
        assert_eq!(Value::Object(got), values);
    }

    #[test]
    fn missing_required_and_bad_number_are_reported() {
        let needs = needs(schema(), json!({"count": "x"}));
        let mut form = form_from_needs(&needs);
        form.set_text("ratio", "abc");
        let err = values_from_form(&needs.schema, &mut form).unwrap_err();
        assert_eq!(err.fields["title"], REQUIRED);
        assert_eq!(err.fields["count"], "must be an integer");
        assert_eq!(err.fields["ratio"], "must be a number");
        assert_eq!(form.field("count").unwrap().error.as_deref(), Some("must be an integer"));
    }

    #[test]
    fn object_must_be_json_object() {
        let needs = needs(schema(), json!({"title": "t"}));
        let mut form = form_from_needs(&needs);
        form.set_text("meta", "[1, 2]");
        let err = values_from_form(&needs.schema, &mut form).unwrap_err();
        assert_eq!(err.fields["meta"], "must be a JSON object");
    }

    #[test]
    fn optional_empty_fields_are_omitted() {
        let needs = needs(schema(), json!({"title": "t"}));
        let mut form = form_from_needs(&needs);
        let got = values_from_form(&needs.schema, &mut form).unwrap();
        assert_eq!(Value::Object(got), json!({"title": "t", "urgent": false}));
    }

    #[test]
    fn defaults_fill_missing_values() {
        let schema = json!({
            "properties": {"limit": {"type": "integer", "default": 10}}
        });
        let form = form_from_needs(&needs(schema, json!({})));
        assert_eq!(form.text("limit"), "10");
    }

    #[test]
    fn refresh_keeps_typed_values_and_new_errors() {
        let first = needs(schema(), json!({}));
        let mut form = form_from_needs(&first);
        form.set_text("title", "Retro");
        form.set_text("count", "7");

        let mut again = needs(schema(), json!({"title": "server"}));
        again
            .errors
            .insert("count".to_owned(), "too many".to_owned());
        let form = refresh_form(&form, &again);
        assert_eq!(form.text("title"), "Retro");
        assert_eq!(form.text("count"), "7");
        assert_eq!(form.field("count").unwrap().error.as_deref(), Some("too many"));
    }
}
