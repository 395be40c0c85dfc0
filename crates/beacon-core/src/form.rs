//! Ordered, keyed input fields with a single focus and a text cursor.

use std::collections::BTreeMap;

use crate::error::ValidationError;

pub const REQUIRED: &str = "required";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }

    pub fn plain(value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            label: value.clone(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Password,
    Select {
        options: Vec<SelectOption>,
        selected: Option<usize>,
    },
    Checkbox {
        checked: bool,
    },
    TextArea,
}

impl FieldKind {
    fn is_textual(&self) -> bool {
        matches!(self, Self::Text | Self::Password | Self::TextArea)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormValue {
    Text(String),
    Bool(bool),
    Choice(Option<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub key: String,
    pub label: String,
    pub kind: FieldKind,
    pub text: String,
    /// Cursor position in chars within `text`.
    pub cursor: usize,
    pub required: bool,
    pub error: Option<String>,
    pub description: Option<String>,
}

impl Field {
    fn base(key: &str, label: &str, kind: FieldKind) -> Self {
        Self {
            key: key.to_owned(),
            label: label.to_owned(),
            kind,
            text: String::new(),
            cursor: 0,
            required: false,
            error: None,
            description: None,
        }
    }

    pub fn text(key: &str, label: &str) -> Self {
        Self::base(key, label, FieldKind::Text)
    }

    pub fn password(key: &str, label: &str) -> Self {
        Self::base(key, label, FieldKind::Password)
    }

    pub fn textarea(key: &str, label: &str) -> Self {
        Self::base(key, label, FieldKind::TextArea)
    }

    pub fn checkbox(key: &str, label: &str, checked: bool) -> Self {
        Self::base(key, label, FieldKind::Checkbox { checked })
    }

    pub fn select(key: &str, label: &str, options: Vec<SelectOption>) -> Self {
        Self::base(
            key,
            label,
            FieldKind::Select {
                options,
                selected: None,
            },
        )
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self.cursor = self.text.chars().count();
        self
    }

    pub fn value(&self) -> FormValue {
        match &self.kind {
            FieldKind::Text | FieldKind::Password | FieldKind::TextArea => {
                FormValue::Text(self.text.clone())
            }
            FieldKind::Checkbox { checked } => FormValue::Bool(*checked),
            FieldKind::Select { options, selected } => {
                FormValue::Choice(selected.and_then(|i| options.get(i)).map(|o| o.value.clone()))
            }
        }
    }

    pub fn choice(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Select { options, selected } => selected
                .and_then(|i| options.get(i))
                .map(|o| o.value.as_str()),
            _ => None,
        }
    }

    pub fn checked(&self) -> bool {
        matches!(self.kind, FieldKind::Checkbox { checked: true })
    }

    pub fn options(&self) -> &[SelectOption] {
        match &self.kind {
            FieldKind::Select { options, .. } => options,
            _ => &[],
        }
    }

    fn is_empty(&self) -> bool {
        match &self.kind {
            FieldKind::Checkbox { .. } => false,
            FieldKind::Select { .. } => self.choice().is_none(),
            _ => self.text.trim().is_empty(),
        }
    }

    /// Selects the option with `value`. Returns false (selection untouched)
    /// when no such option exists.
    pub fn select_value(&mut self, value: &str) -> bool {
        if let FieldKind::Select { options, selected } = &mut self.kind {
            if let Some(idx) = options.iter().position(|o| o.value == value) {
                *selected = Some(idx);
                return true;
            }
        }
        false
    }

    /// String form of the value, used for flat `{key: string}` payloads.
    pub fn as_string(&self) -> String {
        match self.value() {
            FormValue::Text(s) => s,
            FormValue::Bool(b) => b.to_string(),
            FormValue::Choice(c) => c.unwrap_or_default(),
        }
    }

    fn byte_index(&self, char_idx: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_idx)
            .map(|(i, _)| i)
            .unwrap_or(self.text.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Form {
    fields: Vec<Field>,
    focus: usize,
}

impl Form {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields, focus: 0 }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, key: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn field_mut(&mut self, key: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.key == key)
    }

    pub fn focus(&self) -> usize {
        self.focus
    }

    pub fn focused(&self) -> Option<&Field> {
        self.fields.get(self.focus)
    }

    pub fn focused_key(&self) -> Option<&str> {
        self.focused().map(|f| f.key.as_str())
    }

    fn focused_mut(&mut self) -> Option<&mut Field> {
        self.fields.get_mut(self.focus)
    }

    pub fn focus_next(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + 1) % self.fields.len();
        }
    }

    pub fn focus_prev(&mut self) {
        if !self.fields.is_empty() {
            self.focus = (self.focus + self.fields.len() - 1) % self.fields.len();
        }
    }

    pub fn focus_key(&mut self, key: &str) -> bool {
        match self.fields.iter().position(|f| f.key == key) {
            Some(idx) => {
                self.focus = idx;
                true
            }
            None => false,
        }
    }

    /// Types into the focused field. On a checkbox, space toggles.
    pub fn insert_char(&mut self, ch: char) {
        let Some(field) = self.focused_mut() else {
            return;
        };
        match field.kind {
            FieldKind::Checkbox { ref mut checked } => {
                if ch == ' ' {
                    *checked = !*checked;
                }
            }
            FieldKind::Select { .. } => {}
            _ => {
                let at = field.byte_index(field.cursor);
                field.text.insert(at, ch);
                field.cursor += 1;
                field.error = None;
            }
        }
    }

    /// Inserts a line break. Only text areas take multi-line input.
    pub fn newline(&mut self) -> bool {
        match self.focused() {
            Some(f) if f.kind == FieldKind::TextArea => {
                self.insert_char('\n');
                true
            }
            _ => false,
        }
    }

    pub fn backspace(&mut self) {
        let Some(field) = self.focused_mut() else {
            return;
        };
        if !field.kind.is_textual() || field.cursor == 0 {
            return;
        }
        let at = field.byte_index(field.cursor - 1);
        field.text.remove(at);
        field.cursor -= 1;
        field.error = None;
    }

    pub fn cursor_left(&mut self) {
        if let Some(field) = self.focused_mut() {
            field.cursor = field.cursor.saturating_sub(1);
        }
    }

    pub fn cursor_right(&mut self) {
        if let Some(field) = self.focused_mut() {
            let len = field.text.chars().count();
            field.cursor = (field.cursor + 1).min(len);
        }
    }

    /// Cycles the focused select. Returns the newly selected value if the
    /// selection changed.
    pub fn cycle_select(&mut self, forward: bool) -> Option<String> {
        let field = self.focused_mut()?;
        let FieldKind::Select { options, selected } = &mut field.kind else {
            return None;
        };
        if options.is_empty() {
            return None;
        }
        let len = options.len();
        let next = match (*selected, forward) {
            (None, true) => 0,
            (None, false) => len - 1,
            (Some(i), true) => (i + 1) % len,
            (Some(i), false) => (i + len - 1) % len,
        };
        if *selected == Some(next) {
            return None;
        }
        *selected = Some(next);
        field.error = None;
        options.get(next).map(|o| o.value.clone())
    }

    /// Replaces a select's options. The current value is kept if it is still
    /// offered, otherwise the selection resets. Returns whether it was kept.
    pub fn set_options(&mut self, key: &str, new_options: Vec<SelectOption>) -> bool {
        let Some(field) = self.field_mut(key) else {
            return false;
        };
        let FieldKind::Select { options, selected } = &mut field.kind else {
            return false;
        };
        let previous = selected
            .and_then(|i| options.get(i))
            .map(|o| o.value.clone());
        *options = new_options;
        *selected = previous
            .as_deref()
            .and_then(|v| options.iter().position(|o| o.value == v));
        selected.is_some()
    }

    pub fn set_text(&mut self, key: &str, text: impl Into<String>) {
        if let Some(field) = self.field_mut(key) {
            field.text = text.into();
            field.cursor = field.text.chars().count();
        }
    }

    pub fn set_checked(&mut self, key: &str, value: bool) {
        if let Some(Field {
            kind: FieldKind::Checkbox { checked },
            ..
        }) = self.field_mut(key)
        {
            *checked = value;
        }
    }

    pub fn select_value(&mut self, key: &str, value: &str) -> bool {
        self.field_mut(key)
            .is_some_and(|field| field.select_value(value))
    }

    pub fn value(&self, key: &str) -> Option<FormValue> {
        self.field(key).map(Field::value)
    }

    pub fn text(&self, key: &str) -> &str {
        self.field(key).map(|f| f.text.as_str()).unwrap_or("")
    }

    pub fn choice(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Field::choice)
    }

    pub fn checked(&self, key: &str) -> bool {
        self.field(key).is_some_and(Field::checked)
    }

    pub fn set_error(&mut self, key: &str, message: impl Into<String>) -> bool {
        match self.field_mut(key) {
            Some(field) => {
                field.error = Some(message.into());
                true
            }
            None => false,
        }
    }

    pub fn clear_errors(&mut self) {
        for field in &mut self.fields {
            field.error = None;
        }
    }

    /// Attaches keyed messages to their fields. Messages for keys the form
    /// does not have are returned so the caller can show them elsewhere.
    pub fn apply_errors(&mut self, errors: &BTreeMap<String, String>) -> Vec<String> {
        let mut unmatched = Vec::new();
        for (key, msg) in errors {
            if !self.set_error(key, msg.clone()) {
                unmatched.push(format!("{key}: {msg}"));
            }
        }
        if let Some(first) = self
            .fields
            .iter()
            .position(|f| f.error.is_some())
        {
            self.focus = first;
        }
        unmatched
    }

    /// Flags every empty required field. Nothing is sent when this fails.
    pub fn validate_required(&mut self) -> Result<(), ValidationError> {
        self.clear_errors();
        let mut fields = BTreeMap::new();
        for field in &mut self.fields {
            if field.required && field.is_empty() {
                field.error = Some(REQUIRED.to_owned());
                fields.insert(field.key.clone(), REQUIRED.to_owned());
            }
        }
        if fields.is_empty() {
            return Ok(());
        }
        if let Some(first) = self.fields.iter().position(|f| f.error.is_some()) {
            self.focus = first;
        }
        Err(ValidationError { fields })
    }

    /// Flat `{key: string}` view of every field.
    pub fn string_values(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|f| (f.key.clone(), f.as_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Form {
        Form::new(vec![
            Field::text("name", "Name").required(true),
            Field::select(
                "provider",
                "Provider",
                vec![SelectOption::plain("openai"), SelectOption::plain("anthropic")],
            )
            .required(true),
            Field::checkbox("default", "Default", false),
            Field::textarea("notes", "Notes"),
        ])
    }

    #[test]
    fn typing_edits_at_cursor() {
        let mut form = sample();
        for ch in "wrk".chars() {
            form.insert_char(ch);
        }
        form.cursor_left();
        form.cursor_left();
        form.insert_char('o');
        assert_eq!(form.text("name"), "work");
        form.cursor_right();
        form.cursor_right();
        form.cursor_right();
        form.backspace();
        assert_eq!(form.text("name"), "wor");
    }

    #[test]
    fn multibyte_cursor_editing() {
        let mut form = Form::new(vec![Field::text("t", "T").with_text("héllo")]);
        form.cursor_left();
        form.cursor_left();
        form.cursor_left();
        form.backspace();
        assert_eq!(form.text("t"), "hllo");
    }

    #[test]
    fn focus_wraps_both_ways() {
        let mut form = sample();
        form.focus_prev();
        assert_eq!(form.focused_key(), Some("notes"));
        form.focus_next();
        assert_eq!(form.focused_key(), Some("name"));
    }

    #[test]
    fn select_cycles_and_reports_changes() {
        let mut form = sample();
        form.focus_key("provider");
        assert_eq!(form.cycle_select(true).as_deref(), Some("openai"));
        assert_eq!(form.cycle_select(true).as_deref(), Some("anthropic"));
        assert_eq!(form.cycle_select(true).as_deref(), Some("openai"));
        assert_eq!(form.cycle_select(false).as_deref(), Some("anthropic"));
    }

    #[test]
    fn set_options_keeps_value_only_if_still_offered() {
        let mut form = sample();
        assert!(form.select_value("provider", "anthropic"));
        assert!(form.set_options(
            "provider",
            vec![SelectOption::plain("anthropic"), SelectOption::plain("mistral")]
        ));
        assert_eq!(form.choice("provider"), Some("anthropic"));

        assert!(!form.set_options("provider", vec![SelectOption::plain("mistral")]));
        assert_eq!(form.choice("provider"), None);
    }

    #[test]
    fn validate_required_flags_empty_fields() {
        let mut form = sample();
        form.focus_key("notes");
        let err = form.validate_required().unwrap_err();
        assert_eq!(err.fields.len(), 2);
        assert_eq!(form.field("name").unwrap().error.as_deref(), Some(REQUIRED));
        assert_eq!(form.focused_key(), Some("name"));

        form.set_text("name", "work");
        form.select_value("provider", "openai");
        assert!(form.validate_required().is_ok());
        assert!(form.fields().iter().all(|f| f.error.is_none()));
    }

    #[test]
    fn whitespace_only_is_empty() {
        let mut form = Form::new(vec![Field::password("api_key", "API key")
            .required(true)
            .with_text("   ")]);
        assert!(form.validate_required().is_err());
    }

    #[test]
    fn apply_errors_returns_unknown_keys() {
        let mut form = sample();
        let unmatched = form.apply_errors(&BTreeMap::from([
            ("provider".to_owned(), "unknown provider".to_owned()),
            ("bogus".to_owned(), "nope".to_owned()),
        ]));
        assert_eq!(unmatched, vec!["bogus: nope".to_owned()]);
        assert_eq!(form.focused_key(), Some("provider"));
    }

    #[test]
    fn checkbox_and_textarea_input() {
        let mut form = sample();
        form.focus_key("default");
        form.insert_char(' ');
        assert!(form.checked("default"));
        assert!(!form.newline());

        form.focus_key("notes");
        form.insert_char('a');
        assert!(form.newline());
        form.insert_char('b');
        assert_eq!(form.text("notes"), "a\nb");
        assert_eq!(form.string_values()["default"], "true");
    }
}
