use beacon_core::form::{FieldKind, Form};
use beacon_core::params::{form_from_needs, values_from_form};
use beacon_protocol::NeedsInput;

use super::super::core::{Action, Effect, Msg};
use super::{form_input, ModalResult, Step};

/// Collects structured parameters the server asked for mid-conversation.
/// Esc cancels, Ctrl+S submits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamFormModal {
    pub needs: NeedsInput,
    pub form: Form,
    pub error: Option<String>,
}

impl ParamFormModal {
    pub fn new(needs: NeedsInput) -> Self {
        let form = form_from_needs(&needs);
        Self::with_form(needs, form)
    }

    pub fn with_form(needs: NeedsInput, form: Form) -> Self {
        let error = needs.message.clone().filter(|m| !m.trim().is_empty());
        Self { needs, form, error }
    }

    pub(super) fn update(mut self, msg: &Msg) -> Step<Self> {
        let Msg::Action(action) = msg else {
            return Step::Unhandled(self);
        };
        match action {
            Action::Cancel => Step::Close(vec![Effect::Deliver(ModalResult::ParamsCancelled {
                target: self.needs.target.clone(),
            })]),
            Action::Save => match values_from_form(&self.needs.schema, &mut self.form) {
                Ok(values) => Step::Close(vec![Effect::Deliver(ModalResult::ParamsSubmitted {
                    needs: self.needs,
                    form: self.form,
                    values,
                })]),
                Err(err) => {
                    self.error = Some(err.to_string());
                    Step::Stay(self, Vec::new())
                }
            },
            Action::Enter => {
                let in_textarea = matches!(
                    self.form.focused().map(|f| &f.kind),
                    Some(FieldKind::TextArea)
                );
                if in_textarea {
                    self.form.newline();
                } else {
                    self.form.focus_next();
                }
                Step::Stay(self, Vec::new())
            }
            other => {
                form_input(&mut self.form, *other);
                Step::Stay(self, Vec::new())
            }
        }
    }
}
