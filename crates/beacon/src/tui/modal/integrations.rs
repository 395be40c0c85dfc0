use super::super::core::{Action, Effect, Msg};
use super::super::resource_config::ConfigFlow;
use super::{ModalContext, Step};

/// Integration list. Enter opens the flow for the selected integration's
/// config type; Esc backs out of a flow before closing the modal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationsModal {
    pub selected: usize,
    pub flow: Option<ConfigFlow>,
    pub error: Option<String>,
}

impl IntegrationsModal {
    pub(super) fn update(mut self, msg: &Msg, ctx: &ModalContext<'_>) -> Step<Self> {
        if let Some(flow) = self.flow.take() {
            return match flow.update(msg, ctx) {
                Step::Unhandled(flow) => {
                    self.flow = Some(flow);
                    Step::Unhandled(self)
                }
                Step::Stay(flow, effects) => {
                    self.flow = Some(flow);
                    Step::Stay(self, effects)
                }
                Step::Close(effects) => Step::Stay(self, effects),
            };
        }

        let Msg::Action(action) = msg else {
            return Step::Unhandled(self);
        };
        let integrations = ctx.cache.integrations.as_deref().unwrap_or_default();
        self.selected = self.selected.min(integrations.len().saturating_sub(1));
        match action {
            Action::Cancel => Step::Close(Vec::new()),
            Action::MoveUp => {
                self.error = None;
                self.selected = self.selected.saturating_sub(1);
                Step::Stay(self, Vec::new())
            }
            Action::MoveDown => {
                self.error = None;
                self.selected = (self.selected + 1).min(integrations.len().saturating_sub(1));
                Step::Stay(self, Vec::new())
            }
            Action::Char('r') => Step::Stay(self, vec![Effect::FetchIntegrations]),
            Action::Enter => {
                let Some(integration) = integrations.get(self.selected) else {
                    return Step::Stay(self, Vec::new());
                };
                match ConfigFlow::resolve(integration, ctx.settings) {
                    Ok((flow, effects)) => {
                        self.error = None;
                        self.flow = Some(flow);
                        Step::Stay(self, effects)
                    }
                    Err(err) => {
                        tracing::warn!(integration = %integration.name, error = %err, "cannot configure integration");
                        self.error = Some(err.to_string());
                        Step::Stay(self, Vec::new())
                    }
                }
            }
            _ => Step::Unhandled(self),
        }
    }
}
