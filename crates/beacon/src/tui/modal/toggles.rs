//! List modals over cached workflows and modules.

use super::super::core::{Action, Effect, Msg};
use super::{ModalContext, Step};

fn step_selection(selected: &mut usize, len: usize, action: Action) -> bool {
    match action {
        Action::MoveUp => {
            *selected = selected.saturating_sub(1);
            true
        }
        Action::MoveDown => {
            *selected = (*selected + 1).min(len.saturating_sub(1));
            true
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModulesModal {
    pub selected: usize,
}

impl ModulesModal {
    pub(super) fn update(mut self, msg: &Msg, ctx: &ModalContext<'_>) -> Step<Self> {
        let Msg::Action(action) = msg else {
            return Step::Unhandled(self);
        };
        let modules = ctx.cache.modules.as_deref().unwrap_or_default();
        self.selected = self.selected.min(modules.len().saturating_sub(1));
        if step_selection(&mut self.selected, modules.len(), *action) {
            return Step::Stay(self, Vec::new());
        }
        match action {
            Action::Enter | Action::Char(' ') => {
                let effects = modules
                    .get(self.selected)
                    .map(|m| Effect::SetModuleEnabled {
                        name: m.name.clone(),
                        enabled: !m.enabled,
                    })
                    .into_iter()
                    .collect();
                Step::Stay(self, effects)
            }
            Action::Char('r') => Step::Stay(self, vec![Effect::FetchModules]),
            _ => Step::Unhandled(self),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowsModal {
    pub selected: usize,
}

impl WorkflowsModal {
    pub(super) fn update(mut self, msg: &Msg, ctx: &ModalContext<'_>) -> Step<Self> {
        let Msg::Action(action) = msg else {
            return Step::Unhandled(self);
        };
        let workflows = ctx.cache.workflows.as_deref().unwrap_or_default();
        self.selected = self.selected.min(workflows.len().saturating_sub(1));
        if step_selection(&mut self.selected, workflows.len(), *action) {
            return Step::Stay(self, Vec::new());
        }
        match action {
            Action::Enter => {
                let effects = workflows
                    .get(self.selected)
                    .map(|w| Effect::TriggerWorkflow {
                        name: w.name.clone(),
                    })
                    .into_iter()
                    .collect();
                Step::Stay(self, effects)
            }
            Action::Char('r') => Step::Stay(self, vec![Effect::FetchWorkflows]),
            _ => Step::Unhandled(self),
        }
    }
}
