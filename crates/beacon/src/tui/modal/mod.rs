//! The modal stack: at most one nested state machine owning input focus.

mod help;
mod integrations;
mod param_form;
mod settings;
mod tasks;
mod toggles;

use beacon_core::confirm::Confirmation;
use beacon_core::form::{FieldKind, Form};
use beacon_core::tasks::TaskTracker;
use beacon_protocol::NeedsInput;
use serde_json::{Map, Value};

use super::core::{Action, ConfirmScope, Effect, Msg, Settings, TimerFire};
use super::session::Cache;

pub use help::HelpModal;
pub use integrations::IntegrationsModal;
pub use param_form::ParamFormModal;
pub use settings::SettingsModal;
pub use tasks::{RunDetail, TasksModal};
pub use toggles::{ModulesModal, WorkflowsModal};

/// What a closing modal hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalResult {
    ParamsSubmitted {
        needs: NeedsInput,
        form: Form,
        values: Map<String, Value>,
    },
    ParamsCancelled {
        target: String,
    },
    Logout,
}

/// Read-only view of loop state a modal may consult.
pub struct ModalContext<'a> {
    pub now_ms: u64,
    pub settings: &'a Settings,
    pub cache: &'a Cache,
    pub tasks: &'a TaskTracker,
}

#[derive(Debug)]
pub enum Step<M> {
    Unhandled(M),
    Stay(M, Vec<Effect>),
    Close(Vec<Effect>),
}

impl<M> Step<M> {
    pub(crate) fn map<N>(self, f: impl FnOnce(M) -> N) -> Step<N> {
        match self {
            Self::Unhandled(m) => Step::Unhandled(f(m)),
            Self::Stay(m, effects) => Step::Stay(f(m), effects),
            Self::Close(effects) => Step::Close(effects),
        }
    }
}

pub type ModalStep = Step<Modal>;

#[derive(Debug, Clone)]
pub enum Modal {
    Help(HelpModal),
    Settings(SettingsModal),
    Modules(ModulesModal),
    Workflows(WorkflowsModal),
    Integrations(IntegrationsModal),
    Tasks(TasksModal),
    ParamForm(ParamFormModal),
}

impl Modal {
    pub fn title(&self) -> &'static str {
        match self {
            Self::Help(_) => "Help",
            Self::Settings(_) => "Settings",
            Self::Modules(_) => "Modules",
            Self::Workflows(_) => "Workflows",
            Self::Integrations(_) => "Integrations",
            Self::Tasks(_) => "Tasks",
            Self::ParamForm(_) => "Parameters",
        }
    }

    /// Variants with their own Esc semantics handle it themselves.
    pub fn esc_closes(&self) -> bool {
        !matches!(self, Self::ParamForm(_) | Self::Integrations(_))
    }

    fn init(&self) -> Vec<Effect> {
        match self {
            Self::Modules(_) => vec![Effect::FetchModules],
            Self::Workflows(_) => vec![Effect::FetchWorkflows],
            Self::Integrations(_) => vec![Effect::FetchIntegrations],
            Self::Tasks(_) => vec![Effect::FetchRuns],
            Self::Help(_) | Self::Settings(_) | Self::ParamForm(_) => Vec::new(),
        }
    }

    pub fn update(self, msg: &Msg, ctx: &ModalContext<'_>) -> ModalStep {
        if self.esc_closes() && matches!(msg, Msg::Action(Action::Cancel)) {
            return Step::Close(Vec::new());
        }
        match self {
            Self::Help(m) => m.update(msg).map(Self::Help),
            Self::Settings(m) => m.update(msg).map(Self::Settings),
            Self::Modules(m) => m.update(msg, ctx).map(Self::Modules),
            Self::Workflows(m) => m.update(msg, ctx).map(Self::Workflows),
            Self::Integrations(m) => m.update(msg, ctx).map(Self::Integrations),
            Self::Tasks(m) => m.update(msg, ctx).map(Self::Tasks),
            Self::ParamForm(m) => m.update(msg).map(Self::ParamForm),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModalStack {
    active: Option<Modal>,
}

impl ModalStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces whatever is open and returns the new modal's init effects.
    pub fn open(&mut self, modal: Modal) -> Vec<Effect> {
        let effects = modal.init();
        tracing::debug!(modal = modal.title(), "open modal");
        self.active = Some(modal);
        effects
    }

    pub fn close(&mut self) -> Option<Modal> {
        self.active.take()
    }

    pub fn active(&self) -> Option<&Modal> {
        self.active.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.active.is_some()
    }

    /// `None` means nothing consumed the message.
    pub fn update(&mut self, msg: &Msg, ctx: &ModalContext<'_>) -> Option<Vec<Effect>> {
        let modal = self.active.take()?;
        match modal.update(msg, ctx) {
            Step::Unhandled(modal) => {
                self.active = Some(modal);
                None
            }
            Step::Stay(modal, effects) => {
                self.active = Some(modal);
                Some(effects)
            }
            Step::Close(effects) => Some(effects),
        }
    }
}

/// Outcome of a destructive keypress guarded by a [`Confirmation`].
#[derive(Debug)]
pub(crate) enum Press {
    Confirmed,
    Armed(Effect),
}

pub(crate) fn press_confirm(
    confirm: &mut Confirmation,
    scope: ConfirmScope,
    key: &str,
    id: &str,
    now_ms: u64,
) -> Press {
    match confirm.press(key, id, now_ms) {
        Ok(()) => Press::Confirmed,
        Err(armed) => Press::Armed(Effect::Timer {
            after_ms: confirm.timeout_ms(),
            fire: TimerFire::ConfirmExpired {
                scope,
                key: armed.key,
                id: armed.id,
                deadline_ms: armed.deadline_ms,
            },
        }),
    }
}

/// Clears the pending confirmation if `msg` is its own expiry timer.
pub(crate) fn expire_confirm(confirm: &mut Confirmation, scope: ConfirmScope, msg: &Msg) -> bool {
    match msg {
        Msg::Timer(TimerFire::ConfirmExpired {
            scope: s,
            key,
            id,
            deadline_ms,
        }) if *s == scope => {
            confirm.expire(key, id, *deadline_ms);
            true
        }
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum FormInput {
    Ignored,
    Edited,
    /// A select moved to a new value.
    Selected(String),
}

/// Shared field editing keys. Enter and Esc are left to the caller.
pub(crate) fn form_input(form: &mut Form, action: Action) -> FormInput {
    let on_select = matches!(
        form.focused().map(|f| &f.kind),
        Some(FieldKind::Select { .. })
    );
    let focused_key = form.focused_key().map(str::to_owned);
    let cycle = |form: &mut Form, forward: bool| match form.cycle_select(forward) {
        Some(_) => focused_key
            .clone()
            .map_or(FormInput::Edited, FormInput::Selected),
        None => FormInput::Ignored,
    };

    match action {
        Action::Tab | Action::MoveDown => {
            form.focus_next();
            FormInput::Edited
        }
        Action::BackTab | Action::MoveUp => {
            form.focus_prev();
            FormInput::Edited
        }
        Action::Left if on_select => cycle(form, false),
        Action::Right if on_select => cycle(form, true),
        Action::Char(' ') if on_select => cycle(form, true),
        Action::Left => {
            form.cursor_left();
            FormInput::Edited
        }
        Action::Right => {
            form.cursor_right();
            FormInput::Edited
        }
        Action::Backspace => {
            form.backspace();
            FormInput::Edited
        }
        Action::ShiftEnter => {
            if form.newline() {
                FormInput::Edited
            } else {
                FormInput::Ignored
            }
        }
        Action::Char(ch) => {
            form.insert_char(ch);
            FormInput::Edited
        }
        _ => FormInput::Ignored,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::form::{Field, SelectOption};

    fn ctx_parts() -> (Settings, Cache, TaskTracker) {
        (Settings::default(), Cache::default(), TaskTracker::new())
    }

    #[test]
    fn open_returns_init_effects_and_replaces_active() {
        let mut stack = ModalStack::new();
        assert_eq!(stack.open(Modal::Tasks(TasksModal::new(3_000))), vec![Effect::FetchRuns]);
        assert_eq!(
            stack.open(Modal::Workflows(WorkflowsModal::default())),
            vec![Effect::FetchWorkflows]
        );
        assert!(matches!(stack.active(), Some(Modal::Workflows(_))));
    }

    #[test]
    fn update_without_modal_is_unhandled() {
        let (settings, cache, tasks) = ctx_parts();
        let ctx = ModalContext {
            now_ms: 0,
            settings: &settings,
            cache: &cache,
            tasks: &tasks,
        };
        let mut stack = ModalStack::new();
        assert!(stack.update(&Msg::Action(Action::Enter), &ctx).is_none());
    }

    #[test]
    fn esc_closes_default_modals() {
        let (settings, cache, tasks) = ctx_parts();
        let ctx = ModalContext {
            now_ms: 0,
            settings: &settings,
            cache: &cache,
            tasks: &tasks,
        };
        let mut stack = ModalStack::new();
        stack.open(Modal::Help(HelpModal::default()));
        assert_eq!(stack.update(&Msg::Action(Action::Cancel), &ctx), Some(vec![]));
        assert!(!stack.is_open());
    }

    #[test]
    fn stale_confirm_expiry_keeps_newer_arming() {
        let mut confirm = Confirmation::new(1_000);
        let Press::Armed(Effect::Timer { fire, .. }) =
            press_confirm(&mut confirm, ConfirmScope::Tasks, "dismiss", "r1", 0)
        else {
            panic!("expected timer");
        };
        press_confirm(&mut confirm, ConfirmScope::Tasks, "dismiss", "r2", 10);
        assert!(expire_confirm(&mut confirm, ConfirmScope::Tasks, &Msg::Timer(fire)));
        assert!(confirm.is_pending("dismiss", "r2"));
    }

    #[test]
    fn form_input_reports_select_changes() {
        let mut form = Form::new(vec![
            Field::select(
                "provider",
                "Provider",
                vec![SelectOption::plain("a"), SelectOption::plain("b")],
            ),
            Field::text("name", "Name"),
        ]);
        assert_eq!(
            form_input(&mut form, Action::Right),
            FormInput::Selected("provider".to_owned())
        );
        assert_eq!(form.choice("provider"), Some("a"));
        form_input(&mut form, Action::Tab);
        form_input(&mut form, Action::Char('x'));
        assert_eq!(form.text("name"), "x");
    }
}
