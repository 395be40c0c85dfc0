use beacon_core::confirm::Confirmation;
use beacon_core::error::ClientError;
use beacon_protocol::Run;

use super::super::core::{Action, ConfirmScope, Effect, Msg, TimerFire};
use super::{expire_confirm, press_confirm, ModalContext, Press, Step};

pub const DETAIL_MAX_ATTEMPTS: u32 = 3;
pub const DETAIL_RETRY_MS: u64 = 500;
const DISMISS: &str = "dismiss";

/// The run opened with Enter. A freshly triggered run may not be readable
/// yet, so `NotFound` is retried a few times before giving up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunDetail {
    pub id: String,
    pub attempt: u32,
    pub run: Option<Run>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TasksModal {
    pub selected: usize,
    pub detail: Option<RunDetail>,
    pub confirm: Confirmation,
}

impl TasksModal {
    pub fn new(confirm_timeout_ms: u64) -> Self {
        Self {
            selected: 0,
            detail: None,
            confirm: Confirmation::new(confirm_timeout_ms),
        }
    }

    fn selected_run<'a>(&self, ctx: &'a ModalContext<'_>) -> Option<&'a Run> {
        match &self.detail {
            Some(detail) => ctx.tasks.get(&detail.id).map(|t| &t.run),
            None => ctx.tasks.runs().get(self.selected).map(|t| &t.run),
        }
    }

    pub(super) fn update(mut self, msg: &Msg, ctx: &ModalContext<'_>) -> Step<Self> {
        if expire_confirm(&mut self.confirm, ConfirmScope::Tasks, msg) {
            return Step::Stay(self, Vec::new());
        }
        match msg {
            Msg::Action(action) => self.on_action(*action, ctx),
            Msg::RunDetailLoaded {
                id,
                attempt,
                result,
            } => self.on_detail(id, *attempt, result),
            Msg::Timer(TimerFire::RetryRunDetail { id, attempt }) => {
                match &mut self.detail {
                    Some(detail) if detail.id == *id && detail.attempt + 1 == *attempt => {
                        detail.attempt = *attempt;
                        let effect = Effect::FetchRunDetail {
                            id: id.clone(),
                            attempt: *attempt,
                        };
                        Step::Stay(self, vec![effect])
                    }
                    _ => Step::Stay(self, Vec::new()),
                }
            }
            _ => Step::Unhandled(self),
        }
    }

    fn on_action(mut self, action: Action, ctx: &ModalContext<'_>) -> Step<Self> {
        let len = ctx.tasks.runs().len();
        self.selected = self.selected.min(len.saturating_sub(1));
        match action {
            Action::MoveUp if self.detail.is_none() => {
                self.confirm.clear();
                self.selected = self.selected.saturating_sub(1);
                Step::Stay(self, Vec::new())
            }
            Action::MoveDown if self.detail.is_none() => {
                self.confirm.clear();
                self.selected = (self.selected + 1).min(len.saturating_sub(1));
                Step::Stay(self, Vec::new())
            }
            Action::Enter | Action::Backspace if self.detail.is_some() => {
                self.confirm.clear();
                self.detail = None;
                Step::Stay(self, Vec::new())
            }
            Action::Enter => {
                let Some(id) = self.selected_run(ctx).map(|r| r.id.clone()) else {
                    return Step::Stay(self, Vec::new());
                };
                self.confirm.clear();
                self.detail = Some(RunDetail {
                    id: id.clone(),
                    attempt: 1,
                    run: None,
                    error: None,
                });
                Step::Stay(self, vec![Effect::FetchRunDetail { id, attempt: 1 }])
            }
            Action::Char('d') => {
                let Some(id) = self
                    .selected_run(ctx)
                    .filter(|r| r.needs_attention)
                    .map(|r| r.id.clone())
                else {
                    return Step::Stay(self, Vec::new());
                };
                match press_confirm(&mut self.confirm, ConfirmScope::Tasks, DISMISS, &id, ctx.now_ms)
                {
                    Press::Confirmed => Step::Stay(self, vec![Effect::DismissRun { id }]),
                    Press::Armed(timer) => Step::Stay(self, vec![timer]),
                }
            }
            Action::Char('r') => Step::Stay(self, vec![Effect::FetchRuns]),
            _ => Step::Unhandled(self),
        }
    }

    fn on_detail(
        mut self,
        id: &str,
        attempt: u32,
        result: &Result<Run, ClientError>,
    ) -> Step<Self> {
        let Some(detail) = self
            .detail
            .as_mut()
            .filter(|d| d.id == id && d.attempt == attempt)
        else {
            return Step::Stay(self, Vec::new());
        };
        match result {
            Ok(run) => {
                detail.run = Some(run.clone());
                detail.error = None;
                Step::Stay(self, Vec::new())
            }
            Err(err) if err.is_not_found() && attempt < DETAIL_MAX_ATTEMPTS => {
                tracing::debug!(run_id = id, attempt, "run detail not found yet; retrying");
                let timer = Effect::Timer {
                    after_ms: DETAIL_RETRY_MS,
                    fire: TimerFire::RetryRunDetail {
                        id: id.to_owned(),
                        attempt: attempt + 1,
                    },
                };
                Step::Stay(self, vec![timer])
            }
            Err(err) => {
                detail.error = Some(err.to_string());
                Step::Stay(self, Vec::new())
            }
        }
    }

    pub fn pending_dismiss(&self) -> Option<&str> {
        self.confirm.pending_id()
    }
}
