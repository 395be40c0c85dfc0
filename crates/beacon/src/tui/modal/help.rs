use super::super::core::{Action, Msg};
use super::Step;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelpModal {
    pub scroll: usize,
}

impl HelpModal {
    pub(super) fn update(mut self, msg: &Msg) -> Step<Self> {
        match msg {
            Msg::Action(Action::MoveUp) => {
                self.scroll = self.scroll.saturating_sub(1);
                Step::Stay(self, Vec::new())
            }
            Msg::Action(Action::MoveDown) => {
                self.scroll += 1;
                Step::Stay(self, Vec::new())
            }
            _ => Step::Unhandled(self),
        }
    }
}
