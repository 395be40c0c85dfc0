use super::super::core::{Action, Effect, Msg};
use super::{ModalResult, Step};

/// Read-only view of the effective settings. `l` logs out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsModal;

impl SettingsModal {
    pub(super) fn update(self, msg: &Msg) -> Step<Self> {
        match msg {
            Msg::Action(Action::Char('l')) => {
                Step::Close(vec![Effect::Deliver(ModalResult::Logout)])
            }
            _ => Step::Unhandled(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logout_key_delivers_result() {
        let Step::Close(effects) = SettingsModal.update(&Msg::Action(Action::Char('l'))) else {
            panic!("expected close");
        };
        assert_eq!(effects, vec![Effect::Deliver(ModalResult::Logout)]);
    }
}
