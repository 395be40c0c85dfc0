//! Transcript of the ask protocol and its phase.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Open,
    Done,
    /// Partial output of a cancelled stream; kept, never appended to again.
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub state: TurnState,
    request_id: Option<u64>,
}

impl Turn {
    fn closed(role: Role, text: String) -> Self {
        Self {
            role,
            text,
            state: TurnState::Done,
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Streaming { request_id: u64 },
    NeedsInput { target: String },
    Submitting { request_id: u64, target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
    phase: Phase,
    pub scroll_from_bottom: usize,
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

impl Conversation {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            phase: Phase::Idle,
            scroll_from_bottom: 0,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self.phase, Phase::Streaming { .. })
    }

    pub fn is_busy(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    fn open_turn(&mut self, request_id: u64) -> Option<&mut Turn> {
        self.turns
            .iter_mut()
            .rev()
            .find(|t| t.state == TurnState::Open && t.request_id == Some(request_id))
    }

    /// Freezes any open assistant turn. Used when a newer ask supersedes it.
    pub fn cancel_open(&mut self) -> bool {
        let mut any = false;
        for turn in self.turns.iter_mut().filter(|t| t.state == TurnState::Open) {
            turn.state = TurnState::Cancelled;
            any = true;
        }
        if matches!(self.phase, Phase::Streaming { .. }) {
            self.phase = Phase::Idle;
        }
        any
    }

    pub fn start_ask(&mut self, request_id: u64, text: &str) {
        self.cancel_open();
        self.turns.push(Turn::closed(Role::User, text.to_owned()));
        self.turns.push(Turn {
            role: Role::Assistant,
            text: String::new(),
            state: TurnState::Open,
            request_id: Some(request_id),
        });
        self.phase = Phase::Streaming { request_id };
        self.scroll_from_bottom = 0;
    }

    /// Appends to the open turn of `request_id`. Anything else is dropped.
    pub fn append_chunk(&mut self, request_id: u64, text: &str) -> bool {
        if self.phase != (Phase::Streaming { request_id }) {
            return false;
        }
        match self.open_turn(request_id) {
            Some(turn) => {
                turn.text.push_str(text);
                true
            }
            None => false,
        }
    }

    pub fn finish(&mut self, request_id: u64) -> bool {
        let Some(turn) = self.open_turn(request_id) else {
            return false;
        };
        turn.state = TurnState::Done;
        if self.phase == (Phase::Streaming { request_id }) {
            self.phase = Phase::Idle;
        }
        true
    }

    pub fn fail(&mut self, request_id: u64, message: &str) -> bool {
        let Some(turn) = self.open_turn(request_id) else {
            return false;
        };
        turn.state = TurnState::Failed;
        self.phase = Phase::Idle;
        self.push_system(format!("error: {message}"));
        true
    }

    /// The stream handed off to a parameter form.
    pub fn needs_input(&mut self, request_id: u64, target: &str, message: Option<&str>) {
        if let Some(turn) = self.open_turn(request_id) {
            turn.state = TurnState::Done;
        }
        if let Some(message) = message.filter(|m| !m.trim().is_empty()) {
            self.push_system(message.to_owned());
        }
        self.phase = Phase::NeedsInput {
            target: target.to_owned(),
        };
    }

    pub fn submitting(&mut self, request_id: u64, target: &str) {
        self.phase = Phase::Submitting {
            request_id,
            target: target.to_owned(),
        };
    }

    pub fn executed(&mut self, summary: String) {
        self.cancel_open_as_done();
        self.push_system(summary);
        self.phase = Phase::Idle;
    }

    pub fn abandon_params(&mut self) {
        self.push_system("parameters cancelled".to_owned());
        self.phase = Phase::Idle;
    }

    pub fn reset_phase(&mut self) {
        self.cancel_open();
        self.phase = Phase::Idle;
    }

    fn cancel_open_as_done(&mut self) {
        for turn in self.turns.iter_mut().filter(|t| t.state == TurnState::Open) {
            turn.state = TurnState::Done;
        }
    }

    pub fn push_system(&mut self, text: String) {
        self.turns.push(Turn::closed(Role::System, text));
        self.scroll_from_bottom = 0;
    }

    pub fn clear(&mut self) {
        self.turns.clear();
        self.phase = Phase::Idle;
        self.scroll_from_bottom = 0;
    }
}

/// One-line rendering of an execution result for the transcript.
pub fn summarize_result(result: &serde_json::Value) -> String {
    match result {
        serde_json::Value::Null => "done".to_owned(),
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Object(map) => match map.get("message").and_then(|m| m.as_str()) {
            Some(msg) => msg.to_owned(),
            None => format!("done: {result}"),
        },
        other => format!("done: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_append_to_matching_request_only() {
        let mut c = Conversation::new();
        c.start_ask(1, "hello");
        assert!(c.append_chunk(1, "Hi"));
        assert!(c.append_chunk(1, " there"));
        assert!(!c.append_chunk(2, "stray"));
        assert!(c.finish(1));
        assert_eq!(c.turns()[1].text, "Hi there");
        assert_eq!(c.turns()[1].state, TurnState::Done);
        assert_eq!(c.phase(), &Phase::Idle);
    }

    #[test]
    fn new_ask_freezes_previous_partial_output() {
        let mut c = Conversation::new();
        c.start_ask(1, "first");
        c.append_chunk(1, "partial");
        c.start_ask(2, "second");
        assert!(!c.append_chunk(1, " late"));
        assert_eq!(c.turns()[1].text, "partial");
        assert_eq!(c.turns()[1].state, TurnState::Cancelled);
        assert!(c.append_chunk(2, "ok"));
        assert_eq!(c.turns()[3].text, "ok");
    }

    #[test]
    fn cancel_then_chunk_is_dropped() {
        let mut c = Conversation::new();
        c.start_ask(1, "q");
        c.append_chunk(1, "a");
        assert!(c.cancel_open());
        assert!(!c.append_chunk(1, "b"));
        assert!(!c.finish(1));
        assert_eq!(c.turns()[1].text, "a");
        assert!(!c.is_busy());
    }

    #[test]
    fn failure_marks_turn_and_adds_system_line() {
        let mut c = Conversation::new();
        c.start_ask(1, "q");
        assert!(c.fail(1, "boom"));
        assert_eq!(c.turns()[1].state, TurnState::Failed);
        assert_eq!(c.turns()[2].role, Role::System);
        assert_eq!(c.turns()[2].text, "error: boom");
    }

    #[test]
    fn summarize_result_prefers_message() {
        assert_eq!(
            summarize_result(&serde_json::json!({"message": "event created"})),
            "event created"
        );
        assert_eq!(summarize_result(&serde_json::Value::Null), "done");
    }
}
