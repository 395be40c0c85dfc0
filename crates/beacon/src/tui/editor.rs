/// Single prompt buffer with submit history and a char-indexed cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Editor {
    pub buffer: String,
    pub cursor: usize,
    pub history: Vec<String>,
    pub history_cursor: Option<usize>,
}

impl Editor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear_buffer(&mut self) {
        self.buffer.clear();
        self.cursor = 0;
        self.history_cursor = None;
    }

    fn byte_index(&self) -> usize {
        self.buffer
            .char_indices()
            .nth(self.cursor)
            .map(|(i, _)| i)
            .unwrap_or(self.buffer.len())
    }

    fn set_buffer(&mut self, text: String) {
        self.cursor = text.chars().count();
        self.buffer = text;
    }

    pub fn insert_char(&mut self, ch: char) {
        let at = self.byte_index();
        self.buffer.insert(at, ch);
        self.cursor += 1;
        self.history_cursor = None;
    }

    pub fn insert_str(&mut self, text: &str) {
        for ch in text.chars().filter(|c| *c != '\r') {
            self.insert_char(ch);
        }
    }

    pub fn insert_newline(&mut self) {
        self.insert_char('\n');
    }

    pub fn backspace(&mut self) {
        if self.cursor == 0 {
            return;
        }
        self.cursor -= 1;
        let at = self.byte_index();
        self.buffer.remove(at);
        self.history_cursor = None;
    }

    pub fn move_left(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn move_right(&mut self) {
        self.cursor = (self.cursor + 1).min(self.buffer.chars().count());
    }

    pub fn history_prev(&mut self) {
        if self.history.is_empty() {
            return;
        }

        let next = match self.history_cursor {
            None => self.history.len().saturating_sub(1),
            Some(idx) => idx.saturating_sub(1),
        };
        self.history_cursor = Some(next);
        self.set_buffer(self.history[next].clone());
    }

    pub fn history_next(&mut self) {
        let Some(idx) = self.history_cursor else {
            return;
        };

        if idx + 1 >= self.history.len() {
            self.history_cursor = None;
            self.set_buffer(String::new());
            return;
        }

        let next = idx + 1;
        self.history_cursor = Some(next);
        self.set_buffer(self.history[next].clone());
    }

    pub fn take_submit(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }

        let msg = std::mem::take(&mut self.buffer);
        self.cursor = 0;
        self.history_cursor = None;
        if self.history.last().map(|h| h.as_str()) != Some(msg.as_str()) {
            self.history.push(msg.clone());
        }
        Some(msg)
    }

    pub fn visual_lines(&self) -> usize {
        self.buffer.split('\n').count().max(1)
    }

    /// Buffer with a block cursor spliced in at the cursor position.
    pub fn with_cursor(&self) -> String {
        let mut out = self.buffer.clone();
        out.insert(self.byte_index(), '█');
        out
    }
}
