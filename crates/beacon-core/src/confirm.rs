//! Two-press guard for destructive actions.
//!
//! The first press arms a `(key, id)` pair with a deadline; a second press of
//! the same pair before the deadline confirms. Anything else re-arms.

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pending {
    key: String,
    id: String,
    deadline_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    timeout_ms: u64,
    pending: Option<Pending>,
}

/// Result of a press that did not confirm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Armed {
    pub key: String,
    pub id: String,
    pub deadline_ms: u64,
}

impl Confirmation {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            pending: None,
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Returns `true` when this press confirms a previously armed `(key, id)`.
    pub fn check(&mut self, key: &str, id: &str, now_ms: u64) -> bool {
        self.press(key, id, now_ms).is_ok()
    }

    /// Same as [`Confirmation::check`] but reports the armed deadline so the
    /// caller can schedule an expiry timer.
    pub fn press(&mut self, key: &str, id: &str, now_ms: u64) -> Result<(), Armed> {
        if let Some(p) = &self.pending {
            if p.key == key && p.id == id && now_ms < p.deadline_ms {
                self.pending = None;
                return Ok(());
            }
        }
        let deadline_ms = now_ms.saturating_add(self.timeout_ms);
        self.pending = Some(Pending {
            key: key.to_owned(),
            id: id.to_owned(),
            deadline_ms,
        });
        Err(Armed {
            key: key.to_owned(),
            id: id.to_owned(),
            deadline_ms,
        })
    }

    /// Clears only if the exact arming is still pending. Returns whether it
    /// cleared anything.
    pub fn expire(&mut self, key: &str, id: &str, deadline_ms: u64) -> bool {
        let matches = self
            .pending
            .as_ref()
            .is_some_and(|p| p.key == key && p.id == id && p.deadline_ms == deadline_ms);
        if matches {
            self.pending = None;
        }
        matches
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn is_pending(&self, key: &str, id: &str) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|p| p.key == key && p.id == id)
    }

    pub fn pending_id(&self) -> Option<&str> {
        self.pending.as_ref().map(|p| p.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_press_confirms_and_clears() {
        let mut c = Confirmation::new(3_000);
        assert!(!c.check("delete_profile", "work", 0));
        assert!(c.is_pending("delete_profile", "work"));
        assert!(c.check("delete_profile", "work", 100));
        assert!(!c.is_pending("delete_profile", "work"));
        // Cleared: a third press arms again.
        assert!(!c.check("delete_profile", "work", 200));
    }

    #[test]
    fn switching_target_rearms() {
        let mut c = Confirmation::new(3_000);
        assert!(!c.check("delete", "A", 0));
        assert!(!c.check("delete", "B", 10));
        assert!(!c.check("delete", "A", 20));
        assert!(c.is_pending("delete", "A"));
    }

    #[test]
    fn switching_key_rearms() {
        let mut c = Confirmation::new(3_000);
        assert!(!c.check("delete_account", "x", 0));
        assert!(!c.check("delete_profile", "x", 10));
        assert!(c.is_pending("delete_profile", "x"));
    }

    #[test]
    fn press_after_deadline_rearms() {
        let mut c = Confirmation::new(1_000);
        assert!(!c.check("delete", "A", 0));
        assert!(!c.check("delete", "A", 1_000));
        assert!(c.check("delete", "A", 1_500));
    }

    #[test]
    fn stale_expiry_is_noop() {
        let mut c = Confirmation::new(1_000);
        let first = c.press("delete", "A", 0).unwrap_err();
        // Re-armed for B; the timer from A must not clear it.
        let _ = c.press("delete", "B", 10);
        assert!(!c.expire(&first.key, &first.id, first.deadline_ms));
        assert!(c.is_pending("delete", "B"));

        // Same pair re-armed later carries a new deadline.
        let mut c = Confirmation::new(1_000);
        let a1 = c.press("delete", "A", 0).unwrap_err();
        c.clear();
        let a2 = c.press("delete", "A", 500).unwrap_err();
        assert!(!c.expire(&a1.key, &a1.id, a1.deadline_ms));
        assert!(c.expire(&a2.key, &a2.id, a2.deadline_ms));
        assert!(!c.is_pending("delete", "A"));
    }
}
