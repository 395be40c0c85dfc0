//! Cursor-paginated model list.
//!
//! `cursor_stack[i]` is the cursor that fetched page `i + 1`; page 1 is always
//! fetched with no cursor. Navigation is staged and only committed when the
//! matching response arrives, so a failed fetch leaves the visible page alone.

use beacon_protocol::{ModelInfo, ModelPageResponse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Nav {
    First,
    Next,
    Prev,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Staged {
    seq: u64,
    nav: Nav,
    cursor: Option<String>,
}

/// What to fetch for a staged navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub seq: u64,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModelsPage {
    items: Vec<ModelInfo>,
    cursor_stack: Vec<Option<String>>,
    has_more: bool,
    next_cursor: Option<String>,
    page: usize,
    seq: u64,
    staged: Option<Staged>,
}

impl ModelsPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[ModelInfo] {
        &self.items
    }

    /// 1-based; 0 before the first page has loaded.
    pub fn page(&self) -> usize {
        self.page
    }

    pub fn is_loading(&self) -> bool {
        self.staged.is_some()
    }

    pub fn has_next(&self) -> bool {
        self.has_more && self.next_cursor.is_some()
    }

    pub fn has_prev(&self) -> bool {
        self.page > 1
    }

    pub fn cursor_stack(&self) -> &[Option<String>] {
        &self.cursor_stack
    }

    fn stage(&mut self, nav: Nav, cursor: Option<String>) -> PageRequest {
        self.seq += 1;
        self.staged = Some(Staged {
            seq: self.seq,
            nav,
            cursor: cursor.clone(),
        });
        PageRequest {
            seq: self.seq,
            cursor,
        }
    }

    /// Discards all pages and history; any in-flight response becomes stale.
    pub fn begin_first(&mut self) -> PageRequest {
        self.items.clear();
        self.cursor_stack.clear();
        self.has_more = false;
        self.next_cursor = None;
        self.page = 0;
        self.stage(Nav::First, None)
    }

    /// Empties the list with nothing staged. In-flight responses go stale.
    pub fn reset(&mut self) {
        self.items.clear();
        self.cursor_stack.clear();
        self.has_more = false;
        self.next_cursor = None;
        self.page = 0;
        self.seq += 1;
        self.staged = None;
    }

    pub fn begin_next(&mut self) -> Option<PageRequest> {
        if !self.has_next() {
            return None;
        }
        let cursor = self.next_cursor.clone();
        Some(self.stage(Nav::Next, cursor))
    }

    pub fn begin_prev(&mut self) -> Option<PageRequest> {
        if !self.has_prev() {
            return None;
        }
        let cursor = self.cursor_stack.get(self.page - 2).cloned().flatten();
        Some(self.stage(Nav::Prev, cursor))
    }

    /// Applies a response. Returns false (and changes nothing) when `seq` is
    /// not the latest staged request.
    pub fn commit(&mut self, seq: u64, resp: ModelPageResponse) -> bool {
        let Some(staged) = self.staged.take_if(|s| s.seq == seq) else {
            return false;
        };
        match staged.nav {
            Nav::First => {
                self.cursor_stack = vec![None];
                self.page = 1;
            }
            Nav::Next => {
                self.cursor_stack.push(staged.cursor);
                self.page += 1;
            }
            Nav::Prev => {
                self.cursor_stack.pop();
                self.page -= 1;
            }
        }
        self.items = resp.items;
        self.has_more = resp.has_more;
        self.next_cursor = resp.next_cursor;
        true
    }

    /// Drops the staged navigation if `seq` is current. The visible page
    /// stays as it was.
    pub fn fail(&mut self, seq: u64) -> bool {
        self.staged.take_if(|s| s.seq == seq).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn models(range: std::ops::RangeInclusive<u32>) -> Vec<ModelInfo> {
        range
            .map(|n| ModelInfo {
                id: format!("m{n}"),
                name: None,
            })
            .collect()
    }

    /// Server stand-in: 32 models, cursor is the offset.
    fn serve(cursor: Option<&str>, limit: usize) -> ModelPageResponse {
        let offset: usize = cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let all = models(1..=32);
        let items: Vec<_> = all.iter().skip(offset).take(limit).cloned().collect();
        let end = offset + items.len();
        let has_more = end < all.len();
        ModelPageResponse {
            items,
            next_cursor: has_more.then(|| end.to_string()),
            has_more,
        }
    }

    fn run(page: &mut ModelsPage, req: PageRequest) {
        let resp = serve(req.cursor.as_deref(), 15);
        assert!(page.commit(req.seq, resp));
    }

    #[test]
    fn thirty_two_models_page_through_and_back() {
        let mut page = ModelsPage::new();
        let req = page.begin_first();
        assert_eq!(req.cursor, None);
        run(&mut page, req);
        assert_eq!(page.page(), 1);
        assert_eq!(page.items().first().unwrap().id, "m1");
        assert_eq!(page.items().last().unwrap().id, "m15");
        assert!(!page.has_prev());

        let req = page.begin_next().unwrap();
        assert_eq!(req.cursor.as_deref(), Some("15"));
        run(&mut page, req);
        assert_eq!(page.page(), 2);
        assert_eq!(page.items().first().unwrap().id, "m16");
        assert_eq!(page.items().last().unwrap().id, "m30");
        assert_eq!(page.cursor_stack(), &[None, Some("15".to_owned())]);

        let req = page.begin_next().unwrap();
        run(&mut page, req);
        assert_eq!(page.page(), 3);
        assert_eq!(page.items().len(), 2);
        assert!(!page.has_next());
        assert!(page.begin_next().is_none());

        let req = page.begin_prev().unwrap();
        assert_eq!(req.cursor.as_deref(), Some("15"));
        run(&mut page, req);
        assert_eq!(page.page(), 2);

        let req = page.begin_prev().unwrap();
        assert_eq!(req.cursor, None);
        run(&mut page, req);
        assert_eq!(page.page(), 1);
        assert_eq!(page.items().first().unwrap().id, "m1");
        assert_eq!(page.cursor_stack(), &[None]);
    }

    #[test]
    fn stale_response_is_dropped() {
        let mut page = ModelsPage::new();
        let old = page.begin_first();
        let new = page.begin_first();
        assert!(!page.commit(old.seq, serve(None, 15)));
        assert!(page.is_loading());
        assert!(page.commit(new.seq, serve(None, 15)));
        assert!(!page.is_loading());
    }

    #[test]
    fn failed_navigation_keeps_current_page() {
        let mut page = ModelsPage::new();
        let req = page.begin_first();
        run(&mut page, req);
        let req = page.begin_next().unwrap();
        assert!(page.fail(req.seq));
        assert_eq!(page.page(), 1);
        assert_eq!(page.items().len(), 15);
        assert_eq!(page.cursor_stack(), &[None]);
    }

    #[test]
    fn reset_discards_history() {
        let mut page = ModelsPage::new();
        let req = page.begin_first();
        run(&mut page, req);
        let req = page.begin_next().unwrap();
        run(&mut page, req);
        let req = page.begin_first();
        assert_eq!(page.page(), 0);
        assert!(page.items().is_empty());
        run(&mut page, req);
        assert_eq!(page.cursor_stack(), &[None]);
    }

    #[test]
    fn reset_makes_in_flight_stale() {
        let mut page = ModelsPage::new();
        let req = page.begin_first();
        page.reset();
        assert!(!page.is_loading());
        assert!(!page.commit(req.seq, serve(None, 15)));
        assert!(page.items().is_empty());
    }
}
