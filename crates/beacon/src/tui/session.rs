use beacon_protocol::{Integration, ModuleInfo, RouteContext, WorkflowInfo};
use tokio_util::sync::CancellationToken;

/// A cancellation token tagged with the id of the request it guards. Two
/// handles are equal when they guard the same request.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    id: u64,
    token: CancellationToken,
}

impl CancelHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl PartialEq for CancelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CancelHandle {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    Ask,
    Params,
}

/// Last-good copies of background lists plus the most recent refresh error.
#[derive(Debug, Clone, Default)]
pub struct Cache {
    pub workflows: Option<Vec<WorkflowInfo>>,
    pub modules: Option<Vec<ModuleInfo>>,
    pub integrations: Option<Vec<Integration>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    pub context: RouteContext,
    pub cache: Cache,
    ask: Option<CancelHandle>,
    params: Option<CancelHandle>,
    next_request_id: u64,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, class: RequestClass) -> &mut Option<CancelHandle> {
        match class {
            RequestClass::Ask => &mut self.ask,
            RequestClass::Params => &mut self.params,
        }
    }

    /// Cancels whatever is in flight for `class` and issues a fresh handle.
    pub fn begin(&mut self, class: RequestClass) -> CancelHandle {
        self.cancel(class);
        self.next_request_id += 1;
        let handle = CancelHandle {
            id: self.next_request_id,
            token: CancellationToken::new(),
        };
        *self.slot(class) = Some(handle.clone());
        handle
    }

    pub fn in_flight(&self, class: RequestClass) -> Option<u64> {
        match class {
            RequestClass::Ask => self.ask.as_ref().map(CancelHandle::id),
            RequestClass::Params => self.params.as_ref().map(CancelHandle::id),
        }
    }

    pub fn is_current(&self, class: RequestClass, id: u64) -> bool {
        self.in_flight(class) == Some(id)
    }

    /// Releases the handle without cancelling. No-op for a stale id.
    pub fn finish(&mut self, class: RequestClass, id: u64) -> bool {
        let slot = self.slot(class);
        if slot.as_ref().is_some_and(|h| h.id == id) {
            *slot = None;
            return true;
        }
        false
    }

    pub fn cancel(&mut self, class: RequestClass) -> Option<u64> {
        let handle = self.slot(class).take()?;
        handle.token.cancel();
        tracing::debug!(class = ?class, request_id = handle.id, "cancelled request");
        Some(handle.id)
    }

    pub fn cancel_all(&mut self) {
        self.cancel(RequestClass::Ask);
        self.cancel(RequestClass::Params);
    }
}
