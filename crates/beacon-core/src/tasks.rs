//! Local view of background workflow runs, reconciled against polled
//! snapshots.

use beacon_protocol::{Run, RunStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    Running,
    Completed,
    Failed,
}

impl Bucket {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// A run counts as successful unless it failed outright or reported an
/// unsuccessful result.
pub fn is_success(run: &Run) -> bool {
    run.status != RunStatus::Failed && run.result.as_ref().map_or(true, |r| r.success)
}

pub fn classify(run: &Run) -> Bucket {
    if !run.status.is_terminal() {
        Bucket::Running
    } else if is_success(run) {
        Bucket::Completed
    } else {
        Bucket::Failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedRun {
    pub run: Run,
    pub bucket: Bucket,
}

/// Emitted once per tracked run leaving the running set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub run_id: String,
    pub workflow: String,
    pub success: bool,
    pub message: String,
}

impl Notification {
    fn for_run(run: &Run, success: bool) -> Self {
        let message = match (success, run.error.as_deref()) {
            (true, _) => format!("{} completed", run.workflow),
            (false, Some(err)) => format!("{} failed: {err}", run.workflow),
            (false, None) => format!("{} failed", run.workflow),
        };
        Self {
            run_id: run.id.clone(),
            workflow: run.workflow.clone(),
            success,
            message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TaskTracker {
    runs: Vec<TrackedRun>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn runs(&self) -> &[TrackedRun] {
        &self.runs
    }

    pub fn get(&self, id: &str) -> Option<&TrackedRun> {
        self.runs.iter().find(|t| t.run.id == id)
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.runs.iter().position(|t| t.run.id == id)
    }

    pub fn in_bucket(&self, bucket: Bucket) -> impl Iterator<Item = &TrackedRun> {
        self.runs.iter().filter(move |t| t.bucket == bucket)
    }

    pub fn has_running(&self) -> bool {
        self.runs.iter().any(|t| t.bucket == Bucket::Running)
    }

    pub fn needs_attention(&self) -> usize {
        self.runs.iter().filter(|t| t.run.needs_attention).count()
    }

    /// Starts tracking a freshly triggered run. Returns false if the id is
    /// already known.
    pub fn track_triggered(&mut self, run_id: &str, workflow: &str) -> bool {
        if self.index_of(run_id).is_some() {
            return false;
        }
        self.runs.push(TrackedRun {
            run: Run {
                id: run_id.to_owned(),
                workflow: workflow.to_owned(),
                status: RunStatus::Running,
                started_at: None,
                ended_at: None,
                error: None,
                result: None,
                needs_attention: false,
            },
            bucket: Bucket::Running,
        });
        true
    }

    /// Folds a snapshot into the tracked set, which afterwards mirrors the
    /// snapshot. Only tracked runs that were running produce notifications;
    /// one that vanished from the snapshot is reported completed and dropped.
    /// Applying the same snapshot twice yields nothing the second time.
    pub fn reconcile(&mut self, snapshot: &[Run]) -> Vec<Notification> {
        let mut notes = Vec::new();

        self.runs.retain_mut(|tracked| {
            let seen = snapshot.iter().find(|r| r.id == tracked.run.id);
            match (tracked.bucket, seen) {
                (Bucket::Running, Some(run)) => {
                    tracked.run = run.clone();
                    tracked.bucket = classify(run);
                    if tracked.bucket != Bucket::Running {
                        notes.push(Notification::for_run(run, tracked.bucket == Bucket::Completed));
                    }
                    true
                }
                (Bucket::Running, None) => {
                    notes.push(Notification::for_run(&tracked.run, true));
                    false
                }
                (_, Some(run)) => {
                    tracked.run = run.clone();
                    tracked.bucket = classify(run);
                    true
                }
                (_, None) => false,
            }
        });

        for run in snapshot {
            if self.index_of(&run.id).is_none() {
                self.runs.push(TrackedRun {
                    run: run.clone(),
                    bucket: classify(run),
                });
            }
        }

        notes
    }
}
