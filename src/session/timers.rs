use tokio::task::JoinHandle;
use tracing::trace;

/// Set of outstanding timer tasks that are aborted together.
///
/// Dropping the set aborts every task still pending, so a torn-down session
/// cannot be mutated by an orphaned timer.
#[derive(Debug, Default)]
pub struct TimerSet {
    handles: Vec<JoinHandle<()>>,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a spawned timer. Finished timers are pruned on the way.
    pub fn push(&mut self, handle: JoinHandle<()>) {
        self.handles.retain(|h| !h.is_finished());
        self.handles.push(handle);
    }

    /// Abort every pending timer.
    pub fn cancel_all(&mut self) {
        let pending = self.handles.len();
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        if pending > 0 {
            trace!(pending, "timers cancelled");
        }
    }

    /// Number of timers that have not completed yet.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|h| !h.is_finished()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.pending() == 0
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
