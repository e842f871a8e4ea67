//! Named task spawning, mirroring the teacher workspace's
//! `mz_ore::task::spawn`: every background task gets a human-readable
//! name attached to its tracing span, so a stuck task shows up by name
//! rather than as an anonymous tokio task id.

use std::future::Future;

use tokio::task::JoinHandle;
use tracing::Instrument;

/// Spawns `future` on the current tokio runtime under a span named
/// `name`. The health agent's probe loop, status loop, and per-peer
/// dial loops, and the hook runner's per-job watchers, all use this
/// instead of bare `tokio::spawn` so their logs and panics are
/// attributable.
pub fn spawn<Fut, Name>(name: Name, future: Fut) -> JoinHandle<Fut::Output>
where
    Fut: Future + Send + 'static,
    Fut::Output: Send + 'static,
    Name: Into<String>,
{
    let span = tracing::info_span!("task", name = %name.into());
    tokio::spawn(future.instrument(span))
}

/// A group of named, supervised tasks that can be awaited or aborted
/// together. Used by the health agent to hold its recycle loop, status
/// update loop, and per-peer dial loops as a single cancelable unit.
pub struct TaskGroup {
    set: tokio::task::JoinSet<()>,
}

impl Default for TaskGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskGroup {
    pub fn new() -> Self {
        TaskGroup {
            set: tokio::task::JoinSet::new(),
        }
    }

    /// Spawns `future` into the group under a named span. A panic
    /// inside `future` is caught by `JoinSet` and surfaced the next time
    /// the caller awaits [`TaskGroup::join_next`], rather than taking
    /// down the process.
    pub fn spawn<Fut, Name>(&mut self, name: Name, future: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
        Name: Into<String>,
    {
        let span = tracing::info_span!("task", name = %name.into());
        self.set.spawn(future.instrument(span));
    }

    /// Awaits the next task in the group to finish, if any remain.
    pub async fn join_next(&mut self) -> Option<Result<(), tokio::task::JoinError>> {
        self.set.join_next().await
    }

    /// Aborts every task still running in the group.
    pub fn abort_all(&mut self) {
        self.set.abort_all();
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn group_runs_and_joins_tasks() {
        let mut group = TaskGroup::new();
        let (tx, rx) = tokio::sync::oneshot::channel();
        group.spawn("worker", async move {
            let _ = tx.send(());
        });
        group.join_next().await.unwrap().unwrap();
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn group_surfaces_panics_without_dying() {
        let mut group = TaskGroup::new();
        group.spawn("panicker", async {
            panic!("boom");
        });
        let result = group.join_next().await.unwrap();
        assert!(result.is_err());
    }
}
