use futures_util::stream::{self, StreamExt};
use std::future::Future;
use tracing::debug;

/// Bounded fan-out within one phase.
///
/// At most `width` futures are polled at a time and results come back in
/// input order. The pool bounds a phase's own fan-out only; the gateway's
/// shared limiter is what caps calls across the process, so a pool wider
/// than the global cap simply queues on the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskPool {
    name: &'static str,
    width: usize,
}

impl TaskPool {
    pub fn new(name: &'static str, width: usize) -> Self {
        Self {
            name,
            width: width.max(1),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub async fn run<I, F, Fut, T>(&self, items: I, task: F) -> Vec<T>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        let items: Vec<I::Item> = items.into_iter().collect();
        debug!(pool = self.name, width = self.width, tasks = items.len(), "Running task pool");
        stream::iter(items)
            .map(task)
            .buffered(self.width)
            .collect()
            .await
    }
}
