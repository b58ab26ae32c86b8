//! Map of live runners, one per load balancer.
//!
//! Every lookup, creation and removal happens under one mutex so that two
//! notifications for the same load balancer can never end up in different
//! runners.

use crate::{
    runner::{AfterTask, Runner},
    task::{Task, TaskHandler},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

struct RegistryInner {
    runners: Mutex<HashMap<String, Runner>>,
    handler: Arc<dyn TaskHandler>,
    next_generation: AtomicU64,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

fn lock(inner: &RegistryInner) -> MutexGuard<'_, HashMap<String, Runner>> {
    inner.runners.lock().unwrap_or_else(|e| e.into_inner())
}

impl RegistryInner {
    fn spawn(self: &Arc<Self>, key: &str) -> Runner {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let weak = Arc::downgrade(self);
        let after: AfterTask = Arc::new(move |key, generation, task, queue| {
            retire(&weak, key, generation, task, queue);
        });
        Runner::start(key, generation, self.handler.clone(), Some(after))
    }
}

/// Remove the runner that just completed a terminal task.
///
/// Tasks that were queued behind the terminal one are moved, in order, to a
/// fresh runner. Enqueueing only happens under the registry lock, so nothing
/// can slip in between.
fn retire(
    weak: &Weak<RegistryInner>,
    key: &str,
    generation: u64,
    task: &Task,
    queue: &mut mpsc::UnboundedReceiver<Task>,
) {
    if !task.is_terminal() {
        return;
    }
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let mut runners = lock(&inner);
    if runners.get(key).map(Runner::generation) != Some(generation) {
        return;
    }
    if let Some(old) = runners.remove(key) {
        old.stop();
    }
    let mut pending = Vec::new();
    while let Ok(t) = queue.try_recv() {
        pending.push(t);
    }
    info!(lb = key, generation, pending = pending.len(), "runner retired");
    if pending.is_empty() || inner.closed.load(Ordering::SeqCst) {
        return;
    }
    let runner = inner.spawn(key);
    for t in pending {
        if runner.enqueue(t).is_err() {
            warn!(lb = key, "fresh runner rejected a task");
        }
    }
    runners.insert(key.to_string(), runner);
}

impl Registry {
    #[must_use]
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                runners: Mutex::new(HashMap::new()),
                handler,
                next_generation: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Hand a task to the runner of its load balancer, creating it if needed.
    /// Returns false once the registry is shutting down.
    pub fn route(&self, task: Task) -> bool {
        let key = task.key().to_string();
        let mut runners = lock(&self.inner);
        // checked under the lock, shutdown drains the map after setting it
        if self.inner.closed.load(Ordering::SeqCst) {
            warn!(lb = %key, kind = %task.kind, "registry closed, dropping task");
            return false;
        }
        let task = match runners.get(&key) {
            Some(runner) => match runner.enqueue(task) {
                Ok(()) => return true,
                Err(task) => {
                    debug!(lb = %key, "replacing stopped runner");
                    task
                }
            },
            None => task,
        };
        let runner = self.inner.spawn(&key);
        let accepted = runner.enqueue(task).is_ok();
        runners.insert(key, runner);
        accepted
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        lock(&self.inner).contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Refuse new tasks, stop every runner and wait for their current task.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let runners: Vec<Runner> = lock(&self.inner).drain().map(|(_, r)| r).collect();
        info!(runners = runners.len(), "draining runners");
        for runner in &runners {
            runner.stop();
        }
        for runner in runners {
            runner.join().await;
        }
    }
}
