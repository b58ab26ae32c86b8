//! Per load balancer task executor.
//!
//! A runner owns an unbounded FIFO and a single tokio task consuming it, so
//! tasks for one load balancer never overlap and run in arrival order.

use crate::task::{Task, TaskHandler};
use std::sync::Arc;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{Instrument, debug, error, warn};

/// Called by the loop after every task, with access to the tasks still queued.
pub type AfterTask = Arc<dyn Fn(&str, u64, &Task, &mut mpsc::UnboundedReceiver<Task>) + Send + Sync>;

pub struct Runner {
    key: String,
    generation: u64,
    tx: mpsc::UnboundedSender<Task>,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Runner {
    /// Spawn the processing loop. Must be called within a tokio runtime.
    pub fn start(key: &str, generation: u64, handler: Arc<dyn TaskHandler>, after: Option<AfterTask>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(key.to_string(), generation, rx, stop_rx, handler, after));
        debug!(lb = key, generation, "runner started");
        Self {
            key: key.to_string(),
            generation,
            tx,
            stop_tx,
            handle,
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow() || self.tx.is_closed()
    }

    /// Queue a task without blocking. The task is handed back once the runner stopped.
    pub fn enqueue(&self, task: Task) -> Result<(), Task> {
        if *self.stop_tx.borrow() {
            return Err(task);
        }
        self.tx.send(task).map_err(|e| e.0)
    }

    /// Stop after the current task. Queued tasks are dropped. Idempotent.
    pub fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            debug!(lb = %self.key, generation = self.generation, "runner stopping");
        }
    }

    /// Wait for the processing loop to exit.
    pub async fn join(self) {
        let key = self.key.clone();
        let Self { handle, stop_tx, .. } = self;
        if let Err(e) = handle.await {
            error!(lb = %key, error = %e, "runner loop aborted");
        }
        drop(stop_tx);
    }
}

async fn run_loop(
    key: String,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<Task>,
    mut stop_rx: watch::Receiver<bool>,
    handler: Arc<dyn TaskHandler>,
    after: Option<AfterTask>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }
        let task = tokio::select! {
            biased;
            _ = stop_rx.changed() => break,
            task = rx.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        let span = task.span.clone();
        match handler.handle(&task).instrument(span).await {
            Ok(()) => debug!(lb = %key, kind = %task.kind, "task done"),
            Err(e) => error!(lb = %key, kind = %task.kind, error = %e, "task failed"),
        }
        if let Some(after) = &after {
            after(&key, generation, &task, &mut rx);
        }
    }
    let dropped = rx.len();
    if dropped > 0 {
        warn!(lb = %key, dropped, "runner stopped with queued tasks");
    }
    debug!(lb = %key, generation, "runner exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Classification, Error, EventKind, LoadBalancer, PrefixedId, Result};
    use async_trait::async_trait;
    use std::{sync::Mutex, time::Duration};
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl TaskHandler for Recorder {
        async fn handle(&self, task: &Task) -> Result<()> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.seen.lock().unwrap().push(task.kind.to_string());
            if task.kind == EventKind::Other("boom".to_string()) {
                return Err(Error::Other("boom".to_string()));
            }
            Ok(())
        }
    }

    fn task(kind: &str) -> Task {
        let lb = LoadBalancer::new(PrefixedId::parse("loadbal-a").unwrap(), Classification::Primary);
        Task::new(lb, EventKind::parse(kind), tracing::Span::none())
    }

    async fn wait_for(rec: &Recorder, n: usize) {
        for _ in 0..200 {
            if rec.seen.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("handler did not see {n} tasks");
    }

    #[tokio::test]
    async fn test_fifo_and_errors_do_not_stop_the_loop() {
        let rec = Arc::new(Recorder::default());
        let runner = Runner::start("loadbal-a", 1, rec.clone(), None);
        for kind in ["create", "boom", "update", "delete"] {
            assert!(runner.enqueue(task(kind)).is_ok());
        }
        wait_for(&rec, 4).await;
        assert_eq!(*rec.seen.lock().unwrap(), vec!["create", "boom", "update", "delete"]);
        runner.stop();
        runner.join().await;
    }

    #[tokio::test]
    async fn test_stop_rejects_and_drops_queued() {
        let gate = Arc::new(Notify::new());
        let rec = Arc::new(Recorder {
            seen: Mutex::new(vec![]),
            gate: Some(gate.clone()),
        });
        let runner = Runner::start("loadbal-a", 1, rec.clone(), None);
        assert!(runner.enqueue(task("create")).is_ok());
        assert!(runner.enqueue(task("update")).is_ok());
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop();
        runner.stop();
        assert!(runner.is_stopped());
        assert!(runner.enqueue(task("delete")).is_err());
        gate.notify_one();
        runner.join().await;
        assert_eq!(*rec.seen.lock().unwrap(), vec!["create"]);
    }
}
