use crate::{EventKind, LoadBalancer, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// One unit of work for a runner.
#[derive(Clone, Debug)]
pub struct Task {
    pub lb: LoadBalancer,
    pub kind: EventKind,
    /// Trace scope of the notification that produced the task
    pub span: tracing::Span,
    pub received: DateTime<Utc>,
}

impl Task {
    #[must_use]
    pub fn new(lb: LoadBalancer, kind: EventKind, span: tracing::Span) -> Self {
        Self {
            lb,
            kind,
            span,
            received: Utc::now(),
        }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        self.lb.id.as_str()
    }

    /// The runner is retired once this task completes.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_delete() && self.lb.is_primary()
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> Result<()>;
}
