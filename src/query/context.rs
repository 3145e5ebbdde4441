//! Execution scope of one query against one block.

use crate::block::BlockDataset;
use crate::model::InvokeRequest;
use crate::utils::error::QueryError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cancellation handle with an optional deadline
///
/// Clones share the cancellation flag: cancelling any clone cancels the
/// whole tree of work derived from it. A [`child`](Self::child) observes
/// its parent's cancellation but cancelling the child leaves the parent
/// running.
#[derive(Debug, Clone, Default)]
pub struct ExecContext {
    cancelled: Arc<AtomicBool>,
    /// Flags of every ancestor context
    parents: Vec<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl ExecContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context with its own cancellation flag
    ///
    /// The child inherits the deadline and every ancestor flag.
    pub fn child(&self) -> Self {
        let mut parents = self.parents.clone();
        parents.push(Arc::clone(&self.cancelled));
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parents,
            deadline: self.deadline,
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
            || self.parents.iter().any(|p| p.load(Ordering::SeqCst))
    }

    pub fn check(&self) -> Result<(), QueryError> {
        if self.is_cancelled() {
            return Err(QueryError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(QueryError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Per-(query, block) scope handed to a local executor
///
/// Readers and resolvers opened while answering the query are owned by the
/// executor and released before it returns.
pub struct QueryContext<'a> {
    pub exec: ExecContext,
    pub request: &'a InvokeRequest,
    pub block: &'a dyn BlockDataset,
}

impl<'a> QueryContext<'a> {
    pub fn new(
        exec: ExecContext,
        request: &'a InvokeRequest,
        block: &'a dyn BlockDataset,
    ) -> Self {
        Self {
            exec,
            request,
            block,
        }
    }
}
