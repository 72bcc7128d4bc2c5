//! Unit of work queued on an executor

use crate::future::CompletionFuture;
use plcflow_core::WorkItemId;
use std::fmt;

/// Opaque driver-supplied work. The pool never inspects it.
pub type Operation = Box<dyn FnOnce() + Send + 'static>;

/// An operation waiting in (or taken from) an executor's queue, together
/// with the future that reports its outcome.
pub struct WorkItem {
    pub(crate) id: WorkItemId,
    pub(crate) operation: Operation,
    pub(crate) future: CompletionFuture,
}

impl WorkItem {
    pub(crate) fn new(id: WorkItemId, operation: Operation, future: CompletionFuture) -> Self {
        Self {
            id,
            operation,
            future,
        }
    }

    /// Caller-supplied identifier.
    pub fn id(&self) -> WorkItemId {
        self.id
    }

    /// Handle to the item's completion future.
    pub fn future(&self) -> &CompletionFuture {
        &self.future
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Workitem{{wid:{}}}", self.id)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("future", &self.future)
            .finish_non_exhaustive()
    }
}
