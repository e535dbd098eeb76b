//! The batched operation pipeline.
//!
//! A batch is an ordered list of operations. Execution partitions it into
//! *runs* of consecutive operations sharing a kind and a target object,
//! dispatches each run to that kind's executor — which turns the whole run
//! into a single network message or one local backend pass — and returns
//! the conjunction of the run results. The user's order within a run is
//! preserved; nothing is promised across runs.

use std::sync::Arc;

use strata_types::Semantics;
use tracing::warn;

use crate::chunked::{self, ChunkedStatusResult, ChunkedTransformationObject};
use crate::object::{self, ReadOp, StatusResult, TransformationObject, WriteOp};
use crate::{Client, ClientError};

/// One queued operation with a strong reference to its target.
pub(crate) enum Operation<'a> {
    Create {
        object: Arc<TransformationObject>,
    },
    Delete {
        object: Arc<TransformationObject>,
    },
    Status {
        object: Arc<TransformationObject>,
        result: Arc<StatusResult>,
    },
    Read {
        object: Arc<TransformationObject>,
        op: ReadOp<'a>,
    },
    Write {
        object: Arc<TransformationObject>,
        op: WriteOp<'a>,
    },
    ChunkedCreate {
        object: Arc<ChunkedTransformationObject>,
    },
    ChunkedDelete {
        object: Arc<ChunkedTransformationObject>,
    },
    ChunkedStatus {
        object: Arc<ChunkedTransformationObject>,
        result: Arc<ChunkedStatusResult>,
    },
    ChunkedRead {
        object: Arc<ChunkedTransformationObject>,
        op: ReadOp<'a>,
    },
    ChunkedWrite {
        object: Arc<ChunkedTransformationObject>,
        op: WriteOp<'a>,
    },
}

impl Operation<'_> {
    /// Grouping key: operation kind plus target identity.
    fn run_key(&self) -> (u8, usize) {
        match self {
            Operation::Create { object } => (0, Arc::as_ptr(object) as usize),
            Operation::Delete { object } => (1, Arc::as_ptr(object) as usize),
            Operation::Status { object, .. } => (2, Arc::as_ptr(object) as usize),
            Operation::Read { object, .. } => (3, Arc::as_ptr(object) as usize),
            Operation::Write { object, .. } => (4, Arc::as_ptr(object) as usize),
            Operation::ChunkedCreate { object } => (5, Arc::as_ptr(object) as usize),
            Operation::ChunkedDelete { object } => (6, Arc::as_ptr(object) as usize),
            Operation::ChunkedStatus { object, .. } => (7, Arc::as_ptr(object) as usize),
            Operation::ChunkedRead { object, .. } => (8, Arc::as_ptr(object) as usize),
            Operation::ChunkedWrite { object, .. } => (9, Arc::as_ptr(object) as usize),
        }
    }
}

/// An ordered collection of operations executed together.
///
/// Lives as long as the user buffers its operations borrow; executing the
/// batch drains the operations, so one batch value can be reused for
/// several rounds.
pub struct Batch<'a> {
    client: &'a Client,
    semantics: Semantics,
    ops: Vec<Operation<'a>>,
}

impl<'a> Batch<'a> {
    pub(crate) fn new(client: &'a Client, semantics: Semantics) -> Self {
        Self {
            client,
            semantics,
            ops: Vec::new(),
        }
    }

    pub fn client(&self) -> &'a Client {
        self.client
    }

    pub fn semantics(&self) -> &Semantics {
        &self.semantics
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub(crate) fn push_create(&mut self, object: Arc<TransformationObject>) {
        self.ops.push(Operation::Create { object });
    }

    pub(crate) fn push_delete(&mut self, object: Arc<TransformationObject>) {
        self.ops.push(Operation::Delete { object });
    }

    pub(crate) fn push_status(
        &mut self,
        object: Arc<TransformationObject>,
        result: Arc<StatusResult>,
    ) {
        self.ops.push(Operation::Status { object, result });
    }

    pub(crate) fn push_read(&mut self, object: Arc<TransformationObject>, op: ReadOp<'a>) {
        self.ops.push(Operation::Read { object, op });
    }

    pub(crate) fn push_write(&mut self, object: Arc<TransformationObject>, op: WriteOp<'a>) {
        self.ops.push(Operation::Write { object, op });
    }

    pub(crate) fn push_chunked_create(&mut self, object: Arc<ChunkedTransformationObject>) {
        self.ops.push(Operation::ChunkedCreate { object });
    }

    pub(crate) fn push_chunked_delete(&mut self, object: Arc<ChunkedTransformationObject>) {
        self.ops.push(Operation::ChunkedDelete { object });
    }

    pub(crate) fn push_chunked_status(
        &mut self,
        object: Arc<ChunkedTransformationObject>,
        result: Arc<ChunkedStatusResult>,
    ) {
        self.ops.push(Operation::ChunkedStatus { object, result });
    }

    pub(crate) fn push_chunked_read(
        &mut self,
        object: Arc<ChunkedTransformationObject>,
        op: ReadOp<'a>,
    ) {
        self.ops.push(Operation::ChunkedRead { object, op });
    }

    pub(crate) fn push_chunked_write(
        &mut self,
        object: Arc<ChunkedTransformationObject>,
        op: WriteOp<'a>,
    ) {
        self.ops.push(Operation::ChunkedWrite { object, op });
    }

    /// Execute all queued operations.
    ///
    /// Returns the logical AND of the per-run results. A failed run is
    /// logged and counted as `false`; sibling runs still execute. The byte
    /// counters the operations carry are truthful either way — callers are
    /// expected to inspect them in addition to the aggregate boolean.
    pub async fn execute(&mut self) -> bool {
        let ops = std::mem::take(&mut self.ops);
        let mut all_ok = true;
        let mut run: Vec<Operation<'a>> = Vec::new();

        for op in ops {
            if let Some(last) = run.last()
                && last.run_key() != op.run_key()
            {
                all_ok &= self.dispatch(std::mem::take(&mut run)).await;
            }
            run.push(op);
        }
        if !run.is_empty() {
            all_ok &= self.dispatch(run).await;
        }
        all_ok
    }

    async fn dispatch(&self, run: Vec<Operation<'a>>) -> bool {
        match self.dispatch_inner(run).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "operation run failed");
                false
            }
        }
    }

    async fn dispatch_inner(&self, run: Vec<Operation<'a>>) -> Result<(), ClientError> {
        let mut rest = run.into_iter();
        let Some(first) = rest.next() else {
            return Ok(());
        };

        match first {
            Operation::Create { object } => {
                let count = 1 + rest.count();
                object::create_run(self.client, &self.semantics, &object, count).await
            }
            Operation::Delete { object } => {
                let count = 1 + rest.count();
                object::delete_run(self.client, &self.semantics, &object, count).await
            }
            Operation::Status { object, result } => {
                let mut results = vec![result];
                results.extend(rest.filter_map(|op| match op {
                    Operation::Status { result, .. } => Some(result),
                    _ => None,
                }));
                object::status_run(self.client, &self.semantics, &object, results).await
            }
            Operation::Read { object, op } => {
                let mut ops = vec![op];
                ops.extend(rest.filter_map(|op| match op {
                    Operation::Read { op, .. } => Some(op),
                    _ => None,
                }));
                object::read_run(self.client, &self.semantics, &object, ops).await
            }
            Operation::Write { object, op } => {
                let mut ops = vec![op];
                ops.extend(rest.filter_map(|op| match op {
                    Operation::Write { op, .. } => Some(op),
                    _ => None,
                }));
                object::write_run(self.client, &self.semantics, &object, ops).await
            }
            Operation::ChunkedCreate { object } => {
                let count = 1 + rest.count();
                chunked::create_run(self.client, &self.semantics, &object, count).await
            }
            Operation::ChunkedDelete { object } => {
                let count = 1 + rest.count();
                chunked::delete_run(self.client, &self.semantics, &object, count).await
            }
            Operation::ChunkedStatus { object, result } => {
                let mut results = vec![result];
                results.extend(rest.filter_map(|op| match op {
                    Operation::ChunkedStatus { result, .. } => Some(result),
                    _ => None,
                }));
                chunked::status_run(self.client, &self.semantics, &object, results).await
            }
            Operation::ChunkedRead { object, op } => {
                let mut ops = vec![op];
                ops.extend(rest.filter_map(|op| match op {
                    Operation::ChunkedRead { op, .. } => Some(op),
                    _ => None,
                }));
                chunked::read_run(self.client, &self.semantics, &object, ops).await
            }
            Operation::ChunkedWrite { object, op } => {
                let mut ops = vec![op];
                ops.extend(rest.filter_map(|op| match op {
                    Operation::ChunkedWrite { op, .. } => Some(op),
                    _ => None,
                }));
                chunked::write_run(self.client, &self.semantics, &object, ops).await
            }
        }
    }
}
