//! Query backend: runs an invocation across blocks and merges the reports.
//!
//! For each block, every query of the request is answered by the executor
//! registered for its kind; the per-block reports are folded into one
//! aggregator per query. Blocks are processed by a bounded pool of scoped
//! worker threads.

use crate::block::{BlockDataset, Section};
use crate::model::{InvokeRequest, Report};
use crate::query::{Aggregator, ExecContext, QueryContext, QueryDescriptor, QueryRegistry};
use crate::utils::config::BackendConfig;
use crate::utils::error::{AggregateError, BackendError, QueryError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

/// A block that was skipped under the partial results policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFailure {
    pub block: String,
    pub error: String,
}

/// Aggregated result of an invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeResponse {
    /// One report per query, in request order
    pub reports: Vec<Report>,

    pub blocks_queried: usize,

    /// Blocks whose reports are missing from `reports`, sorted by block id
    #[serde(default)]
    pub failed_blocks: Vec<BlockFailure>,
}

pub struct QueryBackend {
    registry: Arc<QueryRegistry>,
    config: BackendConfig,
}

/// Everything resolved for an invocation before any block is touched
struct Plan<'r> {
    descriptors: Vec<&'r QueryDescriptor>,
    sections: Vec<Section>,
}

impl QueryBackend {
    pub fn new(registry: Arc<QueryRegistry>, config: BackendConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &QueryRegistry {
        &self.registry
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// **Public** - Run `request` against `blocks`
    ///
    /// # Arguments
    /// * `request` - Queries, time range and label selector
    /// * `blocks` - Blocks to query; each is visited exactly once
    ///
    /// # Returns
    /// One merged report per query, in request order. With no blocks every
    /// report is the neutral (empty) result.
    ///
    /// # Errors
    /// * `BackendError::EmptyRequest` / `BackendError::InvalidTimeRange` - invalid request
    /// * `BackendError::Registry` - a query kind is not registered; no block is read
    /// * `BackendError::Block` / `BackendError::Aggregate` - a block failed and
    ///   partial results are not tolerated
    ///
    /// # Example
    /// ```ignore
    /// let backend = QueryBackend::new(Arc::new(QueryRegistry::with_defaults()), config);
    /// let response = backend.invoke(&request, &[&block_a, &block_b])?;
    /// ```
    pub fn invoke(
        &self,
        request: &InvokeRequest,
        blocks: &[&dyn BlockDataset],
    ) -> Result<InvokeResponse, BackendError> {
        self.invoke_with_context(request, blocks, ExecContext::new())
    }

    /// Like [`invoke`](Self::invoke), under a caller-controlled context
    ///
    /// The invocation runs under a child of `exec`: cancelling `exec` stops
    /// it, while a fail-fast abort cancels only the child.
    pub fn invoke_with_context(
        &self,
        request: &InvokeRequest,
        blocks: &[&dyn BlockDataset],
        exec: ExecContext,
    ) -> Result<InvokeResponse, BackendError> {
        let started = Instant::now();

        // Step 1: Validate and plan
        let plan = self.plan(request)?;
        let exec = match self.config.timeout() {
            Some(timeout) => exec.child().with_timeout(timeout),
            None => exec.child(),
        };
        info!(
            "Invoking {} queries on {} blocks (sections: {:?})",
            request.queries.len(),
            blocks.len(),
            plan.sections
        );

        // Step 2: Query blocks
        let aggregators: Vec<Box<dyn Aggregator>> =
            plan.descriptors.iter().map(|d| (d.new_aggregator)(request)).collect();
        let mut failures = self.run_blocks(request, blocks, &plan, &aggregators, &exec);

        // Step 3: Apply the failure policy
        if !failures.is_empty() && !self.config.tolerate_partial_results {
            let (_, error) = failures.remove(0);
            return Err(error);
        }

        let mut failed_blocks: Vec<BlockFailure> = failures
            .into_iter()
            .map(|(block, error)| BlockFailure {
                block,
                error: error.to_string(),
            })
            .collect();
        failed_blocks.sort_by(|a, b| a.block.cmp(&b.block));

        // Step 4: Build final reports
        let reports: Vec<Report> = aggregators.into_iter().map(|a| a.build()).collect();

        info!(
            "Invocation finished in {:?}: {} blocks, {} failed",
            started.elapsed(),
            blocks.len(),
            failed_blocks.len()
        );

        Ok(InvokeResponse {
            reports,
            blocks_queried: blocks.len(),
            failed_blocks,
        })
    }

    fn plan(&self, request: &InvokeRequest) -> Result<Plan<'_>, BackendError> {
        if request.queries.is_empty() {
            return Err(BackendError::EmptyRequest);
        }
        if request.start_time > request.end_time {
            return Err(BackendError::InvalidTimeRange {
                start: request.start_time,
                end: request.end_time,
            });
        }
        let descriptors = request
            .queries
            .iter()
            .map(|q| self.registry.lookup(q.kind()))
            .collect::<Result<Vec<_>, _>>()?;
        let sections = self.registry.required_sections(&request.queries)?;
        Ok(Plan {
            descriptors,
            sections,
        })
    }

    /// Failures in the order they occurred
    fn run_blocks(
        &self,
        request: &InvokeRequest,
        blocks: &[&dyn BlockDataset],
        plan: &Plan<'_>,
        aggregators: &[Box<dyn Aggregator>],
        exec: &ExecContext,
    ) -> Vec<(String, BackendError)> {
        let failures: Mutex<Vec<(String, BackendError)>> = Mutex::new(Vec::new());
        let next = AtomicUsize::new(0);
        let workers = self.config.max_concurrency.max(1).min(blocks.len());
        let tolerate = self.config.tolerate_partial_results;

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    let Some(block) = blocks.get(i) else {
                        break;
                    };
                    let id = block.meta().id.clone();
                    if !tolerate && !failures.lock().is_empty() {
                        debug!("Skipping block {}: invocation already failed", id);
                        break;
                    }
                    if let Err(error) = query_block(*block, request, plan, aggregators, exec) {
                        warn!("{}", error);
                        failures.lock().push((id, error));
                        if !tolerate {
                            exec.cancel();
                        }
                    }
                });
            }
        });

        failures.into_inner()
    }
}

/// Answer every query against one block, then merge the reports
///
/// Reports are merged only once every query succeeded and every report
/// passed validation, so a failed block contributes nothing.
fn query_block(
    block: &dyn BlockDataset,
    request: &InvokeRequest,
    plan: &Plan<'_>,
    aggregators: &[Box<dyn Aggregator>],
    exec: &ExecContext,
) -> Result<(), BackendError> {
    let id = &block.meta().id;
    let block_error = |source: QueryError| BackendError::Block {
        block: id.clone(),
        source,
    };

    block
        .ensure_sections(&plan.sections)
        .map_err(|e| block_error(e.into()))?;

    let ctx = QueryContext::new(exec.clone(), request, block);
    let mut reports = Vec::with_capacity(request.queries.len());
    for (query, descriptor) in request.queries.iter().zip(&plan.descriptors) {
        let report = (descriptor.execute)(&ctx, query).map_err(block_error)?;
        reports.push(report);
    }

    let aggregate_error = |source: AggregateError| BackendError::Aggregate {
        block: id.clone(),
        source,
    };
    for (report, aggregator) in reports.iter().zip(aggregators) {
        aggregator.validate(report).map_err(aggregate_error)?;
    }
    for (report, aggregator) in reports.iter().zip(aggregators) {
        aggregator.aggregate(report).map_err(aggregate_error)?;
    }
    debug!("Block {} merged", id);
    Ok(())
}
