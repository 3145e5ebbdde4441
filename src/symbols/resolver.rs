//! Sample accumulation and tree materialization.

use super::{PartitionSymbols, SymbolReader};
use crate::model::Tree;
use crate::query::ExecContext;
use crate::utils::config::MAX_STACK_DEPTH;
use crate::utils::error::{QueryError, ResolveError};
use log::debug;
use std::collections::BTreeMap;

/// Samples of one partition and the symbols acquired for it
struct PartitionSlot<'a> {
    symbols: Result<&'a dyn PartitionSymbols, ResolveError>,
    samples: BTreeMap<u64, u64>,
}

/// Accumulates (partition, stack id, value) samples and builds a tree
///
/// Partitions are acquired from the [`SymbolReader`] the first time a sample
/// references them and released by [`Resolver::release`], which also runs
/// on drop. Release happens once no matter how many times it is requested.
pub struct Resolver<'a> {
    exec: ExecContext,
    symbols: &'a dyn SymbolReader,
    partitions: BTreeMap<u64, PartitionSlot<'a>>,
    released: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(exec: ExecContext, symbols: &'a dyn SymbolReader) -> Self {
        Self {
            exec,
            symbols,
            partitions: BTreeMap::new(),
            released: false,
        }
    }

    /// Record `value` for `stack_id` within `partition`
    ///
    /// A partition that cannot be acquired is remembered and reported by
    /// [`Resolver::tree`].
    pub fn add_sample(&mut self, partition: u64, stack_id: u64, value: u64) {
        let symbols = self.symbols;
        let slot = self.partitions.entry(partition).or_insert_with(|| {
            debug!("Acquiring symbol partition {}", partition);
            PartitionSlot {
                symbols: symbols.acquire(partition),
                samples: BTreeMap::new(),
            }
        });
        let total = slot.samples.entry(stack_id).or_insert(0);
        *total = total.saturating_add(value);
    }

    /// Record the samples of one repeated row
    pub fn add_samples(&mut self, partition: u64, stack_ids: &[u64], values: &[u64]) {
        for (stack_id, value) in stack_ids.iter().zip(values) {
            self.add_sample(partition, *stack_id, *value);
        }
    }

    /// Number of distinct (partition, stack id) pairs seen so far
    pub fn sample_count(&self) -> usize {
        self.partitions.values().map(|p| p.samples.len()).sum()
    }

    /// Materialize accumulated samples into a tree
    ///
    /// # Errors
    /// * `ResolveError::MissingPartition` - a referenced partition has no symbols
    /// * `ResolveError::MissingStack` - a stack id is absent from its partition
    /// * `ResolveError::StackTooDeep` - a stack exceeds [`MAX_STACK_DEPTH`] frames
    /// * `QueryError::Cancelled` / `QueryError::DeadlineExceeded` - the
    ///   execution context ended before every partition was resolved
    pub fn tree(&self) -> Result<Tree, QueryError> {
        let mut tree = Tree::new();
        for (partition, slot) in &self.partitions {
            self.exec.check()?;
            let symbols = slot.symbols.as_ref().map_err(|e| e.clone())?;
            for (stack_id, value) in &slot.samples {
                if *value == 0 {
                    continue;
                }
                let frames = symbols.stack(*stack_id).ok_or(ResolveError::MissingStack {
                    partition: *partition,
                    stack_id: *stack_id,
                })?;
                if frames.len() > MAX_STACK_DEPTH {
                    return Err(ResolveError::StackTooDeep {
                        partition: *partition,
                        stack_id: *stack_id,
                        depth: frames.len(),
                        max: MAX_STACK_DEPTH,
                    }
                    .into());
                }
                tree.insert_stack(frames, *value);
            }
        }
        debug!(
            "Resolved {} samples into {} nodes",
            self.sample_count(),
            tree.node_count()
        );
        Ok(tree)
    }

    /// Release every acquired partition
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        for (partition, slot) in &self.partitions {
            if slot.symbols.is_ok() {
                self.symbols.release(*partition);
            }
        }
        debug!("Released {} symbol partitions", self.partitions.len());
    }
}

impl Drop for Resolver<'_> {
    fn drop(&mut self) {
        self.release();
    }
}
