//! Symbol resolution.
//!
//! Sample rows only carry numeric stack trace identifiers. The symbol section
//! of a block maps them, per partition, to call frames; the [`Resolver`]
//! turns accumulated samples into a weighted [`Tree`](crate::model::Tree).

pub mod resolver;

use crate::utils::error::ResolveError;

pub use resolver::Resolver;

/// Symbols of one partition of a block
pub trait PartitionSymbols {
    /// Frames of a stack trace, outermost caller first
    fn stack(&self, stack_id: u64) -> Option<&[String]>;
}

/// Symbol section of a block
///
/// Partitions are reference counted: every successful `acquire` must be
/// paired with exactly one `release`.
pub trait SymbolReader: Send + Sync {
    fn acquire(&self, partition: u64) -> Result<&dyn PartitionSymbols, ResolveError>;

    fn release(&self, partition: u64);
}
