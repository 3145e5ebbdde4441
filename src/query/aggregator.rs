//! Report aggregation contract.

use crate::model::{Report, ReportKind};
use crate::utils::error::AggregateError;

/// Folds per-block reports of one query kind into a single report
///
/// Lifecycle: created empty, fed any number of reports through
/// [`aggregate`](Aggregator::aggregate) (from any thread), then consumed by
/// [`build`](Aggregator::build). The query parameters of the first report
/// accepted are captured and echoed in the built report; parameters carried
/// by later reports are ignored.
///
/// A failed `aggregate` leaves the accumulated state as it was before the
/// call. [`validate`](Aggregator::validate) answers whether `aggregate`
/// would accept a report, so a caller can check a group of reports before
/// merging any of them.
pub trait Aggregator: Send + Sync {
    fn aggregate(&self, report: &Report) -> Result<(), AggregateError>;

    /// Fail exactly when `aggregate` would, without touching the state
    fn validate(&self, report: &Report) -> Result<(), AggregateError>;

    /// Final report; a neutral result when nothing was aggregated
    fn build(self: Box<Self>) -> Report;
}

/// Reject a report of any kind other than `expected`
pub(crate) fn expect_kind(report: &Report, expected: ReportKind) -> Result<(), AggregateError> {
    let actual = report.kind();
    if actual == expected {
        Ok(())
    } else {
        Err(AggregateError::UnexpectedReport { expected, actual })
    }
}
