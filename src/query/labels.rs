//! Label queries: names and values of the series matching a request.
//!
//! Both read only the time-series index. Per-block reports carry sorted,
//! de-duplicated lists; aggregation is a set union.

use super::aggregator::{expect_kind, Aggregator};
use super::context::QueryContext;
use crate::block::Series;
use crate::model::{
    InvokeRequest, LabelNamesQuery, LabelNamesReport, LabelValuesQuery, LabelValuesReport, Query,
    QueryKind, Report, ReportKind,
};
use crate::utils::error::{AggregateError, QueryError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn matching_series<'a>(
    ctx: &QueryContext<'a>,
) -> Result<impl Iterator<Item = &'a Series> + 'a, QueryError> {
    ctx.exec.check()?;
    let index = ctx.block.index()?;
    let request = ctx.request;
    Ok(index
        .series()
        .iter()
        .filter(move |s| request.matches_labels(&s.labels)))
}

/// **Public** - Label names used by the matching series of one block
pub fn query_label_names(ctx: &QueryContext<'_>, query: &Query) -> Result<Report, QueryError> {
    let Query::LabelNames(names_query) = query else {
        return Err(QueryError::UnexpectedQuery {
            expected: QueryKind::LabelNames,
            actual: query.kind(),
        });
    };

    let names: BTreeSet<&str> = matching_series(ctx)?
        .flat_map(|s| s.labels.keys())
        .map(String::as_str)
        .collect();

    Ok(Report::LabelNames(LabelNamesReport {
        query: names_query.clone(),
        names: names.into_iter().map(str::to_string).collect(),
    }))
}

/// **Public** - Values of `label_name` across the matching series of one block
///
/// Series without the label contribute nothing.
pub fn query_label_values(ctx: &QueryContext<'_>, query: &Query) -> Result<Report, QueryError> {
    let Query::LabelValues(values_query) = query else {
        return Err(QueryError::UnexpectedQuery {
            expected: QueryKind::LabelValues,
            actual: query.kind(),
        });
    };

    let values: BTreeSet<&str> = matching_series(ctx)?
        .filter_map(|s| s.labels.get(&values_query.label_name))
        .map(String::as_str)
        .collect();

    Ok(Report::LabelValues(LabelValuesReport {
        query: values_query.clone(),
        values: values.into_iter().map(str::to_string).collect(),
    }))
}

/// Union of label name reports
#[derive(Debug, Default)]
pub struct LabelNamesAggregator {
    query: OnceLock<LabelNamesQuery>,
    names: Mutex<BTreeSet<String>>,
}

pub fn new_label_names_aggregator(_request: &InvokeRequest) -> Box<dyn Aggregator> {
    Box::<LabelNamesAggregator>::default()
}

impl Aggregator for LabelNamesAggregator {
    fn aggregate(&self, report: &Report) -> Result<(), AggregateError> {
        let Report::LabelNames(report) = report else {
            return Err(AggregateError::UnexpectedReport {
                expected: ReportKind::LabelNames,
                actual: report.kind(),
            });
        };
        self.query.get_or_init(|| report.query.clone());
        self.names.lock().extend(report.names.iter().cloned());
        Ok(())
    }

    fn validate(&self, report: &Report) -> Result<(), AggregateError> {
        expect_kind(report, ReportKind::LabelNames)
    }

    fn build(self: Box<Self>) -> Report {
        let LabelNamesAggregator { query, names } = *self;
        Report::LabelNames(LabelNamesReport {
            query: query.into_inner().unwrap_or_default(),
            names: names.into_inner().into_iter().collect(),
        })
    }
}

/// Union of label value reports
///
/// The label name of the first accepted report is echoed.
#[derive(Debug, Default)]
pub struct LabelValuesAggregator {
    query: OnceLock<LabelValuesQuery>,
    values: Mutex<BTreeSet<String>>,
}

pub fn new_label_values_aggregator(_request: &InvokeRequest) -> Box<dyn Aggregator> {
    Box::<LabelValuesAggregator>::default()
}

impl Aggregator for LabelValuesAggregator {
    fn aggregate(&self, report: &Report) -> Result<(), AggregateError> {
        let Report::LabelValues(report) = report else {
            return Err(AggregateError::UnexpectedReport {
                expected: ReportKind::LabelValues,
                actual: report.kind(),
            });
        };
        self.query.get_or_init(|| report.query.clone());
        self.values.lock().extend(report.values.iter().cloned());
        Ok(())
    }

    fn validate(&self, report: &Report) -> Result<(), AggregateError> {
        expect_kind(report, ReportKind::LabelValues)
    }

    fn build(self: Box<Self>) -> Report {
        let LabelValuesAggregator { query, values } = *self;
        Report::LabelValues(LabelValuesReport {
            query: query.into_inner().unwrap_or_default(),
            values: values.into_inner().into_iter().collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockFixture, MemoryBlock, Section};
    use crate::model::LabelMatcher;
    use crate::query::ExecContext;
    use crate::utils::error::StorageError;

    fn block() -> MemoryBlock {
        BlockFixture::new("block-a")
            .series(&[("service_name", "api"), ("region", "eu")])
            .series(&[("service_name", "worker"), ("pod", "w-1")])
            .series(&[("service_name", "api"), ("region", "us")])
            .build()
            .unwrap()
    }

    fn names(report: Report) -> Vec<String> {
        match report {
            Report::LabelNames(r) => r.names,
            Report::LabelValues(r) => r.values,
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_label_names_of_matching_series() {
        let block = block();
        let request =
            InvokeRequest::new(vec![]).with_matcher(LabelMatcher::eq("service_name", "api"));
        let ctx = QueryContext::new(ExecContext::new(), &request, &block);

        let report = query_label_names(&ctx, &Query::LabelNames(LabelNamesQuery {})).unwrap();

        assert_eq!(names(report), vec!["region", "service_name"]);
    }

    #[test]
    fn test_label_values_skip_series_without_label() {
        let block = block();
        let request = InvokeRequest::new(vec![]);
        let ctx = QueryContext::new(ExecContext::new(), &request, &block);
        let query = Query::LabelValues(LabelValuesQuery {
            label_name: "region".to_string(),
        });

        let report = query_label_values(&ctx, &query).unwrap();

        assert_eq!(names(report), vec!["eu", "us"]);
    }

    #[test]
    fn test_label_query_needs_index_only() {
        let block = block().with_sections(&[Section::Tsdb]);
        let request = InvokeRequest::new(vec![]);
        let ctx = QueryContext::new(ExecContext::new(), &request, &block);
        assert!(query_label_names(&ctx, &Query::LabelNames(LabelNamesQuery {})).is_ok());

        let block = block.with_sections(&[Section::Profiles]);
        let ctx = QueryContext::new(ExecContext::new(), &request, &block);
        assert!(matches!(
            query_label_names(&ctx, &Query::LabelNames(LabelNamesQuery {})),
            Err(QueryError::Storage(StorageError::SectionNotLoaded(Section::Tsdb)))
        ));
    }

    #[test]
    fn test_label_values_aggregator_union() {
        let aggregator = new_label_values_aggregator(&InvokeRequest::new(vec![]));
        for values in [vec!["b", "c"], vec!["a", "b"]] {
            aggregator
                .aggregate(&Report::LabelValues(LabelValuesReport {
                    query: LabelValuesQuery {
                        label_name: "region".to_string(),
                    },
                    values: values.into_iter().map(str::to_string).collect(),
                }))
                .unwrap();
        }

        match aggregator.build() {
            Report::LabelValues(r) => {
                assert_eq!(r.query.label_name, "region");
                assert_eq!(r.values, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected report: {:?}", other),
        }
    }

    #[test]
    fn test_label_names_aggregator_empty_build() {
        let aggregator = new_label_names_aggregator(&InvokeRequest::new(vec![]));
        assert_eq!(names(aggregator.build()), Vec::<String>::new());
    }
}
