//! Column resolution against a table schema.

use crate::block::TableSchema;
use crate::utils::config::{
    COLUMN_PARTITION, COLUMN_SERIES_INDEX, COLUMN_STACKTRACE_ID, COLUMN_TIME_NANOS, COLUMN_VALUE,
};
use crate::utils::error::QueryError;

fn column(schema: &TableSchema, name: &str) -> Result<usize, QueryError> {
    schema
        .column_index(name)
        .ok_or_else(|| QueryError::SchemaMismatch {
            column: name.to_string(),
        })
}

/// Indices of the repeated sample columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleColumns {
    pub stacktrace_id: usize,
    pub value: usize,
}

impl SampleColumns {
    pub fn resolve(schema: &TableSchema) -> Result<Self, QueryError> {
        Ok(Self {
            stacktrace_id: column(schema, COLUMN_STACKTRACE_ID)?,
            value: column(schema, COLUMN_VALUE)?,
        })
    }
}

/// Indices of the per-profile columns used to select rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryColumns {
    pub series_index: usize,
    pub time_nanos: usize,
    pub partition: usize,
}

impl EntryColumns {
    pub fn resolve(schema: &TableSchema) -> Result<Self, QueryError> {
        Ok(Self {
            series_index: column(schema, COLUMN_SERIES_INDEX)?,
            time_nanos: column(schema, COLUMN_TIME_NANOS)?,
            partition: column(schema, COLUMN_PARTITION)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_sample_columns() {
        let schema = TableSchema::new(vec![
            COLUMN_VALUE.to_string(),
            "Other".to_string(),
            COLUMN_STACKTRACE_ID.to_string(),
        ]);
        let columns = SampleColumns::resolve(&schema).unwrap();
        assert_eq!(columns.stacktrace_id, 2);
        assert_eq!(columns.value, 0);
    }

    #[test]
    fn test_missing_column_is_schema_mismatch() {
        let schema = TableSchema::new(vec![COLUMN_STACKTRACE_ID.to_string()]);
        match SampleColumns::resolve(&schema) {
            Err(QueryError::SchemaMismatch { column }) => assert_eq!(column, COLUMN_VALUE),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
