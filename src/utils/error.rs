//! Error types for the entire application.
//!
//! We use `thiserror` for library-style errors with custom types,
//! and `anyhow` for application-level error propagation in main.rs and commands.

use crate::block::Section;
use crate::model::{QueryKind, ReportKind};
use thiserror::Error;

/// Errors raised by block storage collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Block section not loaded: {0}")]
    SectionNotLoaded(Section),

    #[error("Failed to read column {column} of row group {row_group}: {reason}")]
    ColumnRead {
        column: usize,
        row_group: usize,
        reason: String,
    },

    #[error("Row group {0} does not exist")]
    RowGroupOutOfRange(usize),

    #[error("Corrupt block data: {0}")]
    Corrupt(String),

    #[error("Failed to close row group {row_group}: {reason}")]
    Close { row_group: usize, reason: String },
}

/// Errors raised while turning stack identifiers into a tree
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Symbol partition {0} not found")]
    MissingPartition(u64),

    #[error("Stack trace {stack_id} not found in partition {partition}")]
    MissingStack { partition: u64, stack_id: u64 },

    #[error("Stack trace {stack_id} of partition {partition} has {depth} frames, more than {max}")]
    StackTooDeep {
        partition: u64,
        stack_id: u64,
        depth: usize,
        max: usize,
    },
}

/// Errors raised when decoding or merging serialized trees
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Malformed tree: {0}")]
    Malformed(String),
}

/// Errors raised by a local query executor for one block
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("Schema mismatch: column {column} not found")]
    SchemaMismatch { column: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Query cancelled")]
    Cancelled,

    #[error("Query deadline exceeded")]
    DeadlineExceeded,

    #[error("Executor for {expected} received a {actual} query")]
    UnexpectedQuery { expected: QueryKind, actual: QueryKind },
}

/// Errors raised by an aggregator for a single merge call
#[derive(Error, Debug)]
pub enum AggregateError {
    #[error("Aggregator for {expected} received a {actual} report")]
    UnexpectedReport {
        expected: ReportKind,
        actual: ReportKind,
    },

    #[error("Failed to merge report: {0}")]
    Merge(#[from] TreeError),
}

/// Errors raised by the query type registry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Query type {0} is already registered")]
    DuplicateQuery(QueryKind),

    #[error("Report type {0} is already registered")]
    DuplicateReport(ReportKind),

    #[error("Query type {0} is not supported")]
    Unsupported(QueryKind),

    #[error("Report type {0} is not supported")]
    UnsupportedReport(ReportKind),
}

/// Errors raised while invoking a query across blocks
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Request contains no queries")]
    EmptyRequest,

    #[error("Invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: i64, end: i64 },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Block {block} failed: {source}")]
    Block {
        block: String,
        #[source]
        source: QueryError,
    },

    #[error("Failed to aggregate report of block {block}: {source}")]
    Aggregate {
        block: String,
        #[source]
        source: AggregateError,
    },
}

/// Errors that can occur during file output
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Failed to write file: {0}")]
    WriteFailed(#[from] std::io::Error),

    #[error("Failed to serialize JSON: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("Invalid output path: {0}")]
    InvalidPath(String),
}

/// Errors that can occur while loading backend configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors that can occur during flamegraph generation
#[derive(Error, Debug)]
pub enum FlamegraphError {
    #[error("Empty tree")]
    EmptyTree,
}
