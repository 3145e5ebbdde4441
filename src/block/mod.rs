//! Block section catalog and the storage interfaces consumed by queries.
//!
//! A block is an immutable unit of profiling data made of independently
//! loadable sections. Queries declare which sections they need so that a
//! planner never loads (or decodes) the rest.
//!
//! The physical layout is not defined here: the traits below are what the
//! query executors consume, and [`memory::MemoryBlock`] is an in-memory
//! implementation used by the CLI and tests.

pub mod memory;

use crate::symbols::SymbolReader;
use crate::utils::error::StorageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub use memory::{BlockFixture, MemoryBlock};

/// Independently loadable part of a block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Section {
    /// Time-series index: series labels
    Tsdb,
    /// Sample rows
    Profiles,
    /// Symbol tables
    Symbols,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Tsdb, Section::Profiles, Section::Symbols];
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Section::Tsdb => "tsdb",
            Section::Profiles => "profiles",
            Section::Symbols => "symbols",
        };
        f.write_str(name)
    }
}

/// Identity and time bounds of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub id: String,

    /// Earliest profile timestamp, unix milliseconds
    pub min_time: i64,

    /// Latest profile timestamp, unix milliseconds
    pub max_time: i64,
}

/// One series of the time index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
}

pub trait SeriesIndex: Send + Sync {
    /// Series ordered by series index
    fn series(&self) -> &[Series];
}

/// Column names of a table, in column index order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    columns: Vec<String>,
}

impl TableSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }
}

/// Decoded values of one column within one row group
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnChunk {
    UInt64(Vec<u64>),
    Int64(Vec<i64>),
    /// One list of values per row
    RepeatedUInt64(Vec<Vec<u64>>),
}

impl ColumnChunk {
    pub fn len(&self) -> usize {
        match self {
            ColumnChunk::UInt64(v) => v.len(),
            ColumnChunk::Int64(v) => v.len(),
            ColumnChunk::RepeatedUInt64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_u64(&self) -> Option<&[u64]> {
        match self {
            ColumnChunk::UInt64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<&[i64]> {
        match self {
            ColumnChunk::Int64(v) => Some(v),
            _ => None,
        }
    }
}

/// Open handle on one row group
///
/// Every opened reader must be closed exactly once.
pub trait RowGroupReader {
    fn num_rows(&self) -> usize;

    fn read_column(&mut self, column: usize) -> Result<ColumnChunk, StorageError>;

    fn close(&mut self) -> Result<(), StorageError>;
}

/// Sample rows of a block, split into row groups
pub trait ProfileTable: Send + Sync {
    fn schema(&self) -> &TableSchema;

    fn num_row_groups(&self) -> usize;

    fn open_row_group(
        &self,
        index: usize,
    ) -> Result<Box<dyn RowGroupReader + '_>, StorageError>;
}

/// Per-section access to one block
pub trait BlockDataset: Send + Sync {
    fn meta(&self) -> &BlockMeta;

    /// Sections currently loaded
    fn sections(&self) -> &[Section];

    fn index(&self) -> Result<&dyn SeriesIndex, StorageError>;

    fn profiles(&self) -> Result<&dyn ProfileTable, StorageError>;

    fn symbols(&self) -> Result<&dyn SymbolReader, StorageError>;

    /// Fail with the first `required` section that is not loaded
    fn ensure_sections(&self, required: &[Section]) -> Result<(), StorageError> {
        let loaded = self.sections();
        match required.iter().find(|s| !loaded.contains(s)) {
            Some(missing) => Err(StorageError::SectionNotLoaded(*missing)),
            None => Ok(()),
        }
    }
}
