//! In-memory block dataset.
//!
//! Blocks are described by a [`BlockFixture`] (JSON-deserializable, or built
//! fluently in tests) and converted into columnar row groups. Fault injection
//! hooks simulate truncated row groups, failing closes, dropped columns and
//! partially loaded blocks; counters expose reader and symbol partition
//! lifecycles so resource discipline can be asserted.

use super::{
    BlockDataset, BlockMeta, ColumnChunk, ProfileTable, RowGroupReader, Section, Series,
    SeriesIndex, TableSchema,
};
use crate::query::ExecContext;
use crate::symbols::{PartitionSymbols, SymbolReader};
use crate::utils::config::{
    COLUMN_PARTITION, COLUMN_SERIES_INDEX, COLUMN_STACKTRACE_ID, COLUMN_TIME_NANOS, COLUMN_VALUE,
};
use crate::utils::error::{ResolveError, StorageError};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};

fn default_row_group_size() -> usize {
    1024
}

/// One sample of a profile row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleFixture {
    pub stack_id: u64,
    pub value: u64,
}

/// One profile row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileFixture {
    /// Index into [`BlockFixture::series`]
    pub series: u32,

    /// Unix nanoseconds
    pub timestamp: i64,

    #[serde(default)]
    pub partition: u64,

    #[serde(default)]
    pub samples: Vec<SampleFixture>,
}

/// Serializable description of a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFixture {
    pub id: String,

    /// Label sets, indexed by series index
    #[serde(default)]
    pub series: Vec<BTreeMap<String, String>>,

    #[serde(default)]
    pub profiles: Vec<ProfileFixture>,

    /// partition -> stack id -> frames (outermost caller first)
    #[serde(default)]
    pub symbols: BTreeMap<u64, BTreeMap<u64, Vec<String>>>,

    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,
}

impl BlockFixture {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            series: Vec::new(),
            profiles: Vec::new(),
            symbols: BTreeMap::new(),
            row_group_size: default_row_group_size(),
        }
    }

    /// Append a series; its index is the number of series added before it
    pub fn series(mut self, labels: &[(&str, &str)]) -> Self {
        self.series.push(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        self
    }

    /// Append a profile row with `(stack_id, value)` samples
    pub fn profile(
        mut self,
        series: u32,
        timestamp: i64,
        partition: u64,
        samples: &[(u64, u64)],
    ) -> Self {
        self.profiles.push(ProfileFixture {
            series,
            timestamp,
            partition,
            samples: samples
                .iter()
                .map(|(stack_id, value)| SampleFixture {
                    stack_id: *stack_id,
                    value: *value,
                })
                .collect(),
        });
        self
    }

    pub fn stack(mut self, partition: u64, stack_id: u64, frames: &[&str]) -> Self {
        self.symbols
            .entry(partition)
            .or_default()
            .insert(stack_id, frames.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn row_group_size(mut self, rows: usize) -> Self {
        self.row_group_size = rows;
        self
    }

    pub fn build(self) -> Result<MemoryBlock, StorageError> {
        MemoryBlock::from_fixture(self)
    }
}

struct MemoryIndex {
    series: Vec<Series>,
}

impl SeriesIndex for MemoryIndex {
    fn series(&self) -> &[Series] {
        &self.series
    }
}

struct MemoryTable {
    schema: TableSchema,
    groups: Vec<Vec<ColumnChunk>>,
    corrupt_groups: BTreeSet<usize>,
    failing_close: BTreeSet<usize>,
    /// Contexts cancelled when the keyed row group is opened
    cancel_on_open: BTreeMap<usize, ExecContext>,
    open_readers: AtomicUsize,
    opened_total: AtomicUsize,
}

impl ProfileTable for MemoryTable {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    fn num_row_groups(&self) -> usize {
        self.groups.len()
    }

    fn open_row_group(
        &self,
        index: usize,
    ) -> Result<Box<dyn RowGroupReader + '_>, StorageError> {
        let columns = self
            .groups
            .get(index)
            .ok_or(StorageError::RowGroupOutOfRange(index))?;
        self.open_readers.fetch_add(1, Ordering::SeqCst);
        self.opened_total.fetch_add(1, Ordering::SeqCst);
        if let Some(exec) = self.cancel_on_open.get(&index) {
            debug!("Cancelling execution on opening row group {}", index);
            exec.cancel();
        }
        Ok(Box::new(MemoryRowGroup {
            table: self,
            index,
            columns,
            closed: false,
        }))
    }
}

struct MemoryRowGroup<'a> {
    table: &'a MemoryTable,
    index: usize,
    columns: &'a [ColumnChunk],
    closed: bool,
}

impl RowGroupReader for MemoryRowGroup<'_> {
    fn num_rows(&self) -> usize {
        self.columns.first().map(ColumnChunk::len).unwrap_or(0)
    }

    fn read_column(&mut self, column: usize) -> Result<ColumnChunk, StorageError> {
        if self.table.corrupt_groups.contains(&self.index) {
            return Err(StorageError::ColumnRead {
                column,
                row_group: self.index,
                reason: "unexpected end of column chunk".to_string(),
            });
        }
        self.columns
            .get(column)
            .cloned()
            .ok_or_else(|| StorageError::ColumnRead {
                column,
                row_group: self.index,
                reason: "no such column".to_string(),
            })
    }

    fn close(&mut self) -> Result<(), StorageError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.table.open_readers.fetch_sub(1, Ordering::SeqCst);
        if self.table.failing_close.contains(&self.index) {
            return Err(StorageError::Close {
                row_group: self.index,
                reason: "injected close failure".to_string(),
            });
        }
        Ok(())
    }
}

struct MemoryPartition {
    stacks: BTreeMap<u64, Vec<String>>,
}

impl PartitionSymbols for MemoryPartition {
    fn stack(&self, stack_id: u64) -> Option<&[String]> {
        self.stacks.get(&stack_id).map(Vec::as_slice)
    }
}

struct MemorySymbols {
    partitions: BTreeMap<u64, MemoryPartition>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl SymbolReader for MemorySymbols {
    fn acquire(&self, partition: u64) -> Result<&dyn PartitionSymbols, ResolveError> {
        let symbols = self
            .partitions
            .get(&partition)
            .ok_or(ResolveError::MissingPartition(partition))?;
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(symbols)
    }

    fn release(&self, _partition: u64) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// Snapshot of symbol partition reference counting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolStats {
    pub acquired: usize,
    pub released: usize,
}

impl SymbolStats {
    pub fn outstanding(&self) -> usize {
        self.acquired.saturating_sub(self.released)
    }
}

/// Block dataset held entirely in memory
pub struct MemoryBlock {
    meta: BlockMeta,
    sections: Vec<Section>,
    index: MemoryIndex,
    profiles: MemoryTable,
    symbols: MemorySymbols,
}

impl MemoryBlock {
    /// Convert a fixture into columnar row groups
    ///
    /// # Errors
    /// * `StorageError::Corrupt` - zero row group size, or a profile referencing
    ///   an unknown series
    pub fn from_fixture(fixture: BlockFixture) -> Result<Self, StorageError> {
        if fixture.row_group_size == 0 {
            return Err(StorageError::Corrupt(
                "row group size must be greater than 0".to_string(),
            ));
        }
        if let Some(bad) = fixture
            .profiles
            .iter()
            .find(|p| p.series as usize >= fixture.series.len())
        {
            return Err(StorageError::Corrupt(format!(
                "profile references unknown series {}",
                bad.series
            )));
        }

        let meta = BlockMeta {
            id: fixture.id.clone(),
            min_time: fixture
                .profiles
                .iter()
                .map(|p| p.timestamp.div_euclid(1_000_000))
                .min()
                .unwrap_or(0),
            max_time: fixture
                .profiles
                .iter()
                .map(|p| p.timestamp.div_euclid(1_000_000))
                .max()
                .unwrap_or(0),
        };

        let groups: Vec<Vec<ColumnChunk>> = fixture
            .profiles
            .chunks(fixture.row_group_size)
            .map(|rows| {
                vec![
                    ColumnChunk::UInt64(rows.iter().map(|r| u64::from(r.series)).collect()),
                    ColumnChunk::Int64(rows.iter().map(|r| r.timestamp).collect()),
                    ColumnChunk::UInt64(rows.iter().map(|r| r.partition).collect()),
                    ColumnChunk::RepeatedUInt64(
                        rows.iter()
                            .map(|r| r.samples.iter().map(|s| s.stack_id).collect())
                            .collect(),
                    ),
                    ColumnChunk::RepeatedUInt64(
                        rows.iter()
                            .map(|r| r.samples.iter().map(|s| s.value).collect())
                            .collect(),
                    ),
                ]
            })
            .collect();

        debug!(
            "Loaded block {}: {} series, {} profiles in {} row groups",
            meta.id,
            fixture.series.len(),
            fixture.profiles.len(),
            groups.len()
        );

        let schema = TableSchema::new(
            [
                COLUMN_SERIES_INDEX,
                COLUMN_TIME_NANOS,
                COLUMN_PARTITION,
                COLUMN_STACKTRACE_ID,
                COLUMN_VALUE,
            ]
            .iter()
            .map(|c| c.to_string())
            .collect(),
        );

        Ok(Self {
            meta,
            sections: Section::ALL.to_vec(),
            index: MemoryIndex {
                series: fixture
                    .series
                    .into_iter()
                    .map(|labels| Series { labels })
                    .collect(),
            },
            profiles: MemoryTable {
                schema,
                groups,
                corrupt_groups: BTreeSet::new(),
                failing_close: BTreeSet::new(),
                cancel_on_open: BTreeMap::new(),
                open_readers: AtomicUsize::new(0),
                opened_total: AtomicUsize::new(0),
            },
            symbols: MemorySymbols {
                partitions: fixture
                    .symbols
                    .into_iter()
                    .map(|(id, stacks)| (id, MemoryPartition { stacks }))
                    .collect(),
                acquired: AtomicUsize::new(0),
                released: AtomicUsize::new(0),
            },
        })
    }

    /// Only `sections` are loaded; access to others fails
    pub fn with_sections(mut self, sections: &[Section]) -> Self {
        self.sections = sections.to_vec();
        self
    }

    /// Reading any column of row group `index` fails
    pub fn with_corrupt_row_group(mut self, index: usize) -> Self {
        self.profiles.corrupt_groups.insert(index);
        self
    }

    /// Closing row group `index` reports an error
    pub fn with_failing_close(mut self, index: usize) -> Self {
        self.profiles.failing_close.insert(index);
        self
    }

    /// Cancel `exec` as soon as row group `index` is opened
    pub fn with_cancel_on_open(mut self, index: usize, exec: &ExecContext) -> Self {
        self.profiles.cancel_on_open.insert(index, exec.clone());
        self
    }

    /// Drop a column from the schema and from every row group
    pub fn without_column(mut self, name: &str) -> Self {
        let table = &mut self.profiles;
        if let Some(position) = table.schema.column_index(name) {
            let mut columns = table.schema.columns().to_vec();
            columns.remove(position);
            table.schema = TableSchema::new(columns);
            for group in &mut table.groups {
                group.remove(position);
            }
        }
        self
    }

    /// Row group readers opened and not yet closed
    pub fn open_readers(&self) -> usize {
        self.profiles.open_readers.load(Ordering::SeqCst)
    }

    /// Row group readers opened since creation
    pub fn readers_opened(&self) -> usize {
        self.profiles.opened_total.load(Ordering::SeqCst)
    }

    pub fn symbol_stats(&self) -> SymbolStats {
        SymbolStats {
            acquired: self.symbols.acquired.load(Ordering::SeqCst),
            released: self.symbols.released.load(Ordering::SeqCst),
        }
    }

    fn require(&self, section: Section) -> Result<(), StorageError> {
        if self.sections.contains(&section) {
            Ok(())
        } else {
            Err(StorageError::SectionNotLoaded(section))
        }
    }
}

impl BlockDataset for MemoryBlock {
    fn meta(&self) -> &BlockMeta {
        &self.meta
    }

    fn sections(&self) -> &[Section] {
        &self.sections
    }

    fn index(&self) -> Result<&dyn SeriesIndex, StorageError> {
        self.require(Section::Tsdb)?;
        Ok(&self.index)
    }

    fn profiles(&self) -> Result<&dyn ProfileTable, StorageError> {
        self.require(Section::Profiles)?;
        Ok(&self.profiles)
    }

    fn symbols(&self) -> Result<&dyn SymbolReader, StorageError> {
        self.require(Section::Symbols)?;
        Ok(&self.symbols)
    }
}
