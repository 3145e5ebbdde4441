//! Row iteration over the profile table.
//!
//! Two stages: [`ProfileEntryIterator`] selects the rows of a block that
//! match the request (series selector and time range), and
//! [`RepeatedRowIterator`] reads the repeated sample columns of those rows.
//! Both check the execution context between steps. Every row group reader
//! they open is closed exactly once.

use super::schema::{EntryColumns, SampleColumns};
use crate::block::{ColumnChunk, ProfileTable, RowGroupReader};
use crate::model::InvokeRequest;
use crate::query::{ExecContext, QueryContext};
use crate::utils::error::{QueryError, StorageError};
use log::{debug, warn};
use std::mem;

/// Keep the primary result; a close failure only surfaces without one
pub(crate) fn capture_close_error<T>(
    result: Result<T, QueryError>,
    closed: Result<(), StorageError>,
    what: &str,
) -> Result<T, QueryError> {
    match (result, closed) {
        (result, Ok(())) => result,
        (Ok(_), Err(e)) => {
            warn!("Failed to close {}: {}", what, e);
            Err(e.into())
        }
        (Err(primary), Err(e)) => {
            warn!("Failed to close {} after error ({}): {}", what, primary, e);
            Err(primary)
        }
    }
}

fn column_length_mismatch(row_group: usize, rows: usize) -> StorageError {
    StorageError::Corrupt(format!(
        "row group {} has {} rows but a column of a different length",
        row_group, rows
    ))
}

fn unexpected_type(column: usize, row_group: usize) -> StorageError {
    StorageError::ColumnRead {
        column,
        row_group,
        reason: "unexpected column type".to_string(),
    }
}

/// Location and identity of one selected profile row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileEntry {
    pub row_group: usize,
    pub row: usize,
    pub series: u32,

    /// Unix nanoseconds
    pub timestamp: i64,
    pub partition: u64,
}

/// Rows of the profile table matching a request, in storage order
pub struct ProfileEntryIterator<'a> {
    exec: ExecContext,
    table: &'a dyn ProfileTable,
    request: &'a InvokeRequest,
    columns: EntryColumns,
    /// Selector result per series index
    matching: Vec<bool>,
    next_group: usize,
    pending: std::vec::IntoIter<ProfileEntry>,
    finished: bool,
}

/// Open the entry stage for the block of `ctx`
///
/// # Errors
/// * `QueryError::Storage` - the index or profile section is not loaded
/// * `QueryError::SchemaMismatch` - a selection column is missing
pub fn profile_entry_iterator<'a>(
    ctx: &QueryContext<'a>,
) -> Result<ProfileEntryIterator<'a>, QueryError> {
    let index = ctx.block.index()?;
    let table = ctx.block.profiles()?;
    let columns = EntryColumns::resolve(table.schema())?;
    let request = ctx.request;
    let matching: Vec<bool> = index
        .series()
        .iter()
        .map(|s| request.matches_labels(&s.labels))
        .collect();

    debug!(
        "Block {}: {} of {} series match the selector",
        ctx.block.meta().id,
        matching.iter().filter(|m| **m).count(),
        matching.len()
    );

    Ok(ProfileEntryIterator {
        exec: ctx.exec.clone(),
        table,
        request,
        columns,
        matching,
        next_group: 0,
        pending: Vec::new().into_iter(),
        finished: false,
    })
}

impl ProfileEntryIterator<'_> {
    fn read_group(&self, row_group: usize) -> Result<Vec<ProfileEntry>, QueryError> {
        let mut reader = self.table.open_row_group(row_group)?;
        let result = self.select(row_group, reader.as_mut());
        let closed = reader.close();
        capture_close_error(result, closed, "row group reader")
    }

    fn select(
        &self,
        row_group: usize,
        reader: &mut dyn RowGroupReader,
    ) -> Result<Vec<ProfileEntry>, QueryError> {
        let c = self.columns;
        let series = reader.read_column(c.series_index)?;
        let times = reader.read_column(c.time_nanos)?;
        let partitions = reader.read_column(c.partition)?;

        let series = series
            .as_u64()
            .ok_or_else(|| unexpected_type(c.series_index, row_group))?;
        let times = times
            .as_i64()
            .ok_or_else(|| unexpected_type(c.time_nanos, row_group))?;
        let partitions = partitions
            .as_u64()
            .ok_or_else(|| unexpected_type(c.partition, row_group))?;

        let rows = reader.num_rows();
        if series.len() != rows || times.len() != rows || partitions.len() != rows {
            return Err(column_length_mismatch(row_group, rows).into());
        }

        let mut entries = Vec::new();
        for row in 0..series.len() {
            let selected = self.matching.get(series[row] as usize).copied().unwrap_or(false);
            if !selected || !self.request.contains_nanos(times[row]) {
                continue;
            }
            entries.push(ProfileEntry {
                row_group,
                row,
                series: series[row] as u32,
                timestamp: times[row],
                partition: partitions[row],
            });
        }
        Ok(entries)
    }
}

impl Iterator for ProfileEntryIterator<'_> {
    type Item = Result<ProfileEntry, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return None;
            }
            if let Some(entry) = self.pending.next() {
                return Some(Ok(entry));
            }
            if self.next_group >= self.table.num_row_groups() {
                self.finished = true;
                return None;
            }
            if let Err(e) = self.exec.check() {
                self.finished = true;
                return Some(Err(e));
            }

            let row_group = self.next_group;
            self.next_group += 1;
            match self.read_group(row_group) {
                Ok(entries) => self.pending = entries.into_iter(),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Repeated sample values of one profile row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatedRow {
    pub entry: ProfileEntry,
    pub stacktrace_ids: Vec<u64>,
    pub values: Vec<u64>,
}

struct OpenGroup<'a> {
    index: usize,
    reader: Box<dyn RowGroupReader + 'a>,
    stacktrace_ids: Vec<Vec<u64>>,
    values: Vec<Vec<u64>>,
}

/// Streams the repeated sample columns of selected profile rows
///
/// One row group reader is held open at a time. Call [`close`](Self::close)
/// when done to observe close failures; dropping the iterator closes it too
/// and only logs them.
pub struct RepeatedRowIterator<'a, I>
where
    I: Iterator<Item = Result<ProfileEntry, QueryError>>,
{
    exec: ExecContext,
    entries: I,
    table: &'a dyn ProfileTable,
    columns: SampleColumns,
    current: Option<OpenGroup<'a>>,
    finished: bool,
}

impl<'a, I> RepeatedRowIterator<'a, I>
where
    I: Iterator<Item = Result<ProfileEntry, QueryError>>,
{
    pub fn new(
        exec: ExecContext,
        entries: I,
        table: &'a dyn ProfileTable,
        columns: SampleColumns,
    ) -> Self {
        Self {
            exec,
            entries,
            table,
            columns,
            current: None,
            finished: false,
        }
    }

    /// Close the open row group reader, if any
    pub fn close(&mut self) -> Result<(), StorageError> {
        match self.current.take() {
            Some(mut group) => group.reader.close(),
            None => Ok(()),
        }
    }

    fn open(&mut self, index: usize) -> Result<(), QueryError> {
        self.close()?;

        let mut reader = self.table.open_row_group(index)?;
        let columns = self.columns;
        let rows = reader.num_rows();
        let read = read_repeated(reader.as_mut(), columns.stacktrace_id, index).and_then(|ids| {
            let values = read_repeated(reader.as_mut(), columns.value, index)?;
            if ids.len() != rows || values.len() != rows {
                return Err(column_length_mismatch(index, rows));
            }
            Ok((ids, values))
        });

        match read {
            Ok((stacktrace_ids, values)) => {
                self.current = Some(OpenGroup {
                    index,
                    reader,
                    stacktrace_ids,
                    values,
                });
                Ok(())
            }
            Err(e) => {
                let closed = reader.close();
                capture_close_error(Err(e.into()), closed, "row group reader")
            }
        }
    }

    fn advance(&mut self) -> Option<Result<RepeatedRow, QueryError>> {
        let entry = match self.entries.next()? {
            Ok(entry) => entry,
            Err(e) => return Some(Err(e)),
        };
        if let Err(e) = self.exec.check() {
            return Some(Err(e));
        }
        if self.current.as_ref().map(|g| g.index) != Some(entry.row_group) {
            if let Err(e) = self.open(entry.row_group) {
                return Some(Err(e));
            }
        }
        let group = self.current.as_mut()?;

        let row = entry.row;
        let (ids, values) = match (group.stacktrace_ids.get_mut(row), group.values.get_mut(row)) {
            (Some(ids), Some(values)) => (mem::take(ids), mem::take(values)),
            _ => {
                return Some(Err(StorageError::Corrupt(format!(
                    "row {} missing from row group {}",
                    entry.row, entry.row_group
                ))
                .into()))
            }
        };
        if ids.len() != values.len() {
            return Some(Err(StorageError::Corrupt(format!(
                "row {} of row group {} has {} stack trace ids and {} values",
                entry.row,
                entry.row_group,
                ids.len(),
                values.len()
            ))
            .into()));
        }

        Some(Ok(RepeatedRow {
            entry,
            stacktrace_ids: ids,
            values,
        }))
    }
}

fn read_repeated(
    reader: &mut dyn RowGroupReader,
    column: usize,
    row_group: usize,
) -> Result<Vec<Vec<u64>>, StorageError> {
    match reader.read_column(column)? {
        ColumnChunk::RepeatedUInt64(rows) => Ok(rows),
        _ => Err(unexpected_type(column, row_group)),
    }
}

impl<I> Iterator for RepeatedRowIterator<'_, I>
where
    I: Iterator<Item = Result<ProfileEntry, QueryError>>,
{
    type Item = Result<RepeatedRow, QueryError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.advance();
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

impl<I> Drop for RepeatedRowIterator<'_, I>
where
    I: Iterator<Item = Result<ProfileEntry, QueryError>>,
{
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Failed to close row group reader on drop: {}", e);
        }
    }
}
