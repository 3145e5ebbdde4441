//! Profile table access: column resolution and row iteration.

pub mod iterator;
pub mod schema;

pub use iterator::{
    profile_entry_iterator, ProfileEntry, ProfileEntryIterator, RepeatedRow, RepeatedRowIterator,
};
pub use schema::{EntryColumns, SampleColumns};

pub(crate) use iterator::capture_close_error;
