//! CLI command implementations.
//!
//! Each command is implemented in its own module.
//! Commands orchestrate the various library components to perform user tasks.

pub mod models;
pub mod query;
pub mod utils;

// Re-export main command functions
pub use models::{BlockSelection, LabelsArgs, QueryArgs};
pub use query::{execute_labels, execute_query, validate_args, validate_selection};
pub use utils::{display_schema, display_version, validate_output_file};
