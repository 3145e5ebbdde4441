//! Flamegraph rendering.
//!
//! Converts a stack trace tree into an SVG flamegraph, and collapsed stacks
//! into a text summary of the hottest paths.

pub mod generator;

// Re-export main types
pub use generator::{generate_flamegraph, generate_text_summary, FlamegraphConfig};
