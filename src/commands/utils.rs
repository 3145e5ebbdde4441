use super::models::BlockSelection;
use crate::block::{BlockFixture, MemoryBlock};
use crate::model::{InvokeRequest, LabelMatcher, Query};
use crate::output::{read_output, QueryResult};
use crate::utils::config::{load_config, BackendConfig, SCHEMA_VERSION};
use anyhow::{bail, Context, Result};
use log::debug;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Parse a `name=value` or `name!=value` matcher
pub fn parse_matcher(selector: &str) -> Result<LabelMatcher> {
    let matcher = if let Some((name, value)) = selector.split_once("!=") {
        LabelMatcher::not_eq(name.trim(), value.trim())
    } else if let Some((name, value)) = selector.split_once('=') {
        LabelMatcher::eq(name.trim(), value.trim())
    } else {
        bail!("Invalid selector '{}': expected name=value or name!=value", selector);
    };
    if matcher.name.is_empty() {
        bail!("Invalid selector '{}': label name is empty", selector);
    }
    Ok(matcher)
}

/// Build the request for `queries` over `selection`
pub fn build_request(queries: Vec<Query>, selection: &BlockSelection) -> Result<InvokeRequest> {
    let mut request = InvokeRequest::new(queries);
    if let Some(start) = selection.start_time {
        request.start_time = start;
    }
    if let Some(end) = selection.end_time {
        request.end_time = end;
    }
    for selector in &selection.selectors {
        request = request.with_matcher(parse_matcher(selector)?);
    }
    Ok(request)
}

/// Load a block fixture file
pub fn load_block(path: &Path) -> Result<MemoryBlock> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open block {}", path.display()))?;
    let fixture: BlockFixture = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Failed to parse block {}", path.display()))?;
    let block = fixture
        .build()
        .with_context(|| format!("Invalid block {}", path.display()))?;
    debug!("Loaded block from {}", path.display());
    Ok(block)
}

pub fn load_blocks(paths: &[PathBuf]) -> Result<Vec<MemoryBlock>> {
    paths.iter().map(|p| load_block(p)).collect()
}

/// Configuration file if given, defaults otherwise
pub fn load_backend_config(path: Option<&Path>) -> Result<BackendConfig> {
    match path {
        Some(path) => load_config(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(BackendConfig::default()),
    }
}

/// Validate a result JSON file
pub fn validate_output_file(file_path: PathBuf) -> Result<()> {
    println!("Validating result: {}", file_path.display());

    let output = read_output(&file_path)?;

    println!("✓ Valid result JSON");
    println!("  Version: {}", output.version);
    println!("  Generated: {}", output.generated_at);
    println!("  Blocks Queried: {}", output.blocks_queried);
    println!("  Failed Blocks: {}", output.failed_blocks.len());
    for result in &output.results {
        match result {
            QueryResult::Tree {
                total, node_count, ..
            } => println!("  Tree: {} nodes, total {}", node_count, total),
            QueryResult::LabelNames { names } => println!("  Label names: {}", names.len()),
            QueryResult::LabelValues { label_name, values } => {
                println!("  Values of {}: {}", label_name, values.len())
            }
        }
    }

    if output.version != SCHEMA_VERSION {
        println!("  Note: schema version differs from current ({})", SCHEMA_VERSION);
    }

    Ok(())
}

/// Display schema information
pub fn display_schema(show_details: bool) {
    println!("Profile Query Result Schema");
    println!("Current Version: {}", SCHEMA_VERSION);
    println!();

    if show_details {
        println!("Schema Structure:");
        println!("  version: string          - Schema version (e.g., '1.0.0')");
        println!("  generated_at: string     - RFC 3339 timestamp");
        println!("  blocks_queried: number   - Blocks visited by the invocation");
        println!("  failed_blocks: array     - Blocks skipped under partial results");
        println!("    block: string          - Block id");
        println!("    error: string          - Failure reason");
        println!("  results: array           - One entry per query");
        println!("    type: 'tree'           - max_nodes, total, node_count, stacks");
        println!("      stacks: array        - Collapsed stacks, heaviest first");
        println!("        stack: string      - Frames joined by ';'");
        println!("        weight: number     - Self value of the leaf frame");
        println!("    type: 'label_names'    - names: array of strings");
        println!("    type: 'label_values'   - label_name, values: array of strings");
    } else {
        println!("Use --show for detailed schema information");
    }
}

/// Display version information
pub fn display_version() {
    println!("Profile Query Backend v{}", env!("CARGO_PKG_VERSION"));
    println!("Result Schema: v{}", SCHEMA_VERSION);
    println!();
    println!("Distributed query execution and report aggregation for profiling blocks.");
}
