//! Query and labels command implementations.
//!
//! The query command:
//! 1. Loads block fixtures and backend configuration
//! 2. Runs a tree query across the blocks
//! 3. Writes the JSON result
//! 4. Renders the flamegraph and text summary when requested

use super::models::{BlockSelection, LabelsArgs, QueryArgs};
use super::utils::{build_request, load_backend_config, load_blocks};
use crate::backend::{InvokeResponse, QueryBackend};
use crate::block::{BlockDataset, MemoryBlock};
use crate::flamegraph::{generate_flamegraph, generate_text_summary};
use crate::model::{
    build_collapsed_stacks, InvokeRequest, LabelNamesQuery, LabelValuesQuery, Query, Report, Tree,
    TreeQuery,
};
use crate::output::{output_to_string, write_output, write_svg, QueryOutput};
use crate::query::QueryRegistry;
use anyhow::{bail, Context, Result};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Instant;

/// Execute the tree query command
///
/// **Public** - main entry point called from main.rs
///
/// # Arguments
/// * `args` - Query command arguments
///
/// # Errors
/// * Block fixture or config loading failures
/// * Block query failures (unless partial results are tolerated)
/// * File write errors
///
/// # Example
/// ```ignore
/// let args = QueryArgs {
///     selection: BlockSelection {
///         blocks: vec![PathBuf::from("block-1.json")],
///         selectors: vec!["service_name=api".to_string()],
///         ..Default::default()
///     },
///     output_svg: Some(PathBuf::from("flamegraph.svg")),
///     ..Default::default()
/// };
///
/// execute_query(args)?;
/// ```
pub fn execute_query(args: QueryArgs) -> Result<()> {
    let start_time = Instant::now();

    // Step 1: Load inputs
    info!("Step 1/4: Loading {} blocks...", args.selection.blocks.len());
    let (backend, blocks) = prepare(&args.selection)?;
    let max_nodes = args.max_nodes.unwrap_or(backend.config().default_max_nodes);
    let request = build_request(vec![Query::Tree(TreeQuery { max_nodes })], &args.selection)?;

    // Step 2: Query blocks
    info!("Step 2/4: Querying blocks (max_nodes = {})...", max_nodes);
    let response = invoke(&backend, &request, &blocks)?;
    let tree = match response.reports.first() {
        Some(Report::Tree(report)) => {
            Tree::from_bytes(&report.tree).context("Failed to decode merged tree")?
        }
        _ => bail!("Backend returned no tree report"),
    };
    debug!("Merged tree: {} nodes, total {}", tree.node_count(), tree.total());

    // Step 3: Write JSON result
    info!("Step 3/4: Writing result...");
    let output = QueryOutput::from_response(&response).context("Failed to build result document")?;
    write_output(&output, &args.output_json).context("Failed to write result JSON")?;
    info!("✓ Result written to: {}", args.output_json.display());

    // Step 4: Flamegraph and summary
    if let Some(svg_path) = &args.output_svg {
        info!("Step 4/4: Generating flamegraph...");
        if tree.is_empty() {
            warn!("No samples matched; skipping flamegraph");
        } else {
            let svg = generate_flamegraph(&tree, args.flamegraph_config.as_ref())
                .context("Failed to generate flamegraph")?;
            write_svg(&svg, svg_path).context("Failed to write flamegraph SVG")?;
            info!("✓ Flamegraph written to: {}", svg_path.display());
        }
    } else {
        info!("Step 4/4: Skipping flamegraph generation (not requested)");
    }

    if args.print_summary {
        let stacks = build_collapsed_stacks(&tree);
        println!("\n{}", "=".repeat(80));
        println!("QUERY SUMMARY");
        println!("{}", "=".repeat(80));
        println!("Blocks:        {}", response.blocks_queried);
        println!("Failed Blocks: {}", response.failed_blocks.len());
        println!("Total:         {}", tree.total());
        println!("Nodes:         {}", tree.node_count());
        println!("Unique Stacks: {}", stacks.len());
        println!("\n{}", generate_text_summary(&stacks, args.top_stacks, tree.total()));
        println!("{}", "=".repeat(80));
    }

    info!("Query completed in {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}

/// Execute the labels command: label names, or values of one label
pub fn execute_labels(args: LabelsArgs) -> Result<()> {
    let (backend, blocks) = prepare(&args.selection)?;
    let query = match &args.label_name {
        Some(label_name) => Query::LabelValues(LabelValuesQuery {
            label_name: label_name.clone(),
        }),
        None => Query::LabelNames(LabelNamesQuery {}),
    };
    let request = build_request(vec![query], &args.selection)?;

    let response = invoke(&backend, &request, &blocks)?;
    let output = QueryOutput::from_response(&response).context("Failed to build result document")?;

    match &args.output_json {
        Some(path) => {
            write_output(&output, path).context("Failed to write result JSON")?;
            info!("✓ Result written to: {}", path.display());
        }
        None => println!("{}", output_to_string(&output)?),
    }
    Ok(())
}

/// Validate arguments shared by the query commands
///
/// **Public** - can be called before executing for early validation
pub fn validate_selection(selection: &BlockSelection) -> Result<()> {
    if selection.blocks.is_empty() {
        bail!("At least one block file is required");
    }

    if let (Some(start), Some(end)) = (selection.start_time, selection.end_time) {
        if start > end {
            bail!("Start time {} is after end time {}", start, end);
        }
    }

    Ok(())
}

/// Validate tree query arguments
pub fn validate_args(args: &QueryArgs) -> Result<()> {
    validate_selection(&args.selection)?;

    if args.top_stacks == 0 {
        bail!("top_stacks must be greater than 0");
    }

    if args.top_stacks > 1000 {
        bail!("top_stacks is too large (max 1000)");
    }

    Ok(())
}

fn prepare(selection: &BlockSelection) -> Result<(QueryBackend, Vec<MemoryBlock>)> {
    let config = load_backend_config(selection.config.as_deref())?;
    let blocks = load_blocks(&selection.blocks)?;
    let backend = QueryBackend::new(Arc::new(QueryRegistry::with_defaults()), config);
    Ok((backend, blocks))
}

fn invoke(
    backend: &QueryBackend,
    request: &InvokeRequest,
    blocks: &[MemoryBlock],
) -> Result<InvokeResponse> {
    let handles: Vec<&dyn BlockDataset> = blocks.iter().map(|b| b as &dyn BlockDataset).collect();
    let response = backend
        .invoke(request, &handles)
        .context("Failed to query blocks")?;
    for failure in &response.failed_blocks {
        warn!("Block {} skipped: {}", failure.block, failure.error);
    }
    Ok(response)
}
