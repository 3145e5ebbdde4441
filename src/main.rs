//! Profile Query CLI
//!
//! Runs tree and label queries over profiling block fixtures, merging the
//! per-block reports into one result. Writes JSON results and flamegraphs.

use anyhow::Result;
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;

use profile_query_backend::commands::{
    display_schema, display_version, execute_labels, execute_query, validate_args,
    validate_output_file, validate_selection, BlockSelection, LabelsArgs, QueryArgs,
};
use profile_query_backend::flamegraph::FlamegraphConfig;

/// Profile Query - distributed query execution over profiling blocks
#[derive(Parser, Debug)]
#[command(name = "profile-query")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Block selection flags shared by the query commands
#[derive(clap::Args, Debug)]
struct SelectionFlags {
    /// Block fixture files (JSON)
    #[arg(short, long = "block", required = true, num_args = 1..)]
    blocks: Vec<PathBuf>,

    /// Backend configuration (TOML)
    #[arg(short, long, env = "PROFILE_QUERY_CONFIG")]
    config: Option<PathBuf>,

    /// Label matcher, `name=value` or `name!=value` (repeatable)
    #[arg(short, long = "selector")]
    selectors: Vec<String>,

    /// Inclusive start of the time range, unix milliseconds
    #[arg(long)]
    start: Option<i64>,

    /// Exclusive end of the time range, unix milliseconds
    #[arg(long)]
    end: Option<i64>,
}

impl From<SelectionFlags> for BlockSelection {
    fn from(flags: SelectionFlags) -> Self {
        Self {
            blocks: flags.blocks,
            config: flags.config,
            selectors: flags.selectors,
            start_time: flags.start,
            end_time: flags.end,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Build the merged call tree of the selected samples
    Query {
        #[command(flatten)]
        selection: SelectionFlags,

        /// Maximum number of nodes in the merged tree (0 = unbounded)
        #[arg(long)]
        max_nodes: Option<u64>,

        /// Output path for JSON result
        #[arg(short, long, default_value = "result.json")]
        output: PathBuf,

        /// Output path for SVG flamegraph (optional)
        #[arg(short, long)]
        flamegraph: Option<PathBuf>,

        /// Flamegraph title
        #[arg(long)]
        title: Option<String>,

        /// Flamegraph width in pixels
        #[arg(long, default_value = "1200")]
        width: usize,

        /// Print text summary to stdout
        #[arg(long)]
        summary: bool,

        /// Number of stacks in the text summary
        #[arg(long, default_value = "20")]
        top_stacks: usize,
    },

    /// List label names, or the values of one label
    Labels {
        #[command(flatten)]
        selection: SelectionFlags,

        /// Label whose values to list
        #[arg(short, long)]
        name: Option<String>,

        /// Output path for JSON result (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Validate a result JSON file
    Validate {
        /// Path to result JSON file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Display schema information
    Schema {
        /// Show full schema details
        #[arg(long)]
        show: bool,
    },

    /// Display version information
    Version,
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    // Execute command
    match cli.command {
        Commands::Query {
            selection,
            max_nodes,
            output,
            flamegraph,
            title,
            width,
            summary,
            top_stacks,
        } => {
            // Create flamegraph config
            let flamegraph_config = flamegraph.as_ref().map(|_| {
                let config = FlamegraphConfig::new().with_width(width);
                match title {
                    Some(title) => config.with_title(title),
                    None => config,
                }
            });

            let args = QueryArgs {
                selection: selection.into(),
                max_nodes,
                output_json: output,
                output_svg: flamegraph,
                flamegraph_config,
                print_summary: summary,
                top_stacks,
            };

            // Validate args first
            validate_args(&args)?;

            execute_query(args)?;
        }

        Commands::Labels {
            selection,
            name,
            output,
        } => {
            let args = LabelsArgs {
                selection: selection.into(),
                label_name: name,
                output_json: output,
            };
            validate_selection(&args.selection)?;
            execute_labels(args)?;
        }

        Commands::Validate { file } => {
            validate_output_file(file)?;
        }

        Commands::Schema { show } => {
            display_schema(show);
        }

        Commands::Version => {
            display_version();
        }
    }

    Ok(())
}
