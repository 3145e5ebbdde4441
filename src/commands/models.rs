use crate::flamegraph::FlamegraphConfig;
use std::path::PathBuf;

/// Selection shared by every query command
///
/// **Public** - used by main.rs to construct from CLI args
#[derive(Debug, Clone, Default)]
pub struct BlockSelection {
    /// Block fixture files (JSON)
    pub blocks: Vec<PathBuf>,

    /// Backend configuration file (TOML)
    pub config: Option<PathBuf>,

    /// Label matchers, `name=value` or `name!=value`
    pub selectors: Vec<String>,

    /// Inclusive lower bound, unix milliseconds
    pub start_time: Option<i64>,

    /// Exclusive upper bound, unix milliseconds
    pub end_time: Option<i64>,
}

/// Arguments for the tree query command
#[derive(Debug, Clone)]
pub struct QueryArgs {
    pub selection: BlockSelection,

    /// Node cap; the configured default when not given
    pub max_nodes: Option<u64>,

    /// Output path for the JSON result
    pub output_json: PathBuf,

    /// Output path for SVG flamegraph (optional)
    pub output_svg: Option<PathBuf>,

    pub flamegraph_config: Option<FlamegraphConfig>,

    /// Print text summary to stdout
    pub print_summary: bool,

    /// Number of stacks in the text summary
    pub top_stacks: usize,
}

impl Default for QueryArgs {
    fn default() -> Self {
        Self {
            selection: BlockSelection::default(),
            max_nodes: None,
            output_json: PathBuf::from("result.json"),
            output_svg: None,
            flamegraph_config: None,
            print_summary: false,
            top_stacks: 20,
        }
    }
}

/// Arguments for the labels command
#[derive(Debug, Clone, Default)]
pub struct LabelsArgs {
    pub selection: BlockSelection,

    /// List values of this label instead of label names
    pub label_name: Option<String>,

    /// Output path for the JSON result; printed to stdout when absent
    pub output_json: Option<PathBuf>,
}
