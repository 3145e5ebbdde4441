//! JSON result document.
//!
//! A [`QueryOutput`] is the user-facing form of an [`InvokeResponse`]: trees
//! are decoded and flattened into collapsed stacks so the document can be
//! read without this crate.

use super::prepare_output_path;
use crate::backend::{BlockFailure, InvokeResponse};
use crate::model::{build_collapsed_stacks, CollapsedStack, Report, Tree};
use crate::utils::config::SCHEMA_VERSION;
use crate::utils::error::{OutputError, TreeError};
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Result of one query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueryResult {
    Tree {
        max_nodes: u64,
        total: u64,
        node_count: usize,
        stacks: Vec<CollapsedStack>,
    },
    LabelNames {
        names: Vec<String>,
    },
    LabelValues {
        label_name: String,
        values: Vec<String>,
    },
}

impl QueryResult {
    /// Decode a final report
    ///
    /// # Errors
    /// * `TreeError::Malformed` - the tree payload cannot be decoded
    pub fn from_report(report: &Report) -> Result<Self, TreeError> {
        Ok(match report {
            Report::Tree(r) => {
                let tree = Tree::from_bytes(&r.tree)?;
                QueryResult::Tree {
                    max_nodes: r.query.max_nodes,
                    total: tree.total(),
                    node_count: tree.node_count(),
                    stacks: build_collapsed_stacks(&tree),
                }
            }
            Report::LabelNames(r) => QueryResult::LabelNames {
                names: r.names.clone(),
            },
            Report::LabelValues(r) => QueryResult::LabelValues {
                label_name: r.query.label_name.clone(),
                values: r.values.clone(),
            },
        })
    }
}

/// Output document written by the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub version: String,

    /// RFC 3339 timestamp
    pub generated_at: String,

    pub blocks_queried: usize,

    #[serde(default)]
    pub failed_blocks: Vec<BlockFailure>,

    /// One result per query, in request order
    pub results: Vec<QueryResult>,
}

impl QueryOutput {
    /// **Public** - Build the document for an invocation response
    pub fn from_response(response: &InvokeResponse) -> Result<Self, TreeError> {
        let results = response
            .reports
            .iter()
            .map(QueryResult::from_report)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            version: SCHEMA_VERSION.to_string(),
            generated_at: Utc::now().to_rfc3339(),
            blocks_queried: response.blocks_queried,
            failed_blocks: response.failed_blocks.clone(),
            results,
        })
    }
}

/// Write a result document as pretty JSON
///
/// **Public** - main entry point for JSON output
///
/// # Arguments
/// * `output` - Document to write
/// * `output_path` - Path to output JSON file; parent directories are created
///
/// # Errors
/// * `OutputError::WriteFailed` - I/O error during write
/// * `OutputError::SerializationFailed` - JSON serialization error
/// * `OutputError::InvalidPath` - Path is empty, a directory, or cannot be created
///
/// # Example
/// ```ignore
/// let output = QueryOutput::from_response(&response)?;
/// write_output(&output, "result.json")?;
/// ```
pub fn write_output(
    output: &QueryOutput,
    output_path: impl AsRef<Path>,
) -> Result<(), OutputError> {
    let output_path = output_path.as_ref();
    info!("Writing result to: {}", output_path.display());

    prepare_output_path(output_path)?;

    let file = File::create(output_path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, output)?;
    writer.flush()?;

    info!(
        "Result written ({} bytes)",
        std::fs::metadata(output_path).map(|m| m.len()).unwrap_or(0)
    );
    Ok(())
}

/// Read a result document back, e.g. for validation
///
/// # Errors
/// * `OutputError::WriteFailed` - File read error (I/O errors share this variant)
/// * `OutputError::SerializationFailed` - JSON parse error
pub fn read_output(input_path: impl AsRef<Path>) -> Result<QueryOutput, OutputError> {
    let input_path = input_path.as_ref();
    debug!("Reading result from: {}", input_path.display());

    let file = File::open(input_path)?;
    let output: QueryOutput = serde_json::from_reader(file)?;

    debug!(
        "Result loaded: version {}, {} results",
        output.version,
        output.results.len()
    );
    Ok(output)
}

pub fn output_to_string(output: &QueryOutput) -> Result<String, OutputError> {
    Ok(serde_json::to_string_pretty(output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LabelValuesQuery, LabelValuesReport, TreeQuery, TreeReport};
    use pretty_assertions::assert_eq;
    use tempfile::NamedTempFile;

    fn response() -> InvokeResponse {
        let mut tree = Tree::new();
        tree.insert_stack(&["main", "work"], 7);
        tree.insert_stack(&["main"], 3);
        InvokeResponse {
            reports: vec![
                Report::Tree(TreeReport {
                    query: TreeQuery { max_nodes: 8 },
                    tree: tree.bytes(8),
                }),
                Report::LabelValues(LabelValuesReport {
                    query: LabelValuesQuery {
                        label_name: "region".to_string(),
                    },
                    values: vec!["eu".to_string()],
                }),
            ],
            blocks_queried: 2,
            failed_blocks: vec![],
        }
    }

    #[test]
    fn test_from_response_flattens_trees() {
        let output = QueryOutput::from_response(&response()).unwrap();

        assert_eq!(output.version, SCHEMA_VERSION);
        assert_eq!(
            output.results[0],
            QueryResult::Tree {
                max_nodes: 8,
                total: 10,
                node_count: 3,
                stacks: vec![
                    CollapsedStack::new("main;work".to_string(), 7),
                    CollapsedStack::new("main".to_string(), 3),
                ],
            }
        );
        assert_eq!(
            output.results[1],
            QueryResult::LabelValues {
                label_name: "region".to_string(),
                values: vec!["eu".to_string()],
            }
        );
    }

    #[test]
    fn test_malformed_tree_is_rejected() {
        let mut response = response();
        response.reports[0] = Report::Tree(TreeReport {
            query: TreeQuery::default(),
            tree: vec![1],
        });
        assert!(QueryOutput::from_response(&response).is_err());
    }

    #[test]
    fn test_write_and_read_output() {
        let output = QueryOutput::from_response(&response()).unwrap();
        let temp_file = NamedTempFile::new().unwrap();

        write_output(&output, temp_file.path()).unwrap();
        let loaded = read_output(temp_file.path()).unwrap();

        assert_eq!(loaded, output);
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let temp_dir = tempfile::tempdir().unwrap();
        let nested_path = temp_dir.path().join("nested/dirs/result.json");
        let output = QueryOutput::from_response(&response()).unwrap();

        write_output(&output, &nested_path).unwrap();

        assert!(nested_path.exists());
    }
}
