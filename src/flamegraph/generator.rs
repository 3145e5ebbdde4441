//! SVG flamegraph generation from a stack trace tree.
//!
//! The layout is inverted (root at the bottom). Frame widths are
//! proportional to node totals and siblings are laid out heaviest first.
//! Colors are derived from a hash of the frame name so the same frame keeps
//! its color across renders.

use crate::model::{CollapsedStack, Node, Tree};
use crate::utils::config::ROOT_NODE_NAME;
use crate::utils::error::FlamegraphError;
use log::info;
use std::fmt::Write;

const LEVEL_HEIGHT: usize = 20;
const TITLE_MARGIN: usize = 30;
const CHAR_WIDTH: f64 = 7.0;

/// Flamegraph configuration
#[derive(Debug, Clone)]
pub struct FlamegraphConfig {
    pub title: String,
    pub width: usize,
}

impl Default for FlamegraphConfig {
    fn default() -> Self {
        Self {
            title: "Profile".to_string(),
            width: 1200,
        }
    }
}

impl FlamegraphConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }
}

/// Render a tree as an SVG flamegraph
///
/// **Public** - main entry point for flamegraph rendering
///
/// # Errors
/// * `FlamegraphError::EmptyTree` - the tree carries no weight
///
/// # Example
/// ```ignore
/// let tree = Tree::from_bytes(&report.tree)?;
/// let svg = generate_flamegraph(&tree, Some(&FlamegraphConfig::new().with_title("api")))?;
/// ```
pub fn generate_flamegraph(
    tree: &Tree,
    config: Option<&FlamegraphConfig>,
) -> Result<String, FlamegraphError> {
    if tree.is_empty() {
        return Err(FlamegraphError::EmptyTree);
    }

    let config = config.cloned().unwrap_or_default();
    info!("Generating flamegraph for {} nodes", tree.node_count());

    let max_depth = tree.depth();
    let width = config.width;
    let graph_height = (max_depth + 1) * LEVEL_HEIGHT;
    let total_height = graph_height + TITLE_MARGIN + 10;

    let mut svg = String::new();
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{}" height="{}" viewBox="0 0 {} {}">"#,
        width, total_height, width, total_height
    );
    svg.push_str(
        r#"<style>.func { font: 12px sans-serif; } .func:hover { stroke: black; stroke-width: 1; cursor: pointer; opacity: 0.9; }</style>"#,
    );
    let _ = write!(
        svg,
        r#"<text x="{}" y="20" font-size="16" text-anchor="middle" font-weight="bold">{}</text>"#,
        width / 2,
        escape(&config.title)
    );

    let layout = Layout {
        total: tree.total(),
        graph_height,
    };
    layout.render(tree.root(), width as f64, &mut svg);

    svg.push_str("</svg>");
    info!("Flamegraph generated ({} bytes)", svg.len());
    Ok(svg)
}

struct Layout {
    total: u64,
    graph_height: usize,
}

impl Layout {
    fn render(&self, root: &Node, width: f64, out: &mut String) {
        let mut pending = vec![(root, 0usize, 0.0f64, width)];
        while let Some((node, level, x, w)) = pending.pop() {
            if w < 0.5 {
                continue;
            }
            self.render_frame(node, level, x, w, out);

            let mut children: Vec<&Node> = node.children().collect();
            children.sort_by(|a, b| b.total().cmp(&a.total()).then_with(|| a.name().cmp(b.name())));

            let mut child_x = x;
            let mut placed = Vec::with_capacity(children.len());
            for child in children {
                let child_w = child.total() as f64 / node.total().max(1) as f64 * w;
                placed.push((child, level + 1, child_x, child_w));
                child_x += child_w;
            }
            pending.extend(placed.into_iter().rev());
        }
    }

    fn render_frame(&self, node: &Node, level: usize, x: f64, w: f64, out: &mut String) {
        let y = self.graph_height - (level + 1) * LEVEL_HEIGHT + TITLE_MARGIN;
        let name = escape(node.name());
        let percentage = node.total() as f64 / self.total.max(1) as f64 * 100.0;
        let _ = write!(
            out,
            r#"<rect x="{:.2}" y="{}" width="{:.2}" height="{}" fill="{}" class="func"><title>{} ({} samples, {:.2}%)</title></rect>"#,
            x,
            y,
            w,
            LEVEL_HEIGHT,
            node_color(node.name()),
            name,
            node.total(),
            percentage
        );

        if w > 35.0 {
            let label = fit_label(node.name(), (w / CHAR_WIDTH) as usize);
            if !label.is_empty() {
                let _ = write!(
                    out,
                    r#"<text x="{:.2}" y="{}" dx="4" dy="14" font-size="12" fill="white" pointer-events="none">{}</text>"#,
                    x,
                    y,
                    escape(&label)
                );
            }
        }
    }
}

/// Truncate on char boundaries, marking the cut with `...`
fn fit_label(name: &str, max_chars: usize) -> String {
    let len = name.chars().count();
    if len <= max_chars {
        name.to_string()
    } else if max_chars > 3 {
        let head: String = name.chars().take(max_chars - 3).collect();
        format!("{}...", head)
    } else {
        String::new()
    }
}

fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// FNV-1a, stable across runs and platforms
fn name_hash(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0100_0000_01b3)
    })
}

fn node_color(name: &str) -> String {
    if name == ROOT_NODE_NAME {
        return "rgb(100, 149, 237)".to_string();
    }
    let hash = name_hash(name);
    let r = 205 + (hash % 50) as u8;
    let g = ((hash >> 8) % 230) as u8;
    let b = ((hash >> 16) % 55) as u8;
    format!("rgb({}, {}, {})", r, g, b)
}

/// Text table of the heaviest stacks with their share of `total`
pub fn generate_text_summary(stacks: &[CollapsedStack], max_lines: usize, total: u64) -> String {
    let mut lines = Vec::new();
    let total = total.max(1);

    lines.push("  HOT STACKS".to_string());
    lines.push(format!("  {:<60} {:>14} {:>8}", "Stack (heaviest first)", "SELF", "%"));
    lines.push(format!("  {}", "-".repeat(84)));

    for stack in stacks.iter().take(max_lines) {
        let percentage = stack.weight as f64 / total as f64 * 100.0;
        let chars = stack.stack.chars().count();
        let display = if chars > 60 {
            let tail: String = stack.stack.chars().skip(chars - 57).collect();
            format!("...{}", tail)
        } else {
            stack.stack.clone()
        };
        lines.push(format!("  {:<60} {:>14} {:>7.1}%", display, stack.weight, percentage));
    }

    if stacks.len() > max_lines {
        lines.push(String::new());
        lines.push(format!("   (Showing top {} of {} stacks)", max_lines, stacks.len()));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_collapsed_stacks;

    fn tree() -> Tree {
        let mut tree = Tree::new();
        tree.insert_stack(&["main", "parse<T>"], 30);
        tree.insert_stack(&["main", "eval"], 10);
        tree
    }

    #[test]
    fn test_empty_tree_rejected() {
        assert!(matches!(
            generate_flamegraph(&Tree::new(), None),
            Err(FlamegraphError::EmptyTree)
        ));
    }

    #[test]
    fn test_svg_contains_escaped_frames() {
        let config = FlamegraphConfig::new().with_title("a & b");
        let svg = generate_flamegraph(&tree(), Some(&config)).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.ends_with("</svg>"));
        assert!(svg.contains("parse&lt;T&gt;"));
        assert!(svg.contains("a &amp; b"));
        assert!(!svg.contains("parse<T>"));
    }

    #[test]
    fn test_siblings_laid_out_heaviest_first() {
        let svg = generate_flamegraph(&tree(), None).unwrap();
        let parse = svg.find("parse&lt;T&gt; (30 samples").unwrap();
        let eval = svg.find("eval (10 samples").unwrap();

        assert!(parse < eval);
        assert!(svg.contains(r#"<rect x="900.00" y="30" width="300.00""#));
    }

    #[test]
    fn test_deep_tree_renders() {
        let frames: Vec<String> = (0..10_000).map(|i| format!("f{}", i)).collect();
        let mut tree = Tree::new();
        tree.insert_stack(&frames, 1);

        let svg = generate_flamegraph(&tree, None).unwrap();

        assert_eq!(svg.matches("<rect").count(), 10_001);
        assert!(svg.contains("f9999 (1 samples"));
    }

    #[test]
    fn test_colors_are_stable() {
        assert_eq!(node_color("eval"), node_color("eval"));
        assert_eq!(node_color(ROOT_NODE_NAME), "rgb(100, 149, 237)");
    }

    #[test]
    fn test_fit_label_on_char_boundaries() {
        assert_eq!(fit_label("héllo_wörld", 8), "héllo...");
        assert_eq!(fit_label("short", 10), "short");
        assert_eq!(fit_label("abcdef", 3), "");
    }

    #[test]
    fn test_text_summary() {
        let tree = tree();
        let stacks = build_collapsed_stacks(&tree);
        let summary = generate_text_summary(&stacks, 1, tree.total());
        assert!(summary.contains("main;parse<T>"));
        assert!(summary.contains("75.0%"));
        assert!(summary.contains("Showing top 1 of 2 stacks"));
    }
}
