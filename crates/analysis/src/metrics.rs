//! Module for computing structural metrics of a method body, used to gauge how much a transform
//! obscures it.
//!
//! Metrics cover instruction count, control-flow complexity (block and edge counts), stack usage
//! and dominator overlap, folded into a single potency score. The orchestrator collects them
//! before and after flattening and logs the delta.
//!
//! # Usage
//! ```rust,ignore
//! let before = metrics::collect_metrics(&body, method.returns_void())?;
//! flatten(&mut body)?;
//! let after = metrics::collect_metrics(&body, method.returns_void())?;
//! tracing::info!("potency delta {:.2}", metrics::compare(&before, &after));
//! ```

use petgraph::{
    algo::dominators::simple_fast,
    graph::{DiGraph, NodeIndex},
    visit::Reversed,
};
use serde::{Deserialize, Serialize};
use shade_core::blocks::partition_by_leaders;
use shade_core::cfg::{build_cfg, CfgNode, EdgeType, MethodCfg};
use shade_core::stack;
use shade_core::MethodBody;
use shade_utils::errors::MetricsError;
use std::collections::HashMap;

/// Structural metrics of one method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of instructions in the body.
    pub instr_cnt: usize,
    /// Number of blocks in the CFG (excluding Entry/Exit).
    pub block_cnt: usize,
    /// Number of edges in the CFG.
    pub edge_cnt: usize,
    /// Deepest evaluation stack reached.
    pub max_stack_peak: u32,
    /// Fraction of nodes whose immediate dominator is also their immediate post-dominator.
    pub dom_overlap: f64,
    /// Composite potency score (heuristic based on nodes, edges, and overlap).
    pub potency: f64,
}

/// Collects metrics for `body`.
///
/// # Arguments
/// * `body` - The method body.
/// * `returns_void` - Whether the enclosing method returns void.
///
/// # Returns
/// A `Metrics` struct, or an error if the body is empty or its CFG/stack analysis fails.
pub fn collect_metrics(body: &MethodBody, returns_void: bool) -> Result<Metrics, MetricsError> {
    if body.instructions.is_empty() {
        return Err(MetricsError::EmptyCfg);
    }

    let partition = partition_by_leaders(body)?;
    let cfg = build_cfg(body, &partition)?;
    let depths = stack::analyze(body, returns_void)?;

    let (doms, post_doms) = dominator_pairs(&cfg);
    let overlap = dom_overlap(&doms, &post_doms);
    let block_cnt = partition.len();
    let edge_cnt = cfg.graph.edge_count();
    tracing::debug!(
        "Metrics: {} blocks, {} edges, overlap {:.3}",
        block_cnt,
        edge_cnt,
        overlap
    );

    Ok(Metrics {
        instr_cnt: body.instructions.len(),
        block_cnt,
        edge_cnt,
        max_stack_peak: depths.max_depth(),
        dom_overlap: overlap,
        potency: score(overlap, block_cnt, edge_cnt),
    })
}

type DominatorMap = HashMap<NodeIndex, NodeIndex>;

/// Immediate dominators (rooted at Entry) and post-dominators (rooted at Exit).
fn dominator_pairs(cfg: &MethodCfg) -> (DominatorMap, DominatorMap) {
    let g: &DiGraph<CfgNode, EdgeType> = &cfg.graph;

    let doms = simple_fast(g, cfg.entry);
    let dom_map = g
        .node_indices()
        .filter_map(|n| doms.immediate_dominator(n).map(|idom| (n, idom)))
        .collect();

    let post = simple_fast(Reversed(g), cfg.exit);
    let pdom_map = g
        .node_indices()
        .filter_map(|n| post.immediate_dominator(n).map(|ipdom| (n, ipdom)))
        .collect();

    (dom_map, pdom_map)
}

fn dom_overlap(doms: &DominatorMap, pdoms: &DominatorMap) -> f64 {
    if doms.is_empty() {
        return 0.0;
    }
    let common = doms
        .iter()
        .filter(|(n, d)| pdoms.get(*n) == Some(*d))
        .count();
    common as f64 / doms.len() as f64
}

/// Potency heuristic: rewards blocks and edges, penalises a linear dominator structure.
fn score(overlap: f64, nodes: usize, edges: usize) -> f64 {
    5.0 * (nodes.max(1) as f64).log2() + edges as f64 + 30.0 * (1.0 - overlap)
}

/// Scores a transform by its potency gain, discounted by code growth.
///
/// # Arguments
/// * `before` - Metrics before the transform.
/// * `after` - Metrics after the transform.
///
/// # Returns
/// A score representing the transform's effectiveness (positive is better).
pub fn compare(before: &Metrics, after: &Metrics) -> f64 {
    after.potency - before.potency - 0.1 * (after.instr_cnt as f64 - before.instr_cnt as f64)
}
