//! Block-level control flow graph of one method.
//!
//! Nodes are the blocks of a [`Partition`] plus synthetic `Entry` and `Exit` nodes; edges carry
//! the kind of transfer that links them. The graph feeds the structural metrics and the CLI's
//! DOT output.

use crate::blocks::Partition;
use crate::body::MethodBody;
use crate::instruction::InstrId;
use crate::opcode::FlowType;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use shade_utils::errors::FlowError;
use std::fmt;

/// A node of the method CFG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CfgNode {
    Entry,
    Exit,
    /// Block by its index in the partition.
    Block(usize),
}

impl fmt::Display for CfgNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entry => f.write_str("Entry"),
            Self::Exit => f.write_str("Exit"),
            Self::Block(index) => write!(f, "B{index}"),
        }
    }
}

/// Kind of control transfer along an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeType {
    /// Sequential execution into the next block.
    Fallthrough,
    /// Unconditional branch.
    Jump,
    /// Conditional branch taken.
    BranchTrue,
    /// Conditional branch not taken.
    BranchFalse,
    /// Entry `n` of a switch table.
    SwitchCase(usize),
    /// Exit from a protected region.
    Leave,
    /// From a protected block to its handler or filter.
    Exception,
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fallthrough => f.write_str("Fallthrough"),
            Self::Jump => f.write_str("Jump"),
            Self::BranchTrue => f.write_str("BranchTrue"),
            Self::BranchFalse => f.write_str("BranchFalse"),
            Self::SwitchCase(n) => write!(f, "Case{n}"),
            Self::Leave => f.write_str("Leave"),
            Self::Exception => f.write_str("Exception"),
        }
    }
}

/// Control flow graph of a method.
#[derive(Debug, Clone)]
pub struct MethodCfg {
    pub graph: DiGraph<CfgNode, EdgeType>,
    pub entry: NodeIndex,
    pub exit: NodeIndex,
    /// Node of each block, indexed like the partition.
    pub block_nodes: Vec<NodeIndex>,
}

impl MethodCfg {
    /// Node of block `index`.
    pub fn node_of(&self, index: usize) -> Option<NodeIndex> {
        self.block_nodes.get(index).copied()
    }
}

/// Builds the CFG of `body` from an existing partition.
///
/// # Arguments
/// * `body` - The method body.
/// * `partition` - Blocks of `body`.
///
/// # Returns
/// The [`MethodCfg`], or `FlowError::UnresolvableTarget` / `FlowError::HandlerOutsideBlock` when
/// a target or region boundary does not start a block.
pub fn build_cfg(body: &MethodBody, partition: &Partition) -> Result<MethodCfg, FlowError> {
    let mut graph = DiGraph::new();
    let entry = graph.add_node(CfgNode::Entry);
    let exit = graph.add_node(CfgNode::Exit);
    let block_nodes: Vec<NodeIndex> = partition
        .blocks
        .iter()
        .map(|b| graph.add_node(CfgNode::Block(b.index)))
        .collect();

    let Some(&first) = block_nodes.first() else {
        graph.add_edge(entry, exit, EdgeType::Fallthrough);
        return Ok(MethodCfg {
            graph,
            entry,
            exit,
            block_nodes,
        });
    };
    graph.add_edge(entry, first, EdgeType::Fallthrough);

    let target_node = |id: InstrId| {
        partition
            .block_starting_at(id)
            .map(|index| block_nodes[index])
            .ok_or(FlowError::UnresolvableTarget(id.0))
    };

    for block in &partition.blocks {
        let node = block_nodes[block.index];
        let next = block_nodes.get(block.index + 1).copied().unwrap_or(exit);

        for instr in &body.instructions[block.range()] {
            let flow = instr.opcode.flow();
            match flow {
                FlowType::ConditionalBranch => {
                    for target in instr.targets() {
                        graph.add_edge(node, target_node(*target)?, EdgeType::BranchTrue);
                    }
                }
                FlowType::UnconditionalBranch => {
                    for target in instr.targets() {
                        graph.add_edge(node, target_node(*target)?, EdgeType::Jump);
                    }
                }
                FlowType::Switch => {
                    for (case, target) in instr.targets().iter().enumerate() {
                        graph.add_edge(node, target_node(*target)?, EdgeType::SwitchCase(case));
                    }
                }
                FlowType::Leave => {
                    for target in instr.targets() {
                        graph.add_edge(node, target_node(*target)?, EdgeType::Leave);
                    }
                }
                _ => {}
            }
        }

        let Some(last) = body.instructions[block.range()].last() else {
            continue;
        };
        match last.opcode.flow() {
            FlowType::ConditionalBranch => {
                graph.add_edge(node, next, EdgeType::BranchFalse);
            }
            FlowType::Return | FlowType::Throw | FlowType::EndFinally => {
                graph.add_edge(node, exit, EdgeType::Fallthrough);
            }
            flow if flow.falls_through() => {
                graph.add_edge(node, next, EdgeType::Fallthrough);
            }
            _ => {}
        }
    }

    let positions = body.positions();
    for handler in &body.handlers {
        let region_start = positions
            .get(&handler.try_start)
            .copied()
            .ok_or(FlowError::HandlerOutsideBlock(handler.try_start.0))?;
        let region_end = match handler.try_end {
            Some(end) => positions
                .get(&end)
                .copied()
                .ok_or(FlowError::HandlerOutsideBlock(end.0))?,
            None => body.instructions.len(),
        };
        let landing = handler.filter_start.unwrap_or(handler.handler_start);
        let landing_node = partition
            .block_starting_at(landing)
            .map(|index| block_nodes[index])
            .ok_or(FlowError::HandlerOutsideBlock(landing.0))?;

        for block in &partition.blocks {
            if block.start >= region_start && block.start < region_end {
                graph.add_edge(block_nodes[block.index], landing_node, EdgeType::Exception);
            }
        }
    }

    tracing::debug!(
        "Built method CFG with {} nodes and {} edges",
        graph.node_count(),
        graph.edge_count()
    );

    Ok(MethodCfg {
        graph,
        entry,
        exit,
        block_nodes,
    })
}
