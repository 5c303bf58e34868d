//! Block partitioning of a method body.
//!
//! Two policies are available. [`PartitionPolicy::Leaders`] is the canonical control-flow leader
//! split: an instruction starts a block when it is the first instruction, a branch target, the
//! successor of a block-ending instruction, or an exception-region boundary. It accepts any
//! instruction stream, handlers included.
//!
//! [`PartitionPolicy::StackBalanced`] splits wherever the running stack depth returns to zero.
//! It only applies to handler-free methods and rejects any stream whose shape it cannot
//! represent, rather than dropping instructions.

use crate::body::MethodBody;
use crate::instruction::InstrId;
use serde::{Deserialize, Serialize};
use shade_utils::errors::FlowError;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// Block partitioning strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionPolicy {
    /// Control-flow leader split.
    #[default]
    Leaders,
    /// Split where the running stack depth returns to zero. Handler-free methods only.
    StackBalanced,
}

/// A maximal run of instructions `[start, end)` by position in the body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Position of the block in program order.
    pub index: usize,
    /// Position of the leader.
    pub start: usize,
    /// One past the position of the last instruction.
    pub end: usize,
}

impl Block {
    pub const fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Ordered blocks covering a body, with a membership index.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    pub blocks: Vec<Block>,
    membership: HashMap<InstrId, usize>,
    leaders: HashMap<InstrId, usize>,
}

impl Partition {
    fn from_starts(body: &MethodBody, starts: &BTreeSet<usize>) -> Self {
        let len = body.instructions.len();
        let bounds: Vec<usize> = starts.iter().copied().filter(|&s| s < len).collect();
        let mut partition = Self::default();

        for (index, &start) in bounds.iter().enumerate() {
            let end = bounds.get(index + 1).copied().unwrap_or(len);
            let block = Block { index, start, end };
            for instr in &body.instructions[block.range()] {
                partition.membership.insert(instr.id, index);
            }
            partition.leaders.insert(body.instructions[start].id, index);
            partition.blocks.push(block);
        }

        partition
    }

    /// Index of the block containing `id`.
    pub fn block_of(&self, id: InstrId) -> Option<usize> {
        self.membership.get(&id).copied()
    }

    /// Index of the block whose first instruction is `id`.
    pub fn block_starting_at(&self, id: InstrId) -> Option<usize> {
        self.leaders.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

/// Partitions `body` into blocks under `policy`.
///
/// # Arguments
/// * `body` - The method body to split.
/// * `returns_void` - Whether the enclosing method returns void; needed to classify `ret`.
/// * `policy` - Partitioning strategy.
///
/// # Returns
/// The [`Partition`], or a `FlowError` if the body cannot be split under the chosen policy.
pub fn partition(
    body: &MethodBody,
    returns_void: bool,
    policy: PartitionPolicy,
) -> Result<Partition, FlowError> {
    let partition = match policy {
        PartitionPolicy::Leaders => partition_by_leaders(body)?,
        PartitionPolicy::StackBalanced => partition_stack_balanced(body, returns_void)?,
    };
    tracing::debug!(
        "Partitioned {} instructions into {} blocks ({:?})",
        body.instructions.len(),
        partition.len(),
        policy
    );
    Ok(partition)
}

/// Leader-based split.
pub fn partition_by_leaders(body: &MethodBody) -> Result<Partition, FlowError> {
    if body.instructions.is_empty() {
        return Ok(Partition::default());
    }

    let positions = body.positions();
    let mut leaders = BTreeSet::from([0usize]);

    for (pos, instr) in body.instructions.iter().enumerate() {
        for target in instr.targets() {
            let at = positions
                .get(target)
                .ok_or(FlowError::UnresolvableTarget(target.0))?;
            leaders.insert(*at);
        }
        if instr.opcode.flow().ends_block() {
            leaders.insert(pos + 1);
        }
    }

    for handler in &body.handlers {
        for boundary in handler.boundaries() {
            let at = positions
                .get(&boundary)
                .ok_or(FlowError::HandlerOutsideBlock(boundary.0))?;
            leaders.insert(*at);
        }
    }

    Ok(Partition::from_starts(body, &leaders))
}

/// Stack-balanced split.
///
/// A block closes after any instruction that brings the running depth back to zero. Methods
/// with exception handlers, a trailing run that never balances, and branch targets landing
/// inside a block are all rejected.
pub fn partition_stack_balanced(
    body: &MethodBody,
    returns_void: bool,
) -> Result<Partition, FlowError> {
    if !body.handlers.is_empty() {
        return Err(FlowError::HandlersUnsupported);
    }
    if body.instructions.is_empty() {
        return Ok(Partition::default());
    }

    let mut starts = BTreeSet::from([0usize]);
    let mut depth: i64 = 0;
    let mut run_start = 0usize;

    for (pos, instr) in body.instructions.iter().enumerate() {
        let effect = instr.stack_effect(returns_void)?;
        depth = if effect.clears {
            i64::from(effect.pushes)
        } else {
            depth + effect.net()
        };
        if depth == 0 {
            starts.insert(pos + 1);
            run_start = pos + 1;
        }
    }

    if run_start < body.instructions.len() {
        return Err(FlowError::UnbalancedTail(
            body.instructions.len() - run_start,
        ));
    }

    let partition = Partition::from_starts(body, &starts);
    for instr in &body.instructions {
        for target in instr.targets() {
            if partition.block_starting_at(*target).is_none() {
                return Err(FlowError::UnresolvableTarget(target.0));
            }
        }
    }

    Ok(partition)
}
