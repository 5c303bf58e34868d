//! Evaluation-stack depth analysis.
//!
//! Propagates the stack depth before every reachable instruction with a worklist over the
//! instruction stream. Exception-handler entries are seeded with the depth the runtime sets up
//! for them. Two paths that reach the same instruction with different depths are an error, as is
//! popping more values than the stack holds.

use crate::body::MethodBody;
use crate::instruction::InstrId;
use crate::opcode::FlowType;
use shade_utils::errors::{FlowError, StackError};
use std::collections::HashMap;

/// Depth of the evaluation stack before each reachable instruction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackDepths {
    before: HashMap<InstrId, u32>,
    max_depth: u32,
}

impl StackDepths {
    /// Depth before instruction `id`, or `None` if it is unreachable.
    pub fn before(&self, id: InstrId) -> Option<u32> {
        self.before.get(&id).copied()
    }

    /// Deepest stack seen anywhere in the body.
    pub const fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Number of reachable instructions.
    pub fn reachable(&self) -> usize {
        self.before.len()
    }
}

/// Computes stack depths for `body`.
///
/// # Arguments
/// * `body` - The body to analyse.
/// * `returns_void` - Whether the enclosing method returns void.
///
/// # Returns
/// The per-instruction [`StackDepths`], or a `StackError` on underflow, merge mismatch or an
/// unclassifiable instruction.
pub fn analyze(body: &MethodBody, returns_void: bool) -> Result<StackDepths, StackError> {
    let positions = body.positions();
    let len = body.instructions.len();
    let mut depths: Vec<Option<u32>> = vec![None; len];
    let mut worklist: Vec<usize> = Vec::new();

    if len > 0 {
        merge(body, 0, 0, &mut depths, &mut worklist)?;
    }
    for handler in &body.handlers {
        let handler_pos = *positions
            .get(&handler.handler_start)
            .ok_or(FlowError::HandlerOutsideBlock(handler.handler_start.0))?;
        merge(body, handler_pos, handler.kind.entry_depth(), &mut depths, &mut worklist)?;
        if let Some(filter) = handler.filter_start {
            let filter_pos = *positions
                .get(&filter)
                .ok_or(FlowError::HandlerOutsideBlock(filter.0))?;
            merge(body, filter_pos, 1, &mut depths, &mut worklist)?;
        }
    }

    let mut max_depth = 0;
    while let Some(pos) = worklist.pop() {
        let instr = &body.instructions[pos];
        let depth = depths[pos].unwrap_or(0);
        let effect = instr.stack_effect(returns_void)?;
        let after = effect.apply(depth).ok_or(StackError::Underflow {
            id: instr.id.0,
            depth,
            pops: effect.pops,
        })?;
        max_depth = max_depth.max(depth).max(after);

        let flow = instr.opcode.flow();
        for target in instr.targets() {
            let at = *positions
                .get(target)
                .ok_or(FlowError::UnresolvableTarget(target.0))?;
            merge(body, at, after, &mut depths, &mut worklist)?;
        }
        if flow.falls_through() && pos + 1 < len {
            merge(body, pos + 1, after, &mut depths, &mut worklist)?;
        }
        if matches!(flow, FlowType::Return) && after != 0 {
            tracing::debug!("{} leaves {} values on the stack", instr, after);
        }
    }

    let before = body
        .instructions
        .iter()
        .zip(depths)
        .filter_map(|(instr, depth)| depth.map(|d| (instr.id, d)))
        .collect();

    Ok(StackDepths { before, max_depth })
}

fn merge(
    body: &MethodBody,
    pos: usize,
    depth: u32,
    depths: &mut [Option<u32>],
    worklist: &mut Vec<usize>,
) -> Result<(), StackError> {
    match depths[pos] {
        Some(existing) if existing != depth => Err(StackError::Mismatch {
            id: body.instructions[pos].id.0,
            expected: existing,
            found: depth,
        }),
        Some(_) => Ok(()),
        None => {
            depths[pos] = Some(depth);
            worklist.push(pos);
            Ok(())
        }
    }
}
