//! Control-flow flattening.
//!
//! Rebuilds a method body as a dispatch loop over its blocks:
//!
//! ```text
//!         ldc.i4  <state of block 0>
//!         stloc   st
//!         br      D
//! D:      ldloc   st
//!         switch  (L_s0, L_s1, ...)        ; one entry per block, indexed by state
//!         br      D
//! L_b:    nop                              ; per block, in state order
//!         <block instructions>
//!         ldc.i4  <state of next block>    ; only if the block falls through
//!         stloc   st
//!         br      D
//! S_t:    ldc.i4  <state of target t>      ; branch stubs, one per distinct target
//!         stloc   st
//!         br      D
//! ```
//!
//! States are a permutation of block indices when shuffling, so emission order carries no
//! information about the original flow. Methods with exception handlers keep program order so
//! every protected region stays contiguous; their region boundaries are remapped to the new
//! block labels. A catch or filter entry block gets a short prologue that parks the exception
//! object in a local, keeping its label reachable from the dispatcher at depth zero.
//!
//! Protected regions are only as strict as this crate's execution model: the dispatcher's
//! `switch` enters try and handler labels directly, and fall-through and branch stubs inside a
//! region return to the dispatcher with `br`, not `leave`. Only `leave` keeps a direct label
//! target. A runtime verifier that forbids branching into or out of protected regions will
//! reject flattened methods that have handlers.

use crate::Transform;
use rand::{rngs::StdRng, seq::SliceRandom};
use shade_core::blocks::{self, Partition, PartitionPolicy};
use shade_core::{
    stack, InstrId, Instruction, Method, MethodBody, Opcode, Operand, TypeSig,
};
use shade_utils::errors::{FlowError, TransformError};
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Flattening options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenConfig {
    /// Partitioning policy.
    pub policy: PartitionPolicy,
    /// Permute dispatch states and emit blocks in state order.
    pub shuffle: bool,
    /// Route taken branches through the dispatcher via per-target stubs.
    pub dispatch_branches: bool,
}

/// Control-flow flattening transform.
#[derive(Debug, Clone, Copy, Default)]
pub struct Flatten {
    config: FlattenConfig,
}

impl Flatten {
    pub const fn new(config: FlattenConfig) -> Self {
        Self { config }
    }
}

impl Transform for Flatten {
    fn name(&self) -> &'static str {
        "Flatten"
    }

    fn apply(&self, method: &mut Method, rng: &mut StdRng) -> Result<bool, TransformError> {
        if method.flags.constructor {
            debug!("Skipping constructor {}", method.name);
            return Ok(false);
        }
        let returns_void = method.returns_void();
        let Some(body) = method.body.as_mut() else {
            return Ok(false);
        };
        if body.instructions.is_empty() {
            return Ok(false);
        }

        let changed = flatten_body(body, returns_void, self.config, rng)?;
        if changed {
            debug!(
                "Flattened {} into {} instructions",
                method.name,
                body.instructions.len()
            );
        }
        Ok(changed)
    }
}

/// Per-block layout decided before any instruction is emitted.
struct Layout {
    /// Dispatch state of each block, by block index.
    state_of: Vec<i32>,
    /// Block indices in emission order.
    order: Vec<usize>,
    /// Label id of each block, by block index.
    labels: Vec<InstrId>,
    /// Prologue id of catch/filter entry blocks.
    prologues: HashMap<usize, InstrId>,
    dispatcher: InstrId,
}

/// Flattens `body` in place.
///
/// Every flow check runs before the first mutation. A full local-variable table is only
/// detected while rebuilding; callers run on a snapshot and discard it.
///
/// # Arguments
/// * `body` - The body to rebuild.
/// * `returns_void` - Whether the enclosing method returns void.
/// * `config` - Flattening options.
/// * `rng` - Source for the state permutation.
///
/// # Returns
/// `Ok(false)` for bodies with fewer than two blocks (left untouched), `Ok(true)` once the body
/// is rebuilt, or the first `TransformError` found.
pub fn flatten_body(
    body: &mut MethodBody,
    returns_void: bool,
    config: FlattenConfig,
    rng: &mut StdRng,
) -> Result<bool, TransformError> {
    // Fail closed on anything whose stack effect is unknown, before partitioning.
    for instr in &body.instructions {
        instr.stack_effect(returns_void)?;
    }

    let partition = blocks::partition(body, returns_void, config.policy)?;
    if partition.len() < 2 {
        debug!("Fewer than two blocks, nothing to flatten");
        return Ok(false);
    }

    let catch_entries = check_boundaries(body, returns_void, &partition)?;

    let last = &partition.blocks[partition.len() - 1];
    if body.instructions[last.end - 1].opcode.flow().falls_through() {
        return Err(FlowError::FallsOffEnd(last.index).into());
    }

    let targets = resolve_targets(body, &partition)?;
    let layout = plan_layout(body, &partition, &catch_entries, config.shuffle, rng);

    let mut handlers = body.handlers.clone();
    for handler in &mut handlers {
        handler.remap(|id| -> Result<InstrId, FlowError> {
            let index = partition
                .block_starting_at(id)
                .ok_or(FlowError::HandlerOutsideBlock(id.0))?;
            Ok(layout
                .prologues
                .get(&index)
                .copied()
                .unwrap_or(layout.labels[index]))
        })?;
    }

    // All checks passed; from here on the body is rebuilt.
    let state_local = body.add_local(TypeSig::I4)?;
    let exception_local = if layout.prologues.is_empty() {
        None
    } else {
        Some(body.add_local(TypeSig::Object)?)
    };
    let emitted = emit(
        body,
        &partition,
        &layout,
        &targets,
        state_local,
        exception_local,
        config.dispatch_branches,
    );

    body.instructions = emitted;
    body.handlers = handlers;
    body.init_locals = true;

    debug!(
        "Dispatcher over {} blocks (shuffled: {})",
        partition.len(),
        layout.order.iter().enumerate().any(|(s, &b)| s != b)
    );
    Ok(true)
}

/// Verifies that every block is entered with an empty stack, except handler entries, which are
/// entered with the runtime-provided depth. Returns the blocks that start a catch or filter
/// handler.
fn check_boundaries(
    body: &MethodBody,
    returns_void: bool,
    partition: &Partition,
) -> Result<HashSet<usize>, TransformError> {
    let depths = stack::analyze(body, returns_void)?;

    let mut handler_entries: HashMap<InstrId, u32> = HashMap::new();
    for handler in &body.handlers {
        handler_entries.insert(handler.handler_start, handler.kind.entry_depth());
        if let Some(filter) = handler.filter_start {
            handler_entries.insert(filter, 1);
        }
    }

    let mut catch_entries = HashSet::new();
    for block in &partition.blocks {
        let leader = body.instructions[block.start].id;
        let depth = depths.before(leader).unwrap_or(0);
        match handler_entries.get(&leader) {
            Some(&entry_depth) if depth == entry_depth => {
                if entry_depth == 1 {
                    catch_entries.insert(block.index);
                }
            }
            _ if depth == 0 => {}
            _ => {
                return Err(FlowError::UnbalancedBoundary {
                    block: block.index,
                    depth,
                }
                .into())
            }
        }
    }
    Ok(catch_entries)
}

/// Maps every branch target to the block it starts.
fn resolve_targets(
    body: &MethodBody,
    partition: &Partition,
) -> Result<HashMap<InstrId, usize>, FlowError> {
    let mut targets = HashMap::new();
    for instr in &body.instructions {
        for target in instr.targets() {
            let index = partition
                .block_starting_at(*target)
                .ok_or(FlowError::UnresolvableTarget(target.0))?;
            targets.insert(*target, index);
        }
    }
    Ok(targets)
}

fn plan_layout(
    body: &mut MethodBody,
    partition: &Partition,
    catch_entries: &HashSet<usize>,
    shuffle: bool,
    rng: &mut StdRng,
) -> Layout {
    let count = partition.len();
    let mut order: Vec<usize> = (0..count).collect();
    if shuffle {
        if body.handlers.is_empty() {
            order.shuffle(rng);
        } else {
            debug!("Method has exception handlers; keeping program order");
        }
    }

    let mut state_of = vec![0i32; count];
    for (state, &block) in order.iter().enumerate() {
        state_of[block] = state as i32;
    }

    let dispatcher = body.fresh_id();
    let labels = (0..count).map(|_| body.fresh_id()).collect();
    let mut prologue_blocks: Vec<usize> = catch_entries.iter().copied().collect();
    prologue_blocks.sort_unstable();
    let prologues = prologue_blocks
        .into_iter()
        .map(|block| (block, body.fresh_id()))
        .collect();

    Layout {
        state_of,
        order,
        labels,
        prologues,
        dispatcher,
    }
}

/// `ldc.i4 state; stloc local; br dispatcher`, optionally reusing `id` for the first instruction.
fn transition(
    body: &mut MethodBody,
    id: Option<InstrId>,
    state: i32,
    local: u16,
    dispatcher: InstrId,
) -> [Instruction; 3] {
    let load = match id {
        Some(id) => Instruction::new(id, Opcode::LdcI4, Operand::Int32(state)),
        None => body.create(Opcode::LdcI4, Operand::Int32(state)),
    };
    [
        load,
        body.create(Opcode::Stloc, Operand::Local(local)),
        body.create(Opcode::Br, Operand::Target(dispatcher)),
    ]
}

fn emit(
    body: &mut MethodBody,
    partition: &Partition,
    layout: &Layout,
    targets: &HashMap<InstrId, usize>,
    state_local: u16,
    exception_local: Option<u16>,
    dispatch_branches: bool,
) -> Vec<Instruction> {
    let original = body.instructions.clone();
    let mut out: Vec<Instruction> = Vec::with_capacity(original.len() * 2 + 8);

    // Bootstrap and dispatcher.
    out.extend(transition(
        body,
        None,
        layout.state_of[0],
        state_local,
        layout.dispatcher,
    ));
    let table: Vec<InstrId> = layout.order.iter().map(|&b| layout.labels[b]).collect();
    out.push(Instruction::new(
        layout.dispatcher,
        Opcode::Ldloc,
        Operand::Local(state_local),
    ));
    out.push(body.create(Opcode::Switch, Operand::Switch(table)));
    out.push(body.create(Opcode::Br, Operand::Target(layout.dispatcher)));

    for &index in &layout.order {
        let block = &partition.blocks[index];

        if let (Some(&prologue), Some(local)) = (layout.prologues.get(&index), exception_local) {
            out.push(Instruction::new(prologue, Opcode::Stloc, Operand::Local(local)));
            out.push(Instruction::new(layout.labels[index], Opcode::Nop, Operand::None));
            out.push(body.create(Opcode::Ldloc, Operand::Local(local)));
        } else {
            out.push(Instruction::new(layout.labels[index], Opcode::Nop, Operand::None));
        }

        // Stubs are keyed by target block, in first-use order.
        let mut stubs: Vec<(usize, InstrId)> = Vec::new();
        for instr in &original[block.range()] {
            let mut instr = instr.clone();
            let leave = instr.opcode == Opcode::Leave;
            instr.retarget(|target| {
                let Some(&dest) = targets.get(&target) else {
                    return target;
                };
                if leave || !dispatch_branches {
                    return layout.labels[dest];
                }
                match stubs.iter().find(|(block, _)| *block == dest) {
                    Some(&(_, stub)) => stub,
                    None => {
                        let stub = body.fresh_id();
                        stubs.push((dest, stub));
                        stub
                    }
                }
            });
            out.push(instr);
        }

        let falls_through = original[block.end - 1].opcode.flow().falls_through();
        if falls_through {
            let next = layout.state_of[index + 1];
            out.extend(transition(body, None, next, state_local, layout.dispatcher));
        }

        for (dest, stub) in stubs {
            out.extend(transition(
                body,
                Some(stub),
                layout.state_of[dest],
                state_local,
                layout.dispatcher,
            ));
        }
    }

    out
}
