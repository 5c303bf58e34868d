use crate::fixtures::{self, app, body};
use shade_core::blocks::{partition, PartitionPolicy};
use shade_core::cfg::build_cfg;
use shade_core::{stack, InstrId, MethodBody, MethodId};
use shade_utils::errors::FlowError;
use std::collections::HashSet;

fn assert_covers(body: &MethodBody, blocks: &[shade_core::Block]) {
    let mut next = 0;
    let mut seen = HashSet::new();
    for (index, block) in blocks.iter().enumerate() {
        assert_eq!(block.index, index);
        assert_eq!(block.start, next, "blocks must be contiguous");
        assert!(!block.is_empty());
        for instr in &body.instructions[block.range()] {
            assert!(seen.insert(instr.id), "{} appears twice", instr.id);
        }
        next = block.end;
    }
    assert_eq!(next, body.instructions.len());
    assert_eq!(seen.len(), body.instructions.len());
}

#[test]
fn test_leader_partition_covers_every_method() {
    fixtures::init_tracing();
    let module = app();
    for (id, method) in module.methods() {
        let body = body(&module, id);
        let partition = partition(body, method.returns_void(), PartitionPolicy::Leaders).unwrap();
        assert_covers(body, &partition.blocks);
        for instr in &body.instructions {
            assert!(partition.block_of(instr.id).is_some());
        }
    }
}

#[test]
fn test_every_branch_target_starts_a_block() {
    let module = app();
    for id in fixtures::BRANCHING {
        let body = body(&module, id);
        let partition = partition(body, false, PartitionPolicy::Leaders).unwrap();
        for instr in &body.instructions {
            for target in instr.targets() {
                assert!(
                    partition.block_starting_at(*target).is_some(),
                    "{target} in {} is not a leader",
                    module.qualified_name(id)
                );
            }
        }
    }
}

#[test]
fn test_handler_boundaries_start_blocks() {
    let module = app();
    let body = body(&module, fixtures::SAFE_DIV);
    let partition = partition(body, false, PartitionPolicy::Leaders).unwrap();
    let handler = &body.handlers[0];
    for boundary in handler.boundaries() {
        assert!(partition.block_starting_at(boundary).is_some());
    }
}

#[test]
fn test_stack_balanced_partition_covers_handler_free_methods() {
    let module = app();
    for (id, method) in module.methods() {
        let body = body(&module, id);
        if !body.handlers.is_empty() {
            continue;
        }
        let returns_void = method.returns_void();
        let partition = partition(body, returns_void, PartitionPolicy::StackBalanced).unwrap();
        assert_covers(body, &partition.blocks);

        let depths = stack::analyze(body, returns_void).unwrap();
        for block in &partition.blocks {
            let leader = body.instructions[block.start].id;
            assert_eq!(depths.before(leader).unwrap_or(0), 0);
        }
    }
}

#[test]
fn test_stack_balanced_rejects_handlers() {
    let module = app();
    let body = body(&module, fixtures::SAFE_DIV);
    assert!(matches!(
        partition(body, false, PartitionPolicy::StackBalanced),
        Err(FlowError::HandlersUnsupported)
    ));
}

#[test]
fn test_straight_line_method_is_one_block() {
    let module = app();
    for id in [fixtures::MAIN, fixtures::TWICE, fixtures::CALLS_TWICE] {
        let body = body(&module, id);
        let partition = partition(body, false, PartitionPolicy::Leaders).unwrap();
        assert_eq!(partition.len(), 1);
    }
}

#[test]
fn test_cfg_has_a_node_per_block() {
    let module = app();
    let body = body(&module, fixtures::CLASSIFY);
    let partition = partition(body, false, PartitionPolicy::Leaders).unwrap();
    let cfg = build_cfg(body, &partition).unwrap();

    assert_eq!(cfg.block_nodes.len(), partition.len());
    // Entry, exit, and one node per block.
    assert_eq!(cfg.graph.node_count(), partition.len() + 2);
    // The switch block reaches both cases and the default.
    let switch_node = cfg.node_of(0).unwrap();
    assert_eq!(cfg.graph.neighbors(switch_node).count(), 3);
}

#[test]
fn test_unknown_method_lookup() {
    let module = app();
    assert!(module.method(MethodId::new(5, 0)).is_err());
    assert_eq!(module.find_method("Sum"), Some(fixtures::SUM));
    assert_eq!(module.find_qualified("App.Helpers::Twice"), Some(fixtures::TWICE));
    assert!(body(&module, fixtures::ABS).get(InstrId(6)).is_some());
}
