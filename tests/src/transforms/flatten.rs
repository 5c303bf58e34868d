use crate::fixtures::{self, app, body};
use rand::rngs::StdRng;
use rand::SeedableRng;
use shade_analysis::metrics::collect_metrics;
use shade_core::blocks::{partition, PartitionPolicy};
use shade_core::{stack, InstrId, Method, MethodId, Module, Opcode};
use shade_transform::flatten::{Flatten, FlattenConfig};
use shade_transform::Transform;
use shade_verification::{PracticalTester, VerificationConfig};
use std::collections::HashSet;

fn flatten(module: &mut Module, id: MethodId, config: FlattenConfig, seed: u64) -> bool {
    let mut rng = StdRng::seed_from_u64(seed);
    let method: &mut Method = module.method_mut(id).unwrap();
    Flatten::new(config).apply(method, &mut rng).unwrap()
}

fn config(shuffle: bool) -> FlattenConfig {
    FlattenConfig {
        policy: PartitionPolicy::Leaders,
        shuffle,
        dispatch_branches: true,
    }
}

#[test]
fn test_stack_shape_is_preserved() {
    fixtures::init_tracing();
    for id in fixtures::BRANCHING {
        let original = app();
        let mut flattened = app();
        assert!(flatten(&mut flattened, id, config(true), 3));

        let returns_void = original.method(id).unwrap().returns_void();
        let before = stack::analyze(body(&original, id), returns_void).unwrap();
        let after = stack::analyze(body(&flattened, id), returns_void).unwrap();
        for instr in &body(&original, id).instructions {
            assert_eq!(
                before.before(instr.id),
                after.before(instr.id),
                "depth before {} in {} changed",
                instr.id,
                original.qualified_name(id)
            );
        }
    }
}

#[test]
fn test_dispatch_table_has_one_label_per_block() {
    for id in fixtures::BRANCHING {
        let original = app();
        let mut flattened = app();
        flatten(&mut flattened, id, config(true), 11);

        let blocks = partition(body(&original, id), false, PartitionPolicy::Leaders)
            .unwrap()
            .len();
        let body = body(&flattened, id);
        let switches: Vec<_> = body
            .instructions
            .iter()
            .filter(|i| i.opcode == Opcode::Switch)
            .collect();
        // The dispatcher's switch precedes any switch of the original body.
        let table = switches[0].targets();
        assert_eq!(table.len(), blocks);

        let unique: HashSet<InstrId> = table.iter().copied().collect();
        assert_eq!(unique.len(), blocks);
        for label in table {
            let instr = body.get(*label).unwrap();
            assert_eq!(instr.opcode, Opcode::Nop, "table entry {label} is not a label");
        }
    }
}

#[test]
fn test_every_label_is_reachable_from_the_dispatcher() {
    let mut module = app();
    flatten(&mut module, fixtures::SUM, config(true), 5);
    let body = body(&module, fixtures::SUM);

    let table: HashSet<InstrId> = body.instructions[4].targets().iter().copied().collect();
    assert_eq!(body.instructions[4].opcode, Opcode::Switch);
    let labels: Vec<InstrId> = body
        .instructions
        .iter()
        .filter(|i| i.opcode == Opcode::Nop)
        .map(|i| i.id)
        .collect();
    assert_eq!(labels.len(), table.len());
    assert!(labels.iter().all(|label| table.contains(label)));
}

#[test]
fn test_single_block_method_is_untouched() {
    let original = app();
    let mut module = app();
    for id in [fixtures::MAIN, fixtures::TWICE, fixtures::CALLS_TWICE, fixtures::GET_VALUE] {
        assert!(!flatten(&mut module, id, config(true), 1));
        assert_eq!(module.method(id).unwrap(), original.method(id).unwrap());
    }
}

#[test]
fn test_flattening_preserves_behaviour() {
    let verification = VerificationConfig::development();
    for shuffle in [false, true] {
        for seed in 0..4 {
            let original = app();
            let mut flattened = app();
            for id in fixtures::BRANCHING {
                flatten(&mut flattened, id, config(shuffle), seed);
            }
            fixtures::assert_equivalent(&original, &flattened, &fixtures::BRANCHING, &verification);
        }
    }
}

#[test]
fn test_direct_branches_preserve_behaviour() {
    let original = app();
    let mut flattened = app();
    let direct = FlattenConfig {
        dispatch_branches: false,
        ..config(true)
    };
    for id in fixtures::BRANCHING {
        flatten(&mut flattened, id, direct, 9);
    }
    fixtures::assert_equivalent(
        &original,
        &flattened,
        &fixtures::BRANCHING,
        &VerificationConfig::development(),
    );
}

#[test]
fn test_generated_inputs_on_bounded_methods() {
    // Sum loops up to its argument, so generated boundary values are kept away from it.
    let tester = PracticalTester::new(VerificationConfig::development()).unwrap();
    let original = app();
    let mut flattened = app();
    for id in [fixtures::ABS, fixtures::SAFE_DIV, fixtures::CLASSIFY, fixtures::GREET] {
        flatten(&mut flattened, id, config(true), 21);
        let results = tester.test_generated(&original, &flattened, id).unwrap();
        assert!(results.overall_passed);
        assert_eq!(results.test_cases_executed, 8);
    }
}

#[test]
fn test_flattening_grows_the_graph() {
    let original = app();
    let mut flattened = app();
    flatten(&mut flattened, fixtures::ABS, config(false), 2);

    let before = collect_metrics(body(&original, fixtures::ABS), false).unwrap();
    let after = collect_metrics(body(&flattened, fixtures::ABS), false).unwrap();
    assert!(after.block_cnt > before.block_cnt);
    assert!(after.instr_cnt > before.instr_cnt);
}
