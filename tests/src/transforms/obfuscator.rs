use crate::fixtures::{self, app, body};
use shade_core::{Opcode, PartitionPolicy};
use shade_transform::strings;
use shade_transform::{obfuscate, ObfuscationSettings};
use shade_utils::Seed;
use shade_verification::{practical, Outcome, VerificationConfig};

fn everything(seed: u64) -> ObfuscationSettings {
    ObfuscationSettings {
        padding_count: 3,
        seed: Seed::from_u64(seed),
        ..ObfuscationSettings::all()
    }
}

#[test]
fn test_full_pipeline_preserves_behaviour() {
    fixtures::init_tracing();
    let original = app();
    for seed in 0..4 {
        let mut module = app();
        let report = obfuscate(&mut module, &everything(seed)).unwrap();
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        fixtures::assert_equivalent(
            &original,
            &module,
            &fixtures::EXECUTABLE,
            &VerificationConfig::development(),
        );
    }
}

#[test]
fn test_full_pipeline_report() {
    let mut module = app();
    let report = obfuscate(&mut module, &everything(1)).unwrap();

    assert_eq!(report.methods_processed, 10);
    assert_eq!(report.transforms_applied["Padding"], 10);
    assert_eq!(report.transforms_applied["StringObfuscation"], 2);
    assert_eq!(report.transforms_applied["AntiDebug"], 10);
    // Every method has at least two blocks once the tripwire is in, except the constructor.
    assert_eq!(report.flattened, 9);
    assert!(report.decode_routine.is_some());
    assert_eq!(report.seed, Seed::from_u64(1).to_hex());

    let routine = strings::find_decode_routine(&module).unwrap();
    assert_eq!(report.decode_routine, Some(module.qualified_name(routine)));
    assert!(body(&module, routine)
        .instructions
        .iter()
        .all(|i| i.opcode != Opcode::Switch && i.opcode != Opcode::Nop));
}

#[test]
fn test_debugger_stops_a_fully_obfuscated_module() {
    let mut module = app();
    obfuscate(&mut module, &everything(2)).unwrap();
    let attached = VerificationConfig {
        debugger_attached: true,
        ..VerificationConfig::development()
    };
    let execution = practical::execute(&module, fixtures::MAIN, vec![], &attached).unwrap();
    assert_eq!(execution.outcome, Outcome::Exited(0));
    assert!(execution.output.is_empty());
}

#[test]
fn test_runs_are_reproducible() {
    let mut a = app();
    let mut b = app();
    let report_a = obfuscate(&mut a, &everything(5)).unwrap();
    let report_b = obfuscate(
        &mut b,
        &ObfuscationSettings {
            parallel: false,
            ..everything(5)
        },
    )
    .unwrap();
    assert_eq!(a, b);
    assert_eq!(report_a, report_b);
}

#[test]
fn test_stack_balanced_policy_pipeline() {
    let original = app();
    let mut module = app();
    let report = obfuscate(
        &mut module,
        &ObfuscationSettings {
            flatten_code: true,
            partition_policy: PartitionPolicy::StackBalanced,
            seed: Seed::from_u64(6),
            ..Default::default()
        },
    )
    .unwrap();

    // SafeDiv has a handler, which this policy cannot split.
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].method, "App.Program::SafeDiv");
    assert_eq!(
        module.method(fixtures::SAFE_DIV).unwrap(),
        original.method(fixtures::SAFE_DIV).unwrap()
    );
    fixtures::assert_equivalent(
        &original,
        &module,
        &fixtures::EXECUTABLE,
        &VerificationConfig::development(),
    );
}

#[test]
fn test_report_serializes() {
    let mut module = app();
    let report = obfuscate(&mut module, &everything(7)).unwrap();
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["methods_processed"], 10);
    assert!(json["renamed"].as_object().is_some_and(|m| m.len() == 8));
}
