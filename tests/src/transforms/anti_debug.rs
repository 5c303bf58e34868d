use crate::fixtures::{self, app, body};
use shade_core::{MethodTarget, Opcode, Operand, WellKnown};
use shade_transform::{obfuscate, AntiDebugPlacement, ObfuscationSettings};
use shade_utils::Seed;
use shade_verification::{practical, Outcome, VerificationConfig};

fn anti_debug(placement: AntiDebugPlacement, seed: u64) -> ObfuscationSettings {
    ObfuscationSettings {
        anti_debugging: true,
        anti_debug_placement: placement,
        seed: Seed::from_u64(seed),
        ..Default::default()
    }
}

fn attached() -> VerificationConfig {
    VerificationConfig {
        debugger_attached: true,
        ..VerificationConfig::development()
    }
}

#[test]
fn test_check_precedes_the_first_instruction() {
    fixtures::init_tracing();
    let original = app();
    let mut module = app();
    obfuscate(&mut module, &anti_debug(AntiDebugPlacement::First, 1)).unwrap();

    let before = body(&original, fixtures::MAIN);
    let after = body(&module, fixtures::MAIN);
    let Operand::Method(query) = &after.instructions[0].operand else {
        panic!("Main does not start with a call");
    };
    let MethodTarget::External(external) = query.target else {
        panic!("debugger query is not an import");
    };
    assert_eq!(
        module.external(external).and_then(WellKnown::identify),
        Some(WellKnown::DebuggerIsAttached)
    );
    assert_eq!(after.instructions[1].opcode, Opcode::Brfalse);
    assert_eq!(after.instructions[1].targets(), &[before.instructions[0].id]);
    assert_eq!(&after.instructions[4..], &before.instructions[..]);
}

#[test]
fn test_attached_debugger_exits_before_any_output() {
    let mut module = app();
    obfuscate(&mut module, &anti_debug(AntiDebugPlacement::First, 2)).unwrap();

    for id in fixtures::EXECUTABLE {
        for args in fixtures::inputs(&module, id) {
            let execution = practical::execute(&module, id, args, &attached()).unwrap();
            assert_eq!(execution.outcome, Outcome::Exited(0));
            assert!(execution.output.is_empty());
        }
    }
}

#[test]
fn test_detached_debugger_runs_the_original_code() {
    let original = app();
    let mut module = app();
    obfuscate(&mut module, &anti_debug(AntiDebugPlacement::First, 3)).unwrap();
    fixtures::assert_equivalent(
        &original,
        &module,
        &fixtures::EXECUTABLE,
        &VerificationConfig::development(),
    );
}

#[test]
fn test_random_placement_preserves_behaviour() {
    let original = app();
    for seed in 0..6 {
        let mut module = app();
        let report = obfuscate(&mut module, &anti_debug(AntiDebugPlacement::Random, seed)).unwrap();
        assert_eq!(report.transforms_applied["AntiDebug"], 10);
        fixtures::assert_equivalent(
            &original,
            &module,
            &fixtures::EXECUTABLE,
            &VerificationConfig::development(),
        );
    }
}

#[test]
fn test_random_placement_keeps_methods_flattenable() {
    let original = app();
    for seed in 0..20 {
        let mut module = app();
        let report = obfuscate(
            &mut module,
            &ObfuscationSettings {
                flatten_code: true,
                ..anti_debug(AntiDebugPlacement::Random, seed)
            },
        )
        .unwrap();
        assert!(report.failures.is_empty(), "seed {seed}: {:?}", report.failures);
        fixtures::assert_equivalent(
            &original,
            &module,
            &fixtures::EXECUTABLE,
            &VerificationConfig::development(),
        );
    }
}
