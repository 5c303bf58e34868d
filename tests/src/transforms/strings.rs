use crate::fixtures::{self, app, body};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use shade_core::{MethodTarget, Opcode, Operand};
use shade_transform::strings::{self, get_or_create_decode_routine};
use shade_transform::{obfuscate, ObfuscationSettings};
use shade_utils::Seed;
use shade_verification::{Interpreter, Outcome, Value, VerificationConfig};

fn strings_only(seed: u64) -> ObfuscationSettings {
    ObfuscationSettings {
        obfuscate_strings: true,
        seed: Seed::from_u64(seed),
        ..Default::default()
    }
}

#[test]
fn test_hello_round_trips_through_the_decode_routine() {
    fixtures::init_tracing();
    let mut module = app();
    obfuscate(&mut module, &strings_only(1)).unwrap();

    let main = body(&module, fixtures::MAIN);
    let Operand::String(encoded) = &main.instructions[0].operand else {
        panic!("first instruction of Main is not a literal");
    };
    assert_ne!(encoded, "hello");
    assert_eq!(main.instructions[0].opcode, Opcode::Ldstr);
    assert_eq!(main.instructions[1].opcode, Opcode::Call);

    // The scheme alone.
    let bytes = STANDARD.decode(encoded).unwrap();
    assert_eq!(String::from_utf8(bytes).unwrap(), "hello");

    // And the routine the rewritten call site invokes.
    let routine = strings::find_decode_routine(&module).unwrap();
    let mut interpreter = Interpreter::new(&module, &VerificationConfig::development());
    assert_eq!(
        interpreter
            .run(routine, vec![Value::Str(encoded.clone())])
            .unwrap(),
        Outcome::Returned(Some(Value::Str("hello".into())))
    );
}

#[test]
fn test_decode_routine_creation_is_idempotent() {
    let mut module = app();
    let first = get_or_create_decode_routine(&mut module).unwrap();
    for _ in 0..4 {
        assert_eq!(get_or_create_decode_routine(&mut module).unwrap(), first);
    }

    for seed in 0..3 {
        obfuscate(&mut module, &strings_only(seed)).unwrap();
    }
    let routines: Vec<_> = module
        .methods()
        .filter(|(_, m)| strings::is_decode_routine(m))
        .map(|(id, _)| id)
        .collect();
    assert_eq!(routines.len(), 1);
    assert_eq!(MethodTarget::Internal(routines[0]), first.target);
}

#[test]
fn test_every_call_site_targets_the_single_routine() {
    let mut module = app();
    obfuscate(&mut module, &strings_only(2)).unwrap();
    let routine = strings::find_decode_routine(&module).unwrap();

    let mut rewritten = 0;
    for (id, method) in module.methods() {
        if strings::is_decode_routine(method) {
            continue;
        }
        let instrs = &body(&module, id).instructions;
        for (pos, instr) in instrs.iter().enumerate() {
            if instr.opcode != Opcode::Ldstr {
                continue;
            }
            let Operand::Method(callee) = &instrs[pos + 1].operand else {
                panic!("literal in {} is not decoded", module.qualified_name(id));
            };
            assert_eq!(callee.target, MethodTarget::Internal(routine));
            rewritten += 1;
        }
    }
    // Main's greeting and both of Greet's.
    assert_eq!(rewritten, 3);
}

#[test]
fn test_string_obfuscation_preserves_output() {
    let original = app();
    let mut obfuscated = app();
    obfuscate(&mut obfuscated, &strings_only(3)).unwrap();
    fixtures::assert_equivalent(
        &original,
        &obfuscated,
        &fixtures::EXECUTABLE,
        &VerificationConfig::development(),
    );
}

#[test]
fn test_repeated_passes_still_decode() {
    let original = app();
    let mut obfuscated = app();
    obfuscate(&mut obfuscated, &strings_only(4)).unwrap();
    obfuscate(&mut obfuscated, &strings_only(5)).unwrap();
    fixtures::assert_equivalent(
        &original,
        &obfuscated,
        &[fixtures::MAIN, fixtures::GREET],
        &VerificationConfig::development(),
    );
}
