use crate::fixtures::{self, app};
use shade_transform::rename::{keeps_name, NAME_PREFIX};
use shade_transform::{obfuscate, ObfuscationSettings};
use shade_utils::Seed;
use shade_verification::VerificationConfig;
use std::collections::HashSet;

fn rename_only(seed: u64) -> ObfuscationSettings {
    ObfuscationSettings {
        rename: true,
        seed: Seed::from_u64(seed),
        ..Default::default()
    }
}

#[test]
fn test_exclusion_invariant() {
    fixtures::init_tracing();
    let original = app();
    let mut module = app();
    let report = obfuscate(&mut module, &rename_only(8)).unwrap();

    // Entry-point type keeps its name; every other type is renamed.
    assert_eq!(module.types[0].name, "Program");
    assert_ne!(module.types[1].name, "Helpers");
    assert!(module.types[1].name.starts_with(NAME_PREFIX));
    assert_eq!(module.types[1].namespace, "App");

    for ((id, before), (_, after)) in original.methods().zip(module.methods()) {
        if keeps_name(before) {
            assert_eq!(after.name, before.name, "{} was renamed", original.qualified_name(id));
        } else {
            assert_ne!(after.name, before.name);
            assert!(after.name.starts_with(NAME_PREFIX));
        }
    }
    assert_eq!(module.method(fixtures::MAIN).unwrap().name, "Main");
    assert_eq!(module.method(fixtures::CTOR).unwrap().name, ".ctor");
    assert_eq!(module.method(fixtures::GET_VALUE).unwrap().name, "get_Value");

    // One type and seven methods.
    assert_eq!(report.renamed.len(), 8);
    assert_eq!(
        report.renamed["App.Program::Abs"],
        format!("App.Program::{}", module.method(fixtures::ABS).unwrap().name)
    );
}

#[test]
fn test_generated_names_are_unique() {
    let mut module = app();
    obfuscate(&mut module, &rename_only(9)).unwrap();

    let mut seen = HashSet::new();
    for ty in &module.types {
        assert!(seen.insert(ty.name.clone()), "duplicate type name {}", ty.name);
        for method in ty.methods.iter().filter(|m| m.name.starts_with(NAME_PREFIX)) {
            assert!(seen.insert(method.name.clone()), "duplicate method name {}", method.name);
        }
    }
    // Helpers plus the seven renamed methods.
    assert_eq!(seen.len(), 1 + 1 + 7);
}

#[test]
fn test_renaming_is_seeded() {
    let mut a = app();
    let mut b = app();
    let mut c = app();
    obfuscate(&mut a, &rename_only(10)).unwrap();
    obfuscate(&mut b, &rename_only(10)).unwrap();
    obfuscate(&mut c, &rename_only(11)).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);
}

#[test]
fn test_renamed_module_behaves_identically() {
    let original = app();
    let mut module = app();
    obfuscate(&mut module, &rename_only(12)).unwrap();
    fixtures::assert_equivalent(
        &original,
        &module,
        &fixtures::EXECUTABLE,
        &VerificationConfig::development(),
    );
}
