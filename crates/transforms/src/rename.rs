//! Module-wide symbol renaming.

use crate::strings::is_decode_routine;
use indexmap::IndexMap;
use rand::{rngs::StdRng, Rng};
use shade_core::{Method, Module};
use std::collections::HashSet;
use tracing::debug;
use uuid::Builder;

/// Prefix of every generated identifier.
pub const NAME_PREFIX: &str = "Obf_";

/// Whether renaming `method` would break a binding that depends on its name.
///
/// Covers the entry point, constructors, property accessors and the decode routine, which is
/// located by its reserved name.
pub fn keeps_name(method: &Method) -> bool {
    method.flags.entry_point
        || method.flags.constructor
        || method.flags.is_property_accessor()
        || is_decode_routine(method)
}

/// Unique identifier source, collision-checked against every name already in the module.
struct NameGenerator<'a> {
    rng: &'a mut StdRng,
    taken: HashSet<String>,
}

impl<'a> NameGenerator<'a> {
    fn new(module: &Module, rng: &'a mut StdRng) -> Self {
        let mut taken = HashSet::new();
        for ty in &module.types {
            taken.insert(ty.name.clone());
            for method in &ty.methods {
                taken.insert(method.name.clone());
            }
        }
        Self { rng, taken }
    }

    fn next(&mut self) -> String {
        loop {
            let uuid = Builder::from_random_bytes(self.rng.random()).into_uuid();
            let name = format!("{NAME_PREFIX}{}", uuid.hyphenated());
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// Renames types and methods in place.
///
/// Every type except the one declaring the entry point gets a fresh name; its namespace is
/// kept. Every method for which [`keeps_name`] is false gets a fresh name too. Call sites refer
/// to methods by handle, so no instruction needs rewriting.
///
/// # Arguments
/// * `module` - The module to rename.
/// * `rng` - Source for the generated identifiers.
///
/// # Returns
/// Old to new full names for types and `Type::Method` names for methods, keyed by the names
/// as they were before renaming.
pub fn rename_module(module: &mut Module, rng: &mut StdRng) -> IndexMap<String, String> {
    let entry_type = module.entry_point().map(|id| id.type_index);
    let mut names = NameGenerator::new(module, rng);
    let mut renamed = IndexMap::new();

    for (type_index, ty) in module.types.iter_mut().enumerate() {
        let old_type = ty.full_name();
        if Some(type_index) == entry_type {
            debug!("Keeping entry point type {}", old_type);
        } else {
            ty.name = names.next();
            renamed.insert(old_type.clone(), ty.full_name());
        }

        let new_type = ty.full_name();
        for method in ty.methods.iter_mut().filter(|m| !keeps_name(m)) {
            let new_name = names.next();
            renamed.insert(
                format!("{old_type}::{}", method.name),
                format!("{new_type}::{new_name}"),
            );
            method.name = new_name;
        }
    }

    debug!("Renamed {} symbols", renamed.len());
    renamed
}
