//! String literal obfuscation.
//!
//! Every `ldstr` operand is replaced by the base64 encoding of its UTF-8 bytes and followed by a
//! call to the module's decode routine, which turns the encoded value back into the original
//! string on the evaluation stack. The routine is a single generated method per module,
//! identified by [`DECODE_ROUTINE_NAME`].

use crate::Transform;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::rngs::StdRng;
use shade_core::{
    Instruction, Method, MethodBody, MethodId, MethodRef, MethodSig, MethodTarget, Module, Opcode,
    Operand, TypeSig, WellKnown,
};
use shade_utils::errors::{ModelError, TransformError};
use tracing::debug;

/// Reserved name of the generated decode routine.
pub const DECODE_ROUTINE_NAME: &str = "DecodeString";

/// Signature of the decode routine: `static string (string)`.
pub fn decode_routine_sig() -> MethodSig {
    MethodSig::static_fn(vec![TypeSig::String], TypeSig::String)
}

/// Whether `method` is the module's decode routine.
pub fn is_decode_routine(method: &Method) -> bool {
    method.name == DECODE_ROUTINE_NAME && method.sig == decode_routine_sig()
}

/// Encodes a literal for storage in an `ldstr` operand.
pub fn encode_literal(literal: &str) -> String {
    STANDARD.encode(literal.as_bytes())
}

/// Reverses [`encode_literal`].
pub fn decode_literal(encoded: &str) -> Result<String, TransformError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| TransformError::Encoding(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| TransformError::Encoding(e.to_string()))
}

/// Looks up the decode routine by its reserved name.
pub fn find_decode_routine(module: &Module) -> Option<MethodId> {
    module
        .methods()
        .find(|(_, method)| is_decode_routine(method))
        .map(|(id, _)| id)
}

/// Returns the module's decode routine, synthesizing it on first use.
///
/// The routine is appended to the module's first type. Repeated calls return the same handle,
/// so a module never holds more than one routine.
///
/// # Arguments
/// * `module` - The module to look up or register the routine in.
///
/// # Returns
/// A call reference to the routine, or `ModelError::NoTypes` when there is no type to host it.
pub fn get_or_create_decode_routine(module: &mut Module) -> Result<MethodRef, TransformError> {
    let sig = decode_routine_sig();
    if let Some(id) = find_decode_routine(module) {
        return Ok(MethodRef {
            target: MethodTarget::Internal(id),
            sig,
        });
    }
    if module.types.is_empty() {
        return Err(ModelError::NoTypes.into());
    }

    let utf8 = module.import(WellKnown::EncodingUtf8);
    let from_base64 = module.import(WellKnown::FromBase64String);
    let get_string = module.import(WellKnown::EncodingGetString);

    let mut routine = Method::new(DECODE_ROUTINE_NAME, sig.clone());
    routine.body = Some(MethodBody::assemble(vec![
        (Opcode::Call, Operand::Method(utf8)),
        (Opcode::Ldarg, Operand::Arg(0)),
        (Opcode::Call, Operand::Method(from_base64)),
        (Opcode::Callvirt, Operand::Method(get_string)),
        (Opcode::Ret, Operand::None),
    ]));
    let id = module.add_method(0, routine)?;
    debug!("Created decode routine {}", module.qualified_name(id));

    Ok(MethodRef {
        target: MethodTarget::Internal(id),
        sig,
    })
}

/// Whether any method other than the decode routine loads a string literal.
pub fn module_has_literals(module: &Module) -> bool {
    module.methods().any(|(_, method)| {
        !is_decode_routine(method)
            && method.body.as_ref().is_some_and(|body| {
                body.instructions
                    .iter()
                    .any(|instr| instr.opcode == Opcode::Ldstr)
            })
    })
}

/// Rewrites string literals to go through the decode routine.
#[derive(Debug, Clone)]
pub struct StringObfuscation {
    decoder: MethodRef,
}

impl StringObfuscation {
    /// `decoder` must come from [`get_or_create_decode_routine`] on the same module.
    pub const fn new(decoder: MethodRef) -> Self {
        Self { decoder }
    }
}

impl Transform for StringObfuscation {
    fn name(&self) -> &'static str {
        "StringObfuscation"
    }

    fn apply(&self, method: &mut Method, _rng: &mut StdRng) -> Result<bool, TransformError> {
        if is_decode_routine(method) {
            return Ok(false);
        }
        let Some(body) = method.body.as_mut() else {
            return Ok(false);
        };

        let literal_count = body
            .instructions
            .iter()
            .filter(|instr| instr.opcode == Opcode::Ldstr)
            .count();
        if literal_count == 0 {
            return Ok(false);
        }

        let original = std::mem::take(&mut body.instructions);
        let mut rewritten: Vec<Instruction> = Vec::with_capacity(original.len() + literal_count);
        for mut instr in original {
            if let Operand::String(literal) = &instr.operand {
                instr.operand = Operand::String(encode_literal(literal));
                rewritten.push(instr);
                rewritten.push(body.create(Opcode::Call, Operand::Method(self.decoder.clone())));
            } else {
                rewritten.push(instr);
            }
        }
        body.instructions = rewritten;

        debug!("Encoded {} literals in {}", literal_count, method.name);
        Ok(true)
    }
}
