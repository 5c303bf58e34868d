use crate::settings::AntiDebugPlacement;
use crate::Transform;
use rand::{rngs::StdRng, Rng};
use shade_core::{stack, InstrId, Method, MethodBody, MethodRef, Opcode, Operand};
use shade_utils::errors::TransformError;
use std::collections::HashSet;
use tracing::{debug, warn};

/// Inserts a debugger-presence tripwire into each method.
///
/// Before the chosen instruction `X` the transform emits
/// `call get_IsAttached; brfalse X; ldc.i4 0; call Exit`. With no debugger attached control
/// falls into `X` untouched; otherwise the process exits with code 0.
#[derive(Debug, Clone)]
pub struct AntiDebug {
    is_attached: MethodRef,
    exit: MethodRef,
    placement: AntiDebugPlacement,
}

impl AntiDebug {
    /// `is_attached` and `exit` must resolve to the debugger query and the process exit.
    pub const fn new(is_attached: MethodRef, exit: MethodRef, placement: AntiDebugPlacement) -> Self {
        Self {
            is_attached,
            exit,
            placement,
        }
    }
}

impl Transform for AntiDebug {
    fn name(&self) -> &'static str {
        "AntiDebug"
    }

    fn apply(&self, method: &mut Method, rng: &mut StdRng) -> Result<bool, TransformError> {
        let returns_void = method.returns_void();
        let Some(body) = method.body.as_mut() else {
            return Ok(false);
        };
        if body.instructions.is_empty() {
            return Ok(false);
        }

        let at = match self.placement {
            AntiDebugPlacement::First => 0,
            AntiDebugPlacement::Random => {
                let candidates = random_candidates(body, returns_void);
                if candidates.is_empty() {
                    return Ok(false);
                }
                candidates[rng.random_range(0..candidates.len())]
            }
        };

        let skip = body.instructions[at].id;
        let check = vec![
            body.create(Opcode::Call, Operand::Method(self.is_attached.clone())),
            body.create(Opcode::Brfalse, Operand::Target(skip)),
            body.create(Opcode::LdcI4, Operand::Int32(0)),
            body.create(Opcode::Call, Operand::Method(self.exit.clone())),
        ];
        body.insert_before(at, check);

        debug!("Inserted anti-debug check in {} before {}", method.name, skip);
        Ok(true)
    }
}

/// Positions the check may precede: reachable instructions entered with an empty stack that
/// are not handler entries.
///
/// The `brfalse` makes its target a block leader, so a target with values still on the stack
/// would leave the method unflattenable.
fn random_candidates(body: &MethodBody, returns_void: bool) -> Vec<usize> {
    // Handler entries can only be reached by the runtime, never by a branch.
    let entries: HashSet<InstrId> = body
        .handlers
        .iter()
        .flat_map(|h| [Some(h.handler_start), h.filter_start])
        .flatten()
        .collect();
    let depths = match stack::analyze(body, returns_void) {
        Ok(depths) => depths,
        Err(e) => {
            warn!("Stack analysis failed ({e}), placing anti-debug check first");
            return vec![0];
        }
    };
    body.instructions
        .iter()
        .enumerate()
        .filter(|(_, instr)| !entries.contains(&instr.id) && depths.before(instr.id) == Some(0))
        .map(|(pos, _)| pos)
        .collect()
}
