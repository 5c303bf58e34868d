use crate::Transform;
use rand::{rngs::StdRng, Rng};
use shade_core::{Method, Opcode, Operand};
use shade_utils::errors::TransformError;
use tracing::debug;

/// Inserts trivial `nop` padding.
///
/// The first no-op always lands before the method's first instruction; any further ones go
/// before uniformly chosen instructions, so nothing is ever appended after the final one.
#[derive(Debug, Clone, Copy)]
pub struct Padding {
    count: usize,
}

impl Padding {
    pub const fn new(count: usize) -> Self {
        Self { count }
    }
}

impl Transform for Padding {
    fn name(&self) -> &'static str {
        "Padding"
    }

    fn apply(&self, method: &mut Method, rng: &mut StdRng) -> Result<bool, TransformError> {
        let Some(body) = method.body.as_mut() else {
            return Ok(false);
        };
        if body.instructions.is_empty() || self.count == 0 {
            debug!("Nothing to pad in {}", method.name);
            return Ok(false);
        }

        let first = body.create(Opcode::Nop, Operand::None);
        body.insert_before(0, vec![first]);

        for _ in 1..self.count {
            let at = rng.random_range(0..body.instructions.len());
            let nop = body.create(Opcode::Nop, Operand::None);
            body.insert_before(at, vec![nop]);
        }

        debug!("Padded {} with {} no-ops", method.name, self.count);
        Ok(true)
    }
}
