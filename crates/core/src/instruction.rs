//! Typed instructions, operands and stack-effect classification.
//!
//! Branch operands never hold positions. Every instruction owns a stable [`InstrId`] inside its
//! method body, and `Target`/`Switch` operands name those ids. Rewriting a body therefore
//! moves instructions around freely and only needs an explicit id mapping when a target has to
//! change.

use crate::module::{FieldRef, MethodRef, MethodSig, TypeRef};
use crate::opcode::{Opcode, OperandKind, PopBehaviour, PushBehaviour};
use serde::{Deserialize, Serialize};
use shade_utils::errors::{FlowError, ModelError};
use std::fmt;

/// Stable handle of an instruction within one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstrId(pub u32);

impl fmt::Display for InstrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IL_{:04x}", self.0)
    }
}

/// Instruction operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Operand {
    None,
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Local(u16),
    Arg(u16),
    Target(InstrId),
    Switch(Vec<InstrId>),
    Method(MethodRef),
    CallSite(MethodSig),
    Field(FieldRef),
    Type(TypeRef),
}

impl Operand {
    /// The shape of this operand.
    pub const fn kind(&self) -> OperandKind {
        match self {
            Self::None => OperandKind::None,
            Self::Int32(_) => OperandKind::Int32,
            Self::Int64(_) => OperandKind::Int64,
            Self::Float32(_) => OperandKind::Float32,
            Self::Float64(_) => OperandKind::Float64,
            Self::String(_) => OperandKind::String,
            Self::Local(_) => OperandKind::Local,
            Self::Arg(_) => OperandKind::Arg,
            Self::Target(_) => OperandKind::Target,
            Self::Switch(_) => OperandKind::Switch,
            Self::Method(_) => OperandKind::Method,
            Self::CallSite(_) => OperandKind::CallSite,
            Self::Field(_) => OperandKind::Field,
            Self::Type(_) => OperandKind::Type,
        }
    }
}

/// Net effect of one instruction on the evaluation stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackEffect {
    /// Number of values popped.
    pub pops: u32,
    /// Number of values pushed.
    pub pushes: u32,
    /// The instruction empties the stack (`leave`, `endfinally`) instead of popping a count.
    pub clears: bool,
}

impl StackEffect {
    /// Applies the effect to `depth`, returning `None` on underflow.
    pub const fn apply(&self, depth: u32) -> Option<u32> {
        if self.clears {
            return Some(self.pushes);
        }
        match depth.checked_sub(self.pops) {
            Some(rest) => Some(rest + self.pushes),
            None => None,
        }
    }

    /// Signed change in depth, assuming no underflow and no clear.
    pub const fn net(&self) -> i64 {
        self.pushes as i64 - self.pops as i64
    }
}

/// A single instruction of a method body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Stable handle within the owning body.
    pub id: InstrId,
    /// The opcode.
    pub opcode: Opcode,
    /// The operand, shaped as the opcode declares.
    #[serde(default = "none_operand")]
    pub operand: Operand,
}

const fn none_operand() -> Operand {
    Operand::None
}

impl Instruction {
    /// Builds an instruction with an explicit id.
    pub const fn new(id: InstrId, opcode: Opcode, operand: Operand) -> Self {
        Self {
            id,
            opcode,
            operand,
        }
    }

    /// Checks that the operand matches the opcode's declared kind.
    pub fn validate(&self) -> Result<(), ModelError> {
        let expected = self.opcode.operand_kind();
        if self.operand.kind() != expected {
            return Err(ModelError::OperandMismatch {
                opcode: self.opcode.to_string(),
                expected: expected.describe(),
            });
        }
        Ok(())
    }

    /// Branch targets carried by this instruction, in operand order.
    pub fn targets(&self) -> &[InstrId] {
        match &self.operand {
            Operand::Target(target) => std::slice::from_ref(target),
            Operand::Switch(targets) => targets,
            _ => &[],
        }
    }

    /// Rewrites every branch target through `map`.
    pub fn retarget(&mut self, mut map: impl FnMut(InstrId) -> InstrId) {
        match &mut self.operand {
            Operand::Target(target) => *target = map(*target),
            Operand::Switch(targets) => {
                for target in targets.iter_mut() {
                    *target = map(*target);
                }
            }
            _ => {}
        }
    }

    /// Classifies the instruction's push/pop counts.
    ///
    /// Fixed classes are answered from the opcode table. Variable classes are computed from the
    /// referenced signature: a non-void call or any construction pushes one value; a call pops
    /// its parameters plus the implicit receiver when `has_this` is set; an indirect call also
    /// pops the function pointer; `ret` pops one value unless the enclosing method returns void.
    ///
    /// # Arguments
    /// * `returns_void` - Whether the enclosing method's return type is void.
    ///
    /// # Returns
    /// The [`StackEffect`], or `FlowError::UnclassifiableEffect` when a variable class meets an
    /// operand it cannot derive counts from.
    pub fn stack_effect(&self, returns_void: bool) -> Result<StackEffect, FlowError> {
        let unclassifiable = || FlowError::UnclassifiableEffect {
            opcode: self.opcode.to_string(),
            id: self.id.0,
        };

        let (pops, clears) = match self.opcode.pop_behaviour() {
            PopBehaviour::Fixed(n) => (u32::from(n), false),
            PopBehaviour::PopAll => (0, true),
            PopBehaviour::Var => match (self.opcode, &self.operand) {
                (Opcode::Ret, Operand::None) => (u32::from(!returns_void), false),
                (Opcode::Call | Opcode::Callvirt, Operand::Method(method)) => {
                    (method.sig.params.len() as u32 + u32::from(method.sig.has_this), false)
                }
                (Opcode::Newobj, Operand::Method(method)) => (method.sig.params.len() as u32, false),
                (Opcode::Calli, Operand::CallSite(sig)) => {
                    (sig.params.len() as u32 + u32::from(sig.has_this) + 1, false)
                }
                _ => return Err(unclassifiable()),
            },
        };

        let pushes = match self.opcode.push_behaviour() {
            PushBehaviour::Fixed(n) => u32::from(n),
            PushBehaviour::Var => match (self.opcode, &self.operand) {
                (Opcode::Newobj, Operand::Method(_)) => 1,
                (Opcode::Call | Opcode::Callvirt, Operand::Method(method)) => {
                    u32::from(!method.sig.returns_void())
                }
                (Opcode::Calli, Operand::CallSite(sig)) => u32::from(!sig.returns_void()),
                _ => return Err(unclassifiable()),
            },
        };

        Ok(StackEffect {
            pops,
            pushes,
            clears,
        })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.opcode)?;
        match &self.operand {
            Operand::None => Ok(()),
            Operand::Int32(v) => write!(f, " {v}"),
            Operand::Int64(v) => write!(f, " {v}"),
            Operand::Float32(v) => write!(f, " {v}"),
            Operand::Float64(v) => write!(f, " {v}"),
            Operand::String(s) => write!(f, " {s:?}"),
            Operand::Local(slot) => write!(f, " V_{slot}"),
            Operand::Arg(slot) => write!(f, " A_{slot}"),
            Operand::Target(target) => write!(f, " {target}"),
            Operand::Switch(targets) => {
                let labels: Vec<String> = targets.iter().map(ToString::to_string).collect();
                write!(f, " ({})", labels.join(", "))
            }
            Operand::Method(method) => write!(f, " {method}"),
            Operand::CallSite(sig) => write!(f, " {sig}"),
            Operand::Field(field) => write!(f, " {}::{}", field.declaring_type, field.name),
            Operand::Type(ty) => write!(f, " {}", ty.name),
        }
    }
}
