//! Method bodies: the instruction arena, local-variable table and exception-handler table.

use crate::instruction::{InstrId, Instruction, Operand};
use crate::module::TypeSig;
use crate::opcode::Opcode;
use serde::{Deserialize, Serialize};
use shade_utils::errors::ModelError;
use std::collections::HashMap;

/// A local-variable slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Local {
    pub ty: TypeSig,
}

/// Kind of exception handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Typed catch clause; the handler starts with the exception on the stack.
    Catch,
    /// Filtered catch; the filter and the handler start with the exception on the stack.
    Filter,
    Finally,
    Fault,
}

impl HandlerKind {
    /// Stack depth on entry to the handler region.
    pub const fn entry_depth(self) -> u32 {
        match self {
            Self::Catch | Self::Filter => 1,
            Self::Finally | Self::Fault => 0,
        }
    }
}

/// One exception-handler clause. Regions are `[start, end)`; an end of `None` runs to the end
/// of the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionHandler {
    pub kind: HandlerKind,
    pub try_start: InstrId,
    pub try_end: Option<InstrId>,
    pub handler_start: InstrId,
    pub handler_end: Option<InstrId>,
    #[serde(default)]
    pub filter_start: Option<InstrId>,
    /// Caught exception type for `Catch` clauses.
    #[serde(default)]
    pub catch_type: Option<String>,
}

impl ExceptionHandler {
    /// Every instruction id the clause refers to.
    pub fn boundaries(&self) -> impl Iterator<Item = InstrId> + '_ {
        [
            Some(self.try_start),
            self.try_end,
            Some(self.handler_start),
            self.handler_end,
            self.filter_start,
        ]
        .into_iter()
        .flatten()
    }

    /// Rewrites every boundary through `map`.
    pub fn remap<E>(&mut self, mut map: impl FnMut(InstrId) -> Result<InstrId, E>) -> Result<(), E> {
        self.try_start = map(self.try_start)?;
        self.try_end = self.try_end.map(&mut map).transpose()?;
        self.handler_start = map(self.handler_start)?;
        self.handler_end = self.handler_end.map(&mut map).transpose()?;
        self.filter_start = self.filter_start.map(&mut map).transpose()?;
        Ok(())
    }
}

/// A method body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MethodBody {
    pub instructions: Vec<Instruction>,
    #[serde(default)]
    pub locals: Vec<Local>,
    #[serde(default)]
    pub handlers: Vec<ExceptionHandler>,
    #[serde(default)]
    pub init_locals: bool,
    /// Next free instruction id; zero means "not computed yet".
    #[serde(skip)]
    next_id: u32,
}

impl PartialEq for MethodBody {
    fn eq(&self, other: &Self) -> bool {
        self.instructions == other.instructions
            && self.locals == other.locals
            && self.handlers == other.handlers
            && self.init_locals == other.init_locals
    }
}

impl MethodBody {
    /// Builds a body from `(opcode, operand)` pairs, assigning ids equal to positions.
    ///
    /// Branch operands can therefore be written as `Operand::Target(InstrId(position))`.
    pub fn assemble(ops: Vec<(Opcode, Operand)>) -> Self {
        let instructions: Vec<Instruction> = ops
            .into_iter()
            .enumerate()
            .map(|(pos, (opcode, operand))| Instruction::new(InstrId(pos as u32), opcode, operand))
            .collect();
        let next_id = instructions.len() as u32;
        Self {
            instructions,
            next_id,
            ..Self::default()
        }
    }

    /// Allocates an unused instruction id.
    pub fn fresh_id(&mut self) -> InstrId {
        if self.next_id == 0 {
            self.next_id = self
                .instructions
                .iter()
                .map(|i| i.id.0 + 1)
                .max()
                .unwrap_or(0);
        }
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Creates a detached instruction with a fresh id.
    pub fn create(&mut self, opcode: Opcode, operand: Operand) -> Instruction {
        let id = self.fresh_id();
        Instruction::new(id, opcode, operand)
    }

    /// Appends a new instruction, returning its id.
    pub fn emit(&mut self, opcode: Opcode, operand: Operand) -> InstrId {
        let instr = self.create(opcode, operand);
        let id = instr.id;
        self.instructions.push(instr);
        id
    }

    /// Inserts instructions before position `pos`.
    pub fn insert_before(&mut self, pos: usize, instrs: Vec<Instruction>) {
        let pos = pos.min(self.instructions.len());
        self.instructions.splice(pos..pos, instrs);
    }

    /// Inserts one instruction after position `pos`.
    pub fn insert_after(&mut self, pos: usize, instr: Instruction) {
        let at = (pos + 1).min(self.instructions.len());
        self.instructions.insert(at, instr);
    }

    /// Map from instruction id to current position.
    pub fn positions(&self) -> HashMap<InstrId, usize> {
        self.instructions
            .iter()
            .enumerate()
            .map(|(pos, instr)| (instr.id, pos))
            .collect()
    }

    /// Looks up an instruction by id.
    pub fn get(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    /// Appends a local of type `ty`, returning its slot.
    ///
    /// Fails without touching the table once every `u16` slot is taken.
    pub fn add_local(&mut self, ty: TypeSig) -> Result<u16, ModelError> {
        let slot = u16::try_from(self.locals.len())
            .map_err(|_| ModelError::TooManyLocals(self.locals.len()))?;
        self.locals.push(Local { ty });
        Ok(slot)
    }

    /// Checks operand shapes, branch targets, local slots and handler boundaries.
    pub fn validate(&self) -> Result<(), ModelError> {
        let positions = self.positions();
        for instr in &self.instructions {
            instr.validate()?;
            if let Some(missing) = instr.targets().iter().find(|t| !positions.contains_key(*t)) {
                return Err(ModelError::DanglingInstruction(missing.0));
            }
            if let Operand::Local(slot) = instr.operand {
                if usize::from(slot) >= self.locals.len() {
                    return Err(ModelError::LocalOutOfRange(slot));
                }
            }
        }
        for handler in &self.handlers {
            if let Some(missing) = handler.boundaries().find(|b| !positions.contains_key(b)) {
                return Err(ModelError::DanglingInstruction(missing.0));
            }
        }
        Ok(())
    }
}
