//! Module defining the stack-machine opcode enumeration and its static metadata.
//!
//! This module provides the `Opcode` enum covering the instruction set the obfuscation
//! transforms operate on: argument/local access, constants, arithmetic, comparison, branches,
//! calls, exception control and object-model operations. Each opcode carries a declared operand
//! kind, a control-flow classification and a stack behaviour class. Fixed classes answer the
//! push/pop question on their own; variable classes (`Var`) need the instruction's operand,
//! which is resolved in `instruction.rs`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Enumeration of opcodes with macro forms already expanded.
///
/// Short and inline-constant forms (`ldc.i4.0`, `br.s`, `ldloc.1`, ...) are not modelled; the
/// module loader expands them so every slot, constant and branch target lives in the operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    // misc
    Nop,
    Break,
    // arguments & locals
    Ldarg,
    Starg,
    Ldloc,
    Stloc,
    // constants
    LdcI4,
    LdcI8,
    LdcR4,
    LdcR8,
    Ldstr,
    Ldnull,
    // stack
    Dup,
    Pop,
    // arithmetic & logic
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Neg,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    // comparison
    Ceq,
    Cgt,
    Clt,
    // conversion
    ConvI4,
    ConvI8,
    ConvR8,
    // branches
    Br,
    Brtrue,
    Brfalse,
    Beq,
    Bne,
    Bge,
    Bgt,
    Ble,
    Blt,
    Switch,
    // calls
    Call,
    Callvirt,
    Calli,
    Newobj,
    // termination & exceptions
    Ret,
    Throw,
    Rethrow,
    Leave,
    Endfinally,
    Endfilter,
    // object model
    Ldfld,
    Stfld,
    Ldsfld,
    Stsfld,
    Newarr,
    Ldlen,
    Ldelem,
    Stelem,
    Box,
    Unbox,
    Castclass,
    Isinst,
    Ldftn,
}

/// The operand shape an opcode declares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperandKind {
    None,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Local,
    Arg,
    Target,
    Switch,
    Method,
    CallSite,
    Field,
    Type,
}

impl OperandKind {
    /// Human-readable name used in diagnostics.
    pub const fn describe(self) -> &'static str {
        match self {
            Self::None => "no",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::String => "string",
            Self::Local => "local slot",
            Self::Arg => "argument slot",
            Self::Target => "branch target",
            Self::Switch => "switch table",
            Self::Method => "method reference",
            Self::CallSite => "call-site signature",
            Self::Field => "field reference",
            Self::Type => "type reference",
        }
    }
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowType {
    /// Normal execution continues to next instruction
    Sequential,
    /// Conditional branch to another location
    ConditionalBranch,
    /// Always branches to another location
    UnconditionalBranch,
    /// Call to another method, execution continues afterwards
    Call,
    /// Returns from current method
    Return,
    /// Multi-way branch, falls through when the index is out of range
    Switch,
    /// Exception throwing
    Throw,
    /// End of finally or filter block
    EndFinally,
    /// Leave protected region
    Leave,
}

impl FlowType {
    /// Whether execution can continue with the next instruction in the stream.
    pub const fn falls_through(self) -> bool {
        matches!(
            self,
            Self::Sequential | Self::ConditionalBranch | Self::Call | Self::Switch
        )
    }

    /// Whether the next instruction in the stream must start a new block.
    pub const fn ends_block(self) -> bool {
        matches!(
            self,
            Self::ConditionalBranch
                | Self::UnconditionalBranch
                | Self::Switch
                | Self::Return
                | Self::Throw
                | Self::EndFinally
                | Self::Leave
        )
    }

    /// Whether the instruction carries one or more branch targets.
    pub const fn is_branch(self) -> bool {
        matches!(
            self,
            Self::ConditionalBranch | Self::UnconditionalBranch | Self::Switch | Self::Leave
        )
    }
}

/// Declared pop class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopBehaviour {
    /// Always pops this many values.
    Fixed(u8),
    /// Empties the evaluation stack.
    PopAll,
    /// Depends on the operand's signature or the enclosing method's return type.
    Var,
}

/// Declared push class of an opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushBehaviour {
    /// Always pushes this many values.
    Fixed(u8),
    /// Depends on the operand's signature.
    Var,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl Opcode {
    /// Assembly mnemonic of the opcode.
    pub const fn mnemonic(&self) -> &'static str {
        use Opcode::*;

        match self {
            Nop => "nop",
            Break => "break",
            Ldarg => "ldarg",
            Starg => "starg",
            Ldloc => "ldloc",
            Stloc => "stloc",
            LdcI4 => "ldc.i4",
            LdcI8 => "ldc.i8",
            LdcR4 => "ldc.r4",
            LdcR8 => "ldc.r8",
            Ldstr => "ldstr",
            Ldnull => "ldnull",
            Dup => "dup",
            Pop => "pop",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            Rem => "rem",
            Neg => "neg",
            And => "and",
            Or => "or",
            Xor => "xor",
            Not => "not",
            Shl => "shl",
            Shr => "shr",
            Ceq => "ceq",
            Cgt => "cgt",
            Clt => "clt",
            ConvI4 => "conv.i4",
            ConvI8 => "conv.i8",
            ConvR8 => "conv.r8",
            Br => "br",
            Brtrue => "brtrue",
            Brfalse => "brfalse",
            Beq => "beq",
            Bne => "bne.un",
            Bge => "bge",
            Bgt => "bgt",
            Ble => "ble",
            Blt => "blt",
            Switch => "switch",
            Call => "call",
            Callvirt => "callvirt",
            Calli => "calli",
            Newobj => "newobj",
            Ret => "ret",
            Throw => "throw",
            Rethrow => "rethrow",
            Leave => "leave",
            Endfinally => "endfinally",
            Endfilter => "endfilter",
            Ldfld => "ldfld",
            Stfld => "stfld",
            Ldsfld => "ldsfld",
            Stsfld => "stsfld",
            Newarr => "newarr",
            Ldlen => "ldlen",
            Ldelem => "ldelem",
            Stelem => "stelem",
            Box => "box",
            Unbox => "unbox",
            Castclass => "castclass",
            Isinst => "isinst",
            Ldftn => "ldftn",
        }
    }

    /// Operand kind the opcode requires.
    pub const fn operand_kind(&self) -> OperandKind {
        use Opcode::*;

        match self {
            Ldarg | Starg => OperandKind::Arg,
            Ldloc | Stloc => OperandKind::Local,
            LdcI4 => OperandKind::Int32,
            LdcI8 => OperandKind::Int64,
            LdcR4 => OperandKind::Float32,
            LdcR8 => OperandKind::Float64,
            Ldstr => OperandKind::String,
            Br | Brtrue | Brfalse | Beq | Bne | Bge | Bgt | Ble | Blt | Leave => {
                OperandKind::Target
            }
            Switch => OperandKind::Switch,
            Call | Callvirt | Newobj | Ldftn => OperandKind::Method,
            Calli => OperandKind::CallSite,
            Ldfld | Stfld | Ldsfld | Stsfld => OperandKind::Field,
            Newarr | Ldelem | Stelem | Box | Unbox | Castclass | Isinst => OperandKind::Type,
            _ => OperandKind::None,
        }
    }

    /// Control-flow classification.
    pub const fn flow(&self) -> FlowType {
        use Opcode::*;

        match self {
            Br => FlowType::UnconditionalBranch,
            Brtrue | Brfalse | Beq | Bne | Bge | Bgt | Ble | Blt => FlowType::ConditionalBranch,
            Switch => FlowType::Switch,
            Call | Callvirt | Calli | Newobj => FlowType::Call,
            Ret => FlowType::Return,
            Throw | Rethrow => FlowType::Throw,
            Endfinally | Endfilter => FlowType::EndFinally,
            Leave => FlowType::Leave,
            _ => FlowType::Sequential,
        }
    }

    /// Declared pop class.
    pub const fn pop_behaviour(&self) -> PopBehaviour {
        use Opcode::*;

        match self {
            Nop | Break | Ldarg | Ldloc | LdcI4 | LdcI8 | LdcR4 | LdcR8 | Ldstr | Ldnull | Br
            | Rethrow | Ldsfld | Ldftn => PopBehaviour::Fixed(0),
            Starg | Stloc | Dup | Pop | Neg | Not | ConvI4 | ConvI8 | ConvR8 | Brtrue
            | Brfalse | Switch | Throw | Endfilter | Ldfld | Stsfld | Newarr | Ldlen | Box
            | Unbox | Castclass | Isinst => PopBehaviour::Fixed(1),
            Add | Sub | Mul | Div | Rem | And | Or | Xor | Shl | Shr | Ceq | Cgt | Clt | Beq
            | Bne | Bge | Bgt | Ble | Blt | Stfld | Ldelem => PopBehaviour::Fixed(2),
            Stelem => PopBehaviour::Fixed(3),
            Leave | Endfinally => PopBehaviour::PopAll,
            Call | Callvirt | Calli | Newobj | Ret => PopBehaviour::Var,
        }
    }

    /// Declared push class.
    pub const fn push_behaviour(&self) -> PushBehaviour {
        use Opcode::*;

        match self {
            Ldarg | Ldloc | LdcI4 | LdcI8 | LdcR4 | LdcR8 | Ldstr | Ldnull | Add | Sub | Mul
            | Div | Rem | Neg | And | Or | Xor | Not | Shl | Shr | Ceq | Cgt | Clt | ConvI4
            | ConvI8 | ConvR8 | Ldfld | Ldsfld | Newarr | Ldlen | Ldelem | Box | Unbox
            | Castclass | Isinst | Ldftn => PushBehaviour::Fixed(1),
            Dup => PushBehaviour::Fixed(2),
            Call | Callvirt | Calli | Newobj => PushBehaviour::Var,
            _ => PushBehaviour::Fixed(0),
        }
    }
}
