pub mod blocks;
pub mod body;
pub mod cfg;
pub mod externals;
pub mod instruction;
pub mod module;
pub mod opcode;
pub mod stack;

pub use blocks::{Block, Partition, PartitionPolicy};
pub use body::{ExceptionHandler, HandlerKind, Local, MethodBody};
pub use externals::WellKnown;
pub use instruction::{InstrId, Instruction, Operand, StackEffect};
pub use module::{
    ExternalId, ExternalMethod, FieldRef, Method, MethodFlags, MethodId, MethodRef, MethodSig,
    MethodTarget, Module, TypeDef, TypeRef, TypeSig,
};
pub use opcode::{FlowType, Opcode};
