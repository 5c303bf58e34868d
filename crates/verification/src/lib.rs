//! Shade Practical Verification
//!
//! This crate checks empirically that an obfuscated module behaves like its original:
//!
//! 1. **Interpretation**: a reference interpreter for the instruction model, with a host that
//!    implements the well-known external callables
//! 2. **Equivalence**: original and obfuscated methods run on identical inputs; return values,
//!    console output and exit status must match

pub mod config;
pub mod host;
pub mod interpreter;
pub mod practical;

pub use config::VerificationConfig;
pub use host::Host;
pub use interpreter::{Interpreter, Outcome, Value};
pub use practical::{check_equivalence, EquivalenceResults, Execution, PracticalTester};

use shade_utils::errors::ModelError;

/// Error type for a single interpreted execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ExecError {
    #[error("step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("call depth limit of {0} exceeded")]
    CallDepth(usize),

    #[error("{0} has no body")]
    NoBody(String),

    #[error("execution ran past the end of {0}")]
    FellOffEnd(String),

    #[error("{method} expects {expected} arguments, got {found}")]
    Arity {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("stack underflow at instruction {0}")]
    StackUnderflow(u32),

    #[error("operand types do not fit {opcode} at instruction {id}")]
    TypeMismatch { opcode: String, id: u32 },

    #[error("argument {0} is out of range")]
    ArgOutOfRange(u16),

    #[error("local {0} is out of range")]
    LocalOutOfRange(u16),

    #[error("branch target {0} is not in the body")]
    DanglingTarget(u32),

    #[error("unsupported by the interpreter: {0}")]
    Unsupported(String),

    #[error("external callable {0} has no host implementation")]
    UnknownExternal(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Main error type for verification operations.
#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("execution error: {0}")]
    Execution(#[from] ExecError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("cannot generate inputs for parameter type {0}")]
    UnsupportedParameter(String),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Result type for verification operations
pub type VerificationResult<T> = Result<T, VerificationError>;
