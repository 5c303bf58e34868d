use thiserror::Error;

/// Error type for malformed module data.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// An operand or handler boundary names an instruction id that is not in the body.
    #[error("instruction id {0} is not part of the method body")]
    DanglingInstruction(u32),
    /// A method handle points outside the module's type/method tables.
    #[error("method {type_index}:{method_index} does not exist")]
    MissingMethod {
        type_index: usize,
        method_index: usize,
    },
    /// The opcode requires a different operand kind than the one supplied.
    #[error("opcode {opcode} expects a {expected} operand")]
    OperandMismatch {
        opcode: String,
        expected: &'static str,
    },
    /// The module has no types to host generated methods.
    #[error("module has no types")]
    NoTypes,
    /// A local slot number exceeds the local-variable table.
    #[error("local slot {0} is out of range")]
    LocalOutOfRange(u16),
    /// The local-variable table already holds every addressable slot.
    #[error("local-variable table is full ({0} locals)")]
    TooManyLocals(usize),
}

/// Error type for block partitioning and control-flow flattening.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowError {
    /// The push/pop behaviour of an instruction cannot be derived from its metadata.
    #[error("cannot classify stack effect of {opcode} at instruction {id}")]
    UnclassifiableEffect { opcode: String, id: u32 },
    /// A branch target does not map to the start of any computed block.
    #[error("branch target {0} does not resolve to a block")]
    UnresolvableTarget(u32),
    /// An exception-handler boundary is not the first instruction of any block.
    #[error("exception region boundary {0} lies outside every block")]
    HandlerOutsideBlock(u32),
    /// The stack-balanced partitioner was left with a run whose stack delta never returned to zero.
    #[error("trailing run of {0} instructions never balances the stack")]
    UnbalancedTail(usize),
    /// The stack-balanced partitioner does not support exception handlers.
    #[error("stack-balanced partitioning does not support exception handlers")]
    HandlersUnsupported,
    /// A block is entered with values on the evaluation stack, so it cannot be reached through
    /// the dispatcher.
    #[error("block {block} is entered with {depth} values on the stack")]
    UnbalancedBoundary { block: usize, depth: u32 },
    /// The last block falls through past the end of the body.
    #[error("block {0} falls through past the end of the method")]
    FallsOffEnd(usize),
    /// Underlying model error.
    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Error type for stack-depth analysis.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StackError {
    /// An instruction pops more values than the stack holds.
    #[error("stack underflow at instruction {id}: depth {depth}, pops {pops}")]
    Underflow { id: u32, depth: u32, pops: u32 },
    /// Two control-flow paths reach an instruction with different depths.
    #[error("stack depth mismatch at instruction {id}: {expected} vs {found}")]
    Mismatch { id: u32, expected: u32, found: u32 },
    /// Stack effect classification failed.
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),
}

/// Error type for metrics computation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// The method has no instructions, so there is no CFG to measure.
    #[error("method body is empty")]
    EmptyCfg,
    /// CFG construction failed.
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),
    /// Stack analysis failed.
    #[error("stack analysis failed: {0}")]
    Stack(#[from] StackError),
}

/// Error type for transform operations.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("flow error: {0}")]
    Flow(#[from] FlowError),
    #[error("model error: {0}")]
    Model(#[from] ModelError),
    #[error("stack analysis failed: {0}")]
    Stack(#[from] StackError),
    #[error("method has no instructions")]
    EmptyBody,
    #[error("required external callable not resolved: {0}")]
    MissingExternal(&'static str),
    #[error("literal encoding failed: {0}")]
    Encoding(String),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration conflicts rejected in strict mode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("block shuffling requires code flattening to be enabled")]
    ShuffleRequiresFlatten,
    #[error("random anti-debug placement requires anti-debugging to be enabled")]
    PlacementRequiresAntiDebug,
}

/// Errors that can occur while driving an obfuscation run from the outside.
#[derive(Debug, Error)]
pub enum ObfuscateError {
    /// File read/write error.
    #[error("file error: {0}")]
    File(#[from] std::io::Error),
    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// Rejected configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// Invalid seed string.
    #[error("seed error: {0}")]
    Seed(#[from] SeedError),
    /// The input path is unusable.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// A named method does not exist in the module.
    #[error("method not found: {0}")]
    MethodNotFound(String),
}

/// Errors that can occur in the seed system
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SeedError {
    #[error("Invalid seed length: expected 64 hex chars, got {0}")]
    InvalidLength(usize),
    #[error("Invalid hexadecimal in seed")]
    InvalidHex,
}
