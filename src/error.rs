use thiserror::Error;

/// Top-level error type for the weft compiler pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("normalization error: {0}")]
    Pass(#[from] PassError),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),
}

// ---------------------------------------------------------------------------
// Normalization errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PassError {
    #[error("reference to unknown global '@{name}'")]
    UnknownGlobal { name: String },
}

// ---------------------------------------------------------------------------
// Bytecode emission errors
// ---------------------------------------------------------------------------

/// Errors raised while emitting VM instructions for a function.
///
/// All of these are fatal: the compiler produces no partial output. The
/// `expr` fields carry the rendered text of the offending expression so a
/// failure can be traced back to the input IR.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unsupported construct: {detail} in `{expr}`")]
    UnsupportedConstruct { detail: String, expr: String },

    #[error("unbound variable '%{name}'")]
    UnboundVariable { name: String },

    #[error("constant not present in the pool: `{expr}`")]
    MissingConstant { expr: String },

    #[error("global '@{name}' not present in the global map")]
    MissingGlobal { name: String },

    #[error("kernel lowering failed: {detail}")]
    LoweringFailure { detail: String },

    #[error("emitted opcode {opcode} outside the allowed range")]
    UnknownOpcode { opcode: u8 },
}
