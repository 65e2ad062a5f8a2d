//! Codegen error types covering all emission failure modes.

use tarn_gir::VerificationFailure;

/// Errors that can occur during LLVM lowering.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// A GraphIR type has no LLVM representation here.
    #[error("type mapping error: {0}")]
    TypeMapping(String),

    /// The data type needs a layout strategy that is not implemented
    /// (more than one payload-carrying constructor).
    #[error("no layout strategy for data type '{data_type}'")]
    UnsupportedLayout { data_type: String },

    /// LLVM API failure (builder errors, module verification).
    #[error("LLVM error: {0}")]
    LlvmError(String),

    /// Pre-emission verification found contract violations; no LLVM
    /// output is produced.
    #[error("verification failed with {} failure(s)", .0.len())]
    VerificationFailed(Vec<VerificationFailure>),

    /// An emitter-internal expectation did not hold.
    #[error("internal emitter error: {0}")]
    Internal(String),
}
