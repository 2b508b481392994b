//! Error types for IR construction.

/// Errors that can occur when constructing IR.
///
/// Structural invariant violations (inserting past a terminator, double
/// termination) are bugs and panic instead.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// A method with the same handle is already registered.
    #[error("duplicate method '{0}'")]
    DuplicateMethod(String),

    /// A builder is already live for the method.
    #[error("a builder is already live for method '{0}'")]
    BuilderInUse(String),

    /// Operand types do not match the operation's signature.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
}
