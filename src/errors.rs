//! Crate-wide error type.

use thiserror::Error;

/// Top-level error type for lotusflow operations.
#[derive(Debug, Error)]
pub enum LotusFlowError {
    /// The IR could not be read, or an opcode is unsupported in strict mode.
    #[error("input error: {0}")]
    Input(String),

    /// An access path exceeded the configured depth cap while `test_correctness`
    /// (strict mode) is enabled. In normal mode this widens instead of erroring.
    #[error("access path overflow: {path} exceeds depth {limit}")]
    AccessPathOverflow { path: String, limit: u32 },

    /// An internal invariant was violated (e.g. two locators with equal
    /// (object, offset) are not pointer-identical). Always a bug in the engine.
    #[error("internal invariant violated: {0}")]
    Invariant(String),

    /// Configuration was invalid.
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl LotusFlowError {
    pub fn input(msg: impl Into<String>) -> Self {
        LotusFlowError::Input(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        LotusFlowError::Invariant(msg.into())
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, LotusFlowError>;
