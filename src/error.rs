//! Error taxonomy for one figure's construction.
//!
//! The three fatal kinds (`PreconditionViolation`, `OracleFailure`,
//! `CalibrationImpossible`) abort the current figure only. Everything else
//! describes bad input or I/O around the pipeline.

use phylotree::tree::TreeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TanglegramError {
    /// Mismatched sample counts or metadata inconsistency after intersection.
    #[error("precondition violated: {0}")]
    PreconditionViolation(String),

    /// The external untangling process failed or produced unusable output.
    #[error("untangling oracle failed: {message}")]
    OracleFailure {
        message: String,
        exit_code: Option<i32>,
    },

    /// No matched samples to align the two clocks with.
    #[error("time calibration impossible: {0}")]
    CalibrationImpossible(String),

    #[error("invalid tree: {0}")]
    InvalidTree(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl TanglegramError {
    /// Create an I/O error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn oracle(message: impl Into<String>) -> Self {
        Self::OracleFailure {
            message: message.into(),
            exit_code: None,
        }
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        Self::PreconditionViolation(message.into())
    }
}

impl From<TreeError> for TanglegramError {
    fn from(e: TreeError) -> Self {
        Self::InvalidTree(e.to_string())
    }
}

/// Result type for every fallible operation in the crate.
pub type Result<T> = std::result::Result<T, TanglegramError>;
