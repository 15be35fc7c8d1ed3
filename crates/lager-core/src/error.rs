// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Error types shared across the CHP core.

use thiserror::Error;

/// Configuration errors returned synchronously to the caller.
///
/// Per `spec.md` §7, these are the only errors that can prevent a component
/// from starting; callers recover by re-configuring and retrying.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LagerError {
    #[error("port {0} is out of the valid range 0..=65535")]
    InvalidPort(i32),

    #[error("start() called before init()")]
    NotInitialized,

    #[error("failed to bind {addr}: {reason}")]
    BindError { addr: String, reason: String },

    #[error("component already running")]
    AlreadyRunning,

    #[error("invalid data format schema: {0}")]
    SchemaError(String),

    #[error("keg error: {0}")]
    KegError(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("a sample with {got} fields was logged against a {expected}-field schema")]
    FieldCountMismatch { expected: usize, got: usize },

    #[error("field {index} is {got} bytes wide, schema declares it {expected}")]
    FieldWidthMismatch {
        index: usize,
        expected: u32,
        got: usize,
    },
}

impl From<std::io::Error> for LagerError {
    fn from(e: std::io::Error) -> Self {
        LagerError::Io(e.to_string())
    }
}
