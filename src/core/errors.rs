// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::member::PrimaryKey;
use thiserror::Error;

/// The main error enum, representing all possible failures within the engine.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum FaultlineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A missing or wrongly typed configuration key. The message names the key
    /// and the expected/actual kind.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Failure to attach to the graph information service at startup.
    #[error("IPC connection error: {0}")]
    Connection(String),

    /// A mandatory IPC response was missing, malformed, or out of sequence.
    /// Programme state is inconsistent after this; the error is fatal.
    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Wire encoding error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Wire decoding error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// A lookup targeted a member the remote side does not know.
    #[error("Unknown member '{0}'")]
    UnknownMember(PrimaryKey),

    #[error("Internal error: {0}")]
    Internal(String),
}
