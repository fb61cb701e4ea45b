//! Error types shared by the pool, the transformation driver and redefinition.

use std::error::Error as StdError;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::bytecode::CompileError;
use crate::classfile::ClassFileError;

/// Coarse classification of an [`InstrumentError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    CompileError,
    IllegalState,
    MalformedInput,
    RedefinitionRejected,
}

#[derive(Debug, Error)]
pub enum InstrumentError {
    #[error("Can't find class '{name}' in the class pool")]
    NotFound { name: String },

    #[error("Can't find {member} in class '{class}'")]
    MemberNotFound { class: String, member: String },

    #[error("Can't read class '{name}' from the search path")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("Can't compile class '{name}'")]
    Compile {
        name: String,
        #[source]
        source: CompileError,
    },

    #[error("Malformed class file for '{name}'")]
    MalformedInput {
        name: String,
        #[source]
        source: ClassFileError,
    },

    #[error("{0}")]
    IllegalState(String),

    #[error("Redefinition rejected: {reason}")]
    RedefinitionRejected { reason: String },

    #[error("Can't retransform class '{class}'")]
    Retransform {
        class: String,
        #[source]
        source: Box<InstrumentError>,
    },
}

impl InstrumentError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalState(message.into())
    }

    pub fn compile(name: impl Into<String>, source: CompileError) -> Self {
        Self::Compile { name: name.into(), source }
    }

    pub fn malformed(name: impl Into<String>, source: ClassFileError) -> Self {
        Self::MalformedInput { name: name.into(), source }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::MemberNotFound { .. } | Self::Io { .. } => ErrorKind::NotFound,
            Self::Compile { .. } => ErrorKind::CompileError,
            Self::MalformedInput { .. } => ErrorKind::MalformedInput,
            Self::IllegalState(_) => ErrorKind::IllegalState,
            Self::RedefinitionRejected { .. } => ErrorKind::RedefinitionRejected,
            Self::Retransform { source, .. } => source.kind(),
        }
    }
}

pub type Result<T, E = InstrumentError> = std::result::Result<T, E>;

/// Displays an error followed by each of its sources, `: `-separated.
pub struct ErrorChain<'a>(pub &'a dyn StdError);

impl fmt::Display for ErrorChain<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;
        let mut source = self.0.source();
        while let Some(cause) = source {
            write!(f, ": {cause}")?;
            source = cause.source();
        }
        Ok(())
    }
}
