//! Error types for pktdissect-core.
//!
//! This module provides structured error types for all pktdissect-core operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`DefinitionError`] / [`DefinitionErrors`] - Broken header or binding definitions,
//!   reported at registration time as a batch
//! - [`RegistryError`] - Lookups of protocols that were never registered
//! - [`ControllerError`] - Misuse of the analysis controller (unbalanced holds, stopped)
//! - [`AnalysisError`] - Failures raised by analyzers; caught and logged by the controller
//!
//! Decode-time anomalies (truncation, malformed options) are never errors: they are
//! recorded as flags on [`PacketState`](crate::protocol::PacketState).

use std::fmt;

use thiserror::Error;

use crate::schema::{FunctionKind, RuntimeKind};

/// Main error type for pktdissect-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// One or more header/binding definitions are invalid
    #[error("definition errors: {0}")]
    Definition(#[from] DefinitionErrors),

    /// Lookup of an unregistered protocol
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Analysis controller misuse
    #[error("controller error: {0}")]
    Controller(#[from] ControllerError),

    /// Failure raised by an analyzer outside the controller
    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),
}

/// A single problem found while compiling a header definition or binding graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// A required field function has neither a literal nor an accessor.
    #[error("{header}.{field}: no literal or accessor for required {function}")]
    MissingFunction {
        header: &'static str,
        field: &'static str,
        function: FunctionKind,
    },

    /// A field explicitly binds a function to an accessor that does not exist.
    #[error("{header}.{field}: {function} bound to unknown accessor '{accessor}'")]
    UnknownAccessor {
        header: &'static str,
        field: &'static str,
        function: FunctionKind,
        accessor: &'static str,
    },

    /// An accessor returns the wrong type for the function it is bound to.
    #[error("{header}.{field}: accessor '{accessor}' returns {found}, {function} needs {expected}")]
    AccessorType {
        header: &'static str,
        field: &'static str,
        function: FunctionKind,
        accessor: &'static str,
        expected: RuntimeKind,
        found: RuntimeKind,
    },

    /// Two accessors were declared under the same name.
    #[error("{header}: accessor '{accessor}' declared twice")]
    DuplicateAccessor {
        header: &'static str,
        accessor: &'static str,
    },

    /// Two fields with the same name in one header.
    #[error("{header}: field '{field}' declared twice")]
    DuplicateField {
        header: &'static str,
        field: &'static str,
    },

    /// A field names a parent that is not declared in the same header.
    #[error("{header}.{field}: unknown parent field '{parent}'")]
    UnknownParent {
        header: &'static str,
        field: &'static str,
        parent: &'static str,
    },

    /// A bit sub-field does not fit inside its parent.
    #[error("{header}.{field}: bits {offset}..{end} fall outside parent '{parent}' ({parent_len} bits)")]
    SubfieldOutOfRange {
        header: &'static str,
        field: &'static str,
        parent: &'static str,
        offset: u32,
        end: u32,
        parent_len: u32,
    },

    /// The header declares no way to compute its length.
    #[error("{header}: no header length declared")]
    MissingHeaderLength { header: &'static str },

    /// Two sub-header kinds share a secondary ID.
    #[error("{header}: sub-header kind {kind} declared twice")]
    DuplicateSubHeader { header: &'static str, kind: u8 },

    /// Two protocols registered under the same explicit ID.
    #[error("protocol id {id} claimed by both '{existing}' and '{header}'")]
    DuplicateProtocolId {
        id: u16,
        existing: &'static str,
        header: &'static str,
    },

    /// Two protocols registered under the same name.
    #[error("protocol name '{name}' registered twice")]
    DuplicateProtocolName { name: &'static str },

    /// An explicit ID outside the presence bitmap.
    #[error("{header}: protocol id {id} out of range (max {max})")]
    ProtocolIdOutOfRange {
        header: &'static str,
        id: u16,
        max: u16,
    },

    /// No free protocol ID is left.
    #[error("{header}: no free protocol id left")]
    ProtocolIdsExhausted { header: &'static str },

    /// A binding refers to a protocol that was never registered.
    #[error("binding '{binding}' ({from} -> {to}): {reason}")]
    InvalidBinding {
        binding: &'static str,
        from: &'static str,
        to: &'static str,
        reason: &'static str,
    },
}

/// A batch of definition problems, so several can be fixed in one pass.
#[derive(Error, Debug, Clone, PartialEq, Eq, Default)]
pub struct DefinitionErrors {
    errors: Vec<DefinitionError>,
}

impl DefinitionErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: DefinitionError) {
        self.errors.push(error);
    }

    pub fn extend(&mut self, other: DefinitionErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DefinitionError> {
        self.errors.iter()
    }

    /// `Ok(value)` if nothing was collected, otherwise the whole batch.
    pub fn into_result<T>(self, value: T) -> std::result::Result<T, DefinitionErrors> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(self)
        }
    }
}

impl From<DefinitionError> for DefinitionErrors {
    fn from(error: DefinitionError) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl IntoIterator for DefinitionErrors {
    type Item = DefinitionError;
    type IntoIter = std::vec::IntoIter<DefinitionError>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl fmt::Display for DefinitionErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} problem(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

/// Errors from registry lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No protocol with this ID was registered.
    #[error("no protocol registered with id {0}")]
    UnregisteredId(u16),

    /// No protocol with this name was registered.
    #[error("no protocol registered with name '{0}'")]
    UnregisteredName(String),

    /// The definition type was never registered.
    #[error("header definition '{0}' is not registered")]
    UnregisteredHeader(&'static str),
}

/// Errors from the analysis controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// `release()` without a matching `hold()`.
    #[error("release without matching hold")]
    ReleaseUnderflow,

    /// The dispatch thread has been shut down.
    #[error("dispatch thread is stopped")]
    Stopped,

    /// The dispatch thread could not be spawned.
    #[error("failed to start dispatch thread: {0}")]
    Spawn(String),
}

/// Errors raised inside analyzers.
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Hold/release misuse from inside an analyzer.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// A protocol the analyzer depends on is missing.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Analyzer-specific failure.
    #[error("{analyzer}: {reason}")]
    Failed {
        analyzer: &'static str,
        reason: String,
    },
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
