//! Convenient re-exports for common usage.
//!
//! # Example
//!
//! ```rust
//! use pktdissect_core::prelude::*;
//!
//! let registry = default_registry().unwrap();
//! assert!(registry.contains(ids::TCP));
//! ```

// Schema types
pub use crate::schema::{
    Accessor, FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength, HeaderSchema, OptionsDecl,
    SubHeaderDecl,
};

// Protocol types
pub use crate::protocol::{
    default_registry, ids, link_type_protocol, FieldValue, FieldView, HeaderView, PacketState,
    ProtocolId, Registry, RegistryBuilder, Scanner,
};

// Pipeline types
pub use crate::analysis::{Analyzer, AnalyzerContext, Controller, Verdict};
pub use crate::fragment::IpFragmentAnalyzer;
pub use crate::packet::{CaptureHeader, Packet};

// Error types
pub use crate::error::{Error, Result};
