//! # pktdissect-core
//!
//! Metadata-driven packet dissection and a time-ordered analysis pipeline.
//!
//! Protocol headers are declared as field metadata rather than hand-written
//! parsers. Each declaration compiles once into an immutable schema; a
//! scanner walks packet buffers through a registry of schemas and binding
//! rules, and a controller feeds the results to analyzers (such as IPv4
//! reassembly) in capture-time order.
//!
//! ## Features
//!
//! - **Declarative headers**: fields with static or accessor-computed offsets,
//!   lengths, masks, values and presence checks, plus bit sub-fields
//! - **Option chains**: TLV sub-headers (IPv4 and TCP options) indexed per packet
//! - **Binding graph**: prioritized predicates deciding which header follows
//! - **Analysis controller**: capture-time ordering, hold/release gating and a
//!   bounded background dispatch thread
//! - **IPv4 reassembly**: interval-tracked fragment sequences with timeouts
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use pktdissect_core::prelude::*;
//!
//! let registry = Arc::new(default_registry().unwrap());
//! let scanner = Scanner::new(Arc::clone(&registry));
//!
//! let mut frame = vec![0u8; 34];
//! frame[12..14].copy_from_slice(&[0x08, 0x00]); // IPv4
//! frame[14] = 0x45; // version 4, IHL 5
//!
//! let state = scanner.scan(&frame, ids::ETHERNET);
//! let headers: Vec<_> = state.headers().iter().map(|h| (h.offset, h.length)).collect();
//! assert_eq!(headers, vec![(0, 14), (14, 20)]);
//!
//! for header in state.headers() {
//!     let view = registry.view(&frame, header).unwrap();
//!     for field in view.fields() {
//!         println!("{}.{} = {}", view.name(), field.name(), field.value());
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        pktdissect-core                              |
//! +---------------------------------------------------------------------+
//! |  schema/     - FieldDecl, HeaderSchema, resolved field functions    |
//! |  protocol/   - Registry, bindings, Scanner, views, built-in headers |
//! |  packet      - Owned packet + capture metadata                      |
//! |  analysis/   - Controller, analyzers, hold/release, dispatch        |
//! |  fragment/   - IPv4 fragment sequencing and reassembly              |
//! |  config      - Scan, controller and reassembly settings             |
//! |  error       - Error types                                          |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Crate Features
//!
//! - `test-utils` - Packet builders from `protocol::test_utils` for
//!   downstream tests

pub mod analysis;
pub mod config;
pub mod error;
pub mod fragment;
pub mod packet;
pub mod prelude;
pub mod protocol;
pub mod schema;

// Re-export commonly used types at crate root for convenience
pub use analysis::{Analyzer, AnalyzerContext, Controller, ControllerStats, PacketSink, Verdict};
pub use config::{ControllerConfig, FragmentConfig, ScanConfig};
pub use error::{AnalysisError, ControllerError, DefinitionError, DefinitionErrors, Error, RegistryError, Result};
pub use fragment::{FragmentKey, FragmentStats, IpFragmentAnalyzer};
pub use packet::{CaptureHeader, Packet};
pub use protocol::{
    default_registry, link_type_protocol, FieldValue, HeaderView, OwnedFieldValue, PacketState,
    ProtocolId, ProtocolMask, Registry, RegistryBuilder, Scanner,
};
pub use schema::{FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength, HeaderSchema};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
