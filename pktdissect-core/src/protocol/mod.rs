//! Header dissection.
//!
//! This module provides:
//! - [`Registry`] holding compiled header schemas and the binding graph
//! - [`Scanner`] turning a packet buffer into a [`PacketState`]
//! - [`HeaderView`] and [`FieldView`] for reading fields out of a scan
//! - Built-in definitions for Ethernet, IPv4, TCP, UDP and ICMP
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pktdissect_core::protocol::{default_registry, ids, Scanner};
//!
//! let registry = Arc::new(default_registry().unwrap());
//! let scanner = Scanner::new(Arc::clone(&registry));
//!
//! let frame: &[u8] = &[
//!     0xff, 0xff, 0xff, 0xff, 0xff, 0xff, // dst mac
//!     0x00, 0x11, 0x22, 0x33, 0x44, 0x55, // src mac
//!     0x88, 0xcc,                         // ethertype (LLDP)
//!     0x02, 0x07,
//! ];
//! let state = scanner.scan(frame, ids::ETHERNET);
//! assert_eq!(state.len(), 2);
//! assert!(state.contains(ids::PAYLOAD));
//! ```

mod binding;
mod field;
mod registry;
mod scanner;
mod state;
mod view;

pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod udp;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use binding::{predicate, BindingContext, BindingPredicate, BindingRule};
pub use field::{FieldValue, OwnedFieldValue};
pub use registry::{
    ProtocolEntry, ProtocolId, ProtocolMask, Registry, RegistryBuilder, MAX_PROTOCOLS,
};
pub use scanner::Scanner;
pub use state::{DecodedHeader, HeaderFlags, OptionEntry, PacketState};
pub use view::{FieldView, HeaderView};

pub use ethernet::{ethertype, Ethernet};
pub use icmp::{icmp_type, Icmp};
pub use ipv4::{ip_protocol, Ipv4, Ipv4Option};
pub use tcp::{Tcp, TcpOption};
pub use udp::Udp;

/// Fixed IDs of the built-in protocols.
pub mod ids {
    use super::ProtocolId;

    pub const PAYLOAD: ProtocolId = ProtocolId::PAYLOAD;
    pub const ETHERNET: ProtocolId = ProtocolId(1);
    pub const IPV4: ProtocolId = ProtocolId(2);
    pub const TCP: ProtocolId = ProtocolId(3);
    pub const UDP: ProtocolId = ProtocolId(4);
    pub const ICMP: ProtocolId = ProtocolId(5);
}

/// Register the built-in headers and the bindings between them.
pub fn register_builtins(builder: &mut RegistryBuilder) -> &mut RegistryBuilder {
    builder
        .register::<Ethernet>()
        .register::<Ipv4>()
        .register::<Tcp>()
        .register::<Udp>()
        .register::<Icmp>()
        .bind::<Ethernet, Ipv4>("ethertype-ipv4", 0, |ctx| {
            ctx.current.u16_at(12) == Some(ethertype::IPV4)
        })
        .bind::<Ipv4, Tcp>("ipv4-tcp", 0, |ctx| {
            first_fragment(ctx) && ctx.current.u8_at(9) == Some(ip_protocol::TCP)
        })
        .bind::<Ipv4, Udp>("ipv4-udp", 0, |ctx| {
            first_fragment(ctx) && ctx.current.u8_at(9) == Some(ip_protocol::UDP)
        })
        .bind::<Ipv4, Icmp>("ipv4-icmp", 0, |ctx| {
            first_fragment(ctx) && ctx.current.u8_at(9) == Some(ip_protocol::ICMP)
        })
}

/// Only the fragment at offset zero carries the transport header.
fn first_fragment(ctx: &BindingContext<'_>) -> bool {
    ctx.current.u16_at(6).is_some_and(|word| word & 0x1fff == 0)
}

/// Create a registry with all built-in headers.
pub fn default_registry() -> Result<Registry, crate::error::DefinitionErrors> {
    let mut builder = Registry::builder();
    register_builtins(&mut builder);
    builder.build()
}

/// Start protocol for a capture link type.
pub fn link_type_protocol(link_type: u16) -> Option<ProtocolId> {
    match link_type {
        ethernet::LINKTYPE_ETHERNET => Some(ids::ETHERNET),
        ipv4::LINKTYPE_RAW | ipv4::LINKTYPE_IPV4 => Some(ids::IPV4),
        _ => None,
    }
}
