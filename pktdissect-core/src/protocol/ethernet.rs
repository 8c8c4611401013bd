//! Ethernet II header definition.

use crate::schema::{Accessor, FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength};

use super::FieldValue;

/// Link type constant for Ethernet.
pub const LINKTYPE_ETHERNET: u16 = 1;

/// Well-known EtherType values (IEEE 802).
pub mod ethertype {
    pub const IPV4: u16 = 0x0800;
    pub const ARP: u16 = 0x0806;
    pub const VLAN: u16 = 0x8100;
    pub const IPV6: u16 = 0x86DD;
    pub const QINQ: u16 = 0x88A8;
    pub const MPLS: u16 = 0x8847;
    pub const LLDP: u16 = 0x88CC;
}

/// Name of an EtherType, if well known.
pub fn ethertype_name(value: u16) -> Option<&'static str> {
    match value {
        ethertype::IPV4 => Some("IPv4"),
        ethertype::ARP => Some("ARP"),
        ethertype::VLAN => Some("802.1Q VLAN"),
        ethertype::IPV6 => Some("IPv6"),
        ethertype::QINQ => Some("802.1ad QinQ"),
        ethertype::MPLS => Some("MPLS"),
        ethertype::LLDP => Some("LLDP"),
        _ => None,
    }
}

/// Ethernet II frame header.
#[derive(Debug, Clone, Copy)]
pub struct Ethernet;

impl HeaderDefinition for Ethernet {
    const NAME: &'static str = "ethernet";
    const DISPLAY_NAME: &'static str = "Ethernet II";
    const ID: Option<u16> = Some(1);

    fn declare(decl: &mut HeaderDecl) {
        decl.length(HeaderLength::Fixed(14))
            .field(FieldDecl::new("dst").at(0, 48).display("Destination"))
            .field(FieldDecl::new("src").at(48, 48).display("Source"))
            .field(FieldDecl::bytes("ethertype", 12, 2).display("Type"))
            .accessor("dst", Accessor::object(|view| FieldValue::mac(view.bytes())))
            .accessor(
                "src",
                Accessor::object(|view| FieldValue::mac(view.bytes().get(6..).unwrap_or(&[]))),
            )
            .accessor(
                "ethertype_description",
                Accessor::text(|view| {
                    view.u16_at(12)
                        .and_then(ethertype_name)
                        .unwrap_or("unknown")
                }),
            );
    }
}
