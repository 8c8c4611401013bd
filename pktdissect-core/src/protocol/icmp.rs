//! ICMP (IPv4) header definition.

use crate::schema::{Accessor, FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength};

use super::HeaderView;

/// ICMP message types.
pub mod icmp_type {
    pub const ECHO_REPLY: u8 = 0;
    pub const DEST_UNREACHABLE: u8 = 3;
    pub const REDIRECT: u8 = 5;
    pub const ECHO_REQUEST: u8 = 8;
    pub const TIME_EXCEEDED: u8 = 11;
    pub const PARAMETER_PROBLEM: u8 = 12;
    pub const TIMESTAMP: u8 = 13;
    pub const TIMESTAMP_REPLY: u8 = 14;
}

pub fn icmp_type_name(value: u8) -> Option<&'static str> {
    match value {
        icmp_type::ECHO_REPLY => Some("Echo Reply"),
        icmp_type::DEST_UNREACHABLE => Some("Destination Unreachable"),
        icmp_type::REDIRECT => Some("Redirect"),
        icmp_type::ECHO_REQUEST => Some("Echo Request"),
        icmp_type::TIME_EXCEEDED => Some("Time Exceeded"),
        icmp_type::PARAMETER_PROBLEM => Some("Parameter Problem"),
        icmp_type::TIMESTAMP => Some("Timestamp"),
        icmp_type::TIMESTAMP_REPLY => Some("Timestamp Reply"),
        _ => None,
    }
}

fn unreachable_code_name(code: u8) -> &'static str {
    match code {
        0 => "net unreachable",
        1 => "host unreachable",
        2 => "protocol unreachable",
        3 => "port unreachable",
        4 => "fragmentation needed",
        5 => "source route failed",
        13 => "administratively prohibited",
        _ => "unknown",
    }
}

/// Types whose rest-of-header carries an identifier and sequence number.
fn has_echo_fields(view: &HeaderView<'_>) -> bool {
    matches!(
        view.u8_at(0),
        Some(
            icmp_type::ECHO_REPLY
                | icmp_type::ECHO_REQUEST
                | icmp_type::TIMESTAMP
                | icmp_type::TIMESTAMP_REPLY
        )
    )
}

/// ICMP header (type, code, checksum and the 4-byte rest-of-header).
#[derive(Debug, Clone, Copy)]
pub struct Icmp;

impl HeaderDefinition for Icmp {
    const NAME: &'static str = "icmp";
    const DISPLAY_NAME: &'static str = "ICMP";
    const ID: Option<u16> = Some(5);

    fn declare(decl: &mut HeaderDecl) {
        decl.length(HeaderLength::Fixed(8))
            .field(FieldDecl::bytes("type", 0, 1))
            .field(FieldDecl::bytes("code", 1, 1))
            .field(FieldDecl::bytes("checksum", 2, 2))
            .field(FieldDecl::bytes("identifier", 4, 2))
            .field(FieldDecl::bytes("sequence", 6, 2))
            .field(FieldDecl::bytes("next_hop_mtu", 6, 2).units("bytes"))
            .accessor(
                "type_description",
                Accessor::text(|view| view.u8_at(0).and_then(icmp_type_name).unwrap_or("unknown")),
            )
            .accessor(
                "code_description",
                Accessor::text(|view| match (view.u8_at(0), view.u8_at(1)) {
                    (Some(icmp_type::DEST_UNREACHABLE), Some(code)) => unreachable_code_name(code),
                    (Some(icmp_type::TIME_EXCEEDED), Some(0)) => "TTL exceeded in transit",
                    (Some(icmp_type::TIME_EXCEEDED), Some(1)) => "fragment reassembly time exceeded",
                    _ => "none",
                }),
            )
            .accessor("identifier_check", Accessor::boolean(has_echo_fields))
            .accessor("sequence_check", Accessor::boolean(has_echo_fields))
            .accessor(
                "next_hop_mtu_check",
                Accessor::boolean(|view| {
                    view.u8_at(0) == Some(icmp_type::DEST_UNREACHABLE) && view.u8_at(1) == Some(4)
                }),
            );
    }
}
