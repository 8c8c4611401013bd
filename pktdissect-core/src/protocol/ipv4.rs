//! IPv4 header definition.

use etherparse::Ipv4HeaderSlice;

use crate::schema::{
    Accessor, FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength, OptionsDecl, SubHeaderDecl,
};

use super::{FieldValue, HeaderView};

/// Link types carrying raw IPv4.
pub const LINKTYPE_RAW: u16 = 101;
pub const LINKTYPE_IPV4: u16 = 228;

/// IP protocol numbers.
pub mod ip_protocol {
    pub const ICMP: u8 = 1;
    pub const TCP: u8 = 6;
    pub const UDP: u8 = 17;
    pub const GRE: u8 = 47;
    pub const ESP: u8 = 50;
    pub const ICMPV6: u8 = 58;
}

pub fn ip_protocol_name(value: u8) -> Option<&'static str> {
    match value {
        ip_protocol::ICMP => Some("ICMP"),
        ip_protocol::TCP => Some("TCP"),
        ip_protocol::UDP => Some("UDP"),
        ip_protocol::GRE => Some("GRE"),
        ip_protocol::ESP => Some("ESP"),
        ip_protocol::ICMPV6 => Some("ICMPv6"),
        _ => None,
    }
}

/// Bytes of the fixed part of the header.
pub const MIN_HEADER_LEN: usize = 20;

/// Header length from the IHL nibble; below the 20-byte minimum is unusable.
fn header_length(buffer: &[u8], start: usize) -> Option<usize> {
    let ihl = buffer.get(start)? & 0x0f;
    let len = ihl as usize * 4;
    (len >= MIN_HEADER_LEN).then_some(len)
}

/// Known IPv4 options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv4Option {
    EndOfList,
    Nop,
    RecordRoute,
    Timestamp,
    RouterAlert,
}

impl Ipv4Option {
    pub const ALL: [Ipv4Option; 5] = [
        Ipv4Option::EndOfList,
        Ipv4Option::Nop,
        Ipv4Option::RecordRoute,
        Ipv4Option::Timestamp,
        Ipv4Option::RouterAlert,
    ];

    /// Option type octet (copy flag, class and number).
    pub fn kind(self) -> u8 {
        match self {
            Ipv4Option::EndOfList => 0,
            Ipv4Option::Nop => 1,
            Ipv4Option::RecordRoute => 7,
            Ipv4Option::Timestamp => 68,
            Ipv4Option::RouterAlert => 148,
        }
    }

    pub fn from_kind(kind: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|opt| opt.kind() == kind)
    }

    /// Field table for this option.
    pub fn decl(self) -> SubHeaderDecl {
        match self {
            Ipv4Option::EndOfList => SubHeaderDecl::single_octet(0, "eol").end_of_list(),
            Ipv4Option::Nop => SubHeaderDecl::single_octet(1, "nop"),
            Ipv4Option::RecordRoute => tlv(self.kind(), "record_route")
                .field(FieldDecl::bytes("pointer", 2, 1))
                .field(FieldDecl::new("route").offset(24))
                .accessor("route", Accessor::object(|view| addresses(view, 3)))
                .accessor("route_length", Accessor::int(|view| tail_bits(view, 3))),
            Ipv4Option::Timestamp => tlv(self.kind(), "timestamp")
                .field(FieldDecl::bytes("pointer", 2, 1))
                .field(FieldDecl::bytes("overflow_flags", 3, 1))
                .field(FieldDecl::sub("overflow", "overflow_flags", 0, 4))
                .field(FieldDecl::sub("flag", "overflow_flags", 4, 4))
                .field(FieldDecl::new("data").offset(32))
                .accessor(
                    "data",
                    Accessor::object(|view| FieldValue::Bytes(view.bytes().get(4..).unwrap_or(&[]))),
                )
                .accessor("data_length", Accessor::int(|view| tail_bits(view, 4)))
                .accessor(
                    "flag_description",
                    Accessor::text(|view| match view.u8_at(3).map(|b| b & 0x0f) {
                        Some(0) => "timestamps only",
                        Some(1) => "address and timestamp",
                        Some(3) => "prespecified addresses",
                        _ => "unknown",
                    }),
                ),
            Ipv4Option::RouterAlert => tlv(self.kind(), "router_alert")
                .field(FieldDecl::bytes("value", 2, 2))
                .accessor(
                    "value_description",
                    Accessor::text(|view| match view.u16_at(2) {
                        Some(0) => "router shall examine packet",
                        _ => "reserved",
                    }),
                ),
        }
    }
}

/// Type/length prefix shared by multi-octet options.
fn tlv(kind: u8, name: &'static str) -> SubHeaderDecl {
    SubHeaderDecl::new(kind, name)
        .length_octet(1)
        .field(FieldDecl::bytes("type", 0, 1))
        .field(FieldDecl::bytes("length", 1, 1).units("bytes"))
}

/// Bits from byte `from` to the end of the view.
fn tail_bits(view: &HeaderView<'_>, from: usize) -> i32 {
    (view.length().saturating_sub(from) as i32).saturating_mul(8)
}

/// IPv4 addresses packed from byte `from` onwards.
fn addresses<'a>(view: &HeaderView<'a>, from: usize) -> FieldValue<'a> {
    let data = view.bytes().get(from..).unwrap_or(&[]);
    FieldValue::List(data.chunks_exact(4).map(FieldValue::ipv4).collect())
}

/// IPv4 header.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4;

impl HeaderDefinition for Ipv4 {
    const NAME: &'static str = "ipv4";
    const DISPLAY_NAME: &'static str = "IPv4";
    const ID: Option<u16> = Some(2);

    fn declare(decl: &mut HeaderDecl) {
        decl.length(HeaderLength::Computed(header_length))
            .field(FieldDecl::bytes("version_ihl", 0, 1))
            .field(FieldDecl::sub("version", "version_ihl", 0, 4))
            .field(FieldDecl::sub("ihl", "version_ihl", 4, 4).units("32-bit words"))
            .field(FieldDecl::bytes("tos", 1, 1).display("Type of Service"))
            .field(FieldDecl::sub("dscp", "tos", 0, 6))
            .field(FieldDecl::sub("ecn", "tos", 6, 2))
            .field(FieldDecl::bytes("total_length", 2, 2).units("bytes"))
            .field(FieldDecl::bytes("identification", 4, 2))
            .field(FieldDecl::bytes("flags_fragment", 6, 2))
            .field(FieldDecl::sub("reserved", "flags_fragment", 0, 1))
            .field(FieldDecl::sub("dont_fragment", "flags_fragment", 1, 1))
            .field(FieldDecl::sub("more_fragments", "flags_fragment", 2, 1))
            .field(FieldDecl::sub("fragment_offset", "flags_fragment", 3, 13).units("8-byte blocks"))
            .field(FieldDecl::bytes("ttl", 8, 1).display("Time to Live"))
            .field(FieldDecl::bytes("protocol", 9, 1))
            .field(FieldDecl::bytes("checksum", 10, 2))
            .field(FieldDecl::new("src").at(96, 32))
            .field(FieldDecl::new("dst").at(128, 32))
            .field(FieldDecl::new("options").offset(160))
            .accessor("src", Accessor::object(|view| address_at(view, 12)))
            .accessor("dst", Accessor::object(|view| address_at(view, 16)))
            .accessor(
                "protocol_description",
                Accessor::text(|view| view.u8_at(9).and_then(ip_protocol_name).unwrap_or("unknown")),
            )
            .accessor(
                "checksum_description",
                Accessor::text(|view| checksum_verdict(view.bytes())),
            )
            .accessor(
                "options",
                Accessor::object(|view| {
                    FieldValue::Bytes(view.bytes().get(MIN_HEADER_LEN..).unwrap_or(&[]))
                }),
            )
            .accessor("options_length", Accessor::int(|view| tail_bits(view, MIN_HEADER_LEN)))
            .accessor(
                "options_check",
                Accessor::boolean(|view| view.length() > MIN_HEADER_LEN),
            )
            .options(
                OptionsDecl::new(MIN_HEADER_LEN)
                    .kinds(Ipv4Option::ALL.into_iter().map(Ipv4Option::decl)),
            );
    }
}

fn address_at<'a>(view: &HeaderView<'a>, offset: usize) -> FieldValue<'a> {
    FieldValue::ipv4(view.bytes().get(offset..).unwrap_or(&[]))
}

/// Compare the stored header checksum with a freshly computed one.
fn checksum_verdict(header: &[u8]) -> &'static str {
    match Ipv4HeaderSlice::from_slice(header) {
        Ok(slice) => {
            if slice.to_header().calc_header_checksum() == slice.header_checksum() {
                "correct"
            } else {
                "incorrect"
            }
        }
        Err(_) => "unverifiable",
    }
}

/// Whether the datagram is a fragment (MF set or non-zero offset).
pub fn is_fragment(view: &HeaderView<'_>) -> bool {
    view.u16_at(6).is_some_and(|word| word & 0x3fff != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ids;
    use crate::protocol::test_utils::{scan_frame, EthernetBuilder, Ipv4Builder};

    #[test]
    fn test_ipv4_fields() {
        let ip = Ipv4Builder::new()
            .udp()
            .identification(0x1234)
            .ttl(17)
            .src_ip([10, 0, 0, 1])
            .dst_ip([10, 0, 0, 2])
            .payload(vec![0; 8])
            .build();
        let frame = EthernetBuilder::new().payload(ip).build();
        let (registry, state) = scan_frame(&frame);

        let header = state.find(ids::IPV4).unwrap();
        assert_eq!((header.offset, header.length), (14, 20));
        let view = registry.view(&frame, header).unwrap();

        assert_eq!(view.value("version"), Some(FieldValue::UInt8(4)));
        assert_eq!(view.value("ihl"), Some(FieldValue::UInt8(5)));
        assert_eq!(view.value("total_length"), Some(FieldValue::UInt16(28)));
        assert_eq!(view.value("identification"), Some(FieldValue::UInt16(0x1234)));
        assert_eq!(view.value("ttl"), Some(FieldValue::UInt8(17)));
        assert_eq!(view.value("dont_fragment"), Some(FieldValue::Bool(false)));
        assert_eq!(view.value("src").unwrap().to_string(), "10.0.0.1");
        assert_eq!(view.value("dst").unwrap().to_string(), "10.0.0.2");

        let protocol = view.field("protocol").unwrap();
        assert_eq!(protocol.description().as_deref(), Some("UDP"));
        let checksum = view.field("checksum").unwrap();
        assert_eq!(checksum.description().as_deref(), Some("correct"));
        assert!(!view.field("options").unwrap().is_present());
        assert!(!is_fragment(&view));
    }

    #[test]
    fn test_bad_checksum_described() {
        let mut ip = Ipv4Builder::new().payload(vec![0; 20]).build();
        ip[10] ^= 0xff;
        let frame = EthernetBuilder::new().payload(ip).build();
        let (registry, state) = scan_frame(&frame);

        let view = registry.view(&frame, state.find(ids::IPV4).unwrap()).unwrap();
        let checksum = view.field("checksum").unwrap();
        assert_eq!(checksum.description().as_deref(), Some("incorrect"));
    }

    #[test]
    fn test_ipv4_options_indexed() {
        // Router alert, NOP, EOL
        let ip = Ipv4Builder::new()
            .udp()
            .options(vec![148, 4, 0, 0, 1, 0, 0, 0])
            .payload(vec![0; 8])
            .build();
        let frame = EthernetBuilder::new().payload(ip).build();
        let (registry, state) = scan_frame(&frame);

        let header = state.find(ids::IPV4).unwrap();
        assert_eq!(header.length, 28);
        let kinds: Vec<_> = header.options.iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![148, 1, 0]);

        let view = registry.view(&frame, header).unwrap();
        assert!(view.field("options").unwrap().is_present());
        assert_eq!(view.field("options").unwrap().length_bits(), 64);

        let alert = view.option(148).unwrap();
        assert_eq!(alert.name(), "router_alert");
        let value = alert.field("value").unwrap();
        assert_eq!(value.value(), FieldValue::UInt16(0));
        assert_eq!(value.description().as_deref(), Some("router shall examine packet"));

        // UDP still follows.
        assert!(state.contains(ids::UDP));
    }

    #[test]
    fn test_record_route_addresses() {
        let ip = Ipv4Builder::new()
            .options(vec![7, 11, 4, 10, 0, 0, 1, 10, 0, 0, 2, 0])
            .build();
        let frame = EthernetBuilder::new().payload(ip).build();
        let (registry, state) = scan_frame(&frame);

        let view = registry.view(&frame, state.find(ids::IPV4).unwrap()).unwrap();
        let rr = view.option(Ipv4Option::RecordRoute.kind()).unwrap();
        let route = rr.value("route").unwrap();
        let hops: Vec<_> = route.as_list().unwrap().iter().map(|v| v.to_string()).collect();
        assert_eq!(hops, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_short_ihl_is_truncated() {
        let mut ip = Ipv4Builder::new().payload(vec![0; 8]).build();
        ip[0] = 0x44;
        let frame = EthernetBuilder::new().payload(ip).build();
        let (_, state) = scan_frame(&frame);

        assert!(state.is_truncated());
        assert!(!state.contains(ids::IPV4));
        assert_eq!(state.headers()[1].protocol, ids::PAYLOAD);
    }

    #[test]
    fn test_option_kinds_round_trip() {
        for opt in Ipv4Option::ALL {
            assert_eq!(Ipv4Option::from_kind(opt.kind()), Some(opt));
        }
        assert_eq!(Ipv4Option::from_kind(99), None);
    }
}
