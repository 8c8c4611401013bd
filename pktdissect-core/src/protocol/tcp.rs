//! TCP header definition.

use crate::schema::{
    Accessor, FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength, OptionsDecl, SubHeaderDecl,
};

use super::{FieldValue, HeaderView};

/// TCP flag bits (low 9 bits of bytes 12-13).
pub mod flags {
    pub const FIN: u16 = 0x001;
    pub const SYN: u16 = 0x002;
    pub const RST: u16 = 0x004;
    pub const PSH: u16 = 0x008;
    pub const ACK: u16 = 0x010;
    pub const URG: u16 = 0x020;
    pub const ECE: u16 = 0x040;
    pub const CWR: u16 = 0x080;
    pub const NS: u16 = 0x100;
}

/// Bytes of the fixed part of the header.
pub const MIN_HEADER_LEN: usize = 20;

fn header_length(buffer: &[u8], start: usize) -> Option<usize> {
    let data_offset = buffer.get(start.checked_add(12)?)? >> 4;
    let len = data_offset as usize * 4;
    (len >= MIN_HEADER_LEN).then_some(len)
}

/// Known TCP options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpOption {
    EndOfList,
    Nop,
    Mss,
    WindowScale,
    SackPermitted,
    Sack,
    Timestamps,
}

impl TcpOption {
    pub const ALL: [TcpOption; 7] = [
        TcpOption::EndOfList,
        TcpOption::Nop,
        TcpOption::Mss,
        TcpOption::WindowScale,
        TcpOption::SackPermitted,
        TcpOption::Sack,
        TcpOption::Timestamps,
    ];

    pub fn kind(self) -> u8 {
        match self {
            TcpOption::EndOfList => 0,
            TcpOption::Nop => 1,
            TcpOption::Mss => 2,
            TcpOption::WindowScale => 3,
            TcpOption::SackPermitted => 4,
            TcpOption::Sack => 5,
            TcpOption::Timestamps => 8,
        }
    }

    pub fn from_kind(kind: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|opt| opt.kind() == kind)
    }

    pub fn decl(self) -> SubHeaderDecl {
        let kind = self.kind();
        match self {
            TcpOption::EndOfList => SubHeaderDecl::single_octet(kind, "eol").end_of_list(),
            TcpOption::Nop => SubHeaderDecl::single_octet(kind, "nop"),
            TcpOption::Mss => tlv(kind, "mss").field(FieldDecl::bytes("value", 2, 2).units("bytes")),
            TcpOption::WindowScale => tlv(kind, "window_scale")
                .field(FieldDecl::bytes("shift", 2, 1))
                .accessor(
                    "shift_description",
                    Accessor::string(|view| {
                        let shift = view.u8_at(2).unwrap_or(0).min(14);
                        format!("multiply by {}", 1u32 << shift)
                    }),
                ),
            TcpOption::SackPermitted => tlv(kind, "sack_permitted"),
            TcpOption::Sack => tlv(kind, "sack")
                .field(FieldDecl::new("blocks").offset(16))
                .accessor("blocks", Accessor::object(sack_blocks))
                .accessor(
                    "blocks_length",
                    Accessor::int(|view| (view.length().saturating_sub(2) as i32).saturating_mul(8)),
                ),
            TcpOption::Timestamps => tlv(kind, "timestamps")
                .field(FieldDecl::bytes("tsval", 2, 4))
                .field(FieldDecl::bytes("tsecr", 6, 4)),
        }
    }
}

fn tlv(kind: u8, name: &'static str) -> SubHeaderDecl {
    SubHeaderDecl::new(kind, name)
        .length_octet(1)
        .field(FieldDecl::bytes("kind", 0, 1))
        .field(FieldDecl::bytes("length", 1, 1).units("bytes"))
}

/// SACK edges as `[left, right]` pairs.
fn sack_blocks<'a>(view: &HeaderView<'a>) -> FieldValue<'a> {
    let data = view.bytes().get(2..).unwrap_or(&[]);
    FieldValue::List(
        data.chunks_exact(8)
            .map(|block| {
                let left = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
                let right = u32::from_be_bytes([block[4], block[5], block[6], block[7]]);
                FieldValue::List(vec![FieldValue::UInt32(left), FieldValue::UInt32(right)])
            })
            .collect(),
    )
}

/// Flag names set in `bits`, e.g. `"SYN,ACK"`.
pub fn flag_names(bits: u16) -> String {
    const NAMES: [(u16, &str); 9] = [
        (flags::NS, "NS"),
        (flags::CWR, "CWR"),
        (flags::ECE, "ECE"),
        (flags::URG, "URG"),
        (flags::ACK, "ACK"),
        (flags::PSH, "PSH"),
        (flags::RST, "RST"),
        (flags::SYN, "SYN"),
        (flags::FIN, "FIN"),
    ];
    NAMES
        .iter()
        .filter(|(bit, _)| bits & bit != 0)
        .map(|(_, name)| *name)
        .collect::<Vec<_>>()
        .join(",")
}

/// TCP header.
#[derive(Debug, Clone, Copy)]
pub struct Tcp;

impl HeaderDefinition for Tcp {
    const NAME: &'static str = "tcp";
    const DISPLAY_NAME: &'static str = "TCP";
    const ID: Option<u16> = Some(3);

    fn declare(decl: &mut HeaderDecl) {
        decl.length(HeaderLength::Computed(header_length))
            .field(FieldDecl::bytes("src_port", 0, 2))
            .field(FieldDecl::bytes("dst_port", 2, 2))
            .field(FieldDecl::bytes("seq", 4, 4).display("Sequence Number"))
            .field(FieldDecl::bytes("ack_num", 8, 4).display("Acknowledgment Number"))
            .field(FieldDecl::bytes("offset_flags", 12, 2))
            .field(FieldDecl::sub("data_offset", "offset_flags", 0, 4).units("32-bit words"))
            .field(FieldDecl::sub("reserved", "offset_flags", 4, 3))
            .field(FieldDecl::sub("flags", "offset_flags", 7, 9))
            .field(FieldDecl::sub("ns", "flags", 0, 1))
            .field(FieldDecl::sub("cwr", "flags", 1, 1))
            .field(FieldDecl::sub("ece", "flags", 2, 1))
            .field(FieldDecl::sub("urg", "flags", 3, 1))
            .field(FieldDecl::sub("ack", "flags", 4, 1))
            .field(FieldDecl::sub("psh", "flags", 5, 1))
            .field(FieldDecl::sub("rst", "flags", 6, 1))
            .field(FieldDecl::sub("syn", "flags", 7, 1))
            .field(FieldDecl::sub("fin", "flags", 8, 1))
            .field(FieldDecl::bytes("window", 14, 2))
            .field(FieldDecl::bytes("checksum", 16, 2))
            .field(FieldDecl::bytes("urgent_pointer", 18, 2))
            .field(FieldDecl::new("options").offset(160))
            .accessor(
                "flags_description",
                Accessor::string(|view| flag_names(view.u16_at(12).unwrap_or(0) & 0x01ff)),
            )
            .accessor(
                "urgent_pointer_check",
                Accessor::boolean(|view| view.u16_at(12).is_some_and(|w| w & flags::URG != 0)),
            )
            .accessor(
                "options",
                Accessor::object(|view| {
                    FieldValue::Bytes(view.bytes().get(MIN_HEADER_LEN..).unwrap_or(&[]))
                }),
            )
            .accessor(
                "options_length",
                Accessor::int(|view| {
                    (view.length().saturating_sub(MIN_HEADER_LEN) as i32).saturating_mul(8)
                }),
            )
            .accessor(
                "options_check",
                Accessor::boolean(|view| view.length() > MIN_HEADER_LEN),
            )
            .options(
                OptionsDecl::new(MIN_HEADER_LEN).kinds(TcpOption::ALL.into_iter().map(TcpOption::decl)),
            );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ids;
    use crate::protocol::test_utils::{build_tcp_packet, scan_frame, EthernetBuilder, Ipv4Builder, TcpBuilder};

    #[test]
    fn test_tcp_syn() {
        let frame = build_tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 40000, 443, 0x02);
        let (registry, state) = scan_frame(&frame);

        let header = state.find(ids::TCP).unwrap();
        assert_eq!((header.offset, header.length), (34, 20));
        let view = registry.view(&frame, header).unwrap();

        assert_eq!(view.value("src_port"), Some(FieldValue::UInt16(40000)));
        assert_eq!(view.value("dst_port"), Some(FieldValue::UInt16(443)));
        assert_eq!(view.value("data_offset"), Some(FieldValue::UInt8(5)));
        assert_eq!(view.value("syn"), Some(FieldValue::Bool(true)));
        assert_eq!(view.value("ack"), Some(FieldValue::Bool(false)));
        assert_eq!(view.value("flags"), Some(FieldValue::UInt16(0x002)));

        let flags = view.field("flags").unwrap();
        assert_eq!(flags.description().as_deref(), Some("SYN"));
        assert_eq!(flags.mask(), 0x01ff);
        assert_eq!(view.field("syn").unwrap().mask(), 0x002);
        assert!(!view.field("urgent_pointer").unwrap().is_present());
    }

    #[test]
    fn test_flag_tree_order() {
        let frame = build_tcp_packet([10, 0, 0, 1], [10, 0, 0, 2], 1, 2, 0x12);
        let (registry, state) = scan_frame(&frame);
        let view = registry.view(&frame, state.find(ids::TCP).unwrap()).unwrap();

        let offset_flags = view.field("offset_flags").unwrap();
        let children: Vec<_> = offset_flags.children().map(|f| f.name()).collect();
        assert_eq!(children, vec!["data_offset", "reserved", "flags"]);

        let set: Vec<_> = view
            .field("flags")
            .unwrap()
            .children()
            .filter(|f| f.value() == FieldValue::Bool(true))
            .map(|f| f.name())
            .collect();
        assert_eq!(set, vec!["ack", "syn"]);
        assert_eq!(
            view.field("flags").unwrap().description().as_deref(),
            Some("ACK,SYN")
        );
    }

    #[test]
    fn test_tcp_options_chain() {
        // MSS 1460, NOP, WS 7, SACK_PERM, TS(1, 2), NOP, NOP, then EOL padding
        let options = vec![
            2, 4, 0x05, 0xb4, //
            1, 3, 3, 7, //
            4, 2, //
            8, 10, 0, 0, 0, 1, 0, 0, 0, 2, //
            1, 1,
        ];
        let tcp = TcpBuilder::new().options(options).build();
        let ip = Ipv4Builder::new().tcp().payload(tcp).build();
        let frame = EthernetBuilder::new().payload(ip).build();
        let (registry, state) = scan_frame(&frame);

        let header = state.find(ids::TCP).unwrap();
        assert_eq!(header.length, 44);
        let kinds: Vec<_> = header.options.iter().map(|o| o.kind).collect();
        assert_eq!(kinds, vec![2, 1, 3, 4, 8, 1, 1, 0]);
        assert!(header.flags.is_clean());

        let view = registry.view(&frame, header).unwrap();
        let mss = view.option(TcpOption::Mss.kind()).unwrap();
        assert_eq!(mss.value("value"), Some(FieldValue::UInt16(1460)));

        let ws = view.option(TcpOption::WindowScale.kind()).unwrap();
        let shift = ws.field("shift").unwrap();
        assert_eq!(shift.description().as_deref(), Some("multiply by 128"));

        let ts = view.option(TcpOption::Timestamps.kind()).unwrap();
        assert_eq!(ts.value("tsval"), Some(FieldValue::UInt32(1)));
        assert_eq!(ts.value("tsecr"), Some(FieldValue::UInt32(2)));

        let names: Vec<_> = view.sub_headers().map(|h| h.name()).collect();
        assert_eq!(
            names,
            vec!["mss", "nop", "window_scale", "sack_permitted", "timestamps", "nop", "nop", "eol"]
        );
    }

    #[test]
    fn test_sack_blocks() {
        let options = vec![1, 1, 5, 18, 0, 0, 0, 10, 0, 0, 0, 20, 0, 0, 0, 30, 0, 0, 0, 40];
        let tcp = TcpBuilder::new().options(options).build();
        let ip = Ipv4Builder::new().tcp().payload(tcp).build();
        let frame = EthernetBuilder::new().payload(ip).build();
        let (registry, state) = scan_frame(&frame);

        let view = registry.view(&frame, state.find(ids::TCP).unwrap()).unwrap();
        let sack = view.option(TcpOption::Sack.kind()).unwrap();
        let blocks = sack.value("blocks").unwrap();
        assert_eq!(blocks.to_string(), "[[10, 20], [30, 40]]");
        assert_eq!(sack.field("blocks").unwrap().length_bits(), 128);
    }

    #[test]
    fn test_option_overrunning_header_is_partial() {
        // MSS claims 6 bytes with only 4 left in the header
        let tcp = TcpBuilder::new().options(vec![1, 1, 2, 6]).build();
        let ip = Ipv4Builder::new().tcp().payload(tcp).build();
        let frame = EthernetBuilder::new().payload(ip).build();
        let (_, state) = scan_frame(&frame);

        let header = state.find(ids::TCP).unwrap();
        assert_eq!(header.options.len(), 2);
        assert!(header.flags.partial_options);
        assert!(state.is_partial());
    }

    #[test]
    fn test_flag_names() {
        assert_eq!(flag_names(flags::SYN | flags::ACK), "ACK,SYN");
        assert_eq!(flag_names(flags::FIN | flags::PSH | flags::ACK), "ACK,PSH,FIN");
        assert_eq!(flag_names(0), "");
    }
}
