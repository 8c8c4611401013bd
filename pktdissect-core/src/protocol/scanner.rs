//! Header-chain scanner.

use std::sync::Arc;

use tracing::trace;

use crate::config::ScanConfig;
use crate::schema::OptionLayout;

use super::{
    BindingContext, DecodedHeader, HeaderView, OptionEntry, PacketState, ProtocolId, Registry,
};

/// Walks a packet buffer along the registry's binding graph.
///
/// Scanning is total: every buffer yields a [`PacketState`], with anomalies
/// recorded as flags.
#[derive(Debug, Clone)]
pub struct Scanner {
    registry: Arc<Registry>,
    config: ScanConfig,
}

impl Scanner {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_config(registry, ScanConfig::default())
    }

    pub fn with_config(registry: Arc<Registry>, config: ScanConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    /// Decode `buffer` starting with protocol `start`.
    pub fn scan(&self, buffer: &[u8], start: ProtocolId) -> PacketState {
        let registry = &*self.registry;
        let mut state = PacketState::default();

        if !registry.contains(start) {
            trace!(start = start.0, "scan start protocol not registered");
            state.unregistered_start = true;
            push_payload(&mut state, buffer, 0);
            return state;
        }

        let mut offset = 0usize;
        let mut current = start;
        loop {
            if state.len() >= self.config.max_headers {
                trace!(headers = state.len(), "header limit reached");
                state.depth_exceeded = true;
                push_payload(&mut state, buffer, offset);
                break;
            }
            let Ok(schema) = registry.schema(current) else {
                break;
            };
            let remaining = buffer.len() - offset;

            let mut header = match schema.length().resolve(buffer, offset) {
                Some(len) if len > 0 && len <= remaining => DecodedHeader::new(current, offset, len),
                Some(len) if len > remaining && remaining > 0 => {
                    trace!(
                        protocol = schema.name(),
                        offset,
                        declared = len,
                        remaining,
                        "header truncated"
                    );
                    let mut header = DecodedHeader::new(current, offset, remaining);
                    header.flags.truncated = true;
                    if let Some(layout) = schema.options() {
                        decode_options(buffer, &mut header, layout);
                    }
                    state.push(header);
                    break;
                }
                declared => {
                    trace!(protocol = schema.name(), offset, ?declared, remaining, "no room for header");
                    state.truncated = true;
                    push_payload(&mut state, buffer, offset);
                    break;
                }
            };

            if let Some(layout) = schema.options() {
                decode_options(buffer, &mut header, layout);
            }

            let next_offset = header.end();
            state.push(header);

            let next = state.last().and_then(|decoded| {
                let ctx = BindingContext {
                    state: &state,
                    current: HeaderView::new(buffer, decoded, schema),
                    buffer,
                    offset: next_offset,
                };
                registry.resolve_next(current, &ctx)
            });

            match next {
                Some(id) => {
                    current = id;
                    offset = next_offset;
                }
                None => {
                    push_payload(&mut state, buffer, next_offset);
                    break;
                }
            }
        }

        state
    }
}

/// Attribute `buffer[offset..]` to the payload pseudo-header.
fn push_payload(state: &mut PacketState, buffer: &[u8], offset: usize) {
    if offset < buffer.len() {
        state.push(DecodedHeader::new(
            ProtocolId::PAYLOAD,
            offset,
            buffer.len() - offset,
        ));
    }
}

/// Index the option chain of `header`.
///
/// Stops at an end-of-list option, an unknown type octet, or a length that is
/// malformed or runs past the header.
fn decode_options(buffer: &[u8], header: &mut DecodedHeader, layout: &OptionLayout) {
    let end = header.end().min(buffer.len());
    let mut pos = header.offset + layout.start();

    while pos < end {
        let kind = buffer[pos];
        let Some(sub) = layout.lookup(kind) else {
            trace!(kind, pos, "unknown option type");
            header.flags.unknown_option = true;
            break;
        };
        let min_len = if sub.schema().length().is_length_octet() { 2 } else { 1 };
        let len = match sub.schema().length().resolve(buffer, pos) {
            Some(len) if len >= min_len && pos + len <= end => len,
            declared => {
                trace!(kind, pos, ?declared, "malformed option length");
                header.flags.partial_options = true;
                break;
            }
        };
        header.options.push(OptionEntry {
            kind,
            offset: pos,
            length: len,
        });
        if sub.is_end_of_list() {
            break;
        }
        pos += len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{
        FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength, OptionsDecl, SubHeaderDecl,
    };

    struct Link;

    impl HeaderDefinition for Link {
        const NAME: &'static str = "link";

        fn declare(decl: &mut HeaderDecl) {
            decl.length(HeaderLength::Fixed(14))
                .field(FieldDecl::bytes("dst", 0, 6))
                .field(FieldDecl::bytes("src", 6, 6))
                .field(FieldDecl::bytes("ethertype", 12, 2));
        }
    }

    struct Net;

    impl HeaderDefinition for Net {
        const NAME: &'static str = "net";

        fn declare(decl: &mut HeaderDecl) {
            decl.length(HeaderLength::Computed(|buffer, start| {
                buffer.get(start).map(|b| ((b & 0x0f) as usize) * 4)
            }))
            .field(FieldDecl::bytes("version_ihl", 0, 1))
            .field(FieldDecl::sub("ihl", "version_ihl", 4, 4))
            .options(
                OptionsDecl::new(4)
                    .kind(SubHeaderDecl::single_octet(0, "eol").end_of_list())
                    .kind(SubHeaderDecl::single_octet(1, "nop"))
                    .kind(
                        SubHeaderDecl::new(2, "tlv")
                            .length_octet(1)
                            .field(FieldDecl::bytes("type", 0, 1))
                            .field(FieldDecl::bytes("len", 1, 1)),
                    ),
            );
        }
    }

    fn scanner() -> (Scanner, ProtocolId, ProtocolId) {
        let mut builder = Registry::builder();
        builder
            .register::<Link>()
            .register::<Net>()
            .bind::<Link, Net>("ethertype", 0, |ctx| ctx.field_u64("ethertype") == Some(0x0800))
            .bind::<Net, Net>("repeat", 0, |ctx| ctx.remaining().first() == Some(&0x42));
        let registry = Arc::new(builder.build().unwrap());
        let link = registry.id_of::<Link>().unwrap();
        let net = registry.id_of::<Net>().unwrap();
        (Scanner::new(registry), link, net)
    }

    fn link_header() -> Vec<u8> {
        let mut buf = vec![0u8; 14];
        buf[12] = 0x08;
        buf[13] = 0x00;
        buf
    }

    #[test]
    fn test_two_header_chain() {
        let (scanner, link, net) = scanner();
        let mut buf = link_header();
        buf.push(0x45);
        buf.extend_from_slice(&[0u8; 19]);
        assert_eq!(buf.len(), 34);

        let state = scanner.scan(&buf, link);
        let layout: Vec<_> = state
            .headers()
            .iter()
            .map(|h| (h.protocol, h.offset, h.length))
            .collect();
        assert_eq!(layout, vec![(link, 0, 14), (net, 14, 20)]);
        assert!(state.is_complete());
        assert!(state.contains(link) && state.contains(net));
        assert!(!state.contains(ProtocolId::PAYLOAD));
    }

    #[test]
    fn test_remaining_bytes_become_payload() {
        let (scanner, link, _) = scanner();
        let mut buf = link_header();
        buf[12] = 0x86;
        buf[13] = 0xdd;
        buf.extend_from_slice(b"abc");

        let state = scanner.scan(&buf, link);
        assert_eq!(state.len(), 2);
        let payload = &state.headers()[1];
        assert_eq!(payload.protocol, ProtocolId::PAYLOAD);
        assert_eq!((payload.offset, payload.length), (14, 3));
    }

    #[test]
    fn test_truncated_header() {
        let (scanner, link, net) = scanner();
        let mut buf = link_header();
        buf.push(0x46); // 24 bytes declared
        buf.extend_from_slice(&[0u8; 5]);

        let state = scanner.scan(&buf, link);
        assert!(state.is_truncated());
        let last = state.last().unwrap();
        assert_eq!((last.protocol, last.offset, last.length), (net, 14, 6));
        assert!(last.flags.truncated);
    }

    #[test]
    fn test_zero_length_stops_chain() {
        let (scanner, link, _) = scanner();
        let mut buf = link_header();
        buf.extend_from_slice(&[0x40, 1, 2, 3]); // ihl = 0

        let state = scanner.scan(&buf, link);
        assert!(state.is_truncated());
        assert_eq!(state.len(), 2);
        assert_eq!(state.headers()[1].protocol, ProtocolId::PAYLOAD);
    }

    #[test]
    fn test_empty_and_short_buffers() {
        let (scanner, link, _) = scanner();
        let state = scanner.scan(&[], link);
        assert!(state.is_empty());
        assert!(state.is_truncated());

        let state = scanner.scan(&[1, 2, 3], link);
        assert_eq!(state.len(), 1);
        assert_eq!(state.headers()[0].length, 3);
        assert!(state.is_truncated());
    }

    #[test]
    fn test_unregistered_start() {
        let (scanner, _, _) = scanner();
        let state = scanner.scan(&[1, 2, 3], ProtocolId(77));
        assert!(state.is_unregistered_start());
        assert_eq!(state.headers()[0].protocol, ProtocolId::PAYLOAD);
    }

    #[test]
    fn test_option_chain() {
        let (scanner, _, net) = scanner();
        // ihl = 3: 4 fixed bytes, then nop, tlv(len 3), eol, pad
        let buf = [0x43, 0, 0, 0, 1, 2, 3, 0xaa, 0, 0, 0, 0];
        let state = scanner.scan(&buf, net);

        let header = &state.headers()[0];
        let kinds: Vec<_> = header.options.iter().map(|o| (o.kind, o.offset, o.length)).collect();
        assert_eq!(kinds, vec![(1, 4, 1), (2, 5, 3), (0, 8, 1)]);
        assert!(header.flags.is_clean());
    }

    #[test]
    fn test_malformed_option_is_partial() {
        let (scanner, _, net) = scanner();
        // tlv claims 9 bytes inside an 8-byte header
        let buf = [0x42, 0, 0, 0, 1, 2, 9, 0];
        let state = scanner.scan(&buf, net);

        let header = &state.headers()[0];
        assert_eq!(header.length, 8);
        assert_eq!(header.options.len(), 1);
        assert!(header.flags.partial_options);
        assert!(state.is_partial());

        // length octet below the minimum
        let buf = [0x42, 0, 0, 0, 2, 1, 0, 0];
        let state = scanner.scan(&buf, net);
        assert!(state.headers()[0].options.is_empty());
        assert!(state.is_partial());
    }

    #[test]
    fn test_unknown_option_stops_decoding() {
        let (scanner, _, net) = scanner();
        let buf = [0x42, 0, 0, 0, 1, 7, 1, 1];
        let state = scanner.scan(&buf, net);
        let header = &state.headers()[0];
        assert_eq!(header.options.len(), 1);
        assert!(header.flags.unknown_option);
    }

    #[test]
    fn test_self_loop_bounded_by_depth() {
        let (scanner, _, net) = scanner();
        // every header is 0x42 (ihl 2 = 8 bytes) and binds to itself
        let buf: Vec<u8> = std::iter::repeat([0x42, 0, 0, 0, 1, 1, 1, 1])
            .take(40)
            .flatten()
            .collect();
        let state = scanner.scan(&buf, net);
        assert!(state.depth_exceeded());
        assert_eq!(state.find_all(net).count(), 32);
        assert_eq!(state.last().unwrap().protocol, ProtocolId::PAYLOAD);
    }

    #[test]
    fn test_scan_is_idempotent() {
        let (scanner, link, _) = scanner();
        let mut buf = link_header();
        buf.extend_from_slice(&[0x43, 0, 0, 0, 1, 2, 3, 0xaa, 0, 0, 0, 0, 0x42, 0, 0]);
        assert_eq!(scanner.scan(&buf, link), scanner.scan(&buf, link));
    }
}
