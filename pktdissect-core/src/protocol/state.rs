//! Scan results.

use smallvec::SmallVec;

use super::{ProtocolId, ProtocolMask};

/// One decoded option (sub-header) inside a header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionEntry {
    /// Option type octet.
    pub kind: u8,
    /// Byte offset in the packet buffer.
    pub offset: usize,
    /// Byte length, type and length octets included.
    pub length: usize,
}

/// Per-header anomaly flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeaderFlags {
    /// Header extends past the captured bytes; `length` is what remains.
    pub truncated: bool,
    /// Option decoding stopped early on a malformed or unknown option.
    pub partial_options: bool,
    /// Option decoding stopped at an unrecognized type octet.
    pub unknown_option: bool,
}

impl HeaderFlags {
    pub fn is_clean(&self) -> bool {
        !(self.truncated || self.partial_options || self.unknown_option)
    }
}

/// A decoded header: a byte range of the packet plus its option index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    pub protocol: ProtocolId,
    /// Byte offset in the packet buffer.
    pub offset: usize,
    /// Byte length.
    pub length: usize,
    pub options: SmallVec<[OptionEntry; 4]>,
    pub flags: HeaderFlags,
}

impl DecodedHeader {
    pub fn new(protocol: ProtocolId, offset: usize, length: usize) -> Self {
        Self {
            protocol,
            offset,
            length,
            options: SmallVec::new(),
            flags: HeaderFlags::default(),
        }
    }

    /// Byte offset just past this header.
    pub fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// Everything the scanner learned about one packet.
///
/// Immutable once the scan completes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PacketState {
    pub(crate) headers: SmallVec<[DecodedHeader; 6]>,
    pub(crate) mask: ProtocolMask,
    pub(crate) truncated: bool,
    pub(crate) partial: bool,
    pub(crate) unregistered_start: bool,
    pub(crate) depth_exceeded: bool,
}

impl PacketState {
    /// Headers in decode order.
    pub fn headers(&self) -> &[DecodedHeader] {
        &self.headers
    }

    /// Presence bitmap.
    pub fn mask(&self) -> ProtocolMask {
        self.mask
    }

    /// O(1) presence test.
    #[inline]
    pub fn contains(&self, id: ProtocolId) -> bool {
        self.mask.contains(id)
    }

    /// First header of protocol `id`.
    pub fn find(&self, id: ProtocolId) -> Option<&DecodedHeader> {
        self.headers.iter().find(|h| h.protocol == id)
    }

    /// All headers of protocol `id` (self-looping protocols may repeat).
    pub fn find_all(&self, id: ProtocolId) -> impl Iterator<Item = &DecodedHeader> {
        self.headers.iter().filter(move |h| h.protocol == id)
    }

    pub fn last(&self) -> Option<&DecodedHeader> {
        self.headers.last()
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// A header ran past the captured bytes.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Some header's option chain was cut short.
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// The start protocol was never registered.
    pub fn is_unregistered_start(&self) -> bool {
        self.unregistered_start
    }

    /// The chain hit the configured header limit.
    pub fn depth_exceeded(&self) -> bool {
        self.depth_exceeded
    }

    /// No anomaly of any kind.
    pub fn is_complete(&self) -> bool {
        !(self.truncated || self.partial || self.unregistered_start || self.depth_exceeded)
    }

    pub(crate) fn push(&mut self, header: DecodedHeader) {
        self.mask.insert(header.protocol);
        if !header.flags.is_clean() {
            self.truncated |= header.flags.truncated;
            self.partial |= header.flags.partial_options || header.flags.unknown_option;
        }
        self.headers.push(header);
    }
}
