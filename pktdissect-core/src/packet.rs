//! Owned packets flowing through the analysis pipeline.

use bytes::Bytes;

use crate::protocol::{DecodedHeader, HeaderView, PacketState, ProtocolId, Registry, Scanner};

/// Per-packet metadata supplied by the capture layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureHeader {
    /// Capture timestamp in nanoseconds since the Unix epoch.
    pub timestamp_nanos: i64,
    /// Bytes actually captured.
    pub captured_len: usize,
    /// Original length on the wire.
    pub wire_len: usize,
}

impl CaptureHeader {
    /// Header for a packet captured in full.
    pub fn new(timestamp_nanos: i64, len: usize) -> Self {
        Self {
            timestamp_nanos,
            captured_len: len,
            wire_len: len,
        }
    }

    /// Check if the packet was truncated during capture.
    pub fn is_truncated(&self) -> bool {
        self.captured_len < self.wire_len
    }
}

/// A captured (or synthesized) packet plus its dissection.
#[derive(Debug, Clone)]
pub struct Packet {
    data: Bytes,
    header: CaptureHeader,
    start: ProtocolId,
    state: PacketState,
    dissected: bool,
    frame: u64,
    synthetic: bool,
}

impl Packet {
    /// Wrap a buffer without dissecting it yet. The controller scans
    /// undissected packets on submit.
    pub fn new(data: impl Into<Bytes>, header: CaptureHeader, start: ProtocolId) -> Self {
        Self {
            data: data.into(),
            header,
            start,
            state: PacketState::default(),
            dissected: false,
            frame: 0,
            synthetic: false,
        }
    }

    /// Wrap and dissect a buffer.
    pub fn dissect(
        scanner: &Scanner,
        data: impl Into<Bytes>,
        header: CaptureHeader,
        start: ProtocolId,
    ) -> Self {
        let mut packet = Self::new(data, header, start);
        packet.rescan(scanner);
        packet
    }

    /// A packet built by an analyzer (e.g. a reassembled datagram).
    pub fn synthetic(
        scanner: &Scanner,
        data: impl Into<Bytes>,
        timestamp_nanos: i64,
        start: ProtocolId,
    ) -> Self {
        let data = data.into();
        let header = CaptureHeader::new(timestamp_nanos, data.len());
        let mut packet = Self::dissect(scanner, data, header, start);
        packet.synthetic = true;
        packet
    }

    /// Scan the buffer again from the start protocol.
    pub fn rescan(&mut self, scanner: &Scanner) {
        self.state = scanner.scan(&self.data, self.start);
        self.dissected = true;
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// The underlying shared buffer.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capture_header(&self) -> &CaptureHeader {
        &self.header
    }

    pub fn timestamp_nanos(&self) -> i64 {
        self.header.timestamp_nanos
    }

    pub fn start(&self) -> ProtocolId {
        self.start
    }

    pub fn state(&self) -> &PacketState {
        &self.state
    }

    pub fn is_dissected(&self) -> bool {
        self.dissected
    }

    /// Frame sequence number assigned by the controller (0 before submit).
    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub(crate) fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    /// Built by an analyzer rather than captured.
    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// First decoded header of protocol `id`.
    pub fn find(&self, id: ProtocolId) -> Option<&DecodedHeader> {
        self.state.find(id)
    }

    /// View over the first header of protocol `id`.
    pub fn view<'a>(&'a self, registry: &'a Registry, id: ProtocolId) -> Option<HeaderView<'a>> {
        let header = self.state.find(id)?;
        registry.view(&self.data, header).ok()
    }
}
