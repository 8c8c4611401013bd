//! Test utilities for header dissection.
//!
//! Builders for constructing test frames, plus helpers that scan them
//! against the built-in registry.

use std::sync::Arc;

use etherparse::Ipv4HeaderSlice;

use super::{default_registry, ids, PacketState, Registry, Scanner};

/// Scan an Ethernet frame with the built-in registry.
pub fn scan_frame(frame: &[u8]) -> (Arc<Registry>, PacketState) {
    let registry = Arc::new(default_registry().expect("built-in registry"));
    let state = Scanner::new(Arc::clone(&registry)).scan(frame, ids::ETHERNET);
    (registry, state)
}

/// Builder for constructing Ethernet frames.
#[derive(Debug, Clone)]
pub struct EthernetBuilder {
    src_mac: [u8; 6],
    dst_mac: [u8; 6],
    ethertype: u16,
    payload: Vec<u8>,
}

impl Default for EthernetBuilder {
    fn default() -> Self {
        Self {
            src_mac: [0x00, 0x11, 0x22, 0x33, 0x44, 0x55],
            dst_mac: [0xff; 6],
            ethertype: 0x0800,
            payload: Vec::new(),
        }
    }
}

impl EthernetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_mac(mut self, mac: [u8; 6]) -> Self {
        self.src_mac = mac;
        self
    }

    pub fn dst_mac(mut self, mac: [u8; 6]) -> Self {
        self.dst_mac = mac;
        self
    }

    pub fn ethertype(mut self, ethertype: u16) -> Self {
        self.ethertype = ethertype;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(14 + self.payload.len());
        frame.extend_from_slice(&self.dst_mac);
        frame.extend_from_slice(&self.src_mac);
        frame.extend_from_slice(&self.ethertype.to_be_bytes());
        frame.extend_from_slice(&self.payload);
        frame
    }
}

/// Builder for constructing IPv4 datagrams with a valid header checksum.
#[derive(Debug, Clone)]
pub struct Ipv4Builder {
    tos: u8,
    identification: u16,
    dont_fragment: bool,
    more_fragments: bool,
    fragment_offset: u16,
    ttl: u8,
    protocol: u8,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    options: Vec<u8>,
    payload: Vec<u8>,
}

impl Default for Ipv4Builder {
    fn default() -> Self {
        Self {
            tos: 0,
            identification: 0x0001,
            dont_fragment: false,
            more_fragments: false,
            fragment_offset: 0,
            ttl: 64,
            protocol: 6,
            src_ip: [192, 168, 1, 1],
            dst_ip: [192, 168, 1, 2],
            options: Vec::new(),
            payload: Vec::new(),
        }
    }
}

impl Ipv4Builder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tos(mut self, tos: u8) -> Self {
        self.tos = tos;
        self
    }

    pub fn identification(mut self, id: u16) -> Self {
        self.identification = id;
        self
    }

    pub fn dont_fragment(mut self, set: bool) -> Self {
        self.dont_fragment = set;
        self
    }

    pub fn more_fragments(mut self, set: bool) -> Self {
        self.more_fragments = set;
        self
    }

    /// Fragment offset in bytes; must be a multiple of 8.
    pub fn fragment_offset(mut self, bytes: usize) -> Self {
        self.fragment_offset = (bytes / 8) as u16;
        self
    }

    pub fn ttl(mut self, ttl: u8) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn protocol(mut self, protocol: u8) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn tcp(self) -> Self {
        self.protocol(6)
    }

    pub fn udp(self) -> Self {
        self.protocol(17)
    }

    pub fn icmp(self) -> Self {
        self.protocol(1)
    }

    pub fn src_ip(mut self, ip: [u8; 4]) -> Self {
        self.src_ip = ip;
        self
    }

    pub fn dst_ip(mut self, ip: [u8; 4]) -> Self {
        self.dst_ip = ip;
        self
    }

    /// Raw option bytes, zero-padded to a 4-byte boundary.
    pub fn options(mut self, options: Vec<u8>) -> Self {
        self.options = options;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut options = self.options;
        options.resize(options.len().div_ceil(4) * 4, 0);
        let header_len = 20 + options.len();
        let total_length = (header_len + self.payload.len()) as u16;

        let mut flags_fragment = self.fragment_offset & 0x1fff;
        if self.dont_fragment {
            flags_fragment |= 0x4000;
        }
        if self.more_fragments {
            flags_fragment |= 0x2000;
        }

        let mut packet = Vec::with_capacity(total_length as usize);
        packet.push(0x40 | (header_len / 4) as u8);
        packet.push(self.tos);
        packet.extend_from_slice(&total_length.to_be_bytes());
        packet.extend_from_slice(&self.identification.to_be_bytes());
        packet.extend_from_slice(&flags_fragment.to_be_bytes());
        packet.push(self.ttl);
        packet.push(self.protocol);
        packet.extend_from_slice(&[0x00, 0x00]);
        packet.extend_from_slice(&self.src_ip);
        packet.extend_from_slice(&self.dst_ip);
        packet.extend_from_slice(&options);
        fill_checksum(&mut packet[..header_len]);
        packet.extend_from_slice(&self.payload);
        packet
    }
}

/// Recompute the checksum of an IPv4 header in place.
pub fn fill_checksum(header: &mut [u8]) {
    header[10] = 0;
    header[11] = 0;
    let checksum = Ipv4HeaderSlice::from_slice(header)
        .expect("well-formed IPv4 header")
        .to_header()
        .calc_header_checksum();
    header[10..12].copy_from_slice(&checksum.to_be_bytes());
}

/// Split an IPv4 datagram into Ethernet-framed fragments.
///
/// `cuts` are payload byte offsets (multiples of 8) where a new fragment
/// starts. Frames are returned in datagram order.
pub fn fragment_frames(datagram: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let header_len = (datagram[0] & 0x0f) as usize * 4;
    let header = &datagram[..header_len];
    let payload = &datagram[header_len..];

    let mut bounds = vec![0];
    bounds.extend(cuts.iter().copied().filter(|&c| c > 0 && c < payload.len()));
    bounds.push(payload.len());

    bounds
        .windows(2)
        .map(|pair| {
            let (start, end) = (pair[0], pair[1]);
            let mut packet = header.to_vec();
            let total = (header_len + end - start) as u16;
            packet[2..4].copy_from_slice(&total.to_be_bytes());
            let mut word = ((start / 8) as u16) & 0x1fff;
            if end < payload.len() {
                word |= 0x2000;
            }
            word |= u16::from_be_bytes([header[6], header[7]]) & 0x4000;
            packet[6..8].copy_from_slice(&word.to_be_bytes());
            fill_checksum(&mut packet[..header_len]);
            packet.extend_from_slice(&payload[start..end]);
            EthernetBuilder::new().payload(packet).build()
        })
        .collect()
}

/// Builder for constructing TCP headers.
#[derive(Debug, Clone)]
pub struct TcpBuilder {
    src_port: u16,
    dst_port: u16,
    seq: u32,
    ack: u32,
    flags: u16,
    window: u16,
    urgent_pointer: u16,
    options: Vec<u8>,
    payload: Vec<u8>,
}

impl Default for TcpBuilder {
    fn default() -> Self {
        Self {
            src_port: 12345,
            dst_port: 80,
            seq: 1,
            ack: 0,
            flags: 0x02,
            window: 65535,
            urgent_pointer: 0,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }
}

impl TcpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }

    pub fn ack_num(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags;
        self
    }

    pub fn window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    pub fn urgent_pointer(mut self, pointer: u16) -> Self {
        self.urgent_pointer = pointer;
        self
    }

    /// Raw option bytes, zero-padded to a 4-byte boundary.
    pub fn options(mut self, options: Vec<u8>) -> Self {
        self.options = options;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut options = self.options;
        options.resize(options.len().div_ceil(4) * 4, 0);
        let data_offset = ((20 + options.len()) / 4) as u16;
        let offset_flags = (data_offset << 12) | (self.flags & 0x01ff);

        let mut header = Vec::with_capacity(20 + options.len() + self.payload.len());
        header.extend_from_slice(&self.src_port.to_be_bytes());
        header.extend_from_slice(&self.dst_port.to_be_bytes());
        header.extend_from_slice(&self.seq.to_be_bytes());
        header.extend_from_slice(&self.ack.to_be_bytes());
        header.extend_from_slice(&offset_flags.to_be_bytes());
        header.extend_from_slice(&self.window.to_be_bytes());
        header.extend_from_slice(&[0x00, 0x00]);
        header.extend_from_slice(&self.urgent_pointer.to_be_bytes());
        header.extend_from_slice(&options);
        header.extend_from_slice(&self.payload);
        header
    }
}

/// Builder for constructing UDP headers.
#[derive(Debug, Clone)]
pub struct UdpBuilder {
    src_port: u16,
    dst_port: u16,
    payload: Vec<u8>,
}

impl Default for UdpBuilder {
    fn default() -> Self {
        Self {
            src_port: 12345,
            dst_port: 53,
            payload: Vec::new(),
        }
    }
}

impl UdpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn src_port(mut self, port: u16) -> Self {
        self.src_port = port;
        self
    }

    pub fn dst_port(mut self, port: u16) -> Self {
        self.dst_port = port;
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let length = 8 + self.payload.len() as u16;
        let mut header = Vec::with_capacity(8 + self.payload.len());
        header.extend_from_slice(&self.src_port.to_be_bytes());
        header.extend_from_slice(&self.dst_port.to_be_bytes());
        header.extend_from_slice(&length.to_be_bytes());
        header.extend_from_slice(&[0x00, 0x00]);
        header.extend_from_slice(&self.payload);
        header
    }
}

/// Builder for constructing ICMP messages.
#[derive(Debug, Clone)]
pub struct IcmpBuilder {
    icmp_type: u8,
    code: u8,
    rest: [u8; 4],
    payload: Vec<u8>,
}

impl Default for IcmpBuilder {
    fn default() -> Self {
        Self {
            icmp_type: 8,
            code: 0,
            rest: [0x00, 0x01, 0x00, 0x01],
            payload: Vec::new(),
        }
    }
}

impl IcmpBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn echo_request(mut self) -> Self {
        self.icmp_type = 8;
        self.code = 0;
        self
    }

    pub fn echo_reply(mut self) -> Self {
        self.icmp_type = 0;
        self.code = 0;
        self
    }

    pub fn destination_unreachable(mut self, code: u8) -> Self {
        self.icmp_type = 3;
        self.code = code;
        self.rest = [0; 4];
        self
    }

    pub fn identifier(mut self, id: u16) -> Self {
        self.rest[..2].copy_from_slice(&id.to_be_bytes());
        self
    }

    pub fn sequence(mut self, seq: u16) -> Self {
        self.rest[2..].copy_from_slice(&seq.to_be_bytes());
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(8 + self.payload.len());
        packet.push(self.icmp_type);
        packet.push(self.code);
        packet.extend_from_slice(&[0x00, 0x00]);
        packet.extend_from_slice(&self.rest);
        packet.extend_from_slice(&self.payload);
        packet
    }
}

/// Build a complete Ethernet + IPv4 + TCP frame.
pub fn build_tcp_packet(
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    src_port: u16,
    dst_port: u16,
    flags: u16,
) -> Vec<u8> {
    let tcp = TcpBuilder::new()
        .src_port(src_port)
        .dst_port(dst_port)
        .flags(flags)
        .build();
    let ip = Ipv4Builder::new()
        .tcp()
        .src_ip(src_ip)
        .dst_ip(dst_ip)
        .payload(tcp)
        .build();
    EthernetBuilder::new().payload(ip).build()
}

/// Build a complete Ethernet + IPv4 + UDP frame.
pub fn build_udp_packet(src_port: u16, dst_port: u16, payload: Vec<u8>) -> Vec<u8> {
    let udp = UdpBuilder::new()
        .src_port(src_port)
        .dst_port(dst_port)
        .payload(payload)
        .build();
    let ip = Ipv4Builder::new().udp().payload(udp).build();
    EthernetBuilder::new().payload(ip).build()
}
