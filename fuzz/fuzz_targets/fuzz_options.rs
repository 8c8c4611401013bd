//! Fuzz target for IPv4 and TCP option chains.
//!
//! Places fuzzer bytes in the option area of an otherwise well-formed IPv4
//! header, then of a TCP header, so the option decoder sees input raw frames
//! would rarely reach.

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use pktdissect_core::protocol::ids;
use pktdissect_core::{default_registry, Scanner};

fn scanner() -> &'static Scanner {
    static SCANNER: OnceLock<Scanner> = OnceLock::new();
    SCANNER.get_or_init(|| Scanner::new(Arc::new(default_registry().expect("builtin protocols"))))
}

fn check(scanner: &Scanner, buffer: &[u8]) {
    let state = scanner.scan(buffer, ids::IPV4);
    for header in state.headers() {
        for option in &header.options {
            assert!(option.offset + option.length <= header.end());
        }
        if let Ok(view) = scanner.registry().view(buffer, header) {
            for option in view.sub_headers() {
                for field in option.fields() {
                    let _ = field.value();
                }
            }
        }
    }
}

fuzz_target!(|data: &[u8]| {
    let options = &data[..data.len().min(40)];
    let words = options.len().div_ceil(4);

    let mut ip = vec![0u8; 20];
    ip[0] = 0x40 | (5 + words) as u8;
    ip[9] = 6;
    ip.extend_from_slice(options);
    ip.resize(20 + words * 4, 0);
    check(scanner(), &ip);

    let mut packet = vec![0u8; 40];
    packet[0] = 0x45;
    packet[9] = 6;
    packet[32] = ((5 + words) as u8) << 4;
    packet.extend_from_slice(options);
    packet.resize(40 + words * 4, 0);
    check(scanner(), &packet);
});
