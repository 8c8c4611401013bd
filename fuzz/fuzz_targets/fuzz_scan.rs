//! Fuzz target for the scanner.
//!
//! Scans arbitrary bytes from the start protocol of each supported link type
//! and evaluates every field of every decoded header. Nothing may panic and
//! no header may extend past the buffer.

#![no_main]

use std::sync::{Arc, OnceLock};

use libfuzzer_sys::fuzz_target;
use pktdissect_core::{default_registry, link_type_protocol, Scanner};

fn scanner() -> &'static Scanner {
    static SCANNER: OnceLock<Scanner> = OnceLock::new();
    SCANNER.get_or_init(|| Scanner::new(Arc::new(default_registry().expect("builtin protocols"))))
}

fuzz_target!(|data: &[u8]| {
    let scanner = scanner();
    for link_type in [1u16, 101] {
        let Some(start) = link_type_protocol(link_type) else {
            continue;
        };
        let state = scanner.scan(data, start);
        assert_eq!(state, scanner.scan(data, start));

        for header in state.headers() {
            assert!(header.end() <= data.len());
            let Ok(view) = scanner.registry().view(data, header) else {
                continue;
            };
            for field in view.fields() {
                let _ = field.value();
                let _ = field.description();
            }
        }
    }
});
