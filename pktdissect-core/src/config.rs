//! Configuration for scanning, analysis and reassembly.
//!
//! Every struct has usable defaults and deserializes with missing keys filled
//! from them, so a partial config file is enough.

use serde::{Deserialize, Serialize};

/// Dissection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Maximum headers decoded per packet; guards against binding self-loops.
    pub max_headers: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { max_headers: 32 }
    }
}

/// Analysis controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Buffered output bytes above which output drains despite holds.
    pub output_byte_cap: usize,
    /// Capacity of the dispatch thread's queue.
    pub dispatch_queue_depth: usize,
    /// How long a hand-off to a full dispatch queue may block (milliseconds).
    pub dispatch_send_timeout_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            output_byte_cap: 64 * 1024 * 1024, // 64 MB
            dispatch_queue_depth: 1024,
            dispatch_send_timeout_ms: 100,
        }
    }
}

/// IPv4 fragment reassembly settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentConfig {
    /// Capture-time budget for a sequence to complete (nanoseconds).
    pub timeout_nanos: i64,
    /// In-flight sequences tracked at once; new flows beyond this are ignored.
    pub max_sequences: usize,
    /// Largest reassembled datagram accepted, IP header included.
    pub max_datagram_len: usize,
    /// Suppress the original fragments from output once seen.
    pub consume_fragments: bool,
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            timeout_nanos: 30_000_000_000, // 30 seconds
            max_sequences: 4096,
            max_datagram_len: 65_535,
            consume_fragments: false,
        }
    }
}
