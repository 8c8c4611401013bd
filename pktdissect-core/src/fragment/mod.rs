//! IPv4 fragment reassembly.
//!
//! [`IpFragmentAnalyzer`] plugs into the [`Controller`](crate::analysis::Controller)
//! on the IPv4 protocol ID. Fragments are grouped by [`FragmentKey`] into a
//! [`FragmentSequence`] that tracks exactly which payload ranges are covered;
//! once the last fragment is known and `[0, total)` is covered, the datagram is
//! rebuilt, re-dissected from IPv4 and fed back into the controller one
//! nanosecond after its latest fragment.
//!
//! Sequences that miss their deadline, or that see overlapping, oversized or
//! out-of-range fragments, are dropped without output. Their key is ignored
//! for one timeout period afterwards so stragglers cannot start a new one.

mod assembler;
mod sequence;

pub use assembler::{FragmentStats, FragmentStatsHandle, IpFragmentAnalyzer};
pub use sequence::{Fragment, FragmentKey, FragmentSequence, Insert, Violation};
