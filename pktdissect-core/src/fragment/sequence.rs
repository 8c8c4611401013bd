//! Per-datagram fragment tracking.

use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::Ipv4Addr;

use bytes::Bytes;

/// Identifies the datagram a fragment belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub identification: u16,
    pub protocol: u8,
}

impl FragmentKey {
    /// Key from a raw IPv4 header.
    pub fn from_header(header: &[u8]) -> Option<Self> {
        if header.len() < 20 {
            return None;
        }
        Some(Self {
            src: Ipv4Addr::new(header[12], header[13], header[14], header[15]),
            dst: Ipv4Addr::new(header[16], header[17], header[18], header[19]),
            identification: u16::from_be_bytes([header[4], header[5]]),
            protocol: header[9],
        })
    }

    /// 64-bit flow hash of the key, for correlating log lines.
    ///
    /// Stable within one build only: the std hasher may change between Rust
    /// releases, so the value must not be persisted or compared across runs
    /// of different binaries.
    pub fn flow_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Display for FragmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} id={:#06x} proto={}",
            self.src, self.dst, self.identification, self.protocol
        )
    }
}

/// One fragment as seen on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Payload offset in bytes.
    pub offset: usize,
    /// More-fragments flag.
    pub more: bool,
    pub payload: Bytes,
    pub timestamp_nanos: i64,
}

impl Fragment {
    pub fn end(&self) -> usize {
        self.offset + self.payload.len()
    }
}

/// Result of adding a fragment to a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert {
    /// New bytes were covered.
    Added,
    /// Exactly the same range was already covered.
    Duplicate,
    /// The sequence can never complete correctly.
    Violation(Violation),
}

/// Protocol violations that abandon a sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    /// The fragment partially overlaps bytes already covered.
    Overlap,
    /// Bytes beyond the end declared by the last fragment.
    PastEnd,
    /// Two last fragments disagree on the datagram length.
    ConflictingEnd,
    /// A non-last fragment whose payload is not a multiple of 8 bytes.
    Misaligned,
    /// The datagram would exceed the configured maximum.
    TooLarge,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Violation::Overlap => "overlapping fragment",
            Violation::PastEnd => "fragment past declared end",
            Violation::ConflictingEnd => "conflicting last fragments",
            Violation::Misaligned => "misaligned fragment length",
            Violation::TooLarge => "datagram too large",
        };
        f.write_str(text)
    }
}

/// Fragments of one datagram collected so far.
///
/// Covered payload ranges never overlap: an overlapping fragment is reported
/// as a [`Violation`] and not stored.
#[derive(Debug)]
pub struct FragmentSequence {
    key: FragmentKey,
    token: u64,
    deadline: i64,
    max_payload: usize,
    /// Covered ranges keyed by start offset.
    fragments: BTreeMap<usize, Fragment>,
    /// IPv4 header of the offset-zero fragment.
    first_header: Option<Bytes>,
    /// Payload length declared by the last fragment.
    total: Option<usize>,
    covered: usize,
    latest_arrival: i64,
}

impl FragmentSequence {
    pub fn new(key: FragmentKey, token: u64, deadline: i64, max_payload: usize) -> Self {
        Self {
            key,
            token,
            deadline,
            max_payload,
            fragments: BTreeMap::new(),
            first_header: None,
            total: None,
            covered: 0,
            latest_arrival: i64::MIN,
        }
    }

    pub fn key(&self) -> &FragmentKey {
        &self.key
    }

    /// Unique token of this sequence, used to route its timeout.
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    pub fn first_header(&self) -> Option<&Bytes> {
        self.first_header.as_ref()
    }

    pub fn total(&self) -> Option<usize> {
        self.total
    }

    /// Payload bytes covered so far.
    pub fn covered(&self) -> usize {
        self.covered
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Latest timestamp among the fragments seen.
    pub fn latest_arrival(&self) -> i64 {
        self.latest_arrival
    }

    /// Add a fragment; `header` is its IPv4 header, kept if it is the first.
    pub fn insert(&mut self, header: &Bytes, fragment: Fragment) -> Insert {
        let (start, end) = (fragment.offset, fragment.end());

        if end > self.max_payload {
            return Insert::Violation(Violation::TooLarge);
        }
        if fragment.more && fragment.payload.len() % 8 != 0 {
            return Insert::Violation(Violation::Misaligned);
        }

        if !fragment.more {
            match self.total {
                Some(total) if total != end => return Insert::Violation(Violation::ConflictingEnd),
                Some(_) => {}
                None => {
                    if self.fragments.values().any(|f| f.end() > end) {
                        return Insert::Violation(Violation::PastEnd);
                    }
                    self.total = Some(end);
                }
            }
        } else if self.total.is_some_and(|total| end > total) {
            return Insert::Violation(Violation::PastEnd);
        }

        if start == end {
            self.latest_arrival = self.latest_arrival.max(fragment.timestamp_nanos);
            return Insert::Added;
        }

        if let Some(existing) = self.fragments.get(&start) {
            if existing.end() == end {
                return Insert::Duplicate;
            }
            return Insert::Violation(Violation::Overlap);
        }
        let before = self.fragments.range(..start).next_back();
        if before.is_some_and(|(_, f)| f.end() > start) {
            return Insert::Violation(Violation::Overlap);
        }
        let after = self.fragments.range(start..).next();
        if after.is_some_and(|(&next, _)| next < end) {
            return Insert::Violation(Violation::Overlap);
        }

        if start == 0 {
            self.first_header = Some(header.clone());
        }
        self.covered += end - start;
        self.latest_arrival = self.latest_arrival.max(fragment.timestamp_nanos);
        self.fragments.insert(start, fragment);
        Insert::Added
    }

    /// The last fragment is known and `[0, total)` is covered without gaps.
    pub fn is_complete(&self) -> bool {
        match self.total {
            Some(total) => self.first_header.is_some() && self.covered == total,
            None => false,
        }
    }

    /// Payload fragments in offset order.
    pub fn fragments(&self) -> impl Iterator<Item = &Fragment> {
        self.fragments.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> FragmentKey {
        FragmentKey {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            identification: 42,
            protocol: 17,
        }
    }

    fn frag(offset: usize, len: usize, more: bool, ts: i64) -> Fragment {
        Fragment {
            offset,
            more,
            payload: Bytes::from(vec![offset as u8; len]),
            timestamp_nanos: ts,
        }
    }

    fn sequence() -> FragmentSequence {
        FragmentSequence::new(key(), 1, 1_000, 65_515)
    }

    #[test]
    fn test_completes_in_any_order() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();

        assert_eq!(seq.insert(&header, frag(1400, 100, false, 3)), Insert::Added);
        assert!(!seq.is_complete());
        assert_eq!(seq.insert(&header, frag(0, 800, true, 1)), Insert::Added);
        assert!(!seq.is_complete());
        assert_eq!(seq.insert(&header, frag(800, 600, true, 2)), Insert::Added);

        assert!(seq.is_complete());
        assert_eq!(seq.total(), Some(1500));
        assert_eq!(seq.latest_arrival(), 3);
        let offsets: Vec<_> = seq.fragments().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 800, 1400]);
    }

    #[test]
    fn test_gap_is_not_complete() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();
        seq.insert(&header, frag(0, 800, true, 1));
        seq.insert(&header, frag(1400, 100, false, 2));
        assert_eq!(seq.covered(), 900);
        assert!(!seq.is_complete());
    }

    #[test]
    fn test_duplicate_and_overlap() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();
        assert_eq!(seq.insert(&header, frag(0, 800, true, 1)), Insert::Added);
        assert_eq!(seq.insert(&header, frag(0, 800, true, 2)), Insert::Duplicate);
        assert_eq!(
            seq.insert(&header, frag(400, 800, true, 3)),
            Insert::Violation(Violation::Overlap)
        );
        assert_eq!(
            seq.insert(&header, frag(0, 400, true, 3)),
            Insert::Violation(Violation::Overlap)
        );
        assert_eq!(seq.covered(), 800);
    }

    #[test]
    fn test_late_duplicate_keeps_latest_arrival() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();
        seq.insert(&header, frag(0, 800, true, 1));
        seq.insert(&header, frag(1400, 100, false, 2));
        assert_eq!(seq.insert(&header, frag(0, 800, true, 50)), Insert::Duplicate);
        assert_eq!(seq.latest_arrival(), 2);

        // Rejected fragments do not count either.
        let _ = seq.insert(&header, frag(400, 800, true, 60));
        assert_eq!(seq.latest_arrival(), 2);

        seq.insert(&header, frag(800, 600, true, 3));
        assert!(seq.is_complete());
        assert_eq!(seq.latest_arrival(), 3);
    }

    #[test]
    fn test_overlap_with_following_fragment() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();
        seq.insert(&header, frag(800, 600, true, 1));
        assert_eq!(
            seq.insert(&header, frag(0, 808, true, 2)),
            Insert::Violation(Violation::Overlap)
        );
    }

    #[test]
    fn test_end_violations() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();
        seq.insert(&header, frag(0, 800, false, 1));
        assert_eq!(
            seq.insert(&header, frag(800, 8, true, 2)),
            Insert::Violation(Violation::PastEnd)
        );
        assert_eq!(
            seq.insert(&header, frag(800, 8, false, 2)),
            Insert::Violation(Violation::ConflictingEnd)
        );

        let mut seq = sequence();
        seq.insert(&header, frag(800, 800, true, 1));
        assert_eq!(
            seq.insert(&header, frag(0, 800, false, 2)),
            Insert::Violation(Violation::PastEnd)
        );
    }

    #[test]
    fn test_size_and_alignment() {
        let header = Bytes::from_static(&[0x45; 20]);
        let mut seq = sequence();
        assert_eq!(
            seq.insert(&header, frag(0, 7, true, 1)),
            Insert::Violation(Violation::Misaligned)
        );
        assert_eq!(
            seq.insert(&header, frag(65_512, 8, false, 1)),
            Insert::Violation(Violation::TooLarge)
        );
    }

    #[test]
    fn test_key_and_hash() {
        let mut header = [0u8; 20];
        header[4..6].copy_from_slice(&42u16.to_be_bytes());
        header[9] = 17;
        header[12..16].copy_from_slice(&[10, 0, 0, 1]);
        header[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let parsed = FragmentKey::from_header(&header).unwrap();
        assert_eq!(parsed, key());
        assert_eq!(parsed.flow_hash(), key().flow_hash());
        assert_eq!(parsed.to_string(), "10.0.0.1 -> 10.0.0.2 id=0x002a proto=17");
        assert!(FragmentKey::from_header(&header[..19]).is_none());
    }
}
