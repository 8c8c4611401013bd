//! IPv4 reassembly analyzer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use etherparse::Ipv4HeaderSlice;
use tracing::{debug, trace, warn};

use crate::analysis::{Analyzer, AnalyzerContext, Verdict};
use crate::config::FragmentConfig;
use crate::error::AnalysisError;
use crate::packet::Packet;
use crate::protocol::Ipv4;

use super::sequence::{Fragment, FragmentKey, FragmentSequence, Insert, Violation};

const MF: u16 = 0x2000;
const OFFSET_MASK: u16 = 0x1fff;

#[derive(Debug, Default)]
struct Counters {
    fragments: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    abandoned: AtomicU64,
    duplicates: AtomicU64,
    late: AtomicU64,
    overflow: AtomicU64,
    unusable: AtomicU64,
}

/// Snapshot of reassembly activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FragmentStats {
    /// Fragments examined.
    pub fragments: u64,
    /// Sequences opened.
    pub started: u64,
    /// Datagrams rebuilt and injected.
    pub completed: u64,
    /// Sequences whose deadline passed.
    pub timed_out: u64,
    /// Sequences dropped on a protocol violation.
    pub abandoned: u64,
    /// Fragments repeating a range already held.
    pub duplicates: u64,
    /// Fragments of a sequence that already timed out or was abandoned.
    pub late: u64,
    /// New sequences ignored because the table was full.
    pub overflow: u64,
    /// Fragments whose header or payload was not fully captured.
    pub unusable: u64,
}

/// Cloneable view of an analyzer's counters, usable after the analyzer has
/// been moved into a controller.
#[derive(Debug, Clone)]
pub struct FragmentStatsHandle(Arc<Counters>);

impl FragmentStatsHandle {
    pub fn snapshot(&self) -> FragmentStats {
        let c = &self.0;
        FragmentStats {
            fragments: c.fragments.load(Ordering::Relaxed),
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            abandoned: c.abandoned.load(Ordering::Relaxed),
            duplicates: c.duplicates.load(Ordering::Relaxed),
            late: c.late.load(Ordering::Relaxed),
            overflow: c.overflow.load(Ordering::Relaxed),
            unusable: c.unusable.load(Ordering::Relaxed),
        }
    }
}

/// A fragment pulled out of a packet.
struct Parsed {
    key: FragmentKey,
    header: Bytes,
    fragment: Fragment,
}

/// Reassembles fragmented IPv4 datagrams.
///
/// Register on the IPv4 protocol ID. The first fragment of each datagram
/// takes a hold on the controller's output, so nothing captured after it is
/// delivered before the rebuilt datagram. The hold is released on
/// completion, timeout or abandonment.
pub struct IpFragmentAnalyzer {
    config: FragmentConfig,
    sequences: HashMap<FragmentKey, FragmentSequence>,
    tokens: HashMap<u64, FragmentKey>,
    /// Keys that timed out or were abandoned, until the given time.
    tombstones: HashMap<FragmentKey, i64>,
    next_token: u64,
    counters: Arc<Counters>,
}

impl IpFragmentAnalyzer {
    pub fn new(config: FragmentConfig) -> Self {
        Self {
            config,
            sequences: HashMap::new(),
            tokens: HashMap::new(),
            tombstones: HashMap::new(),
            next_token: 0,
            counters: Arc::default(),
        }
    }

    pub fn config(&self) -> &FragmentConfig {
        &self.config
    }

    pub fn stats_handle(&self) -> FragmentStatsHandle {
        FragmentStatsHandle(Arc::clone(&self.counters))
    }

    pub fn stats(&self) -> FragmentStats {
        self.stats_handle().snapshot()
    }

    /// Sequences still accumulating.
    pub fn in_flight(&self) -> usize {
        self.sequences.len()
    }

    /// Extract the fragment carried by `packet`, if any.
    fn parse(&self, packet: &Packet, ctx: &AnalyzerContext<'_>) -> Result<Option<Parsed>, AnalysisError> {
        let ipv4 = ctx.registry().id_of::<Ipv4>()?;
        let Some(decoded) = packet.find(ipv4) else {
            return Ok(None);
        };
        let data = packet.bytes();
        let ip = &data[decoded.offset.min(data.len())..];
        if ip.len() < 8 {
            return Ok(None);
        }
        let word = u16::from_be_bytes([ip[6], ip[7]]);
        if word & (MF | OFFSET_MASK) == 0 {
            return Ok(None);
        }

        self.counters.fragments.fetch_add(1, Ordering::Relaxed);
        let total_length = u16::from_be_bytes([ip[2], ip[3]]) as usize;
        let end = decoded.offset + total_length;
        if decoded.flags.truncated || total_length < decoded.length || end > data.len() {
            trace!(frame = packet.frame(), "fragment not fully captured");
            self.counters.unusable.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let header = data.slice(decoded.offset..decoded.end());
        let Some(key) = FragmentKey::from_header(&header) else {
            return Ok(None);
        };
        Ok(Some(Parsed {
            key,
            header,
            fragment: Fragment {
                offset: (word & OFFSET_MASK) as usize * 8,
                more: word & MF != 0,
                payload: data.slice(decoded.end()..end),
                timestamp_nanos: packet.timestamp_nanos(),
            },
        }))
    }

    /// Whether `key` was recently given up on. Expired entries are dropped.
    fn is_tombstoned(&mut self, key: &FragmentKey, now: i64) -> bool {
        match self.tombstones.get(key) {
            Some(&until) if until > now => true,
            Some(_) => {
                self.tombstones.remove(key);
                false
            }
            None => false,
        }
    }

    /// Drop a sequence without output and release its hold. `at` is the
    /// capture time of the offending fragment.
    fn abandon(
        &mut self,
        key: FragmentKey,
        reason: Violation,
        at: i64,
        ctx: &mut AnalyzerContext<'_>,
    ) -> Result<(), AnalysisError> {
        if let Some(sequence) = self.sequences.remove(&key) {
            self.tokens.remove(&sequence.token());
            debug!(%key, %reason, fragments = sequence.len(), "abandoning fragment sequence");
            self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            self.tombstones
                .insert(key, at.saturating_add(self.config.timeout_nanos));
            ctx.release()?;
        }
        Ok(())
    }

    fn complete(&mut self, key: FragmentKey, ctx: &mut AnalyzerContext<'_>) -> Result<(), AnalysisError> {
        let Some(sequence) = self.sequences.remove(&key) else {
            return Ok(());
        };
        self.tokens.remove(&sequence.token());

        match synthesize(&sequence) {
            Some(datagram) => {
                let timestamp = sequence.latest_arrival().saturating_add(1);
                let ipv4 = ctx.registry().id_of::<Ipv4>()?;
                let packet = Packet::synthetic(ctx.scanner(), datagram, timestamp, ipv4);
                debug!(
                    %key,
                    fragments = sequence.len(),
                    len = packet.len(),
                    "reassembled datagram"
                );
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                ctx.inject(packet);
            }
            None => {
                warn!(%key, "could not rebuild datagram header");
                self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
            }
        }
        ctx.release()?;
        Ok(())
    }
}

impl Analyzer for IpFragmentAnalyzer {
    fn name(&self) -> &'static str {
        "ipv4-reassembly"
    }

    fn analyze(
        &mut self,
        packet: &Packet,
        ctx: &mut AnalyzerContext<'_>,
    ) -> Result<Verdict, AnalysisError> {
        if packet.is_synthetic() {
            return Ok(Verdict::Pass);
        }
        let Some(Parsed {
            key,
            header,
            fragment,
        }) = self.parse(packet, ctx)?
        else {
            return Ok(Verdict::Pass);
        };

        // Tombstones are kept in capture time.
        let at = fragment.timestamp_nanos;
        if self.is_tombstoned(&key, at) {
            trace!(%key, frame = packet.frame(), "late fragment ignored");
            self.counters.late.fetch_add(1, Ordering::Relaxed);
            return Ok(Verdict::Pass);
        }

        if !self.sequences.contains_key(&key) {
            if self.sequences.len() >= self.config.max_sequences {
                warn!(%key, limit = self.config.max_sequences, "fragment table full, not tracking");
                self.counters.overflow.fetch_add(1, Ordering::Relaxed);
                return Ok(Verdict::Pass);
            }
            self.next_token += 1;
            let token = self.next_token;
            let deadline = fragment.timestamp_nanos.saturating_add(self.config.timeout_nanos);
            let max_payload = self.config.max_datagram_len.saturating_sub(header.len());
            trace!(%key, token, deadline, hash = key.flow_hash(), "new fragment sequence");

            self.sequences
                .insert(key, FragmentSequence::new(key, token, deadline, max_payload));
            self.tokens.insert(token, key);
            self.counters.started.fetch_add(1, Ordering::Relaxed);
            ctx.hold();
            ctx.schedule_timeout(deadline, token);
        }

        let outcome = match self.sequences.get_mut(&key) {
            Some(sequence) => sequence.insert(&header, fragment),
            None => return Ok(Verdict::Pass),
        };
        match outcome {
            Insert::Added => {
                let complete = self.sequences.get(&key).is_some_and(|s| s.is_complete());
                if complete {
                    self.complete(key, ctx)?;
                }
            }
            Insert::Duplicate => {
                trace!(%key, frame = packet.frame(), "duplicate fragment");
                self.counters.duplicates.fetch_add(1, Ordering::Relaxed);
            }
            Insert::Violation(reason) => {
                self.abandon(key, reason, at, ctx)?;
                return Ok(Verdict::Pass);
            }
        }

        if self.config.consume_fragments {
            Ok(Verdict::Consume)
        } else {
            Ok(Verdict::Pass)
        }
    }

    fn on_timeout(&mut self, token: u64, ctx: &mut AnalyzerContext<'_>) -> Result<(), AnalysisError> {
        let now = ctx.now();
        self.tombstones.retain(|_, until| *until > now);

        let Some(key) = self.tokens.remove(&token) else {
            return Ok(());
        };
        if let Some(sequence) = self.sequences.remove(&key) {
            debug!(
                %key,
                fragments = sequence.len(),
                covered = sequence.covered(),
                total = ?sequence.total(),
                "fragment sequence timed out"
            );
            self.counters.timed_out.fetch_add(1, Ordering::Relaxed);
            self.tombstones
                .insert(key, now.saturating_add(self.config.timeout_nanos));
            ctx.release()?;
        }
        Ok(())
    }
}

/// Rebuild the datagram: the first fragment's header with length, MF and
/// offset fixed up, then every payload in offset order.
fn synthesize(sequence: &FragmentSequence) -> Option<Vec<u8>> {
    let header = sequence.first_header()?;
    let total = sequence.total()?;
    let header_len = header.len();

    let mut datagram = Vec::with_capacity(header_len + total);
    datagram.extend_from_slice(header);
    for fragment in sequence.fragments() {
        datagram.extend_from_slice(&fragment.payload);
    }

    let total_length = u16::try_from(datagram.len()).ok()?;
    datagram[2..4].copy_from_slice(&total_length.to_be_bytes());
    let word = u16::from_be_bytes([datagram[6], datagram[7]]) & !(MF | OFFSET_MASK);
    datagram[6..8].copy_from_slice(&word.to_be_bytes());

    let checksum = Ipv4HeaderSlice::from_slice(&datagram[..header_len])
        .ok()?
        .to_header()
        .calc_header_checksum();
    datagram[10..12].copy_from_slice(&checksum.to_be_bytes());
    Some(datagram)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn key() -> FragmentKey {
        FragmentKey {
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            identification: 7,
            protocol: 17,
        }
    }

    fn header(word: u16) -> Bytes {
        let mut header = vec![
            0x45, 0, 0, 28, 0, 7, 0, 0, 64, 17, 0, 0, 10, 0, 0, 1, 10, 0, 0, 2,
        ];
        header[6..8].copy_from_slice(&word.to_be_bytes());
        Bytes::from(header)
    }

    #[test]
    fn test_synthesize_fixes_header() {
        let mut sequence = FragmentSequence::new(key(), 1, 100, 65_515);
        let first = header(0x4000 | MF);
        sequence.insert(
            &first,
            Fragment {
                offset: 0,
                more: true,
                payload: Bytes::from(vec![1u8; 8]),
                timestamp_nanos: 1,
            },
        );
        sequence.insert(
            &header(1),
            Fragment {
                offset: 8,
                more: false,
                payload: Bytes::from(vec![2u8; 4]),
                timestamp_nanos: 2,
            },
        );
        assert!(sequence.is_complete());

        let datagram = synthesize(&sequence).unwrap();
        assert_eq!(datagram.len(), 32);
        assert_eq!(u16::from_be_bytes([datagram[2], datagram[3]]), 32);
        // DF survives, MF and offset are cleared.
        assert_eq!(u16::from_be_bytes([datagram[6], datagram[7]]), 0x4000);
        assert_eq!(&datagram[20..28], &[1u8; 8]);
        assert_eq!(&datagram[28..], &[2u8; 4]);

        let slice = Ipv4HeaderSlice::from_slice(&datagram[..20]).unwrap();
        assert_eq!(slice.header_checksum(), slice.to_header().calc_header_checksum());
    }

    #[test]
    fn test_synthesize_needs_first_fragment() {
        let mut sequence = FragmentSequence::new(key(), 1, 100, 65_515);
        sequence.insert(
            &header(1),
            Fragment {
                offset: 8,
                more: false,
                payload: Bytes::from(vec![2u8; 4]),
                timestamp_nanos: 2,
            },
        );
        assert!(synthesize(&sequence).is_none());
    }
}
