//! The analysis controller.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::config::ControllerConfig;
use crate::error::{AnalysisError, ControllerError};
use crate::packet::Packet;
use crate::protocol::{ProtocolId, ProtocolMask, Registry, Scanner, MAX_PROTOCOLS};

use super::dispatch::{Dispatcher, PacketSink, Rejected};
use super::queue::PacketQueue;
use super::timeout::TimeoutQueue;
use super::{Analyzer, AnalyzerContext, Verdict};

/// Outstanding holds on the output queue.
#[derive(Debug, Default)]
pub(crate) struct HoldCount {
    count: u32,
    reached_zero: bool,
}

impl HoldCount {
    pub(crate) fn hold(&mut self) {
        self.count += 1;
    }

    pub(crate) fn release(&mut self) -> Result<(), ControllerError> {
        if self.count == 0 {
            warn!("release without matching hold");
            return Err(ControllerError::ReleaseUnderflow);
        }
        self.count -= 1;
        if self.count == 0 {
            self.reached_zero = true;
        }
        Ok(())
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }

    /// Whether a release brought the count to zero since the last call.
    fn take_reached_zero(&mut self) -> bool {
        std::mem::take(&mut self.reached_zero)
    }
}

/// Shared counters; the dispatch thread updates `dispatched`.
#[derive(Debug, Default)]
pub(crate) struct Counters {
    submitted: AtomicU64,
    analyzed: AtomicU64,
    consumed: AtomicU64,
    pub(crate) dispatched: AtomicU64,
    analyzer_errors: AtomicU64,
    held_back: AtomicU64,
    backpressure: AtomicU64,
    injected: AtomicU64,
    discarded: AtomicU64,
    pub(crate) sink_panics: AtomicU64,
}

/// Snapshot of controller activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControllerStats {
    /// Packets passed to `submit`.
    pub submitted: u64,
    /// Packets that went through analyzer dispatch (injected ones included).
    pub analyzed: u64,
    /// Packets suppressed by an analyzer verdict.
    pub consumed: u64,
    /// Packets delivered to the sink.
    pub dispatched: u64,
    /// Analyzer calls that returned an error or panicked.
    pub analyzer_errors: u64,
    /// Output drains that stopped because of an outstanding hold.
    pub held_back: u64,
    /// Hand-offs that timed out against a full dispatch queue.
    pub backpressure: u64,
    /// Packets fed back by analyzers.
    pub injected: u64,
    /// Packets dropped at shutdown while still held.
    pub discarded: u64,
    /// Packets whose delivery panicked inside the sink.
    pub sink_panics: u64,
}

struct Registration {
    protocol: ProtocolId,
    priority: i32,
    analyzer: Box<dyn Analyzer>,
}

/// Orders packets by capture time, runs analyzers and gates delivery.
///
/// Processing time is the latest capture timestamp submitted, never wall
/// clock, so replaying a capture reproduces the same timeouts.
pub struct Controller {
    config: ControllerConfig,
    scanner: Scanner,
    registrations: Vec<Registration>,
    /// Indexes into `registrations` per protocol, in invocation order.
    by_protocol: Vec<Vec<usize>>,
    interest: ProtocolMask,
    input: PacketQueue,
    output: PacketQueue,
    timeouts: TimeoutQueue,
    holds: HoldCount,
    injected: Vec<Packet>,
    now: i64,
    next_frame: u64,
    dispatcher: Dispatcher,
    counters: Arc<Counters>,
}

impl Controller {
    /// Start a controller whose dispatch thread delivers to `sink`.
    pub fn new(
        registry: Arc<Registry>,
        config: ControllerConfig,
        sink: impl PacketSink,
    ) -> Result<Self, ControllerError> {
        Self::with_scanner(Scanner::new(registry), config, sink)
    }

    pub fn with_scanner(
        scanner: Scanner,
        config: ControllerConfig,
        sink: impl PacketSink,
    ) -> Result<Self, ControllerError> {
        let counters = Arc::new(Counters::default());
        let dispatcher = Dispatcher::spawn(
            sink,
            config.dispatch_queue_depth,
            Duration::from_millis(config.dispatch_send_timeout_ms),
            Arc::clone(&counters),
        )?;

        Ok(Self {
            config,
            scanner,
            registrations: Vec::new(),
            by_protocol: (0..MAX_PROTOCOLS).map(|_| Vec::new()).collect(),
            interest: ProtocolMask::EMPTY,
            input: PacketQueue::new(),
            output: PacketQueue::new(),
            timeouts: TimeoutQueue::new(),
            holds: HoldCount::default(),
            injected: Vec::new(),
            now: i64::MIN,
            next_frame: 0,
            dispatcher,
            counters,
        })
    }

    /// Run `analyzer` on every packet containing `protocol`. Lower priorities
    /// run first; equal priorities run in registration order.
    pub fn register(
        &mut self,
        protocol: ProtocolId,
        priority: i32,
        analyzer: impl Analyzer + 'static,
    ) -> &mut Self {
        let Some(slot) = self.by_protocol.get_mut(protocol.0 as usize) else {
            warn!(%protocol, name = analyzer.name(), "protocol id outside presence bitmap, analyzer ignored");
            return self;
        };

        let index = self.registrations.len();
        debug!(%protocol, priority, name = analyzer.name(), "registering analyzer");
        self.registrations.push(Registration {
            protocol,
            priority,
            analyzer: Box::new(analyzer),
        });

        let registrations = &self.registrations;
        let at = slot.partition_point(|&i| registrations[i].priority <= priority);
        slot.insert(at, index);
        self.interest.insert(protocol);
        self
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn registry(&self) -> &Registry {
        self.scanner.registry()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Protocols at least one analyzer is registered for.
    pub fn interest(&self) -> ProtocolMask {
        self.interest
    }

    /// Current processing time.
    pub fn now(&self) -> i64 {
        self.now
    }

    /// Queue a captured packet for analysis.
    ///
    /// Advances processing time to the packet's timestamp (firing any due
    /// timeouts first), dissects the packet if needed and assigns its frame
    /// sequence number.
    pub fn submit(&mut self, mut packet: Packet) {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.next_frame += 1;
        packet.set_frame(self.next_frame);
        if !packet.is_dissected() {
            packet.rescan(&self.scanner);
        }

        self.advance_time(packet.timestamp_nanos());
        trace!(frame = packet.frame(), ts = packet.timestamp_nanos(), "submitted");
        self.input.push(packet);
    }

    /// Move processing time forward to `now` and fire every due timeout.
    /// Time never moves backwards.
    pub fn advance_time(&mut self, now: i64) {
        if now > self.now {
            self.now = now;
        }
        self.fire_timeouts(self.now);
    }

    /// Fire every timeout due at capture time `at`.
    fn fire_timeouts(&mut self, at: i64) {
        while let Some(entry) = self.timeouts.pop_expired(at) {
            let Some(registration) = self.registrations.get_mut(entry.analyzer) else {
                continue;
            };
            let name = registration.analyzer.name();
            let mut ctx = AnalyzerContext::new(
                at,
                entry.analyzer,
                &self.scanner,
                &mut self.holds,
                &mut self.timeouts,
                &mut self.injected,
            );
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                registration.analyzer.on_timeout(entry.token, &mut ctx)
            }));
            if let Some(reason) = failure(outcome) {
                warn!(analyzer = name, token = entry.token, %reason, "timeout handler failed");
                self.counters.analyzer_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.flush_injected();
        if self.holds.take_reached_zero() {
            self.drain_output_logged();
        }
    }

    /// Analyze every queued packet, earliest first, moving survivors to the
    /// output queue. Returns how many packets were analyzed.
    ///
    /// Timeouts due by a packet's capture time fire before it is analyzed,
    /// however many packets were submitted since the last drain.
    pub fn drain_input(&mut self) -> usize {
        let mut analyzed = 0;
        while let Some((ts, _)) = self.input.peek_key() {
            self.fire_timeouts(ts);
            let Some(packet) = self.input.pop() else {
                break;
            };
            analyzed += 1;
            let consumed = self.analyze(&packet);
            self.counters.analyzed.fetch_add(1, Ordering::Relaxed);

            if consumed {
                trace!(frame = packet.frame(), "consumed");
                self.counters.consumed.fetch_add(1, Ordering::Relaxed);
            } else {
                self.output.push(packet);
            }

            self.flush_injected();
            if self.holds.take_reached_zero() {
                self.drain_output_logged();
            }
        }
        analyzed
    }

    /// Run the analyzers interested in `packet`; true if any consumed it.
    fn analyze(&mut self, packet: &Packet) -> bool {
        let mut pending = packet.state().mask().intersection(self.interest);
        let mut consumed = false;

        while !pending.is_empty() {
            let Some(protocol) = pending.iter().next() else {
                break;
            };
            pending.remove(protocol);

            for &index in &self.by_protocol[protocol.0 as usize] {
                let registration = &mut self.registrations[index];
                let name = registration.analyzer.name();
                let mut ctx = AnalyzerContext::new(
                    self.now,
                    index,
                    &self.scanner,
                    &mut self.holds,
                    &mut self.timeouts,
                    &mut self.injected,
                );
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    registration.analyzer.analyze(packet, &mut ctx)
                }));
                match outcome {
                    Ok(Ok(Verdict::Consume)) => consumed = true,
                    Ok(Ok(Verdict::Pass)) => {}
                    other => {
                        let reason = failure(other.map(|r| r.map(|_| ()))).unwrap_or_default();
                        warn!(
                            frame = packet.frame(),
                            ts = packet.timestamp_nanos(),
                            analyzer = name,
                            protocol = %registration.protocol,
                            %reason,
                            "analyzer failed"
                        );
                        self.counters.analyzer_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
        }
        consumed
    }

    fn flush_injected(&mut self) {
        for mut packet in self.injected.drain(..) {
            self.next_frame += 1;
            packet.set_frame(self.next_frame);
            if !packet.is_dissected() {
                packet.rescan(&self.scanner);
            }
            trace!(frame = packet.frame(), ts = packet.timestamp_nanos(), "injected");
            self.counters.injected.fetch_add(1, Ordering::Relaxed);
            self.input.push(packet);
        }
    }

    /// Hand queued output to the dispatch thread in capture-time order.
    ///
    /// Proceeds while no hold is outstanding, or while buffered output exceeds
    /// `output_byte_cap`. Stops early (leaving packets queued) when the
    /// dispatch queue stays full past the send timeout.
    pub fn drain_output(&mut self) -> Result<usize, ControllerError> {
        let mut sent = 0;
        loop {
            if self.output.is_empty() {
                break;
            }
            if self.holds.count() > 0 && self.output.bytes() <= self.config.output_byte_cap {
                trace!(holds = self.holds.count(), queued = self.output.len(), "output held");
                self.counters.held_back.fetch_add(1, Ordering::Relaxed);
                break;
            }
            let Some(packet) = self.output.pop() else {
                break;
            };
            match self.dispatcher.send(packet) {
                Ok(()) => sent += 1,
                Err(Rejected::Full(packet)) => {
                    warn!(frame = packet.frame(), "dispatch queue full, retrying on next drain");
                    self.counters.backpressure.fetch_add(1, Ordering::Relaxed);
                    self.output.push(packet);
                    break;
                }
                Err(Rejected::Stopped(packet)) => {
                    self.output.push(packet);
                    return Err(ControllerError::Stopped);
                }
            }
        }
        Ok(sent)
    }

    fn drain_output_logged(&mut self) {
        if let Err(e) = self.drain_output() {
            warn!(error = %e, "output drain failed");
        }
    }

    /// `drain_input` followed by `drain_output`.
    pub fn drain(&mut self) -> Result<usize, ControllerError> {
        self.drain_input();
        self.drain_output()
    }

    /// Pause output delivery.
    pub fn hold(&mut self) {
        self.holds.hold();
    }

    /// Undo one [`hold`](Self::hold); the last release drains output at once.
    pub fn release(&mut self) -> Result<(), ControllerError> {
        self.holds.release()?;
        if self.holds.take_reached_zero() {
            self.drain_output()?;
        }
        Ok(())
    }

    pub fn holds(&self) -> u32 {
        self.holds.count()
    }

    /// Packets waiting for analysis.
    pub fn pending_input(&self) -> usize {
        self.input.len()
    }

    /// Packets analyzed but not yet dispatched.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Bytes analyzed but not yet dispatched.
    pub fn buffered_bytes(&self) -> usize {
        self.output.bytes()
    }

    /// Timeouts not yet fired.
    pub fn pending_timeouts(&self) -> usize {
        self.timeouts.len()
    }

    /// Earliest pending timeout deadline.
    pub fn next_deadline(&self) -> Option<i64> {
        self.timeouts.next_deadline()
    }

    /// Whether the dispatch thread still accepts packets.
    pub fn is_running(&self) -> bool {
        self.dispatcher.is_running()
    }

    pub fn stats(&self) -> ControllerStats {
        let c = &self.counters;
        ControllerStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            analyzed: c.analyzed.load(Ordering::Relaxed),
            consumed: c.consumed.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            analyzer_errors: c.analyzer_errors.load(Ordering::Relaxed),
            held_back: c.held_back.load(Ordering::Relaxed),
            backpressure: c.backpressure.load(Ordering::Relaxed),
            injected: c.injected.load(Ordering::Relaxed),
            discarded: c.discarded.load(Ordering::Relaxed),
            sink_panics: c.sink_panics.load(Ordering::Relaxed),
        }
    }

    /// Analyze what is queued, deliver what may be delivered, then stop the
    /// dispatch thread. Output still held back is discarded, never
    /// force-released. Returns the number of discarded packets.
    pub fn shutdown(&mut self) -> usize {
        self.drain_input();
        self.drain_output_logged();

        let discarded = self.output.clear();
        if discarded > 0 {
            warn!(discarded, holds = self.holds.count(), "discarding held output at shutdown");
            self.counters
                .discarded
                .fetch_add(discarded as u64, Ordering::Relaxed);
        }
        self.dispatcher.shutdown();
        debug!(stats = ?self.stats(), "controller stopped");
        discarded
    }
}

/// Failure text for an analyzer call that errored or panicked.
fn failure(outcome: std::thread::Result<Result<(), AnalysisError>>) -> Option<String> {
    match outcome {
        Ok(Ok(())) => None,
        Ok(Err(e)) => Some(e.to_string()),
        Err(payload) => Some(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
