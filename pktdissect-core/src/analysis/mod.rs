//! Time-ordered analysis pipeline.
//!
//! Dissected packets enter the [`Controller`] in capture order, are handed to
//! every [`Analyzer`] registered for a protocol they contain, and leave through
//! an output queue that analyzers can pause with [`AnalyzerContext::hold`].
//! A single background thread delivers released packets to a [`PacketSink`].
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use pktdissect_core::analysis::{Analyzer, AnalyzerContext, Controller, Verdict};
//! use pktdissect_core::config::ControllerConfig;
//! use pktdissect_core::error::AnalysisError;
//! use pktdissect_core::packet::{CaptureHeader, Packet};
//! use pktdissect_core::protocol::{default_registry, ids};
//!
//! struct DropIpv4;
//!
//! impl Analyzer for DropIpv4 {
//!     fn name(&self) -> &'static str {
//!         "drop-ipv4"
//!     }
//!
//!     fn analyze(&mut self, _: &Packet, _: &mut AnalyzerContext<'_>) -> Result<Verdict, AnalysisError> {
//!         Ok(Verdict::Consume)
//!     }
//! }
//!
//! let registry = Arc::new(default_registry().unwrap());
//! let (tx, rx) = crossbeam_channel::unbounded();
//! let mut controller = Controller::new(registry, ControllerConfig::default(), move |p: Packet| {
//!     let _ = tx.send(p.frame());
//! })
//! .unwrap();
//! controller.register(ids::IPV4, 0, DropIpv4);
//!
//! controller.submit(Packet::new(vec![0u8; 14], CaptureHeader::new(1, 14), ids::ETHERNET));
//! controller.drain().unwrap();
//! controller.shutdown();
//! assert_eq!(rx.try_iter().count(), 1);
//! ```

mod controller;
mod dispatch;
mod queue;
mod timeout;

pub use controller::{Controller, ControllerStats};
pub use dispatch::PacketSink;
pub use timeout::TimeoutEntry;

use crate::error::{AnalysisError, ControllerError};
use crate::packet::Packet;
use crate::protocol::{Registry, Scanner};

use controller::HoldCount;
use timeout::TimeoutQueue;

/// What should happen to a packet after an analyzer has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verdict {
    /// Keep the packet on its way to the output queue.
    #[default]
    Pass,
    /// Suppress the packet from output.
    Consume,
}

/// A per-protocol packet analyzer.
///
/// Analyzers run on the thread that drains the controller's input queue, one
/// packet at a time. Errors and panics are caught and logged by the controller.
pub trait Analyzer: Send {
    fn name(&self) -> &'static str;

    fn analyze(
        &mut self,
        packet: &Packet,
        ctx: &mut AnalyzerContext<'_>,
    ) -> Result<Verdict, AnalysisError>;

    /// A deadline scheduled through [`AnalyzerContext::schedule_timeout`] passed.
    fn on_timeout(
        &mut self,
        _token: u64,
        _ctx: &mut AnalyzerContext<'_>,
    ) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// The controller surface an analyzer may touch during a call.
pub struct AnalyzerContext<'a> {
    now: i64,
    analyzer: usize,
    scanner: &'a Scanner,
    holds: &'a mut HoldCount,
    timeouts: &'a mut TimeoutQueue,
    injected: &'a mut Vec<Packet>,
}

impl<'a> AnalyzerContext<'a> {
    pub(crate) fn new(
        now: i64,
        analyzer: usize,
        scanner: &'a Scanner,
        holds: &'a mut HoldCount,
        timeouts: &'a mut TimeoutQueue,
        injected: &'a mut Vec<Packet>,
    ) -> Self {
        Self {
            now,
            analyzer,
            scanner,
            holds,
            timeouts,
            injected,
        }
    }

    /// Controller processing time: the latest capture timestamp seen during
    /// `analyze`, the capture time the timeout fired at during `on_timeout`.
    pub fn now(&self) -> i64 {
        self.now
    }

    pub fn scanner(&self) -> &'a Scanner {
        self.scanner
    }

    pub fn registry(&self) -> &'a Registry {
        self.scanner.registry()
    }

    /// Pause output delivery until a matching [`release`](Self::release).
    pub fn hold(&mut self) {
        self.holds.hold();
    }

    pub fn release(&mut self) -> Result<(), ControllerError> {
        self.holds.release()
    }

    /// Outstanding holds across all analyzers.
    pub fn holds(&self) -> u32 {
        self.holds.count()
    }

    /// Feed a packet back into the controller's input queue.
    pub fn inject(&mut self, packet: Packet) {
        self.injected.push(packet);
    }

    /// Call this analyzer's `on_timeout(token)` once processing time reaches
    /// `deadline`.
    pub fn schedule_timeout(&mut self, deadline: i64, token: u64) {
        self.timeouts.schedule(deadline, self.analyzer, token);
    }
}
