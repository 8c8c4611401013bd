//! Background delivery of analyzed packets.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Sender, SendTimeoutError};
use tracing::{debug, warn};

use crate::error::ControllerError;
use crate::packet::Packet;

use super::controller::Counters;

/// Downstream consumer of dispatched packets. Runs on the dispatch thread.
pub trait PacketSink: Send + 'static {
    fn deliver(&mut self, packet: Packet);
}

impl<F> PacketSink for F
where
    F: FnMut(Packet) + Send + 'static,
{
    fn deliver(&mut self, packet: Packet) {
        self(packet)
    }
}

/// Why a hand-off to the dispatch thread did not happen.
pub(crate) enum Rejected {
    /// The queue stayed full for the whole send timeout.
    Full(Packet),
    /// The dispatch thread is gone.
    Stopped(Packet),
}

/// A single worker thread fed through a bounded channel.
pub(crate) struct Dispatcher {
    sender: Option<Sender<Packet>>,
    handle: Option<JoinHandle<()>>,
    send_timeout: Duration,
}

impl Dispatcher {
    pub(crate) fn spawn<S: PacketSink>(
        mut sink: S,
        depth: usize,
        send_timeout: Duration,
        counters: Arc<Counters>,
    ) -> Result<Self, ControllerError> {
        let (sender, receiver) = crossbeam_channel::bounded::<Packet>(depth.max(1));

        let handle = thread::Builder::new()
            .name("pktdissect-dispatch".into())
            .spawn(move || {
                for packet in receiver.iter() {
                    let frame = packet.frame();
                    match catch_unwind(AssertUnwindSafe(|| sink.deliver(packet))) {
                        Ok(()) => {
                            counters.dispatched.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(_) => {
                            warn!(frame, "packet sink panicked; continuing");
                            counters.sink_panics.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                }
                debug!("dispatch channel closed, stopping");
            })
            .map_err(|e| ControllerError::Spawn(e.to_string()))?;

        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
            send_timeout,
        })
    }

    /// Hand `packet` to the worker, waiting at most the send timeout.
    pub(crate) fn send(&self, packet: Packet) -> Result<(), Rejected> {
        let Some(sender) = &self.sender else {
            return Err(Rejected::Stopped(packet));
        };
        sender
            .send_timeout(packet, self.send_timeout)
            .map_err(|e| match e {
                SendTimeoutError::Timeout(packet) => Rejected::Full(packet),
                SendTimeoutError::Disconnected(packet) => Rejected::Stopped(packet),
            })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.sender.is_some()
    }

    /// Close the channel and wait for the worker to finish what it has.
    pub(crate) fn shutdown(&mut self) {
        drop(self.sender.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("dispatch thread panicked");
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
