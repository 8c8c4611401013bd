//! Binding rules between protocols.

use std::fmt;
use std::sync::Arc;

use super::{HeaderView, PacketState, ProtocolId};

/// Shared binding predicate.
pub type BindingPredicate = Arc<dyn Fn(&BindingContext<'_>) -> bool + Send + Sync>;

/// What a binding predicate gets to look at.
#[derive(Clone, Copy)]
pub struct BindingContext<'a> {
    /// Headers decoded so far, including `current`.
    pub state: &'a PacketState,
    /// The header just decoded.
    pub current: HeaderView<'a>,
    /// The whole packet buffer.
    pub buffer: &'a [u8],
    /// Where the next header would start.
    pub offset: usize,
}

impl<'a> BindingContext<'a> {
    /// Bytes after the current header.
    pub fn remaining(&self) -> &'a [u8] {
        self.buffer.get(self.offset..).unwrap_or(&[])
    }

    /// Named field of the current header as an unsigned integer.
    pub fn field_u64(&self, name: &str) -> Option<u64> {
        self.current.value(name).and_then(|value| value.as_u64())
    }
}

/// A prioritized edge of the protocol graph.
#[derive(Clone)]
pub struct BindingRule {
    pub(crate) name: &'static str,
    pub(crate) from: ProtocolId,
    pub(crate) to: ProtocolId,
    pub(crate) priority: i32,
    pub(crate) predicate: BindingPredicate,
}

impl BindingRule {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn from(&self) -> ProtocolId {
        self.from
    }

    pub fn to(&self) -> ProtocolId {
        self.to
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    #[inline]
    pub fn matches(&self, ctx: &BindingContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl fmt::Debug for BindingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingRule")
            .field("name", &self.name)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Box a predicate, fixing its signature from the bound.
pub fn predicate<F>(f: F) -> BindingPredicate
where
    F: Fn(&BindingContext<'_>) -> bool + Send + Sync + 'static,
{
    Arc::new(f)
}
