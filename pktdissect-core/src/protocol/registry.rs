//! Protocol registry and binding graph.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::error::{DefinitionError, DefinitionErrors, RegistryError};
use crate::schema::{HeaderDefinition, HeaderSchema, SchemaCache};

use super::binding::{predicate, BindingContext, BindingPredicate, BindingRule};
use super::{DecodedHeader, HeaderView};

/// Number of protocol IDs the presence bitmap can hold.
pub const MAX_PROTOCOLS: u16 = 128;

/// Stable integer identifier of a registered protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolId(pub u16);

impl ProtocolId {
    /// The payload pseudo-header, always registered.
    pub const PAYLOAD: ProtocolId = ProtocolId(0);

    pub fn get(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One bit per protocol ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ProtocolMask(u128);

impl ProtocolMask {
    pub const EMPTY: ProtocolMask = ProtocolMask(0);

    pub fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u128 {
        self.0
    }

    pub fn of(id: ProtocolId) -> Self {
        let mut mask = Self::EMPTY;
        mask.insert(id);
        mask
    }

    /// Set the bit for `id`. IDs past the bitmap are ignored.
    pub fn insert(&mut self, id: ProtocolId) {
        if id.0 < MAX_PROTOCOLS {
            self.0 |= 1u128 << id.0;
        }
    }

    pub fn remove(&mut self, id: ProtocolId) {
        if id.0 < MAX_PROTOCOLS {
            self.0 &= !(1u128 << id.0);
        }
    }

    #[inline]
    pub fn contains(self, id: ProtocolId) -> bool {
        id.0 < MAX_PROTOCOLS && self.0 & (1u128 << id.0) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn intersection(self, other: ProtocolMask) -> ProtocolMask {
        ProtocolMask(self.0 & other.0)
    }

    pub fn union(self, other: ProtocolMask) -> ProtocolMask {
        ProtocolMask(self.0 | other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Set IDs in ascending order.
    pub fn iter(self) -> impl Iterator<Item = ProtocolId> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let id = bits.trailing_zeros() as u16;
            bits &= bits - 1;
            Some(ProtocolId(id))
        })
    }
}

/// A registered protocol.
#[derive(Debug)]
pub struct ProtocolEntry {
    id: ProtocolId,
    name: &'static str,
    schema: Arc<HeaderSchema>,
    bindings: Vec<BindingRule>,
    heuristics: Vec<BindingRule>,
}

impl ProtocolEntry {
    pub fn id(&self) -> ProtocolId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn schema(&self) -> &Arc<HeaderSchema> {
        &self.schema
    }

    /// Outgoing bindings, highest priority first.
    pub fn bindings(&self) -> &[BindingRule] {
        &self.bindings
    }

    pub fn heuristics(&self) -> &[BindingRule] {
        &self.heuristics
    }
}

/// Immutable protocol table plus binding graph.
///
/// Built once by [`RegistryBuilder`] and shared read-only (typically through
/// an `Arc`) by scanners and controllers.
#[derive(Debug)]
pub struct Registry {
    entries: Vec<Option<ProtocolEntry>>,
    by_name: HashMap<&'static str, ProtocolId>,
    by_type: HashMap<TypeId, ProtocolId>,
    heuristics_enabled: ProtocolMask,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn entry(&self, id: ProtocolId) -> Result<&ProtocolEntry, RegistryError> {
        self.entries
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(RegistryError::UnregisteredId(id.0))
    }

    pub fn schema(&self, id: ProtocolId) -> Result<&Arc<HeaderSchema>, RegistryError> {
        self.entry(id).map(ProtocolEntry::schema)
    }

    pub fn name(&self, id: ProtocolId) -> Result<&'static str, RegistryError> {
        self.entry(id).map(ProtocolEntry::name)
    }

    pub fn id_by_name(&self, name: &str) -> Result<ProtocolId, RegistryError> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| RegistryError::UnregisteredName(name.to_string()))
    }

    /// ID assigned to definition type `H`.
    pub fn id_of<H: HeaderDefinition>(&self) -> Result<ProtocolId, RegistryError> {
        self.by_type
            .get(&TypeId::of::<H>())
            .copied()
            .ok_or(RegistryError::UnregisteredHeader(H::NAME))
    }

    /// View a decoded header of `buffer`.
    pub fn view<'a>(
        &'a self,
        buffer: &'a [u8],
        header: &'a DecodedHeader,
    ) -> Result<HeaderView<'a>, RegistryError> {
        let schema = self.schema(header.protocol)?;
        Ok(HeaderView::new(buffer, header, schema))
    }

    pub fn contains(&self, id: ProtocolId) -> bool {
        self.entry(id).is_ok()
    }

    /// Registered protocols in ID order.
    pub fn protocols(&self) -> impl Iterator<Item = &ProtocolEntry> {
        self.entries.iter().flatten()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Pick the protocol following `from`.
    ///
    /// Explicit bindings are tried first, highest priority first with ties in
    /// registration order; heuristics follow if enabled for `from`. `None`
    /// means the chain ends here (also for an unregistered `from`).
    pub fn resolve_next(&self, from: ProtocolId, ctx: &BindingContext<'_>) -> Option<ProtocolId> {
        let entry = self.entry(from).ok()?;
        if let Some(rule) = entry.bindings.iter().find(|rule| rule.matches(ctx)) {
            return Some(rule.to);
        }
        if self.heuristics_enabled.contains(from) {
            return entry
                .heuristics
                .iter()
                .find(|rule| rule.matches(ctx))
                .map(|rule| rule.to);
        }
        None
    }
}

struct Registration {
    type_id: TypeId,
    name: &'static str,
    explicit_id: Option<u16>,
    schema: Result<Arc<HeaderSchema>, DefinitionErrors>,
}

struct PendingBinding {
    heuristic: bool,
    from: (TypeId, &'static str),
    to: (TypeId, &'static str),
    name: &'static str,
    priority: i32,
    predicate: BindingPredicate,
}

/// Collects registrations and bindings, then validates them all at once.
///
/// ```
/// use pktdissect_core::protocol::{ethernet::Ethernet, ipv4::Ipv4, Registry};
///
/// let mut builder = Registry::builder();
/// builder
///     .register::<Ethernet>()
///     .register::<Ipv4>()
///     .bind::<Ethernet, Ipv4>("ethertype-ipv4", 10, |ctx| ctx.field_u64("ethertype") == Some(0x0800));
/// let registry = builder.build().unwrap();
/// assert_eq!(registry.len(), 3); // payload is always registered
/// ```
pub struct RegistryBuilder {
    cache: SchemaCache,
    registrations: Vec<Registration>,
    bindings: Vec<PendingBinding>,
    heuristics_disabled: Vec<TypeId>,
    heuristics_off: bool,
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self {
            cache: SchemaCache::new(),
            registrations: Vec::new(),
            bindings: Vec::new(),
            heuristics_disabled: Vec::new(),
            heuristics_off: false,
        }
    }

    /// Register header definition `H`. Registering a type twice is a no-op.
    pub fn register<H: HeaderDefinition>(&mut self) -> &mut Self {
        let type_id = TypeId::of::<H>();
        if self.registrations.iter().any(|r| r.type_id == type_id) {
            return self;
        }
        let schema = self.cache.build::<H>();
        self.registrations.push(Registration {
            type_id,
            name: H::NAME,
            explicit_id: H::ID,
            schema,
        });
        self
    }

    /// Add an explicit binding from `F` to `T`.
    pub fn bind<F, T>(
        &mut self,
        name: &'static str,
        priority: i32,
        rule: impl Fn(&BindingContext<'_>) -> bool + Send + Sync + 'static,
    ) -> &mut Self
    where
        F: HeaderDefinition,
        T: HeaderDefinition,
    {
        self.push_binding::<F, T>(false, name, priority, rule)
    }

    /// Add a heuristic binding, consulted only after explicit bindings fail.
    pub fn heuristic<F, T>(
        &mut self,
        name: &'static str,
        priority: i32,
        rule: impl Fn(&BindingContext<'_>) -> bool + Send + Sync + 'static,
    ) -> &mut Self
    where
        F: HeaderDefinition,
        T: HeaderDefinition,
    {
        self.push_binding::<F, T>(true, name, priority, rule)
    }

    fn push_binding<F: HeaderDefinition, T: HeaderDefinition>(
        &mut self,
        heuristic: bool,
        name: &'static str,
        priority: i32,
        rule: impl Fn(&BindingContext<'_>) -> bool + Send + Sync + 'static,
    ) -> &mut Self {
        self.bindings.push(PendingBinding {
            heuristic,
            from: (TypeId::of::<F>(), F::NAME),
            to: (TypeId::of::<T>(), T::NAME),
            name,
            priority,
            predicate: predicate(rule),
        });
        self
    }

    /// Turn off heuristics for every protocol.
    pub fn disable_heuristics(&mut self) -> &mut Self {
        self.heuristics_off = true;
        self
    }

    /// Turn off heuristics leaving `H`.
    pub fn disable_heuristics_for<H: HeaderDefinition>(&mut self) -> &mut Self {
        self.heuristics_disabled.push(TypeId::of::<H>());
        self
    }

    /// Validate everything and freeze the registry.
    ///
    /// All problems found are returned together.
    pub fn build(self) -> Result<Registry, DefinitionErrors> {
        let mut errors = DefinitionErrors::new();
        let mut entries: Vec<Option<ProtocolEntry>> =
            (0..MAX_PROTOCOLS).map(|_| None).collect();
        let mut by_name = HashMap::new();
        let mut by_type = HashMap::new();

        match HeaderSchema::payload() {
            Ok(schema) => {
                entries[0] = Some(ProtocolEntry {
                    id: ProtocolId::PAYLOAD,
                    name: "payload",
                    schema: Arc::new(schema),
                    bindings: Vec::new(),
                    heuristics: Vec::new(),
                });
                by_name.insert("payload", ProtocolId::PAYLOAD);
            }
            Err(e) => errors.extend(e),
        }

        // Explicit IDs first, so assigned ones never steal them.
        let (explicit, assigned): (Vec<_>, Vec<_>) = self
            .registrations
            .into_iter()
            .partition(|r| r.explicit_id.is_some());

        for reg in explicit.into_iter().chain(assigned) {
            let schema = match reg.schema {
                Ok(schema) => schema,
                Err(e) => {
                    errors.extend(e);
                    continue;
                }
            };
            if by_name.contains_key(reg.name) {
                errors.push(DefinitionError::DuplicateProtocolName { name: reg.name });
                continue;
            }
            let id = match reg.explicit_id {
                Some(id) if id >= MAX_PROTOCOLS => {
                    errors.push(DefinitionError::ProtocolIdOutOfRange {
                        header: reg.name,
                        id,
                        max: MAX_PROTOCOLS - 1,
                    });
                    continue;
                }
                Some(id) => {
                    if let Some(existing) = &entries[id as usize] {
                        errors.push(DefinitionError::DuplicateProtocolId {
                            id,
                            existing: existing.name,
                            header: reg.name,
                        });
                        continue;
                    }
                    id
                }
                None => match entries.iter().position(Option::is_none) {
                    Some(free) => free as u16,
                    None => {
                        errors.push(DefinitionError::ProtocolIdsExhausted { header: reg.name });
                        continue;
                    }
                },
            };
            let id = ProtocolId(id);
            entries[id.0 as usize] = Some(ProtocolEntry {
                id,
                name: reg.name,
                schema,
                bindings: Vec::new(),
                heuristics: Vec::new(),
            });
            by_name.insert(reg.name, id);
            by_type.insert(reg.type_id, id);
        }

        for binding in self.bindings {
            let from = by_type.get(&binding.from.0).copied();
            let to = by_type.get(&binding.to.0).copied();
            let (from, to) = match (from, to) {
                (Some(from), Some(to)) => (from, to),
                (None, _) => {
                    errors.push(DefinitionError::InvalidBinding {
                        binding: binding.name,
                        from: binding.from.1,
                        to: binding.to.1,
                        reason: "source protocol is not registered",
                    });
                    continue;
                }
                (_, None) => {
                    errors.push(DefinitionError::InvalidBinding {
                        binding: binding.name,
                        from: binding.from.1,
                        to: binding.to.1,
                        reason: "target protocol is not registered",
                    });
                    continue;
                }
            };
            let rule = BindingRule {
                name: binding.name,
                from,
                to,
                priority: binding.priority,
                predicate: binding.predicate,
            };
            if let Some(entry) = entries[from.0 as usize].as_mut() {
                if binding.heuristic {
                    entry.heuristics.push(rule);
                } else {
                    entry.bindings.push(rule);
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let mut heuristics_enabled = ProtocolMask::EMPTY;
        for entry in entries.iter_mut().flatten() {
            // Stable: equal priorities keep registration order.
            entry.bindings.sort_by_key(|rule| std::cmp::Reverse(rule.priority));
            entry.heuristics.sort_by_key(|rule| std::cmp::Reverse(rule.priority));
            if !entry.heuristics.is_empty() {
                heuristics_enabled.insert(entry.id);
            }
        }
        if self.heuristics_off {
            heuristics_enabled = ProtocolMask::EMPTY;
        }
        for type_id in &self.heuristics_disabled {
            if let Some(id) = by_type.get(type_id) {
                heuristics_enabled.remove(*id);
            }
        }

        debug!(
            protocols = by_name.len(),
            heuristics = heuristics_enabled.len(),
            "protocol registry built"
        );

        Ok(Registry {
            entries,
            by_name,
            by_type,
            heuristics_enabled,
        })
    }
}
