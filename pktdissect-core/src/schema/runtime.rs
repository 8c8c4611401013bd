//! Field runtime resolution.
//!
//! Compiles a [`FieldDecl`] plus the header's [`AccessorTable`] into a
//! [`FieldRuntime`]: one typed function per [`FunctionKind`], each either a
//! constant (`Resolver::Static`) or a bound accessor (`Resolver::Dynamic`).
//! All failures happen here, at schema-build time; evaluating a compiled
//! runtime against a header never fails.

use std::fmt;

use crate::error::{DefinitionError, DefinitionErrors};
use crate::protocol::{FieldValue, HeaderView};

use super::accessor::{dyn_fn, Accessor, AccessorTable, DynFn, ObjectFn, Text};
use super::{FieldDecl, FunctionKind, RuntimeKind};

/// A field function: constant, or evaluated against the header.
#[derive(Clone)]
pub enum Resolver<T> {
    Static(T),
    Dynamic(DynFn<T>),
}

impl<T: Clone> Resolver<T> {
    #[inline]
    pub fn resolve(&self, view: &HeaderView<'_>) -> T {
        match self {
            Resolver::Static(value) => value.clone(),
            Resolver::Dynamic(f) => f(view),
        }
    }

    pub fn is_static(&self) -> bool {
        matches!(self, Resolver::Static(_))
    }

    pub fn static_value(&self) -> Option<&T> {
        match self {
            Resolver::Static(value) => Some(value),
            Resolver::Dynamic(_) => None,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Static(value) => write!(f, "Static({value:?})"),
            Resolver::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Sum of two bit offsets, staying static when both are.
fn add_offsets(a: &Resolver<i32>, b: &Resolver<i32>) -> Resolver<i32> {
    match (a, b) {
        (Resolver::Static(x), Resolver::Static(y)) => Resolver::Static(x.saturating_add(*y)),
        _ => {
            let (a, b) = (a.clone(), b.clone());
            Resolver::Dynamic(dyn_fn(move |view| {
                a.resolve(view).saturating_add(b.resolve(view))
            }))
        }
    }
}

/// Contiguous mask of `length` bits, `offset` bits into a `parent_len`-bit field.
pub(crate) fn derive_mask(offset: i32, length: i32, parent_len: i32) -> u64 {
    if length <= 0 || offset < 0 || parent_len <= 0 || offset + length > parent_len {
        return 0;
    }
    let ones = if length >= 64 {
        u64::MAX
    } else {
        (1u64 << length) - 1
    };
    let shift = parent_len - offset - length;
    if shift >= 64 {
        0
    } else {
        ones << shift
    }
}

/// How a field's VALUE is produced.
#[derive(Clone)]
pub enum ValueResolver {
    /// Raw big-endian bits at the field's absolute position.
    Raw,
    /// Bits selected by MASK from the parent field's raw bits.
    Masked { parent_length: Resolver<i32> },
    /// Bound accessor.
    Dynamic(ObjectFn),
}

impl fmt::Debug for ValueResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueResolver::Raw => f.write_str("Raw"),
            ValueResolver::Masked { .. } => f.write_str("Masked"),
            ValueResolver::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Compiled field: every function resolved, sub-fields attached.
#[derive(Debug, Clone)]
pub struct FieldRuntime {
    pub(crate) name: &'static str,
    pub(crate) parent: Option<&'static str>,
    pub(crate) declared: usize,
    pub(crate) offset: Resolver<i32>,
    pub(crate) absolute_offset: Resolver<i32>,
    pub(crate) length: Resolver<i32>,
    pub(crate) mask: Resolver<u64>,
    pub(crate) value: ValueResolver,
    pub(crate) check: Resolver<bool>,
    pub(crate) description: Option<Resolver<Text>>,
    pub(crate) display: Option<Resolver<Text>>,
    pub(crate) units: Option<Resolver<Text>>,
    pub(crate) children: Vec<FieldRuntime>,
    /// Set when MASK came from a literal or accessor rather than derivation.
    pub(crate) explicit_mask: bool,
}

impl FieldRuntime {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static str> {
        self.parent
    }

    /// Sub-fields, ordered by offset.
    pub fn children(&self) -> &[FieldRuntime] {
        &self.children
    }

    /// Declaration order within the header.
    pub fn declared(&self) -> usize {
        self.declared
    }

    /// Offset as declared (relative to the parent for sub-fields).
    pub fn offset(&self) -> &Resolver<i32> {
        &self.offset
    }

    pub fn length(&self) -> &Resolver<i32> {
        &self.length
    }

    pub fn mask(&self) -> &Resolver<u64> {
        &self.mask
    }

    /// Static relative offset, used for ordering.
    pub(crate) fn sort_key(&self) -> (bool, i32, usize) {
        match self.offset.static_value() {
            Some(offset) => (false, *offset, self.declared),
            None => (true, 0, self.declared),
        }
    }

    /// Find a field by name in this subtree.
    pub fn find(&self, name: &str) -> Option<&FieldRuntime> {
        if self.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(name))
    }

    pub fn offset_bits(&self, view: &HeaderView<'_>) -> i32 {
        self.offset.resolve(view)
    }

    /// Offset from the header's first bit.
    pub fn absolute_offset_bits(&self, view: &HeaderView<'_>) -> i32 {
        self.absolute_offset.resolve(view)
    }

    pub fn length_bits(&self, view: &HeaderView<'_>) -> i32 {
        self.length.resolve(view)
    }

    pub fn mask_value(&self, view: &HeaderView<'_>) -> u64 {
        self.mask.resolve(view)
    }

    pub fn is_present(&self, view: &HeaderView<'_>) -> bool {
        self.check.resolve(view)
    }

    pub fn description(&self, view: &HeaderView<'_>) -> Option<Text> {
        self.description.as_ref().map(|r| r.resolve(view))
    }

    pub fn display(&self, view: &HeaderView<'_>) -> Option<Text> {
        self.display.as_ref().map(|r| r.resolve(view))
    }

    pub fn units(&self, view: &HeaderView<'_>) -> Option<Text> {
        self.units.as_ref().map(|r| r.resolve(view))
    }

    /// Current value of the field in `view`.
    pub fn value<'a>(&self, view: &HeaderView<'a>) -> FieldValue<'a> {
        match &self.value {
            ValueResolver::Dynamic(f) => f(view),
            ValueResolver::Raw => {
                let offset = self.absolute_offset.resolve(view);
                let length = self.length.resolve(view);
                raw_value(view, offset, length)
            }
            ValueResolver::Masked { parent_length } => {
                let mask = self.mask.resolve(view);
                let parent_length = parent_length.resolve(view);
                let parent_offset =
                    self.absolute_offset.resolve(view) - self.offset.resolve(view);
                if mask == 0 || !(1..=64).contains(&parent_length) {
                    return FieldValue::Null;
                }
                match view.bits(parent_offset, parent_length) {
                    Some(bits) => {
                        let selected = (bits & mask) >> mask.trailing_zeros();
                        let width = 64 - (mask >> mask.trailing_zeros()).leading_zeros() as i32;
                        FieldValue::from_bits(selected, width)
                    }
                    None => FieldValue::Null,
                }
            }
        }
    }
}

/// Raw value for a field at an absolute bit position.
fn raw_value<'a>(view: &HeaderView<'a>, offset: i32, length: i32) -> FieldValue<'a> {
    if offset < 0 || length <= 0 {
        return FieldValue::Null;
    }
    if length <= 64 {
        return match view.bits(offset, length) {
            Some(bits) => FieldValue::from_bits(bits, length),
            None => FieldValue::Null,
        };
    }
    if offset % 8 == 0 && length % 8 == 0 {
        let start = (offset / 8) as usize;
        let end = start + (length / 8) as usize;
        return match view.bytes().get(start..end) {
            Some(bytes) => FieldValue::Bytes(bytes),
            None => FieldValue::Null,
        };
    }
    FieldValue::Null
}

/// Per-field compilation state shared by the lookups below.
struct Lookup<'d> {
    header: &'static str,
    decl: &'d FieldDecl,
    table: &'d AccessorTable,
}

impl Lookup<'_> {
    /// Find the accessor overriding `function`, if any.
    ///
    /// An explicit binding must exist; the conventional name is optional.
    fn accessor(
        &self,
        function: FunctionKind,
        errors: &mut DefinitionErrors,
    ) -> Option<(&'static str, Accessor)> {
        if let Some(name) = self.decl.binding(function) {
            return match self.table.get(name) {
                Some(accessor) => Some((name, accessor.clone())),
                None => {
                    errors.push(DefinitionError::UnknownAccessor {
                        header: self.header,
                        field: self.decl.name,
                        function,
                        accessor: name,
                    });
                    None
                }
            };
        }
        let conventional = function.accessor_name(self.decl.name);
        self.table
            .entry(&conventional)
            .map(|(name, accessor)| (name, accessor.clone()))
    }

    fn type_error(
        &self,
        function: FunctionKind,
        accessor: &'static str,
        found: RuntimeKind,
    ) -> DefinitionError {
        DefinitionError::AccessorType {
            header: self.header,
            field: self.decl.name,
            function,
            accessor,
            expected: function.expected().unwrap_or(RuntimeKind::Object),
            found,
        }
    }

    fn missing(&self, function: FunctionKind) -> DefinitionError {
        DefinitionError::MissingFunction {
            header: self.header,
            field: self.decl.name,
            function,
        }
    }

    fn int(
        &self,
        function: FunctionKind,
        literal: Option<i32>,
        errors: &mut DefinitionErrors,
    ) -> Option<Resolver<i32>> {
        match self.accessor(function, errors) {
            Some((_, Accessor::Int(f))) => Some(Resolver::Dynamic(f)),
            Some((name, other)) => {
                errors.push(self.type_error(function, name, other.kind()));
                None
            }
            None => literal.map(Resolver::Static),
        }
    }

    fn long(
        &self,
        function: FunctionKind,
        literal: Option<u64>,
        errors: &mut DefinitionErrors,
    ) -> Option<Resolver<u64>> {
        match self.accessor(function, errors) {
            Some((_, Accessor::Long(f))) => {
                Some(Resolver::Dynamic(dyn_fn(move |view| f(view) as u64)))
            }
            Some((name, other)) => {
                errors.push(self.type_error(function, name, other.kind()));
                None
            }
            None => literal.map(Resolver::Static),
        }
    }

    fn boolean(
        &self,
        function: FunctionKind,
        literal: Option<bool>,
        errors: &mut DefinitionErrors,
    ) -> Option<Resolver<bool>> {
        match self.accessor(function, errors) {
            Some((_, Accessor::Boolean(f))) => Some(Resolver::Dynamic(f)),
            Some((name, other)) => {
                errors.push(self.type_error(function, name, other.kind()));
                None
            }
            None => literal.map(Resolver::Static),
        }
    }

    fn text(
        &self,
        function: FunctionKind,
        literal: Option<&'static str>,
        errors: &mut DefinitionErrors,
    ) -> Option<Resolver<Text>> {
        match self.accessor(function, errors) {
            Some((_, Accessor::String(f))) => Some(Resolver::Dynamic(f)),
            Some((name, other)) => {
                errors.push(self.type_error(function, name, other.kind()));
                None
            }
            None => literal.map(|text| Resolver::Static(Text::Borrowed(text))),
        }
    }
}

/// Compile one field declaration.
///
/// Returns `None` (with errors pushed) if any required function is missing or
/// mistyped. Sub-field wiring (absolute offsets, derived masks) is finished by
/// [`attach_children`] once the parent is known.
pub(crate) fn compile_field(
    header: &'static str,
    declared: usize,
    decl: &FieldDecl,
    table: &AccessorTable,
    errors: &mut DefinitionErrors,
) -> Option<FieldRuntime> {
    let lookup = Lookup {
        header,
        decl,
        table,
    };
    let before = errors.len();

    let offset = lookup.int(FunctionKind::Offset, decl.offset, errors);
    if offset.is_none() && errors.len() == before {
        errors.push(lookup.missing(FunctionKind::Offset));
    }

    let before_length = errors.len();
    let length = lookup.int(FunctionKind::Length, decl.length, errors);
    if length.is_none() && errors.len() == before_length {
        errors.push(lookup.missing(FunctionKind::Length));
    }

    let check = lookup
        .boolean(FunctionKind::Check, decl.check, errors)
        .unwrap_or(Resolver::Static(true));

    let declared_mask = lookup.long(FunctionKind::Mask, decl.mask, errors);

    let value = match lookup.accessor(FunctionKind::Value, errors) {
        Some((_, accessor)) => Some(ValueResolver::Dynamic(accessor.into_object())),
        None if decl.raw => Some(ValueResolver::Raw),
        // Parent length is filled in by `attach_child`.
        None if decl.parent.is_some() => Some(ValueResolver::Masked {
            parent_length: Resolver::Static(0),
        }),
        None => {
            errors.push(lookup.missing(FunctionKind::Value));
            None
        }
    };

    let description = lookup.text(FunctionKind::Description, decl.description, errors);
    let display = lookup.text(FunctionKind::Display, decl.display, errors);
    let units = lookup.text(FunctionKind::Units, decl.units, errors);

    if errors.len() != before {
        return None;
    }
    let (offset, length, value) = (offset?, length?, value?);

    let explicit_mask = declared_mask.is_some();
    let mask = declared_mask.unwrap_or_else(|| top_level_mask(&length));

    Some(FieldRuntime {
        name: decl.name,
        parent: decl.parent,
        declared,
        absolute_offset: offset.clone(),
        offset,
        length,
        mask,
        value,
        check,
        description,
        display,
        units,
        children: Vec::new(),
        explicit_mask,
    })
}

/// Mask covering all bits of a top-level field.
fn top_level_mask(length: &Resolver<i32>) -> Resolver<u64> {
    match length {
        Resolver::Static(len) => Resolver::Static(derive_mask(0, *len, (*len).min(64))),
        Resolver::Dynamic(_) => {
            let length = length.clone();
            Resolver::Dynamic(dyn_fn(move |view| {
                let len = length.resolve(view);
                derive_mask(0, len, len.min(64))
            }))
        }
    }
}

/// Finish wiring `child` under `parent` and store it.
///
/// Derives the child's absolute offset and, unless declared, its mask relative
/// to the parent. A sub-field without its own VALUE reads its bits through the
/// mask.
pub(crate) fn attach_child(
    header: &'static str,
    parent: &mut FieldRuntime,
    mut child: FieldRuntime,
    errors: &mut DefinitionErrors,
) {
    child.absolute_offset = add_offsets(&parent.absolute_offset, &child.offset);

    if let (Some(offset), Some(length), Some(parent_len)) = (
        child.offset.static_value(),
        child.length.static_value(),
        parent.length.static_value(),
    ) {
        if *offset < 0 || offset + length > *parent_len {
            errors.push(DefinitionError::SubfieldOutOfRange {
                header,
                field: child.name,
                parent: parent.name,
                offset: (*offset).max(0) as u32,
                end: (offset + length).max(0) as u32,
                parent_len: (*parent_len).max(0) as u32,
            });
            return;
        }
    }

    if !child.explicit_mask {
        child.mask = match (
            child.offset.static_value(),
            child.length.static_value(),
            parent.length.static_value(),
        ) {
            (Some(offset), Some(length), Some(parent_len)) => {
                Resolver::Static(derive_mask(*offset, *length, *parent_len))
            }
            _ => {
                let (offset, length, parent_len) =
                    (child.offset.clone(), child.length.clone(), parent.length.clone());
                Resolver::Dynamic(dyn_fn(move |view| {
                    derive_mask(
                        offset.resolve(view),
                        length.resolve(view),
                        parent_len.resolve(view),
                    )
                }))
            }
        };
    }

    if let ValueResolver::Masked { parent_length } = &mut child.value {
        *parent_length = parent.length.clone();
    }

    // Grandchildren were attached before their parent's absolute offset was known.
    let base = child.absolute_offset.clone();
    rebase_children(&mut child.children, &base);

    parent.children.push(child);
}

fn rebase_children(children: &mut [FieldRuntime], base: &Resolver<i32>) {
    for child in children {
        child.absolute_offset = add_offsets(base, &child.offset);
        let base = child.absolute_offset.clone();
        rebase_children(&mut child.children, &base);
    }
}
