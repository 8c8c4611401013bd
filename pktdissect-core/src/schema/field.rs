//! Field declarations.

use smallvec::SmallVec;

use super::FunctionKind;

/// Declarative metadata for one header field.
///
/// Literals set here become constant functions. Any function can instead be
/// bound to a named accessor, either explicitly with [`FieldDecl::bind`] or by
/// declaring an accessor named `<field>` (VALUE) or `<field>_<function>`
/// (e.g. `options_length`), which overrides a literal.
///
/// Offsets and lengths are in bits. For a field with a `parent`, the offset is
/// relative to the parent's first bit.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub(crate) name: &'static str,
    pub(crate) parent: Option<&'static str>,
    pub(crate) offset: Option<i32>,
    pub(crate) length: Option<i32>,
    pub(crate) mask: Option<u64>,
    pub(crate) check: Option<bool>,
    pub(crate) raw: bool,
    pub(crate) description: Option<&'static str>,
    pub(crate) display: Option<&'static str>,
    pub(crate) units: Option<&'static str>,
    pub(crate) bindings: SmallVec<[(FunctionKind, &'static str); 2]>,
}

impl FieldDecl {
    /// Declare a field with no literals.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            parent: None,
            offset: None,
            length: None,
            mask: None,
            check: None,
            raw: false,
            description: None,
            display: None,
            units: None,
            bindings: SmallVec::new(),
        }
    }

    /// Field whose value is the raw big-endian bits at a static position.
    pub fn bits(name: &'static str, offset: i32, length: i32) -> Self {
        Self::new(name).at(offset, length).raw()
    }

    /// Field whose value is the raw bytes/integer at a static byte position.
    pub fn bytes(name: &'static str, offset: i32, length: i32) -> Self {
        Self::bits(name, offset * 8, length * 8)
    }

    /// Bit sub-field of `parent`, at `offset` bits from the parent's first bit.
    pub fn sub(name: &'static str, parent: &'static str, offset: i32, length: i32) -> Self {
        Self::new(name).parent(parent).at(offset, length)
    }

    /// Static offset and length, in bits.
    pub fn at(mut self, offset: i32, length: i32) -> Self {
        self.offset = Some(offset);
        self.length = Some(length);
        self
    }

    pub fn offset(mut self, offset: i32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn length(mut self, length: i32) -> Self {
        self.length = Some(length);
        self
    }

    /// Value is read from the field's bits rather than from an accessor.
    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn parent(mut self, parent: &'static str) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Explicit mask within the parent field.
    pub fn mask(mut self, mask: u64) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn check(mut self, present: bool) -> Self {
        self.check = Some(present);
        self
    }

    pub fn description(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn display(mut self, display: &'static str) -> Self {
        self.display = Some(display);
        self
    }

    pub fn units(mut self, units: &'static str) -> Self {
        self.units = Some(units);
        self
    }

    /// Bind `function` to the accessor named `accessor`.
    pub fn bind(mut self, function: FunctionKind, accessor: &'static str) -> Self {
        self.bindings.retain(|(kind, _)| *kind != function);
        self.bindings.push((function, accessor));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn binding(&self, function: FunctionKind) -> Option<&'static str> {
        self.bindings
            .iter()
            .find(|(kind, _)| *kind == function)
            .map(|(_, name)| *name)
    }
}
