//! Header definitions and compiled header schemas.

use std::collections::HashMap;
use std::fmt;

use crate::error::{DefinitionError, DefinitionErrors};
use crate::protocol::FieldValue;

use super::accessor::{Accessor, AccessorTable};
use super::runtime::{attach_child, compile_field, FieldRuntime};
use super::FieldDecl;

/// A header type described by field metadata.
///
/// Implementors declare their fields, accessors, length rule and option layout
/// once; the schema cache compiles that into a [`HeaderSchema`].
///
/// ```
/// use pktdissect_core::schema::{FieldDecl, HeaderDecl, HeaderDefinition, HeaderLength};
///
/// struct Shim;
///
/// impl HeaderDefinition for Shim {
///     const NAME: &'static str = "shim";
///
///     fn declare(decl: &mut HeaderDecl) {
///         decl.length(HeaderLength::Fixed(4))
///             .field(FieldDecl::bytes("tag", 0, 2))
///             .field(FieldDecl::bytes("next", 2, 2));
///     }
/// }
/// ```
pub trait HeaderDefinition: 'static {
    /// Unique protocol name.
    const NAME: &'static str;

    /// Human-readable name.
    const DISPLAY_NAME: &'static str = Self::NAME;

    /// Explicit protocol ID; `None` takes the lowest free one.
    const ID: Option<u16> = None;

    fn declare(decl: &mut HeaderDecl);
}

/// How many bytes a header occupies.
#[derive(Clone, Copy)]
pub enum HeaderLength {
    /// Constant byte count.
    Fixed(usize),
    /// Computed from the buffer and the header's first byte; `None` when the
    /// bytes needed are not there.
    Computed(fn(&[u8], usize) -> Option<usize>),
    /// Total length (type and length octets included) read from the octet at
    /// `at` bytes into the header. Used by TLV sub-headers.
    LengthOctet { at: usize },
}

impl HeaderLength {
    /// Resolve the length of the header starting at `start`.
    pub fn resolve(&self, buffer: &[u8], start: usize) -> Option<usize> {
        match self {
            HeaderLength::Fixed(len) => Some(*len),
            HeaderLength::Computed(f) => f(buffer, start),
            HeaderLength::LengthOctet { at } => buffer
                .get(start.checked_add(*at)?)
                .map(|octet| *octet as usize),
        }
    }

    /// Whether the length comes from a TLV length octet.
    pub fn is_length_octet(&self) -> bool {
        matches!(self, HeaderLength::LengthOctet { .. })
    }
}

impl fmt::Debug for HeaderLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderLength::Fixed(len) => write!(f, "Fixed({len})"),
            HeaderLength::Computed(_) => f.write_str("Computed(..)"),
            HeaderLength::LengthOctet { at } => write!(f, "LengthOctet {{ at: {at} }}"),
        }
    }
}

/// Builder passed to [`HeaderDefinition::declare`].
#[derive(Debug)]
pub struct HeaderDecl {
    name: &'static str,
    fields: Vec<FieldDecl>,
    accessors: AccessorTable,
    duplicate_accessors: Vec<&'static str>,
    length: Option<HeaderLength>,
    options: Option<OptionsDecl>,
}

impl HeaderDecl {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            fields: Vec::new(),
            accessors: AccessorTable::new(),
            duplicate_accessors: Vec::new(),
            length: None,
            options: None,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn field(&mut self, field: FieldDecl) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Register a named accessor for fields to bind to.
    pub fn accessor(&mut self, name: &'static str, accessor: Accessor) -> &mut Self {
        if !self.accessors.insert(name, accessor) {
            self.duplicate_accessors.push(name);
        }
        self
    }

    pub fn length(&mut self, length: HeaderLength) -> &mut Self {
        self.length = Some(length);
        self
    }

    /// Option chain carried by this header.
    pub fn options(&mut self, options: OptionsDecl) -> &mut Self {
        self.options = Some(options);
        self
    }
}

/// Declaration of a header's option (sub-header) chain.
#[derive(Debug)]
pub struct OptionsDecl {
    start: usize,
    kinds: Vec<SubHeaderDecl>,
}

impl OptionsDecl {
    /// Options begin `start` bytes into the header and run to its end.
    pub fn new(start: usize) -> Self {
        Self {
            start,
            kinds: Vec::new(),
        }
    }

    pub fn kind(mut self, sub: SubHeaderDecl) -> Self {
        self.kinds.push(sub);
        self
    }

    pub fn kinds(mut self, subs: impl IntoIterator<Item = SubHeaderDecl>) -> Self {
        self.kinds.extend(subs);
        self
    }
}

/// One option type, identified by its type octet.
#[derive(Debug)]
pub struct SubHeaderDecl {
    kind: u8,
    end_of_list: bool,
    decl: HeaderDecl,
}

impl SubHeaderDecl {
    pub fn new(kind: u8, name: &'static str) -> Self {
        Self {
            kind,
            end_of_list: false,
            decl: HeaderDecl::new(name),
        }
    }

    /// Single-octet option such as EOL or NOP.
    pub fn single_octet(kind: u8, name: &'static str) -> Self {
        Self::new(kind, name)
            .fixed_length(1)
            .field(FieldDecl::bytes("type", 0, 1))
    }

    pub fn fixed_length(mut self, bytes: usize) -> Self {
        self.decl.length(HeaderLength::Fixed(bytes));
        self
    }

    /// Length read from the octet `at` bytes into the option.
    pub fn length_octet(mut self, at: usize) -> Self {
        self.decl.length(HeaderLength::LengthOctet { at });
        self
    }

    /// Scanning stops after this option.
    pub fn end_of_list(mut self) -> Self {
        self.end_of_list = true;
        self
    }

    pub fn field(mut self, field: FieldDecl) -> Self {
        self.decl.field(field);
        self
    }

    pub fn accessor(mut self, name: &'static str, accessor: Accessor) -> Self {
        self.decl.accessor(name, accessor);
        self
    }

    pub fn kind_id(&self) -> u8 {
        self.kind
    }
}

/// Compiled option type.
#[derive(Debug)]
pub struct SubHeaderSchema {
    pub(crate) kind: u8,
    pub(crate) end_of_list: bool,
    pub(crate) schema: HeaderSchema,
}

impl SubHeaderSchema {
    pub fn kind(&self) -> u8 {
        self.kind
    }

    pub fn is_end_of_list(&self) -> bool {
        self.end_of_list
    }

    pub fn schema(&self) -> &HeaderSchema {
        &self.schema
    }
}

/// Compiled option chain layout. Kinds are sorted by type octet.
#[derive(Debug)]
pub struct OptionLayout {
    pub(crate) start: usize,
    pub(crate) kinds: Vec<SubHeaderSchema>,
}

impl OptionLayout {
    /// Byte offset of the first option within the header.
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn lookup(&self, kind: u8) -> Option<&SubHeaderSchema> {
        self.kinds
            .binary_search_by_key(&kind, |sub| sub.kind)
            .ok()
            .map(|idx| &self.kinds[idx])
    }

    pub fn kinds(&self) -> &[SubHeaderSchema] {
        &self.kinds
    }
}

/// Immutable, compiled description of one header type.
#[derive(Debug)]
pub struct HeaderSchema {
    name: &'static str,
    display_name: &'static str,
    fields: Vec<FieldRuntime>,
    length: HeaderLength,
    options: Option<OptionLayout>,
}

impl HeaderSchema {
    /// Compile a definition type.
    pub fn of<H: HeaderDefinition>() -> Result<Self, DefinitionErrors> {
        let mut decl = HeaderDecl::new(H::NAME);
        H::declare(&mut decl);
        Self::compile(H::DISPLAY_NAME, decl)
    }

    /// Compile a declaration.
    pub fn compile(display_name: &'static str, decl: HeaderDecl) -> Result<Self, DefinitionErrors> {
        let mut errors = DefinitionErrors::new();
        let schema = compile_header(display_name, decl, &mut errors);
        match schema {
            Some(schema) if errors.is_empty() => Ok(schema),
            _ => Err(errors),
        }
    }

    /// Schema of the payload pseudo-header: all remaining bytes, one field.
    pub(crate) fn payload() -> Result<Self, DefinitionErrors> {
        let mut decl = HeaderDecl::new("payload");
        decl.length(HeaderLength::Computed(|buffer, start| {
            Some(buffer.len().saturating_sub(start))
        }))
        .field(FieldDecl::new("data").offset(0))
        .accessor("data", Accessor::object(|view| FieldValue::Bytes(view.bytes())))
        .accessor(
            "data_length",
            Accessor::int(|view| i32::try_from(view.length()).unwrap_or(i32::MAX).saturating_mul(8)),
        );
        Self::compile("Payload", decl)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn display_name(&self) -> &'static str {
        self.display_name
    }

    /// Top-level fields in offset order; sub-fields hang off their parents.
    pub fn fields(&self) -> &[FieldRuntime] {
        &self.fields
    }

    /// Find a field (or sub-field) by name.
    pub fn field(&self, name: &str) -> Option<&FieldRuntime> {
        self.fields.iter().find_map(|field| field.find(name))
    }

    pub fn length(&self) -> &HeaderLength {
        &self.length
    }

    pub fn options(&self) -> Option<&OptionLayout> {
        self.options.as_ref()
    }
}

fn compile_header(
    display_name: &'static str,
    decl: HeaderDecl,
    errors: &mut DefinitionErrors,
) -> Option<HeaderSchema> {
    let name = decl.name;
    for &accessor in &decl.duplicate_accessors {
        errors.push(DefinitionError::DuplicateAccessor {
            header: name,
            accessor,
        });
    }

    let fields = compile_fields(name, &decl, errors);

    let length = match decl.length {
        Some(length) => Some(length),
        None => {
            errors.push(DefinitionError::MissingHeaderLength { header: name });
            None
        }
    };

    let options = decl.options.map(|options| {
        let mut kinds = Vec::with_capacity(options.kinds.len());
        for sub in options.kinds {
            if kinds.iter().any(|k: &SubHeaderSchema| k.kind == sub.kind) {
                errors.push(DefinitionError::DuplicateSubHeader {
                    header: name,
                    kind: sub.kind,
                });
                continue;
            }
            let sub_name = sub.decl.name;
            if let Some(schema) = compile_header(sub_name, sub.decl, errors) {
                kinds.push(SubHeaderSchema {
                    kind: sub.kind,
                    end_of_list: sub.end_of_list,
                    schema,
                });
            }
        }
        kinds.sort_by_key(|sub| sub.kind);
        OptionLayout {
            start: options.start,
            kinds,
        }
    });

    Some(HeaderSchema {
        name,
        display_name,
        fields,
        length: length?,
        options,
    })
}

/// Compile all fields and assemble the sub-field tree.
fn compile_fields(
    header: &'static str,
    decl: &HeaderDecl,
    errors: &mut DefinitionErrors,
) -> Vec<FieldRuntime> {
    let mut index: HashMap<&'static str, usize> = HashMap::with_capacity(decl.fields.len());
    for (i, field) in decl.fields.iter().enumerate() {
        if index.insert(field.name, i).is_some() {
            errors.push(DefinitionError::DuplicateField {
                header,
                field: field.name,
            });
        }
    }

    let mut compiled: Vec<Option<FieldRuntime>> = decl
        .fields
        .iter()
        .enumerate()
        .map(|(i, field)| compile_field(header, i, field, &decl.accessors, errors))
        .collect();

    // Resolve parents and depth; a chain longer than the field count is a cycle.
    let mut parents: Vec<Option<usize>> = Vec::with_capacity(decl.fields.len());
    let mut depths: Vec<usize> = vec![0; decl.fields.len()];
    let mut tree_ok = true;
    for field in &decl.fields {
        parents.push(match field.parent {
            Some(parent) => match index.get(parent) {
                Some(&p) => Some(p),
                None => {
                    errors.push(DefinitionError::UnknownParent {
                        header,
                        field: field.name,
                        parent,
                    });
                    tree_ok = false;
                    None
                }
            },
            None => None,
        });
    }
    for i in 0..parents.len() {
        let mut depth = 0;
        let mut cursor = parents[i];
        while let Some(p) = cursor {
            depth += 1;
            if depth > parents.len() {
                errors.push(DefinitionError::UnknownParent {
                    header,
                    field: decl.fields[i].name,
                    parent: decl.fields[i].parent.unwrap_or_default(),
                });
                tree_ok = false;
                break;
            }
            cursor = parents[p];
        }
        depths[i] = depth;
    }
    if !tree_ok || compiled.iter().any(Option::is_none) {
        return Vec::new();
    }

    // Attach deepest fields first so every parent is still unattached.
    let mut order: Vec<usize> = (0..compiled.len()).filter(|&i| parents[i].is_some()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(depths[i]));
    for i in order {
        let (Some(p), Some(child)) = (parents[i], compiled[i].take()) else {
            continue;
        };
        if let Some(parent) = compiled[p].as_mut() {
            attach_child(header, parent, child, errors);
        }
    }

    let mut fields: Vec<FieldRuntime> = compiled.into_iter().flatten().collect();
    sort_fields(&mut fields);
    fields
}

fn sort_fields(fields: &mut [FieldRuntime]) {
    fields.sort_by_key(FieldRuntime::sort_key);
    for field in fields {
        sort_fields(&mut field.children);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::FunctionKind;

    struct Demo;

    impl HeaderDefinition for Demo {
        const NAME: &'static str = "demo";

        fn declare(decl: &mut HeaderDecl) {
            decl.length(HeaderLength::Fixed(4))
                .field(FieldDecl::bytes("checksum", 2, 2))
                .field(FieldDecl::bytes("flags", 0, 1))
                .field(FieldDecl::sub("urgent", "flags", 2, 1))
                .field(FieldDecl::sub("kind", "flags", 4, 4))
                .field(FieldDecl::sub("ack", "flags", 3, 1))
                .field(FieldDecl::new("trailer").length(8).raw())
                .accessor("trailer_offset", Accessor::int(|_| 24));
        }
    }

    #[test]
    fn test_fields_sorted_by_offset() {
        let schema = HeaderSchema::of::<Demo>().unwrap();
        let names: Vec<_> = schema.fields().iter().map(|f| f.name()).collect();
        // Dynamic offsets sort after static ones.
        assert_eq!(names, vec!["flags", "checksum", "trailer"]);

        let flags = schema.field("flags").unwrap();
        let children: Vec<_> = flags.children().iter().map(|f| f.name()).collect();
        assert_eq!(children, vec!["urgent", "ack", "kind"]);
    }

    #[test]
    fn test_child_masks_derived() {
        let schema = HeaderSchema::of::<Demo>().unwrap();
        assert_eq!(schema.field("urgent").unwrap().mask().static_value(), Some(&0x20));
        assert_eq!(schema.field("ack").unwrap().mask().static_value(), Some(&0x10));
        assert_eq!(schema.field("kind").unwrap().mask().static_value(), Some(&0x0f));
    }

    #[test]
    fn test_length_resolution() {
        let buffer = [0u8, 0x45, 0, 0];
        assert_eq!(HeaderLength::Fixed(14).resolve(&buffer, 0), Some(14));
        assert_eq!(
            HeaderLength::Computed(|b, s| b.get(s).map(|v| ((v & 0x0f) as usize) * 4))
                .resolve(&buffer, 1),
            Some(20)
        );
        assert_eq!(HeaderLength::LengthOctet { at: 1 }.resolve(&buffer, 0), Some(0x45));
        assert_eq!(HeaderLength::LengthOctet { at: 1 }.resolve(&buffer, 3), None);
    }

    struct Broken;

    impl HeaderDefinition for Broken {
        const NAME: &'static str = "broken";

        fn declare(decl: &mut HeaderDecl) {
            decl.field(FieldDecl::bytes("a", 0, 1))
                .field(FieldDecl::bytes("a", 1, 1))
                .field(FieldDecl::sub("orphan", "nowhere", 0, 1))
                .field(FieldDecl::new("no_value").at(16, 8))
                .field(FieldDecl::sub("wide", "a", 4, 8))
                .accessor("x", Accessor::int(|_| 0))
                .accessor("x", Accessor::int(|_| 1));
        }
    }

    #[test]
    fn test_errors_are_batched() {
        let errors = HeaderSchema::of::<Broken>().unwrap_err();
        let all: Vec<_> = errors.iter().collect();

        assert!(all.contains(&&DefinitionError::DuplicateAccessor {
            header: "broken",
            accessor: "x"
        }));
        assert!(all.contains(&&DefinitionError::DuplicateField {
            header: "broken",
            field: "a"
        }));
        assert!(all.contains(&&DefinitionError::UnknownParent {
            header: "broken",
            field: "orphan",
            parent: "nowhere"
        }));
        assert!(all.contains(&&DefinitionError::MissingFunction {
            header: "broken",
            field: "no_value",
            function: FunctionKind::Value
        }));
        assert!(all.contains(&&DefinitionError::MissingHeaderLength { header: "broken" }));
    }

    struct Overflow;

    impl HeaderDefinition for Overflow {
        const NAME: &'static str = "overflow";

        fn declare(decl: &mut HeaderDecl) {
            decl.length(HeaderLength::Fixed(1))
                .field(FieldDecl::bytes("a", 0, 1))
                .field(FieldDecl::sub("wide", "a", 4, 8));
        }
    }

    #[test]
    fn test_subfield_out_of_range() {
        let errors = HeaderSchema::of::<Overflow>().unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(DefinitionError::SubfieldOutOfRange {
                field: "wide",
                parent: "a",
                offset: 4,
                end: 12,
                parent_len: 8,
                ..
            })
        ));
    }

    struct Cycle;

    impl HeaderDefinition for Cycle {
        const NAME: &'static str = "cycle";

        fn declare(decl: &mut HeaderDecl) {
            decl.length(HeaderLength::Fixed(1))
                .field(FieldDecl::sub("a", "b", 0, 1))
                .field(FieldDecl::sub("b", "a", 0, 1));
        }
    }

    #[test]
    fn test_parent_cycle_rejected() {
        let errors = HeaderSchema::of::<Cycle>().unwrap_err();
        assert!(errors
            .iter()
            .all(|e| matches!(e, DefinitionError::UnknownParent { .. })));
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn test_option_layout_lookup_and_duplicates() {
        let mut decl = HeaderDecl::new("opts");
        decl.length(HeaderLength::Fixed(8)).options(
            OptionsDecl::new(4)
                .kind(SubHeaderDecl::single_octet(1, "nop"))
                .kind(SubHeaderDecl::single_octet(0, "eol").end_of_list()),
        );
        let schema = HeaderSchema::compile("opts", decl).unwrap();
        let layout = schema.options().unwrap();
        assert_eq!(layout.start(), 4);
        assert!(layout.lookup(0).unwrap().is_end_of_list());
        assert_eq!(layout.lookup(1).unwrap().schema().name(), "nop");
        assert!(layout.lookup(2).is_none());

        let mut decl = HeaderDecl::new("dups");
        decl.length(HeaderLength::Fixed(8)).options(
            OptionsDecl::new(4)
                .kind(SubHeaderDecl::single_octet(1, "nop"))
                .kind(SubHeaderDecl::single_octet(1, "nop2")),
        );
        let errors = HeaderSchema::compile("dups", decl).unwrap_err();
        assert_eq!(
            errors.iter().next(),
            Some(&DefinitionError::DuplicateSubHeader { header: "dups", kind: 1 })
        );
    }
}
