//! Header schemas.
//!
//! A header type is declared once as field metadata ([`HeaderDefinition`],
//! [`FieldDecl`]) and compiled into an immutable [`HeaderSchema`] whose
//! fields carry resolved runtime functions ([`FieldRuntime`]). The scanner and
//! [`HeaderView`](crate::protocol::HeaderView) evaluate those functions against
//! packet bytes; nothing is re-derived per packet.

mod accessor;
mod cache;
mod field;
mod header;
mod kind;
mod runtime;

pub use accessor::{dyn_fn, object_fn, Accessor, AccessorTable, DynFn, ObjectFn, Text};
pub use cache::SchemaCache;
pub use field::FieldDecl;
pub use header::{
    HeaderDecl, HeaderDefinition, HeaderLength, HeaderSchema, OptionLayout, OptionsDecl,
    SubHeaderDecl, SubHeaderSchema,
};
pub use kind::{FunctionKind, RuntimeKind};
pub use runtime::{FieldRuntime, Resolver, ValueResolver};
