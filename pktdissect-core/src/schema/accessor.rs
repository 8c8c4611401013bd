//! Typed accessors bound to field functions.
//!
//! An accessor is a closure evaluated against the header being decoded. Header
//! definitions register accessors by name; the resolver binds them to field
//! functions either explicitly or by naming convention.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use compact_str::CompactString;

use crate::protocol::{FieldValue, HeaderView};

use super::RuntimeKind;

/// Text produced by description/display/units functions.
pub type Text = Cow<'static, str>;

/// Shared closure evaluated against a header view.
pub type DynFn<T> = Arc<dyn Fn(&HeaderView<'_>) -> T + Send + Sync>;

/// Shared closure producing a value that may borrow from the packet.
pub type ObjectFn = Arc<dyn for<'a> Fn(&HeaderView<'a>) -> FieldValue<'a> + Send + Sync>;

/// Box a closure as a [`DynFn`], fixing its signature from the bound.
pub fn dyn_fn<T, F>(f: F) -> DynFn<T>
where
    F: Fn(&HeaderView<'_>) -> T + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Box a closure as an [`ObjectFn`], fixing its signature from the bound.
pub fn object_fn<F>(f: F) -> ObjectFn
where
    F: for<'a> Fn(&HeaderView<'a>) -> FieldValue<'a> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// A named, typed accessor.
#[derive(Clone)]
pub enum Accessor {
    Int(DynFn<i32>),
    Long(DynFn<i64>),
    Boolean(DynFn<bool>),
    String(DynFn<Text>),
    Object(ObjectFn),
}

impl Accessor {
    pub fn int<F>(f: F) -> Self
    where
        F: Fn(&HeaderView<'_>) -> i32 + Send + Sync + 'static,
    {
        Accessor::Int(Arc::new(f))
    }

    pub fn long<F>(f: F) -> Self
    where
        F: Fn(&HeaderView<'_>) -> i64 + Send + Sync + 'static,
    {
        Accessor::Long(Arc::new(f))
    }

    pub fn boolean<F>(f: F) -> Self
    where
        F: Fn(&HeaderView<'_>) -> bool + Send + Sync + 'static,
    {
        Accessor::Boolean(Arc::new(f))
    }

    /// Text accessor returning an owned string.
    pub fn string<F>(f: F) -> Self
    where
        F: Fn(&HeaderView<'_>) -> String + Send + Sync + 'static,
    {
        Accessor::String(dyn_fn(move |view| Cow::Owned(f(view))))
    }

    /// Text accessor choosing among static strings.
    pub fn text<F>(f: F) -> Self
    where
        F: Fn(&HeaderView<'_>) -> &'static str + Send + Sync + 'static,
    {
        Accessor::String(dyn_fn(move |view| Cow::Borrowed(f(view))))
    }

    pub fn object<F>(f: F) -> Self
    where
        F: for<'a> Fn(&HeaderView<'a>) -> FieldValue<'a> + Send + Sync + 'static,
    {
        Accessor::Object(Arc::new(f))
    }

    /// The kind this accessor returns.
    pub fn kind(&self) -> RuntimeKind {
        match self {
            Accessor::Int(_) => RuntimeKind::Int,
            Accessor::Long(_) => RuntimeKind::Long,
            Accessor::Boolean(_) => RuntimeKind::Boolean,
            Accessor::String(_) => RuntimeKind::String,
            Accessor::Object(_) => RuntimeKind::Object,
        }
    }

    /// Convert into a value function, whatever the kind.
    pub(crate) fn into_object(self) -> ObjectFn {
        match self {
            Accessor::Int(f) => object_fn(move |view| FieldValue::Int64(f(view) as i64)),
            Accessor::Long(f) => object_fn(move |view| FieldValue::Int64(f(view))),
            Accessor::Boolean(f) => object_fn(move |view| FieldValue::Bool(f(view))),
            Accessor::String(f) => {
                object_fn(move |view| FieldValue::OwnedString(CompactString::new(f(view))))
            }
            Accessor::Object(f) => f,
        }
    }
}

impl fmt::Debug for Accessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Accessor::{}", self.kind())
    }
}

/// Accessors declared by one header definition, keyed by name.
#[derive(Debug, Clone, Default)]
pub struct AccessorTable {
    accessors: HashMap<&'static str, Accessor>,
}

impl AccessorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an accessor. Returns `false` if the name was already taken.
    pub fn insert(&mut self, name: &'static str, accessor: Accessor) -> bool {
        if self.accessors.contains_key(name) {
            return false;
        }
        self.accessors.insert(name, accessor);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Accessor> {
        self.accessors.get(name)
    }

    /// Like [`get`](Self::get), also returning the name as registered.
    pub fn entry(&self, name: &str) -> Option<(&'static str, &Accessor)> {
        self.accessors
            .get_key_value(name)
            .map(|(key, accessor)| (*key, accessor))
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}
