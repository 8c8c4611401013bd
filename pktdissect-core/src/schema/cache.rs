//! Per-definition schema cache.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use crate::error::DefinitionErrors;

use super::{HeaderDefinition, HeaderSchema};

/// Compiled schemas keyed by definition type.
///
/// Each definition is compiled at most once per cache; later lookups share
/// the same `Arc`.
#[derive(Debug, Default)]
pub struct SchemaCache {
    schemas: HashMap<TypeId, Arc<HeaderSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled schema for `H`, building it on first use.
    pub fn build<H: HeaderDefinition>(&mut self) -> Result<Arc<HeaderSchema>, DefinitionErrors> {
        let key = TypeId::of::<H>();
        if let Some(schema) = self.schemas.get(&key) {
            return Ok(Arc::clone(schema));
        }
        let schema = Arc::new(HeaderSchema::of::<H>()?);
        trace!(header = H::NAME, fields = schema.fields().len(), "compiled header schema");
        self.schemas.insert(key, Arc::clone(&schema));
        Ok(schema)
    }

    /// Cached schema for `H`, if already built.
    pub fn get<H: HeaderDefinition>(&self) -> Option<Arc<HeaderSchema>> {
        self.schemas.get(&TypeId::of::<H>()).cloned()
    }

    /// Drop every cached schema; the next `build` recompiles.
    pub fn clear(&mut self) {
        self.schemas.clear();
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}
