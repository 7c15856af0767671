//! Parsed-definition cache.
//!
//! Definitions are parsed once per `(id, revision)` and shared as
//! `Arc<StateMachine>`. Cached trees are immutable, so readers never
//! coordinate beyond the short map lookup.

use crate::definition::error::ParseError;
use crate::definition::model::StateMachine;
use crate::definition::parser;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Identifies one revision of a definition.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionRef {
    pub id: String,
    pub revision: u64,
}

impl DefinitionRef {
    pub fn new(id: impl Into<String>, revision: u64) -> Self {
        Self {
            id: id.into(),
            revision,
        }
    }
}

impl fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.id, self.revision)
    }
}

/// Cache of parsed definitions keyed by [`DefinitionRef`].
///
/// # Example
///
/// ```rust
/// use stepwise::definition::{DefinitionCache, DefinitionRef};
/// use std::sync::Arc;
///
/// let cache = DefinitionCache::new();
/// let key = DefinitionRef::new("hello", 1);
/// let text = r#"{"StartAt": "A", "States": {"A": {"Type": "Succeed"}}}"#;
///
/// let first = cache.get_or_parse(&key, text).unwrap();
/// let second = cache.get_or_parse(&key, text).unwrap();
/// assert!(Arc::ptr_eq(&first, &second));
/// ```
#[derive(Debug, Default)]
pub struct DefinitionCache {
    entries: RwLock<HashMap<DefinitionRef, Arc<StateMachine>>>,
}

impl DefinitionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &DefinitionRef) -> Option<Arc<StateMachine>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Return the cached tree for `key`, parsing `definition` on a miss.
    ///
    /// A cached revision is never re-parsed; register a new revision to
    /// change a definition.
    pub fn get_or_parse(
        &self,
        key: &DefinitionRef,
        definition: &str,
    ) -> Result<Arc<StateMachine>, ParseError> {
        if let Some(machine) = self.get(key) {
            return Ok(machine);
        }
        let machine = Arc::new(parser::parse(definition)?);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(key.clone()).or_insert(machine).clone())
    }

    pub fn remove(&self, key: &DefinitionRef) -> Option<Arc<StateMachine>> {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
