//! Typed entity properties.
//!
//! Properties are typed values attached to entities under a registered
//! [`PropertyKey`]. Keys are registered explicitly at startup with a
//! [`PropertyRegistry`]; the registry hands out a dense index per name so
//! entities can store properties in a compact map.
//!
//! A key that was never registered is *invalid*. Update requests silently
//! ignore assignments through invalid keys.
//!
//! ```
//! use seer_core::property::PropertyRegistry;
//!
//! let mut registry = PropertyRegistry::new();
//! let area = registry.register::<f64>("area").unwrap();
//! assert!(area.is_valid());
//!
//! // Registering again returns the same slot.
//! let again = registry.register::<f64>("area").unwrap();
//! assert_eq!(area.idx(), again.idx());
//!
//! // A different type under the same name is rejected.
//! assert!(registry.register::<String>("area").is_err());
//! ```

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::error::{Result, SeerError};

/// Type-erased property value, shared between entity versions.
pub type PropertyValue = Arc<dyn Any + Send + Sync>;

// =============================================================================
// Property Key
// =============================================================================

/// Handle for reading and writing one typed property.
pub struct PropertyKey<T> {
    idx: Option<usize>,
    name: Arc<str>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> PropertyKey<T> {
    /// Creates a key that is not bound to any registry slot.
    ///
    /// Writes through such a key are ignored and reads return `None`.
    #[must_use]
    pub fn unregistered(name: &str) -> Self {
        Self {
            idx: None,
            name: Arc::from(name),
            _marker: PhantomData,
        }
    }

    /// Returns true if the key was produced by a registry.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.idx.is_some()
    }

    /// Registry slot of the key.
    #[must_use]
    pub fn idx(&self) -> Option<usize> {
        self.idx
    }

    /// Property name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> Clone for PropertyKey<T> {
    fn clone(&self) -> Self {
        Self {
            idx: self.idx,
            name: Arc::clone(&self.name),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for PropertyKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyKey")
            .field("name", &self.name)
            .field("idx", &self.idx)
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Description of a registered property.
#[derive(Debug, Clone)]
pub struct PropertyInfo {
    /// Property name.
    pub name: String,
    /// Rust type name of the value, for diagnostics.
    pub type_name: &'static str,
    type_id: TypeId,
}

/// Startup-time table of property keys.
#[derive(Debug, Default)]
pub struct PropertyRegistry {
    infos: Vec<PropertyInfo>,
    by_name: BTreeMap<String, usize>,
}

impl PropertyRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` with value type `T` and returns its key.
    ///
    /// Registering an existing name with the same type returns the existing
    /// slot.
    ///
    /// # Errors
    ///
    /// Returns [`SeerError::PropertyType`] if `name` is already registered
    /// with a different type.
    pub fn register<T: Any + Send + Sync>(&mut self, name: &str) -> Result<PropertyKey<T>> {
        let requested = TypeId::of::<T>();

        let idx = if let Some(&idx) = self.by_name.get(name) {
            let info = &self.infos[idx];
            if info.type_id != requested {
                return Err(SeerError::PropertyType {
                    name: name.to_string(),
                    registered: info.type_name,
                    requested: std::any::type_name::<T>(),
                });
            }
            idx
        } else {
            let idx = self.infos.len();
            self.infos.push(PropertyInfo {
                name: name.to_string(),
                type_name: std::any::type_name::<T>(),
                type_id: requested,
            });
            self.by_name.insert(name.to_string(), idx);
            tracing::debug!(property = name, idx, "registered property key");
            idx
        };

        Ok(PropertyKey {
            idx: Some(idx),
            name: Arc::from(name),
            _marker: PhantomData,
        })
    }

    /// Looks up the description of a slot.
    #[must_use]
    pub fn info(&self, idx: usize) -> Option<&PropertyInfo> {
        self.infos.get(idx)
    }

    /// Number of registered properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.infos.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_key_is_invalid() {
        let key = PropertyKey::<u32>::unregistered("count");
        assert!(!key.is_valid());
        assert_eq!(key.idx(), None);
        assert_eq!(key.name(), "count");
    }

    #[test]
    fn slots_are_dense() {
        let mut registry = PropertyRegistry::new();
        let a = registry.register::<u32>("a").unwrap();
        let b = registry.register::<String>("b").unwrap();
        assert_eq!(a.idx(), Some(0));
        assert_eq!(b.idx(), Some(1));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.info(1).unwrap().name, "b");
    }

    #[test]
    fn type_conflict_names_both_types() {
        let mut registry = PropertyRegistry::new();
        registry.register::<u32>("a").unwrap();
        let err = registry.register::<f64>("a").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("u32"));
        assert!(msg.contains("f64"));
    }
}
