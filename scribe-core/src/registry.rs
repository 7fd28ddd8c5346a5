use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use tracing::debug;

use crate::scribe::Describe;

/// A self-describing object that carries a type key, so it can live in a
/// polymorphic list.
///
/// Usually derived with `#[derive(Tagged)]`.
pub trait Tagged: Describe + Any {
    /// Stable key stored next to the object's frame.
    fn type_key(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl dyn Tagged {
    pub fn downcast_ref<T: Tagged>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: Tagged>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    pub fn is<T: Tagged>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Debug for dyn Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tagged({})", self.type_key())
    }
}

/// Zero-argument constructor for a registered type.
pub type Constructor = fn() -> Box<dyn Tagged>;

/// The set of polymorphic types a load is allowed to instantiate.
///
/// A type key found in a document is only ever turned into an object
/// through this table; unknown keys load as empty slots.
#[derive(Default)]
pub struct TypeRegistry {
    constructors: HashMap<String, Constructor>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor. Re-registering a key replaces the old one.
    pub fn register(&mut self, key: impl Into<String>, constructor: Constructor) -> &mut Self {
        let key = key.into();
        if self.constructors.insert(key.clone(), constructor).is_some() {
            debug!(%key, "replacing registered constructor");
        }
        self
    }

    /// Registers `T` under its own type key, constructed with `Default`.
    pub fn register_default<T: Tagged + Default>(&mut self) -> &mut Self {
        let key = T::default().type_key();
        self.register(key, || Box::new(T::default()))
    }

    /// Instantiates a fresh object for `key`, if it is registered.
    pub fn construct(&self, key: &str) -> Option<Box<dyn Tagged>> {
        self.constructors.get(key).map(|constructor| constructor())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.constructors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructors.is_empty()
    }

    /// Registered keys, in no particular order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.keys().collect();
        keys.sort_unstable();
        f.debug_struct("TypeRegistry").field("keys", &keys).finish()
    }
}
