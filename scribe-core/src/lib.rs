//! Scribe is a mode-symmetric object-graph serializer.
//!
//! Core concepts:
//! - **Frame**: A tag -> value map holding one object's fields
//! - **Field**: A tagged value; its variant is the stored type
//! - **Scribe**: A save or load session; the same `look_*` call writes or reads
//! - **Describe**: Implemented by every persisted type as one fixed look sequence
//! - **TypeRegistry**: The polymorphic types a load is allowed to construct
//! - **Resolver**: Binds references by id once all referenced objects have loaded
//!
//! Documents are written as JSON. Loading also accepts the older flat
//! binary format.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use scribe_core::{Describe, Scribe, TypeRegistry};
//!
//! #[derive(Default)]
//! struct Silo {
//!     name: String,
//!     capacity: i32,
//! }
//!
//! impl Describe for Silo {
//!     fn describe(&mut self, scribe: &mut Scribe) {
//!         scribe.look_value("name", &mut self.name, String::new());
//!         scribe.look_value("capacity", &mut self.capacity, 100);
//!     }
//! }
//!
//! let mut silo = Silo { name: "silo-1".into(), capacity: 200 };
//! let bytes = scribe_core::save_to_vec(&mut silo, 1).unwrap();
//!
//! let loaded = scribe_core::load_from_reader::<Silo>(
//!     &bytes[..],
//!     Arc::new(TypeRegistry::new()),
//!     &Default::default(),
//! )
//! .unwrap();
//! assert_eq!(loaded.value.capacity, 200);
//! ```

use std::io::{Read, Write};
use std::sync::Arc;

mod codec;
mod config;
mod error;
mod field;
mod frame;
pub mod legacy;
mod reference;
mod registry;
mod scribe;
pub mod wire;

pub use codec::{Codec, ListElement, MapElement, ScribeEnum};
pub use config::{LoadOptions, SaveOptions, ScribeConfig};
pub use error::{Result, ScribeError};
pub use field::{Field, FieldType, PolyEntry};
pub use frame::{Document, Frame, ROOT_TAG};
pub use indexmap::IndexMap;
pub use reference::{Ref, Referenceable, Resolution, Resolver, Shared, shared};
pub use registry::{Constructor, Tagged, TypeRegistry};
pub use scribe::{Describe, Mode, NodeScope, Scribe};

#[cfg(feature = "derive")]
pub use scribe_derive::{ScribeEnum, Tagged};

/// Result of [`load_from_reader`].
#[derive(Debug)]
pub struct Loaded<T> {
    pub value: T,
    /// Version stored in the document.
    pub version: i32,
    pub resolution: Resolution,
}

/// Saves `root` as a complete document.
pub fn save_to_writer<T: Describe + ?Sized>(
    root: &mut T,
    version: i32,
    options: &SaveOptions,
    sink: impl Write,
) -> Result<()> {
    let mut scribe = Scribe::begin_saving_with(version, options.clone())?;
    scribe.look_root(root);
    scribe.finish_saving(sink)
}

pub fn save_to_vec<T: Describe + ?Sized>(root: &mut T, version: i32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    save_to_writer(root, version, &SaveOptions::default(), &mut out)?;
    Ok(out)
}

/// Loads a single self-contained document and resolves its references.
///
/// Documents whose references span several sources should drive
/// [`Scribe::begin_loading_with`] directly and call
/// [`Resolver::resolve_all`] once at the end.
pub fn load_from_reader<T: Describe + Default>(
    source: impl Read,
    types: Arc<TypeRegistry>,
    options: &LoadOptions,
) -> Result<Loaded<T>> {
    let mut scribe = Scribe::begin_loading_with(source, types, options, Resolver::new())?;
    let version = scribe.version();
    let mut value = T::default();
    scribe.look_root(&mut value);
    let mut resolver = scribe.finish_loading()?;
    let resolution = resolver.resolve_all();

    Ok(Loaded {
        value,
        version,
        resolution,
    })
}
