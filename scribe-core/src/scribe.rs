//! The symmetric save/load session.
//!
//! A describe implementation issues the same sequence of `look_*` calls in
//! both directions; the session's [`Mode`] decides whether each call writes
//! the value into the current frame or reads it back out.

use std::cell::Cell;
use std::fmt;
use std::io::{Read, Write};
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, instrument, trace, warn};

use crate::codec::{Codec, ListElement, MapElement};
use crate::config::{LoadOptions, SaveOptions};
use crate::error::{Result, ScribeError};
use crate::field::{Field, PolyEntry};
use crate::frame::{Document, Frame, ROOT_TAG};
use crate::reference::{Ref, Referenceable, Resolver, Shared};
use crate::registry::{Tagged, TypeRegistry};
use crate::wire;

thread_local! {
    static SESSION_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Claim on this thread's single session slot, released on drop.
struct SessionToken;

impl SessionToken {
    fn claim() -> Result<Self> {
        SESSION_ACTIVE.with(|active| {
            if active.replace(true) {
                Err(ScribeError::SessionActive)
            } else {
                Ok(SessionToken)
            }
        })
    }
}

impl Drop for SessionToken {
    fn drop(&mut self) {
        SESSION_ACTIVE.with(|active| active.set(false));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Saving,
    Loading,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Saving => write!(f, "saving"),
            Mode::Loading => write!(f, "loading"),
        }
    }
}

/// A type that persists itself through a fixed sequence of `look_*` calls.
///
/// The sequence must not branch differently between saving and loading
/// the same object, or nested frames stop lining up.
pub trait Describe {
    fn describe(&mut self, scribe: &mut Scribe);
}

impl<T: Describe + ?Sized> Describe for Box<T> {
    fn describe(&mut self, scribe: &mut Scribe) {
        (**self).describe(scribe);
    }
}

/// Owners deep-describe the shared handle. On load the object registers
/// itself under its id, so references elsewhere can bind to it.
impl<T: Referenceable> Describe for Shared<T> {
    fn describe(&mut self, scribe: &mut Scribe) {
        self.borrow_mut().describe(scribe);
        if scribe.mode() == Mode::Loading {
            let id = self.borrow().reference_id();
            scribe.register(id, self);
        }
    }
}

/// Result of reading a tag on load.
enum Stored<T> {
    Absent,
    Null,
    Present(T),
}

/// One active save or load.
pub struct Scribe {
    mode: Mode,
    version: i32,
    root: Frame,
    stack: Vec<Frame>,
    save_options: SaveOptions,
    types: Arc<TypeRegistry>,
    resolver: Resolver,
    _session: SessionToken,
}

impl Scribe {
    pub fn begin_saving(version: i32) -> Result<Self> {
        Self::begin_saving_with(version, SaveOptions::default())
    }

    #[instrument(level = "debug", skip(options))]
    pub fn begin_saving_with(version: i32, options: SaveOptions) -> Result<Self> {
        let session = SessionToken::claim()?;
        Ok(Scribe {
            mode: Mode::Saving,
            version,
            root: Frame::new(),
            stack: Vec::new(),
            save_options: options,
            types: Arc::new(TypeRegistry::new()),
            resolver: Resolver::new(),
            _session: session,
        })
    }

    pub fn begin_loading(source: impl Read, types: Arc<TypeRegistry>) -> Result<Self> {
        Self::begin_loading_with(source, types, &LoadOptions::default(), Resolver::new())
    }

    /// Starts a load that continues `resolver`, so references may bind to
    /// objects registered by earlier sub-documents.
    #[instrument(level = "debug", skip_all)]
    pub fn begin_loading_with(
        mut source: impl Read,
        types: Arc<TypeRegistry>,
        options: &LoadOptions,
        resolver: Resolver,
    ) -> Result<Self> {
        let session = SessionToken::claim()?;
        let mut bytes = Vec::new();
        source.read_to_end(&mut bytes)?;
        let document = wire::parse_document(&bytes, options)?;
        debug!(
            version = document.version,
            bytes = bytes.len(),
            "loading session started"
        );

        Ok(Scribe {
            mode: Mode::Loading,
            version: document.version,
            root: document.root,
            stack: Vec::new(),
            save_options: SaveOptions::default(),
            types,
            resolver,
            _session: session,
        })
    }

    /// Ends a save and writes the document to `sink` as JSON.
    #[instrument(level = "debug", skip_all, fields(version = self.version))]
    pub fn finish_saving(self, sink: impl Write) -> Result<()> {
        let pretty = self.save_options.pretty;
        let (document, _session) = self.into_document()?;
        wire::write_document(&document, sink, pretty)
    }

    pub fn finish_saving_to_vec(self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.finish_saving(&mut out)?;
        Ok(out)
    }

    /// Ends a save and returns the document tree instead of encoding it.
    pub fn finish_saving_document(self) -> Result<Document> {
        self.into_document().map(|(document, _)| document)
    }

    fn into_document(self) -> Result<(Document, SessionToken)> {
        self.check_finish(Mode::Saving)?;
        let Scribe {
            version,
            root,
            _session,
            ..
        } = self;
        Ok((Document::new(version, root), _session))
    }

    /// Ends a load and hands back the resolver. References stay pending
    /// until the caller runs [`Resolver::resolve_all`].
    #[instrument(level = "debug", skip_all, fields(version = self.version))]
    pub fn finish_loading(self) -> Result<Resolver> {
        self.check_finish(Mode::Loading)?;
        debug!(
            registered = self.resolver.len(),
            pending = self.resolver.pending_len(),
            "loading session finished"
        );
        Ok(self.resolver)
    }

    fn check_finish(&self, expected: Mode) -> Result<()> {
        if self.mode != expected {
            return Err(ScribeError::WrongMode {
                expected,
                actual: self.mode,
            });
        }
        if !self.stack.is_empty() {
            return Err(ScribeError::UnbalancedScopes {
                depth: self.depth(),
            });
        }
        Ok(())
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn is_saving(&self) -> bool {
        self.mode == Mode::Saving
    }

    pub fn is_loading(&self) -> bool {
        self.mode == Mode::Loading
    }

    /// Document version: the one passed to `begin_saving`, or the one read
    /// from the input.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Cursor depth; the root frame is depth 1.
    pub fn depth(&self) -> usize {
        self.stack.len() + 1
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn resolver_mut(&mut self) -> &mut Resolver {
        &mut self.resolver
    }

    pub fn register<T: Referenceable>(&mut self, id: impl Into<String>, target: &Shared<T>) {
        self.resolver.register(id, target);
    }

    fn current(&self) -> &Frame {
        self.stack.last().unwrap_or(&self.root)
    }

    fn current_mut(&mut self) -> &mut Frame {
        match self.stack.last_mut() {
            Some(frame) => frame,
            None => &mut self.root,
        }
    }

    fn write(&mut self, tag: &str, field: Field) {
        self.current_mut().insert(tag, field);
    }

    fn stored<T>(&self, tag: &str, extract: impl FnOnce(&Field) -> Option<T>) -> Stored<T> {
        match self.current().get(tag) {
            None => Stored::Absent,
            Some(Field::Null) => Stored::Null,
            Some(field) => match extract(field) {
                Some(value) => Stored::Present(value),
                None => {
                    debug!(tag, found = %field.field_type(), "type mismatch, treating as absent");
                    Stored::Absent
                }
            },
        }
    }

    /// Like [`stored`](Self::stored), but detaches the payload. Pair with
    /// [`restore`](Self::restore).
    fn take_stored<T>(&mut self, tag: &str, take: impl FnOnce(&mut Field) -> Option<T>) -> Stored<T> {
        match self.current_mut().get_mut(tag) {
            None => Stored::Absent,
            Some(Field::Null) => Stored::Null,
            Some(field) => match take(field) {
                Some(value) => Stored::Present(value),
                None => {
                    debug!(tag, found = %field.field_type(), "type mismatch, treating as absent");
                    Stored::Absent
                }
            },
        }
    }

    fn restore(&mut self, tag: &str, put: impl FnOnce(&mut Field)) {
        if let Some(field) = self.current_mut().get_mut(tag) {
            put(field);
        }
    }

    fn push_frame(&mut self, frame: Frame) {
        self.stack.push(frame);
    }

    fn pop_frame(&mut self) -> Frame {
        self.stack.pop().unwrap_or_else(|| {
            warn!("pop past the root frame");
            Frame::new()
        })
    }

    /// Saving: describes `element` into a fresh detached frame.
    fn describe_detached<T: Describe + ?Sized>(&mut self, element: &mut T) -> Frame {
        self.push_frame(Frame::new());
        element.describe(self);
        self.pop_frame()
    }

    /// Loading: describes `element` from `frame`, then puts the frame back.
    fn describe_from<T: Describe + ?Sized>(&mut self, frame: &mut Frame, element: &mut T) {
        self.push_frame(mem::take(frame));
        element.describe(self);
        *frame = self.pop_frame();
    }

    /// Opens a nested object under `tag`.
    ///
    /// Saving: looks inside the scope write into a new child frame, which
    /// is committed to the parent as a `Node` when the scope drops.
    /// Loading: the child frame stored under `tag` becomes current; if it
    /// is missing or not a `Node`, an empty frame stands in, so every read
    /// inside yields its default.
    pub fn node_scope(&mut self, tag: &str) -> NodeScope<'_> {
        let restore = match self.mode {
            Mode::Saving => {
                self.push_frame(Frame::new());
                false
            }
            Mode::Loading => {
                let child = match self.current_mut().get_mut(tag) {
                    Some(Field::Node(frame)) => Some(mem::take(frame)),
                    Some(other) => {
                        debug!(tag, found = %other.field_type(), "expected a node, reading defaults");
                        None
                    }
                    None => None,
                };
                let restore = child.is_some();
                self.push_frame(child.unwrap_or_default());
                restore
            }
        };

        let depth = self.depth();
        trace!(tag, depth, "enter node");
        NodeScope {
            scribe: self,
            tag: tag.to_string(),
            restore,
            depth,
        }
    }

    fn close_scope(&mut self, tag: String, restore: bool, depth: usize) {
        if self.depth() != depth {
            warn!(%tag, expected = depth, actual = self.depth(), "node scope closed out of order");
        }
        trace!(%tag, depth, "exit node");
        let frame = self.pop_frame();
        match self.mode {
            Mode::Saving => self.write(&tag, Field::Node(frame)),
            Mode::Loading if restore => self.restore(&tag, |field| *field = Field::Node(frame)),
            Mode::Loading => {}
        }
    }

    /// Saves or loads the top-level object.
    pub fn look_root<T: Describe + ?Sized>(&mut self, root: &mut T) {
        self.look_deep_in_place(ROOT_TAG, root);
    }

    /// Scalar look. Saving skips values equal to `default`; loading yields
    /// `default` when the tag is absent, null, or of another type.
    pub fn look_value<T: Codec + PartialEq>(&mut self, tag: &str, value: &mut T, default: T) {
        let force = self.save_options.write_defaults;
        self.look_value_inner(tag, value, default, force);
    }

    /// Like [`look_value`](Self::look_value) but always writes.
    pub fn look_value_forced<T: Codec + PartialEq>(&mut self, tag: &str, value: &mut T, default: T) {
        self.look_value_inner(tag, value, default, true);
    }

    fn look_value_inner<T: Codec + PartialEq>(
        &mut self,
        tag: &str,
        value: &mut T,
        default: T,
        force: bool,
    ) {
        match self.mode {
            Mode::Saving => {
                if force || *value != default {
                    let field = value.encode();
                    self.write(tag, field);
                }
            }
            Mode::Loading => {
                *value = match self.stored(tag, T::decode) {
                    Stored::Present(loaded) => loaded,
                    Stored::Absent | Stored::Null => default,
                };
            }
        }
    }

    /// List of scalars. An absent tag leaves `list` untouched on load; an
    /// explicit null clears it.
    pub fn look_list<E: ListElement>(&mut self, tag: &str, list: &mut Vec<E>) {
        match self.mode {
            Mode::Saving => {
                let field = E::wrap(list);
                self.write(tag, field);
            }
            Mode::Loading => match self.stored(tag, E::unwrap) {
                Stored::Present(loaded) => *list = loaded,
                Stored::Null => list.clear(),
                Stored::Absent => {}
            },
        }
    }

    /// String-keyed dictionary, same absent/null rules as
    /// [`look_list`](Self::look_list).
    pub fn look_map<V: MapElement>(&mut self, tag: &str, map: &mut IndexMap<String, V>) {
        match self.mode {
            Mode::Saving => {
                let field = V::wrap(map);
                self.write(tag, field);
            }
            Mode::Loading => match self.stored(tag, V::unwrap) {
                Stored::Present(loaded) => *map = loaded,
                Stored::Null => map.clear(),
                Stored::Absent => {}
            },
        }
    }

    /// Nullable nested object.
    ///
    /// Loading a `Node` describes into the existing instance, or into
    /// `T::default()` when `obj` is `None`. Absent or null loads as `None`.
    pub fn look_deep<T: Describe + Default>(&mut self, tag: &str, obj: &mut Option<T>) {
        match self.mode {
            Mode::Saving => match obj {
                Some(value) => {
                    let mut scope = self.node_scope(tag);
                    value.describe(&mut scope);
                }
                None => self.write(tag, Field::Null),
            },
            Mode::Loading => match self.current().get(tag) {
                Some(Field::Node(_)) => {
                    let value = obj.get_or_insert_with(T::default);
                    let mut scope = self.node_scope(tag);
                    value.describe(&mut scope);
                }
                Some(Field::Null) | None => *obj = None,
                Some(other) => {
                    debug!(tag, found = %other.field_type(), "expected a node, loading None");
                    *obj = None;
                }
            },
        }
    }

    /// Nested object that is always present. A missing node on load
    /// describes against an empty frame.
    pub fn look_deep_in_place<T: Describe + ?Sized>(&mut self, tag: &str, obj: &mut T) {
        let mut scope = self.node_scope(tag);
        obj.describe(&mut scope);
    }

    /// Ordered list of nested objects with null slots.
    ///
    /// Existing elements are described in place, matched by index.
    pub fn look_deep_list<T: Describe + Default>(&mut self, tag: &str, list: &mut Vec<Option<T>>) {
        match self.mode {
            Mode::Saving => {
                let slots = list
                    .iter_mut()
                    .map(|slot| slot.as_mut().map(|element| self.describe_detached(element)))
                    .collect();
                self.write(tag, Field::DeepList(slots));
            }
            Mode::Loading => {
                let Some(mut slots) = self.take_deep_slots(tag, list) else {
                    return;
                };
                let mut existing = mem::take(list).into_iter();
                for slot in slots.iter_mut() {
                    let current = existing.next().flatten();
                    let element = slot.as_mut().map(|frame| {
                        let mut element = current.unwrap_or_default();
                        self.describe_from(frame, &mut element);
                        element
                    });
                    list.push(element);
                }
                self.restore(tag, |field| *field = Field::DeepList(slots));
            }
        }
    }

    /// List of nested objects without nulls. Null slots in the document
    /// load as `T::default()`.
    pub fn look_deep_vec<T: Describe + Default>(&mut self, tag: &str, list: &mut Vec<T>) {
        match self.mode {
            Mode::Saving => {
                let slots = list
                    .iter_mut()
                    .map(|element| Some(self.describe_detached(element)))
                    .collect();
                self.write(tag, Field::DeepList(slots));
            }
            Mode::Loading => {
                let Some(mut slots) = self.take_deep_slots(tag, list) else {
                    return;
                };
                let mut existing = mem::take(list).into_iter();
                for slot in slots.iter_mut() {
                    let mut element = existing.next().unwrap_or_default();
                    match slot {
                        Some(frame) => self.describe_from(frame, &mut element),
                        None => element = T::default(),
                    }
                    list.push(element);
                }
                self.restore(tag, |field| *field = Field::DeepList(slots));
            }
        }
    }

    /// Detaches stored deep-list slots. `None` means there is nothing to
    /// load; a null has already cleared `list`.
    fn take_deep_slots<E>(&mut self, tag: &str, list: &mut Vec<E>) -> Option<Vec<Option<Frame>>> {
        let stored = self.take_stored(tag, |field| match field {
            Field::DeepList(slots) => Some(mem::take(slots)),
            _ => None,
        });
        match stored {
            Stored::Present(slots) => Some(slots),
            Stored::Null => {
                list.clear();
                None
            }
            Stored::Absent => None,
        }
    }

    /// Heterogeneous list of [`Tagged`] objects.
    ///
    /// Loading constructs each element through the session's
    /// [`TypeRegistry`]. Slots with an empty or unregistered type key load
    /// as `None`, so the list keeps its length and positions.
    pub fn look_polymorphic_list(&mut self, tag: &str, list: &mut Vec<Option<Box<dyn Tagged>>>) {
        match self.mode {
            Mode::Saving => {
                let entries = list
                    .iter_mut()
                    .map(|slot| match slot {
                        Some(element) => PolyEntry {
                            type_key: element.type_key().to_string(),
                            node: Some(self.describe_detached(element.as_mut())),
                        },
                        None => PolyEntry::null(),
                    })
                    .collect();
                self.write(tag, Field::PolyList(entries));
            }
            Mode::Loading => {
                let stored = self.take_stored(tag, |field| match field {
                    Field::PolyList(entries) => Some(mem::take(entries)),
                    _ => None,
                });
                let mut entries = match stored {
                    Stored::Present(entries) => entries,
                    Stored::Null => {
                        list.clear();
                        return;
                    }
                    Stored::Absent => return,
                };

                let types = Arc::clone(&self.types);
                list.clear();
                for (index, entry) in entries.iter_mut().enumerate() {
                    let element = match (entry.type_key.as_str(), entry.node.as_mut()) {
                        ("", _) | (_, None) => None,
                        (key, Some(frame)) => match types.construct(key) {
                            Some(mut element) => {
                                self.describe_from(frame, element.as_mut());
                                Some(element)
                            }
                            None => {
                                warn!(tag, index, type_key = key, "unregistered polymorphic type, slot left empty");
                                None
                            }
                        },
                    };
                    list.push(element);
                }
                self.restore(tag, |field| *field = Field::PolyList(entries));
            }
        }
    }

    /// Reference to an object owned elsewhere, saved as its id.
    ///
    /// Loading only queues the binding; it happens in
    /// [`Resolver::resolve_all`].
    pub fn look_reference<T: Referenceable>(&mut self, tag: &str, reference: &mut Ref<T>) {
        match self.mode {
            Mode::Saving => {
                let field = match reference.saved_id() {
                    Some(id) => Field::Reference(id),
                    None => Field::Null,
                };
                self.write(tag, field);
            }
            Mode::Loading => {
                let stored = self.stored(tag, |field| match field {
                    Field::Reference(id) => Some(id.clone()),
                    _ => None,
                });
                match stored {
                    Stored::Present(id) => self.resolver.add_pending_ref(id, reference),
                    Stored::Absent | Stored::Null => reference.set(None),
                }
            }
        }
    }

    /// Ordered list of references. One binding is queued per slot, so order
    /// and length survive unresolved ids.
    pub fn look_reference_list<T: Referenceable>(&mut self, tag: &str, list: &mut Vec<Ref<T>>) {
        match self.mode {
            Mode::Saving => {
                let ids = list.iter().map(Ref::saved_id).collect();
                self.write(tag, Field::ReferenceList(ids));
            }
            Mode::Loading => {
                let stored = self.stored(tag, |field| match field {
                    Field::ReferenceList(ids) => Some(ids.clone()),
                    _ => None,
                });
                let ids = match stored {
                    Stored::Present(ids) => ids,
                    Stored::Null => {
                        list.clear();
                        return;
                    }
                    Stored::Absent => return,
                };

                list.clear();
                for id in ids {
                    let mut reference = Ref::null();
                    if let Some(id) = id {
                        self.resolver.add_pending_ref(id, &mut reference);
                    }
                    list.push(reference);
                }
            }
        }
    }
}

impl fmt::Debug for Scribe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scribe")
            .field("mode", &self.mode)
            .field("version", &self.version)
            .field("depth", &self.depth())
            .field("resolver", &self.resolver)
            .finish()
    }
}

/// Guard for a nested object, returned by [`Scribe::node_scope`].
///
/// Derefs to the session. Dropping it pops the child frame; on save the
/// frame is committed to the parent under the scope's tag.
pub struct NodeScope<'s> {
    scribe: &'s mut Scribe,
    tag: String,
    restore: bool,
    depth: usize,
}

impl NodeScope<'_> {
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl Deref for NodeScope<'_> {
    type Target = Scribe;

    fn deref(&self) -> &Scribe {
        self.scribe
    }
}

impl DerefMut for NodeScope<'_> {
    fn deref_mut(&mut self) -> &mut Scribe {
        self.scribe
    }
}

impl Drop for NodeScope<'_> {
    fn drop(&mut self) {
        let tag = mem::take(&mut self.tag);
        self.scribe.close_scope(tag, self.restore, self.depth);
    }
}
