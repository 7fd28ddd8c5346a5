//! Deferred binding of references by id.
//!
//! Referenceable objects live in [`Shared`] handles owned by whatever
//! deep-describes them. Everything else points at them through [`Ref`],
//! which is saved as the target's id and rebound by
//! [`Resolver::resolve_all`] once every participating object has loaded.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use crate::scribe::Describe;

/// Shared ownership handle for referenceable objects.
pub type Shared<T> = Rc<RefCell<T>>;

pub fn shared<T>(value: T) -> Shared<T> {
    Rc::new(RefCell::new(value))
}

/// An object with a stable identity that other objects refer to by id.
pub trait Referenceable: Describe + 'static {
    /// Save identity. Must not change for the lifetime of one save.
    fn reference_id(&self) -> String;
}

enum Link<T> {
    Null,
    Pending(String),
    Bound { id: String, target: Weak<RefCell<T>> },
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        match self {
            Link::Null => Link::Null,
            Link::Pending(id) => Link::Pending(id.clone()),
            Link::Bound { id, target } => Link::Bound {
                id: id.clone(),
                target: Weak::clone(target),
            },
        }
    }
}

/// A non-owning reference to a [`Referenceable`] object.
///
/// A reference is null, pending (id read from a document, not yet
/// resolved) or bound. Bound references hold a weak handle, so cycles of
/// references do not keep objects alive.
pub struct Ref<T> {
    link: Rc<RefCell<Link<T>>>,
}

impl<T: Referenceable> Ref<T> {
    pub fn null() -> Self {
        Self::from_link(Link::Null)
    }

    /// Binds to a live object.
    pub fn to(target: &Shared<T>) -> Self {
        let id = target.borrow().reference_id();
        Self::from_link(Link::Bound {
            id,
            target: Rc::downgrade(target),
        })
    }

    /// An unresolved reference to `id`.
    pub fn pending(id: impl Into<String>) -> Self {
        Self::from_link(Link::Pending(id.into()))
    }

    fn from_link(link: Link<T>) -> Self {
        Ref {
            link: Rc::new(RefCell::new(link)),
        }
    }

    /// Returns the target if bound and still alive.
    pub fn get(&self) -> Option<Shared<T>> {
        match &*self.link.borrow() {
            Link::Bound { target, .. } => target.upgrade(),
            _ => None,
        }
    }

    pub fn set(&mut self, target: Option<&Shared<T>>) {
        *self = match target {
            Some(target) => Ref::to(target),
            None => Ref::null(),
        };
    }

    /// Returns the id this reference is waiting on, if unresolved.
    pub fn pending_id(&self) -> Option<String> {
        match &*self.link.borrow() {
            Link::Pending(id) => Some(id.clone()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        self.pending_id().is_none() && self.get().is_none()
    }

    /// Returns true if bound to exactly `target`.
    pub fn points_to(&self, target: &Shared<T>) -> bool {
        self.get().is_some_and(|bound| Rc::ptr_eq(&bound, target))
    }

    /// The id written when saving.
    ///
    /// A target that is mutably borrowed (it is describing itself right
    /// now) falls back to the id seen at bind time.
    pub(crate) fn saved_id(&self) -> Option<String> {
        match &*self.link.borrow() {
            Link::Null => None,
            Link::Pending(id) => Some(id.clone()),
            Link::Bound { id, target } => {
                let target = target.upgrade()?;
                let current = match target.try_borrow() {
                    Ok(guard) => guard.reference_id(),
                    Err(_) => id.clone(),
                };
                Some(current)
            }
        }
    }

    pub(crate) fn make_pending(&mut self, id: String) {
        *self.link.borrow_mut() = Link::Pending(id);
    }
}

impl<T: Referenceable> Default for Ref<T> {
    fn default() -> Self {
        Ref::null()
    }
}

/// Copies the current state; the copy is resolved independently.
impl<T> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref {
            link: Rc::new(RefCell::new(self.link.borrow().clone())),
        }
    }
}

impl<T> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.link.borrow() {
            Link::Null => write!(f, "Ref(null)"),
            Link::Pending(id) => write!(f, "Ref(pending {id:?})"),
            Link::Bound { id, target } if target.strong_count() > 0 => write!(f, "Ref({id:?})"),
            Link::Bound { id, .. } => write!(f, "Ref(dropped {id:?})"),
        }
    }
}

type Setter = Box<dyn FnOnce(Option<&Rc<dyn Any>>) -> bool>;

struct PendingBinding {
    id: String,
    setter: Setter,
}

/// Outcome of one [`Resolver::resolve_all`] pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolution {
    pub bound: usize,
    /// Ids that had no registered object of the expected type, in queue
    /// order. Their references were bound to null.
    pub unresolved: Vec<String>,
}

impl Resolution {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Id table plus the queue of bindings waiting for it.
#[derive(Default)]
pub struct Resolver {
    table: HashMap<String, Rc<dyn Any>>,
    pending: Vec<PendingBinding>,
}

impl Resolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `target` resolvable under `id`. A second registration of the
    /// same id replaces the first.
    pub fn register<T: 'static>(&mut self, id: impl Into<String>, target: &Shared<T>) {
        let id = id.into();
        let entry: Rc<dyn Any> = Rc::clone(target) as Rc<dyn Any>;
        if self.table.insert(id.clone(), entry).is_some() {
            warn!(%id, "duplicate reference id, last registration wins");
        }
    }

    /// Queues a raw binding. The setter receives the registered object (or
    /// `None`) during [`resolve_all`](Self::resolve_all) and reports whether
    /// it bound anything.
    pub fn add_pending(
        &mut self,
        id: impl Into<String>,
        setter: impl FnOnce(Option<&Rc<dyn Any>>) -> bool + 'static,
    ) {
        self.pending.push(PendingBinding {
            id: id.into(),
            setter: Box::new(setter),
        });
    }

    /// Queues `reference` to be bound to whatever registers under `id`.
    pub fn add_pending_ref<T: Referenceable>(&mut self, id: impl Into<String>, reference: &mut Ref<T>) {
        let id = id.into();
        reference.make_pending(id.clone());
        let link = Rc::clone(&reference.link);
        let target_id = id.clone();
        self.add_pending(id, move |found| {
            let target = found.and_then(|entry| Rc::clone(entry).downcast::<RefCell<T>>().ok());
            match target {
                Some(target) => {
                    *link.borrow_mut() = Link::Bound {
                        id: target_id,
                        target: Rc::downgrade(&target),
                    };
                    true
                }
                None => {
                    if found.is_some() {
                        debug!(id = %target_id, "registered object has a different type");
                    }
                    *link.borrow_mut() = Link::Null;
                    false
                }
            }
        });
    }

    pub fn lookup<T: 'static>(&self, id: &str) -> Option<Shared<T>> {
        self.table
            .get(id)
            .and_then(|entry| Rc::clone(entry).downcast::<RefCell<T>>().ok())
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.table.contains_key(id)
    }

    /// Applies and drains every queued binding. Ids that were never
    /// registered bind to null. The id table is kept, so later
    /// sub-documents can still refer to objects registered here.
    pub fn resolve_all(&mut self) -> Resolution {
        let pending = std::mem::take(&mut self.pending);
        let mut resolution = Resolution::default();

        for PendingBinding { id, setter } in pending {
            if setter(self.table.get(&id)) {
                resolution.bound += 1;
            } else {
                warn!(%id, "unresolved reference bound to null");
                resolution.unresolved.push(id);
            }
        }

        debug!(
            bound = resolution.bound,
            unresolved = resolution.unresolved.len(),
            "resolved references"
        );
        resolution
    }

    /// Forgets all registrations and queued bindings.
    pub fn clear(&mut self) {
        self.table.clear();
        self.pending.clear();
    }

    /// Number of registered ids.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("registered", &self.table.len())
            .field("pending", &self.pending.len())
            .finish()
    }
}
