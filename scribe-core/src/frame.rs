use indexmap::IndexMap;

use crate::field::Field;

/// Tag under which the top-level object is stored in a document's root frame.
pub const ROOT_TAG: &str = "root";

/// A tag -> value mapping holding one object's serialized fields.
///
/// Tags are unique within a frame. Inserting an existing tag overwrites it,
/// so a field written twice keeps its last value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    fields: IndexMap<String, Field>,
}

impl Frame {
    pub fn new() -> Self {
        Frame {
            fields: IndexMap::new(),
        }
    }

    /// Inserts a field, replacing any previous value under the same tag.
    pub fn insert(&mut self, tag: impl Into<String>, field: Field) -> Option<Field> {
        self.fields.insert(tag.into(), field)
    }

    pub fn get(&self, tag: &str) -> Option<&Field> {
        self.fields.get(tag)
    }

    pub fn get_mut(&mut self, tag: &str) -> Option<&mut Field> {
        self.fields.get_mut(tag)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.fields.contains_key(tag)
    }

    /// Removes a field, keeping the order of the remaining ones.
    pub fn remove(&mut self, tag: &str) -> Option<Field> {
        self.fields.shift_remove(tag)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(tag, field)| (tag.as_str(), field))
    }
}

impl FromIterator<(String, Field)> for Frame {
    fn from_iter<I: IntoIterator<Item = (String, Field)>>(iter: I) -> Self {
        Frame {
            fields: iter.into_iter().collect(),
        }
    }
}

/// A complete document: format version plus the root frame.
///
/// The root frame holds a single `Node` entry under [`ROOT_TAG`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub version: i32,
    pub root: Frame,
}

impl Document {
    pub fn new(version: i32, root: Frame) -> Self {
        Document { version, root }
    }

    /// Returns the frame of the top-level object, if present.
    pub fn root_object(&self) -> Option<&Frame> {
        self.root.get(ROOT_TAG).and_then(Field::as_node)
    }
}
