use indexmap::IndexMap;
use serde::Serialize;
use std::fmt;

use crate::frame::Frame;

/// Physical kind of a serialized value.
///
/// The numeric code is written next to every value (JSON `"Type"`, legacy
/// type byte) and is the only thing that decides how the payload is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldType {
    Null = 0,
    Int = 1,
    Long = 2,
    Float = 3,
    Bool = 4,
    String = 5,
    Enum = 6,
    IntMap = 7,
    FloatMap = 8,
    BoolMap = 9,
    StringMap = 10,
    EnumMap = 11,
    Node = 20,
    IntList = 21,
    FloatList = 22,
    BoolList = 23,
    StringList = 24,
    DeepList = 25,
    PolymorphicList = 26,
    Reference = 30,
    ReferenceList = 31,
}

impl FieldType {
    /// Returns the wire code of this type.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Maps a wire code back to a type. Unknown codes yield `None`.
    pub fn from_code(code: u8) -> Option<Self> {
        let ty = match code {
            0 => FieldType::Null,
            1 => FieldType::Int,
            2 => FieldType::Long,
            3 => FieldType::Float,
            4 => FieldType::Bool,
            5 => FieldType::String,
            6 => FieldType::Enum,
            7 => FieldType::IntMap,
            8 => FieldType::FloatMap,
            9 => FieldType::BoolMap,
            10 => FieldType::StringMap,
            11 => FieldType::EnumMap,
            20 => FieldType::Node,
            21 => FieldType::IntList,
            22 => FieldType::FloatList,
            23 => FieldType::BoolList,
            24 => FieldType::StringList,
            25 => FieldType::DeepList,
            26 => FieldType::PolymorphicList,
            30 => FieldType::Reference,
            31 => FieldType::ReferenceList,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// One slot of a polymorphic list: the element's type key and its frame.
///
/// A null element is stored as an empty key with no node.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PolyEntry {
    #[serde(rename = "TypeId")]
    pub type_key: String,
    #[serde(rename = "Node")]
    pub node: Option<Frame>,
}

impl PolyEntry {
    /// The marker written for a null slot.
    pub fn null() -> Self {
        PolyEntry::default()
    }

    /// Returns true if this slot carries no element.
    pub fn is_null(&self) -> bool {
        self.type_key.is_empty() && self.node.is_none()
    }
}

/// A tagged value: every serializable datum reduces to one of these.
///
/// The variant is the type tag, see [`Field::field_type`].
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Bool(bool),
    Str(String),
    Enum(i32),
    IntMap(IndexMap<String, i32>),
    FloatMap(IndexMap<String, f32>),
    BoolMap(IndexMap<String, bool>),
    StrMap(IndexMap<String, String>),
    EnumMap(IndexMap<String, i32>),
    Node(Frame),
    IntList(Vec<i32>),
    FloatList(Vec<f32>),
    BoolList(Vec<bool>),
    StrList(Vec<Option<String>>),
    DeepList(Vec<Option<Frame>>),
    PolyList(Vec<PolyEntry>),
    Reference(String),
    ReferenceList(Vec<Option<String>>),
}

impl Field {
    /// Returns the type tag of this value.
    pub fn field_type(&self) -> FieldType {
        match self {
            Field::Null => FieldType::Null,
            Field::Int(_) => FieldType::Int,
            Field::Long(_) => FieldType::Long,
            Field::Float(_) => FieldType::Float,
            Field::Bool(_) => FieldType::Bool,
            Field::Str(_) => FieldType::String,
            Field::Enum(_) => FieldType::Enum,
            Field::IntMap(_) => FieldType::IntMap,
            Field::FloatMap(_) => FieldType::FloatMap,
            Field::BoolMap(_) => FieldType::BoolMap,
            Field::StrMap(_) => FieldType::StringMap,
            Field::EnumMap(_) => FieldType::EnumMap,
            Field::Node(_) => FieldType::Node,
            Field::IntList(_) => FieldType::IntList,
            Field::FloatList(_) => FieldType::FloatList,
            Field::BoolList(_) => FieldType::BoolList,
            Field::StrList(_) => FieldType::StringList,
            Field::DeepList(_) => FieldType::DeepList,
            Field::PolyList(_) => FieldType::PolymorphicList,
            Field::Reference(_) => FieldType::Reference,
            Field::ReferenceList(_) => FieldType::ReferenceList,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Field::Null)
    }

    /// Returns the nested frame if this is a `Node`.
    pub fn as_node(&self) -> Option<&Frame> {
        match self {
            Field::Node(frame) => Some(frame),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_roundtrip_through_from_code() {
        for code in 0..=u8::MAX {
            if let Some(ty) = FieldType::from_code(code) {
                assert_eq!(ty.code(), code);
            }
        }
        assert_eq!(FieldType::Node.code(), 20);
    }

    #[test]
    fn unknown_code_is_none() {
        assert_eq!(FieldType::from_code(12), None);
        assert_eq!(FieldType::from_code(255), None);
    }

    #[test]
    fn field_type_matches_variant() {
        assert_eq!(Field::Null.field_type(), FieldType::Null);
        assert_eq!(Field::Str("x".into()).field_type(), FieldType::String);
        assert_eq!(Field::Node(Frame::new()).field_type(), FieldType::Node);
        assert_eq!(
            Field::ReferenceList(vec![None]).field_type(),
            FieldType::ReferenceList
        );
    }

    #[test]
    fn null_poly_entry() {
        assert!(PolyEntry::null().is_null());
        let entry = PolyEntry {
            type_key: "Farm".into(),
            node: Some(Frame::new()),
        };
        assert!(!entry.is_null());
    }
}
