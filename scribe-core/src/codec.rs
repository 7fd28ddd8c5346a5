//! Per-type encode/decode strategies.
//!
//! The codec registry is the trait system itself: every scalar type that can
//! go through [`Scribe::look_value`](crate::Scribe::look_value) implements
//! [`Codec`] exactly once, and a type without a codec does not compile.

use indexmap::IndexMap;

use crate::field::{Field, FieldType};

/// Encode/decode strategy for a scalar value.
pub trait Codec: Sized {
    /// The type tag this codec writes.
    const FIELD_TYPE: FieldType;

    fn encode(&self) -> Field;

    /// Decodes a stored value. Returns `None` when the stored type does not
    /// match, which callers treat as "absent".
    fn decode(field: &Field) -> Option<Self>;
}

/// An enum stored as its 32-bit discriminant.
///
/// Usually derived with `#[derive(ScribeEnum)]`; a manual implementation
/// pairs with [`impl_enum_codec!`](crate::impl_enum_codec).
pub trait ScribeEnum: Sized {
    fn to_i32(&self) -> i32;

    /// Maps a discriminant back to a variant. Unknown values yield `None`.
    fn from_i32(value: i32) -> Option<Self>;
}

/// Element type of a primitive list.
pub trait ListElement: Sized {
    fn wrap(items: &[Self]) -> Field;
    fn unwrap(field: &Field) -> Option<Vec<Self>>;
}

/// Value type of a string-keyed dictionary.
pub trait MapElement: Sized {
    fn wrap(map: &IndexMap<String, Self>) -> Field;
    fn unwrap(field: &Field) -> Option<IndexMap<String, Self>>;
}

macro_rules! impl_copy_codec {
    ($t:ty, $field_type:ident, $variant:ident) => {
        impl Codec for $t {
            const FIELD_TYPE: FieldType = FieldType::$field_type;

            fn encode(&self) -> Field {
                Field::$variant(*self)
            }

            fn decode(field: &Field) -> Option<Self> {
                match field {
                    Field::$variant(v) => Some(*v),
                    _ => None,
                }
            }
        }
    };
}

impl_copy_codec!(i32, Int, Int);
impl_copy_codec!(i64, Long, Long);
impl_copy_codec!(f32, Float, Float);
impl_copy_codec!(bool, Bool, Bool);

impl Codec for String {
    const FIELD_TYPE: FieldType = FieldType::String;

    fn encode(&self) -> Field {
        Field::Str(self.clone())
    }

    fn decode(field: &Field) -> Option<Self> {
        match field {
            Field::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl<T: Codec> Codec for Option<T> {
    const FIELD_TYPE: FieldType = T::FIELD_TYPE;

    fn encode(&self) -> Field {
        match self {
            Some(v) => v.encode(),
            None => Field::Null,
        }
    }

    fn decode(field: &Field) -> Option<Self> {
        match field {
            Field::Null => Some(None),
            other => T::decode(other).map(Some),
        }
    }
}

macro_rules! impl_list_element {
    ($t:ty, $variant:ident) => {
        impl ListElement for $t {
            fn wrap(items: &[Self]) -> Field {
                Field::$variant(items.to_vec())
            }

            fn unwrap(field: &Field) -> Option<Vec<Self>> {
                match field {
                    Field::$variant(items) => Some(items.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_list_element!(i32, IntList);
impl_list_element!(f32, FloatList);
impl_list_element!(bool, BoolList);
impl_list_element!(Option<String>, StrList);

impl ListElement for String {
    fn wrap(items: &[Self]) -> Field {
        Field::StrList(items.iter().cloned().map(Some).collect())
    }

    fn unwrap(field: &Field) -> Option<Vec<Self>> {
        match field {
            Field::StrList(items) => Some(
                items
                    .iter()
                    .map(|item| item.clone().unwrap_or_default())
                    .collect(),
            ),
            _ => None,
        }
    }
}

macro_rules! impl_map_element {
    ($t:ty, $variant:ident) => {
        impl MapElement for $t {
            fn wrap(map: &IndexMap<String, Self>) -> Field {
                Field::$variant(map.clone())
            }

            fn unwrap(field: &Field) -> Option<IndexMap<String, Self>> {
                match field {
                    Field::$variant(map) => Some(map.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_map_element!(i32, IntMap);
impl_map_element!(f32, FloatMap);
impl_map_element!(bool, BoolMap);
impl_map_element!(String, StrMap);

/// Implements [`Codec`] and [`MapElement`] for a type that implements
/// [`ScribeEnum`], storing it as `Enum` / `EnumMap`.
///
/// ```
/// use scribe_core::{impl_enum_codec, ScribeEnum};
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Priority {
///     Low,
///     High,
/// }
///
/// impl ScribeEnum for Priority {
///     fn to_i32(&self) -> i32 {
///         *self as i32
///     }
///
///     fn from_i32(value: i32) -> Option<Self> {
///         match value {
///             0 => Some(Priority::Low),
///             1 => Some(Priority::High),
///             _ => None,
///         }
///     }
/// }
///
/// impl_enum_codec!(Priority);
/// ```
#[macro_export]
macro_rules! impl_enum_codec {
    ($t:ty) => {
        impl $crate::Codec for $t {
            const FIELD_TYPE: $crate::FieldType = $crate::FieldType::Enum;

            fn encode(&self) -> $crate::Field {
                $crate::Field::Enum($crate::ScribeEnum::to_i32(self))
            }

            fn decode(field: &$crate::Field) -> ::std::option::Option<Self> {
                match field {
                    $crate::Field::Enum(v) => <$t as $crate::ScribeEnum>::from_i32(*v),
                    _ => ::std::option::Option::None,
                }
            }
        }

        impl $crate::MapElement for $t {
            fn wrap(map: &$crate::IndexMap<::std::string::String, Self>) -> $crate::Field {
                $crate::Field::EnumMap(
                    map.iter()
                        .map(|(k, v)| (k.clone(), $crate::ScribeEnum::to_i32(v)))
                        .collect(),
                )
            }

            fn unwrap(
                field: &$crate::Field,
            ) -> ::std::option::Option<$crate::IndexMap<::std::string::String, Self>> {
                match field {
                    $crate::Field::EnumMap(map) => ::std::option::Option::Some(
                        map.iter()
                            .filter_map(|(k, v)| {
                                <$t as $crate::ScribeEnum>::from_i32(*v).map(|e| (k.clone(), e))
                            })
                            .collect(),
                    ),
                    _ => ::std::option::Option::None,
                }
            }
        }
    };
}
