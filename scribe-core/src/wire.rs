//! Physical encodings of a [`Document`].
//!
//! Saving always produces JSON:
//!
//! ```json
//! { "Version": 3, "Root": { "root": { "Type": 20, "Node": { "capacity": { "Type": 1, "Value": 200 } } } } }
//! ```
//!
//! Loading accepts that JSON shape or, failing that, the legacy binary
//! format (see [`legacy`](crate::legacy)).

use std::io::Write;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use tracing::{debug, instrument};

use crate::config::LoadOptions;
use crate::error::{Result, ScribeError};
use crate::field::{Field, FieldType, PolyEntry};
use crate::frame::{Document, Frame};
use crate::legacy;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

const NAN: &str = "NaN";
const INFINITY: &str = "Infinity";
const NEG_INFINITY: &str = "-Infinity";

#[derive(Serialize)]
struct DocumentOut<'a> {
    #[serde(rename = "Version")]
    version: i32,
    #[serde(rename = "Root")]
    root: &'a Frame,
}

#[derive(Deserialize)]
struct DocumentIn {
    #[serde(rename = "Version")]
    version: i32,
    #[serde(rename = "Root")]
    root: Map<String, Value>,
}

impl Serialize for Frame {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.iter())
    }
}

impl Serialize for Field {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Type", &self.field_type().code())?;
        match self {
            Field::Null => map.serialize_entry("Value", &Value::Null)?,
            Field::Node(frame) => map.serialize_entry("Node", frame)?,
            Field::Int(v) | Field::Enum(v) => map.serialize_entry("Value", v)?,
            Field::Long(v) => map.serialize_entry("Value", v)?,
            Field::Float(v) => map.serialize_entry("Value", &JsonFloat(*v))?,
            Field::Bool(v) => map.serialize_entry("Value", v)?,
            Field::Str(v) | Field::Reference(v) => map.serialize_entry("Value", v)?,
            Field::IntMap(v) | Field::EnumMap(v) => map.serialize_entry("Value", v)?,
            Field::FloatMap(v) => map.serialize_entry("Value", &FloatMapOut(v))?,
            Field::BoolMap(v) => map.serialize_entry("Value", v)?,
            Field::StrMap(v) => map.serialize_entry("Value", v)?,
            Field::IntList(v) => map.serialize_entry("Value", v)?,
            Field::FloatList(v) => map.serialize_entry("Value", &FloatListOut(v))?,
            Field::BoolList(v) => map.serialize_entry("Value", v)?,
            Field::StrList(v) | Field::ReferenceList(v) => map.serialize_entry("Value", v)?,
            Field::DeepList(v) => map.serialize_entry("Value", v)?,
            Field::PolyList(v) => map.serialize_entry("Value", v)?,
        }
        map.end()
    }
}

/// JSON has no literal for NaN or the infinities, so they are written as
/// strings.
struct JsonFloat(f32);

impl Serialize for JsonFloat {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            v if v.is_nan() => serializer.serialize_str(NAN),
            v if v == f32::INFINITY => serializer.serialize_str(INFINITY),
            v if v == f32::NEG_INFINITY => serializer.serialize_str(NEG_INFINITY),
            v => serializer.serialize_f32(v),
        }
    }
}

struct FloatListOut<'a>(&'a [f32]);

impl Serialize for FloatListOut<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.0.iter().map(|v| JsonFloat(*v)))
    }
}

struct FloatMapOut<'a>(&'a IndexMap<String, f32>);

impl Serialize for FloatMapOut<'_> {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_map(self.0.iter().map(|(key, v)| (key, JsonFloat(*v))))
    }
}

/// Writes a document as JSON text.
#[instrument(skip_all, fields(version = document.version))]
pub fn write_document(document: &Document, mut sink: impl Write, pretty: bool) -> Result<()> {
    let out = DocumentOut {
        version: document.version,
        root: &document.root,
    };
    if pretty {
        serde_json::to_writer_pretty(&mut sink, &out)?;
    } else {
        serde_json::to_writer(&mut sink, &out)?;
    }
    sink.flush()?;
    Ok(())
}

/// Parses raw input as JSON, falling back to the legacy binary format.
///
/// Fails with [`ScribeError::UnrecognizedFormat`] if neither decoder
/// accepts the bytes.
pub fn parse_document(bytes: &[u8], options: &LoadOptions) -> Result<Document> {
    let text = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);
    let json_err = match serde_json::from_slice::<DocumentIn>(text) {
        Ok(raw) => {
            debug!(version = raw.version, "parsed JSON document");
            return Ok(Document::new(raw.version, frame_from_json(&raw.root)));
        }
        Err(err) => err,
    };

    if !options.allow_legacy {
        return Err(ScribeError::UnrecognizedFormat {
            json: json_err.to_string(),
            legacy: "legacy decoding disabled".to_string(),
        });
    }

    match legacy::decode_document(bytes, options.max_depth) {
        Ok(document) => {
            debug!(version = document.version, "parsed legacy binary document");
            Ok(document)
        }
        Err(legacy_err) => Err(ScribeError::UnrecognizedFormat {
            json: json_err.to_string(),
            legacy: legacy_err.to_string(),
        }),
    }
}

fn frame_from_json(map: &Map<String, Value>) -> Frame {
    let mut frame = Frame::new();
    for (tag, value) in map {
        match field_from_json(value) {
            Some(field) => {
                frame.insert(tag.clone(), field);
            }
            None => debug!(%tag, "dropping field with unreadable type or value"),
        }
    }
    frame
}

/// Converts one `{ "Type", "Value" | "Node" }` entry. `None` means the entry
/// is inconsistent and should be treated as absent.
fn field_from_json(value: &Value) -> Option<Field> {
    let obj = value.as_object()?;
    let code = u8::try_from(obj.get("Type")?.as_u64()?).ok()?;
    let field_type = FieldType::from_code(code)?;
    let value = obj.get("Value").unwrap_or(&Value::Null);

    let field = match field_type {
        FieldType::Node => match obj.get("Node") {
            Some(Value::Object(node)) => Field::Node(frame_from_json(node)),
            None | Some(Value::Null) => Field::Null,
            Some(_) => return None,
        },
        _ if value.is_null() => Field::Null,
        FieldType::Null => Field::Null,
        FieldType::Int => Field::Int(as_i32(value)?),
        FieldType::Long => Field::Long(value.as_i64()?),
        FieldType::Float => Field::Float(as_f32(value)?),
        FieldType::Bool => Field::Bool(value.as_bool()?),
        FieldType::String => Field::Str(as_string(value)?),
        FieldType::Enum => Field::Enum(as_i32(value)?),
        FieldType::IntMap => Field::IntMap(map_of(value, as_i32)?),
        FieldType::FloatMap => Field::FloatMap(map_of(value, as_f32)?),
        FieldType::BoolMap => Field::BoolMap(map_of(value, Value::as_bool)?),
        FieldType::StringMap => Field::StrMap(map_of(value, as_string)?),
        FieldType::EnumMap => Field::EnumMap(map_of(value, as_i32)?),
        FieldType::IntList => Field::IntList(list_of(value, as_i32)?),
        FieldType::FloatList => Field::FloatList(list_of(value, as_f32)?),
        FieldType::BoolList => Field::BoolList(list_of(value, Value::as_bool)?),
        FieldType::StringList => Field::StrList(list_of(value, nullable(as_string))?),
        FieldType::DeepList => Field::DeepList(list_of(value, nullable(as_frame))?),
        FieldType::PolymorphicList => Field::PolyList(list_of(value, poly_entry_from_json)?),
        FieldType::Reference => Field::Reference(as_string(value)?),
        FieldType::ReferenceList => Field::ReferenceList(list_of(value, nullable(as_string))?),
    };
    Some(field)
}

fn poly_entry_from_json(value: &Value) -> Option<PolyEntry> {
    if value.is_null() {
        return Some(PolyEntry::null());
    }
    let obj = value.as_object()?;
    let type_key = match obj.get("TypeId") {
        Some(Value::String(key)) => key.clone(),
        None | Some(Value::Null) => String::new(),
        Some(_) => return None,
    };
    let node = match obj.get("Node") {
        None | Some(Value::Null) => None,
        Some(other) => Some(as_frame(other)?),
    };
    Some(PolyEntry { type_key, node })
}

fn as_i32(value: &Value) -> Option<i32> {
    value.as_i64().and_then(|n| i32::try_from(n).ok())
}

fn as_f32(value: &Value) -> Option<f32> {
    match value {
        Value::String(s) => match s.as_str() {
            NAN => Some(f32::NAN),
            INFINITY => Some(f32::INFINITY),
            NEG_INFINITY => Some(f32::NEG_INFINITY),
            _ => None,
        },
        _ => value.as_f64().map(|n| n as f32),
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(str::to_owned)
}

fn as_frame(value: &Value) -> Option<Frame> {
    value.as_object().map(frame_from_json)
}

fn nullable<T>(item: impl Fn(&Value) -> Option<T>) -> impl Fn(&Value) -> Option<Option<T>> {
    move |value: &Value| {
        if value.is_null() {
            Some(None)
        } else {
            item(value).map(Some)
        }
    }
}

fn list_of<T>(value: &Value, item: impl Fn(&Value) -> Option<T>) -> Option<Vec<T>> {
    value.as_array()?.iter().map(item).collect()
}

fn map_of<T>(value: &Value, item: impl Fn(&Value) -> Option<T>) -> Option<IndexMap<String, T>> {
    value
        .as_object()?
        .iter()
        .map(|(key, v)| item(v).map(|t| (key.clone(), t)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::ROOT_TAG;

    fn sample() -> Document {
        let mut silo = Frame::new();
        silo.insert("name", Field::Str("silo-1".into()));
        silo.insert("capacity", Field::Int(200));
        silo.insert("fill", Field::Float(0.25));
        silo.insert(
            "tags",
            Field::StrList(vec![Some("storage".into()), None]),
        );
        silo.insert("owner", Field::Null);
        silo.insert(
            "modules",
            Field::DeepList(vec![Some(Frame::new()), None]),
        );
        silo.insert(
            "buildings",
            Field::PolyList(vec![
                PolyEntry {
                    type_key: "Farm".into(),
                    node: Some(Frame::new()),
                },
                PolyEntry::null(),
            ]),
        );
        silo.insert("feeds", Field::ReferenceList(vec![Some("silo-2".into()), None]));
        let mut root = Frame::new();
        root.insert(ROOT_TAG, Field::Node(silo));
        Document::new(4, root)
    }

    fn to_json(document: &Document) -> Vec<u8> {
        let mut out = Vec::new();
        write_document(document, &mut out, false).unwrap();
        out
    }

    #[test]
    fn json_roundtrip() {
        let doc = sample();
        let parsed = parse_document(&to_json(&doc), &LoadOptions::default()).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn node_is_written_under_node_key() {
        let json: Value = serde_json::from_slice(&to_json(&sample())).unwrap();
        assert_eq!(json["Version"], 4);
        assert_eq!(json["Root"][ROOT_TAG]["Type"], 20);
        assert_eq!(json["Root"][ROOT_TAG]["Node"]["capacity"]["Value"], 200);
        assert_eq!(
            json["Root"][ROOT_TAG]["Node"]["owner"],
            serde_json::json!({ "Type": 0, "Value": null })
        );
    }

    #[test]
    fn non_finite_floats_survive_json() {
        let mut root = Frame::new();
        root.insert("peak", Field::Float(f32::INFINITY));
        root.insert(
            "readings",
            Field::FloatList(vec![1.0, f32::NEG_INFINITY, f32::NAN, 2.0]),
        );
        root.insert(
            "limits",
            Field::FloatMap(IndexMap::from([
                ("low".to_string(), f32::NEG_INFINITY),
                ("mid".to_string(), 0.5),
            ])),
        );
        let bytes = to_json(&Document::new(1, root));

        let json: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["Root"]["peak"]["Value"], "Infinity");
        assert_eq!(json["Root"]["readings"]["Value"][2], "NaN");

        let doc = parse_document(&bytes, &LoadOptions::default()).unwrap();
        assert_eq!(doc.root.get("peak"), Some(&Field::Float(f32::INFINITY)));
        let Some(Field::FloatList(readings)) = doc.root.get("readings") else {
            panic!("float list dropped");
        };
        assert_eq!(readings.len(), 4);
        assert_eq!(readings[..2], [1.0, f32::NEG_INFINITY]);
        assert!(readings[2].is_nan());
        assert_eq!(readings[3], 2.0);
        let Some(Field::FloatMap(limits)) = doc.root.get("limits") else {
            panic!("float map dropped");
        };
        assert_eq!(limits.get("low"), Some(&f32::NEG_INFINITY));
        assert_eq!(limits.get("mid"), Some(&0.5));
    }

    #[test]
    fn unknown_float_strings_are_dropped() {
        let text = r#"{ "Version": 1, "Root": { "f": { "Type": 3, "Value": "lots" } } }"#;
        let doc = parse_document(text.as_bytes(), &LoadOptions::default()).unwrap();
        assert!(doc.root.is_empty());
    }

    #[test]
    fn byte_order_mark_is_stripped() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend(to_json(&sample()));
        let parsed = parse_document(&bytes, &LoadOptions::default()).unwrap();
        assert_eq!(parsed.version, 4);
    }

    #[test]
    fn inconsistent_fields_are_dropped() {
        let text = r#"{
            "Version": 1,
            "Root": {
                "good": { "Type": 1, "Value": 5 },
                "wrong_value": { "Type": 1, "Value": "five" },
                "unknown_type": { "Type": 99, "Value": 5 },
                "overflow": { "Type": 1, "Value": 5000000000 },
                "no_type": { "Value": 5 },
                "null_value": { "Type": 5, "Value": null }
            }
        }"#;
        let doc = parse_document(text.as_bytes(), &LoadOptions::default()).unwrap();
        assert_eq!(doc.root.len(), 2);
        assert_eq!(doc.root.get("good"), Some(&Field::Int(5)));
        assert_eq!(doc.root.get("null_value"), Some(&Field::Null));
    }

    #[test]
    fn falls_back_to_legacy() {
        let mut bytes = 9i32.to_le_bytes().to_vec();
        bytes.push(FieldType::Int.code());
        bytes.push(3);
        bytes.extend_from_slice(b"hp!");
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&77i32.to_le_bytes());

        let doc = parse_document(&bytes, &LoadOptions::default()).unwrap();
        assert_eq!(doc.version, 9);
        assert_eq!(doc.root.get("hp!"), Some(&Field::Int(77)));
    }

    #[test]
    fn garbage_is_unrecognized() {
        let err = parse_document(b"not a save", &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, ScribeError::UnrecognizedFormat { .. }));
    }

    #[test]
    fn legacy_can_be_disabled() {
        let bytes = 9i32.to_le_bytes();
        let options = LoadOptions {
            allow_legacy: false,
            ..LoadOptions::default()
        };
        assert!(parse_document(&bytes, &LoadOptions::default()).is_ok());
        assert!(matches!(
            parse_document(&bytes, &options),
            Err(ScribeError::UnrecognizedFormat { .. })
        ));
    }

    #[test]
    fn pretty_output_parses_back() {
        let mut out = Vec::new();
        write_document(&sample(), &mut out, true).unwrap();
        assert!(out.contains(&b'\n'));
        let parsed = parse_document(&out, &LoadOptions::default()).unwrap();
        assert_eq!(parsed, sample());
    }
}
