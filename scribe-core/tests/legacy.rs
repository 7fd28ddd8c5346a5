//! Loading the flat binary format and format detection.

use std::sync::Arc;

use scribe_core::{
    Describe, FieldType, IndexMap, LoadOptions, Ref, Referenceable, Scribe, ScribeConfig,
    ScribeEnum, ScribeError, Shared, Tagged, TypeRegistry, load_from_reader, save_to_vec, wire,
};

/// Writes records in the frozen binary layout.
#[derive(Default)]
struct LegacyWriter {
    bytes: Vec<u8>,
}

impl LegacyWriter {
    fn document(version: i32) -> Self {
        LegacyWriter {
            bytes: version.to_le_bytes().to_vec(),
        }
    }

    fn string(mut self, s: &str) -> Self {
        // Short strings only: one-byte length prefix.
        assert!(s.len() < 0x80);
        self.bytes.push(s.len() as u8);
        self.bytes.extend_from_slice(s.as_bytes());
        self
    }

    fn i32(mut self, v: i32) -> Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn i64(mut self, v: i64) -> Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn f32(mut self, v: f32) -> Self {
        self.bytes.extend_from_slice(&v.to_le_bytes());
        self
    }

    fn present(mut self, flag: bool) -> Self {
        self.bytes.push(u8::from(flag));
        self
    }

    /// Presence byte, then a length-prefixed record sequence.
    fn slot(mut self, records: Option<LegacyWriter>) -> Self {
        let Some(records) = records else {
            return self.present(false);
        };
        self = self.present(true).i32(records.bytes.len() as i32);
        self.bytes.extend_from_slice(&records.bytes);
        self
    }

    fn record(mut self, ty: FieldType, tag: &str, payload: LegacyWriter) -> Self {
        self.bytes.push(ty.code());
        self = self.string(tag);
        self = self.i32(payload.bytes.len() as i32);
        self.bytes.extend_from_slice(&payload.bytes);
        self
    }

    fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

fn payload() -> LegacyWriter {
    LegacyWriter::default()
}

#[derive(Debug, Default, PartialEq)]
struct Cargo {
    name: Option<String>,
}

impl Describe for Cargo {
    fn describe(&mut self, scribe: &mut Scribe) {
        scribe.look_value("name", &mut self.name, None);
    }
}

#[derive(Debug, Default, PartialEq)]
struct Wagon {
    capacity: i32,
    cargo: Option<Cargo>,
    stops: Vec<i32>,
    labels: Vec<Option<String>>,
}

impl Describe for Wagon {
    fn describe(&mut self, scribe: &mut Scribe) {
        scribe.look_value("capacity", &mut self.capacity, 0);
        scribe.look_deep("cargo", &mut self.cargo);
        scribe.look_list("stops", &mut self.stops);
        scribe.look_list("labels", &mut self.labels);
    }
}

fn wagon() -> Wagon {
    Wagon {
        capacity: 200,
        cargo: Some(Cargo {
            name: Some("ore".into()),
        }),
        stops: vec![],
        labels: vec![],
    }
}

/// `{ root: { capacity: 200, cargo: { name: "ore" }, stops: [], labels: [] } }`
/// at version 3.
fn legacy_wagon() -> Vec<u8> {
    let cargo = payload().record(
        FieldType::String,
        "name",
        payload().present(true).string("ore"),
    );
    let root = payload()
        .record(FieldType::Int, "capacity", payload().i32(200))
        .record(FieldType::Node, "cargo", cargo)
        .record(FieldType::IntList, "stops", payload().i32(0))
        .record(FieldType::StringList, "labels", payload().i32(0));
    LegacyWriter::document(3)
        .record(FieldType::Node, "root", root)
        .finish()
}

fn types() -> Arc<TypeRegistry> {
    Arc::new(TypeRegistry::new())
}

#[test]
fn legacy_and_json_decode_to_same_document() {
    let json = save_to_vec(&mut wagon(), 3).unwrap();
    let options = LoadOptions::default();

    let from_json = wire::parse_document(&json, &options).unwrap();
    let from_legacy = wire::parse_document(&legacy_wagon(), &options).unwrap();
    assert_eq!(from_legacy, from_json);
}

#[test]
fn legacy_document_loads_through_describe() {
    let loaded = load_from_reader::<Wagon>(&legacy_wagon()[..], types(), &LoadOptions::default())
        .unwrap();
    assert_eq!(loaded.value, wagon());
    assert_eq!(loaded.version, 3);
}

#[test]
fn legacy_lists_keep_null_and_empty_strings_apart() {
    let stops = payload().i32(3).i32(4).i32(8).i32(15);
    let labels = payload()
        .i32(3)
        .present(true)
        .string("dock")
        .present(false)
        .present(true)
        .string("");
    let root = payload()
        .record(FieldType::IntList, "stops", stops)
        .record(FieldType::StringList, "labels", labels)
        .record(FieldType::String, "unused", payload().present(false));
    let bytes = LegacyWriter::document(1)
        .record(FieldType::Node, "root", root)
        .finish();

    let wagon = load_from_reader::<Wagon>(&bytes[..], types(), &LoadOptions::default())
        .unwrap()
        .value;
    assert_eq!(wagon.stops, [4, 8, 15]);
    assert_eq!(wagon.labels, [Some("dock".to_string()), None, Some(String::new())]);
    assert_eq!(wagon.cargo, None);
}

#[test]
fn damaged_legacy_record_loads_as_default() {
    let root = payload()
        .record(FieldType::Int, "capacity", payload().i32(7).i32(7))
        .record(FieldType::Node, "cargo", payload());
    let bytes = LegacyWriter::document(1)
        .record(FieldType::Node, "root", root)
        .finish();

    let wagon = load_from_reader::<Wagon>(&bytes[..], types(), &LoadOptions::default())
        .unwrap()
        .value;
    assert_eq!(wagon.capacity, 0);
    assert_eq!(wagon.cargo, Some(Cargo { name: None }));
}

#[test]
fn byte_order_mark_is_accepted() {
    let mut bytes = vec![0xEF, 0xBB, 0xBF];
    bytes.extend(save_to_vec(&mut wagon(), 2).unwrap());

    let loaded = load_from_reader::<Wagon>(&bytes[..], types(), &LoadOptions::default()).unwrap();
    assert_eq!(loaded.value, wagon());
}

#[test]
fn unrecognized_input_fails_to_load() {
    let mut truncated = legacy_wagon();
    truncated.truncate(truncated.len() - 2);

    let inputs: [&[u8]; 3] = [b"", b"{\"Version\":", &truncated];
    for input in inputs {
        let err = load_from_reader::<Wagon>(input, types(), &LoadOptions::default()).unwrap_err();
        assert!(
            matches!(err, ScribeError::UnrecognizedFormat { .. }),
            "unexpected error: {err}"
        );
    }
}

#[test]
fn config_can_disable_legacy_input() {
    let config = ScribeConfig::from_toml_str("[load]\nallow_legacy = false\n").unwrap();

    let err = load_from_reader::<Wagon>(&legacy_wagon()[..], types(), &config.load).unwrap_err();
    assert!(matches!(err, ScribeError::UnrecognizedFormat { .. }));

    let json = save_to_vec(&mut wagon(), 1).unwrap();
    assert!(load_from_reader::<Wagon>(&json[..], types(), &config.load).is_ok());
}

#[test]
fn legacy_nesting_limit_comes_from_options() {
    let options = LoadOptions {
        max_depth: 1,
        ..LoadOptions::default()
    };
    assert!(load_from_reader::<Wagon>(&legacy_wagon()[..], types(), &options).is_err());
    assert!(load_from_reader::<Wagon>(&legacy_wagon()[..], types(), &LoadOptions::default()).is_ok());
}

#[derive(Debug, Clone, Copy, PartialEq, Default, ScribeEnum)]
enum Grade {
    #[default]
    Fine,
    Coarse = 7,
}

#[derive(Debug, Default)]
struct Shed {
    id: String,
    weight: i32,
}

impl Describe for Shed {
    fn describe(&mut self, scribe: &mut Scribe) {
        scribe.look_value("id", &mut self.id, String::new());
        scribe.look_value("weight", &mut self.weight, 0);
    }
}

impl Referenceable for Shed {
    fn reference_id(&self) -> String {
        self.id.clone()
    }
}

#[derive(Debug, Default, Tagged)]
#[tagged(key = "hut")]
struct Hut {
    rooms: i32,
}

impl Describe for Hut {
    fn describe(&mut self, scribe: &mut Scribe) {
        scribe.look_value("rooms", &mut self.rooms, 0);
    }
}

/// One field of every kind the flat format can carry.
#[derive(Default)]
struct Yard {
    tonnage: i64,
    load_factor: f32,
    open: bool,
    grade: Grade,
    counts: IndexMap<String, i32>,
    rates: IndexMap<String, f32>,
    gates: IndexMap<String, bool>,
    owners: IndexMap<String, String>,
    grades: IndexMap<String, Grade>,
    weights: Vec<f32>,
    lamps: Vec<bool>,
    sheds: Vec<Shared<Shed>>,
    spares: Vec<Option<Cargo>>,
    main: Ref<Shed>,
    route: Vec<Ref<Shed>>,
    huts: Vec<Option<Box<dyn Tagged>>>,
}

impl Describe for Yard {
    fn describe(&mut self, scribe: &mut Scribe) {
        scribe.look_value("tonnage", &mut self.tonnage, 0);
        scribe.look_value("load_factor", &mut self.load_factor, 0.0);
        scribe.look_value("open", &mut self.open, false);
        scribe.look_value("grade", &mut self.grade, Grade::Fine);
        scribe.look_map("counts", &mut self.counts);
        scribe.look_map("rates", &mut self.rates);
        scribe.look_map("gates", &mut self.gates);
        scribe.look_map("owners", &mut self.owners);
        scribe.look_map("grades", &mut self.grades);
        scribe.look_list("weights", &mut self.weights);
        scribe.look_list("lamps", &mut self.lamps);
        scribe.look_reference("main", &mut self.main);
        scribe.look_reference_list("route", &mut self.route);
        scribe.look_deep_vec("sheds", &mut self.sheds);
        scribe.look_deep_list("spares", &mut self.spares);
        scribe.look_polymorphic_list("huts", &mut self.huts);
    }
}

fn legacy_shed(id: &str, weight: i32) -> LegacyWriter {
    payload()
        .record(FieldType::String, "id", payload().present(true).string(id))
        .record(FieldType::Int, "weight", payload().i32(weight))
}

fn legacy_yard() -> Vec<u8> {
    let spare = payload().record(FieldType::String, "name", payload().present(true).string("x"));
    let hut = payload().record(FieldType::Int, "rooms", payload().i32(2));
    let root = payload()
        .record(FieldType::Long, "tonnage", payload().i64(1 << 40))
        .record(FieldType::Float, "load_factor", payload().f32(0.75))
        .record(FieldType::Bool, "open", payload().present(true))
        .record(FieldType::Enum, "grade", payload().i32(7))
        .record(
            FieldType::IntMap,
            "counts",
            payload().i32(2).string("bolts").i32(40).string("nuts").i32(-3),
        )
        .record(FieldType::FloatMap, "rates", payload().i32(1).string("day").f32(1.25))
        .record(
            FieldType::BoolMap,
            "gates",
            payload().i32(2).string("east").present(true).string("west").present(false),
        )
        .record(
            FieldType::StringMap,
            "owners",
            payload()
                .i32(2)
                .string("east")
                .present(true)
                .string("ada")
                .string("west")
                .present(false),
        )
        .record(FieldType::EnumMap, "grades", payload().i32(1).string("east").i32(7))
        .record(FieldType::FloatList, "weights", payload().i32(2).f32(0.5).f32(-2.0))
        .record(
            FieldType::BoolList,
            "lamps",
            payload().i32(2).present(false).present(true),
        )
        .record(FieldType::Reference, "main", payload().present(true).string("b"))
        .record(
            FieldType::ReferenceList,
            "route",
            payload()
                .i32(3)
                .present(true)
                .string("a")
                .present(false)
                .present(true)
                .string("b"),
        )
        .record(
            FieldType::DeepList,
            "sheds",
            payload()
                .i32(2)
                .slot(Some(legacy_shed("a", 5)))
                .slot(Some(legacy_shed("b", 8))),
        )
        .record(
            FieldType::DeepList,
            "spares",
            payload().i32(2).slot(Some(spare)).slot(None),
        )
        .record(
            FieldType::PolymorphicList,
            "huts",
            payload()
                .i32(3)
                .present(true)
                .string("hut")
                .slot(Some(hut))
                .present(false)
                .slot(None)
                .present(true)
                .string("hut")
                .slot(None),
        );
    LegacyWriter::document(4)
        .record(FieldType::Node, "root", root)
        .finish()
}

fn hut_types() -> Arc<TypeRegistry> {
    let mut types = TypeRegistry::new();
    types.register_default::<Hut>();
    Arc::new(types)
}

fn assert_yard(yard: &Yard) {
    assert_eq!(yard.tonnage, 1 << 40);
    assert_eq!(yard.load_factor, 0.75);
    assert!(yard.open);
    assert_eq!(yard.grade, Grade::Coarse);

    assert_eq!(yard.counts.get("bolts"), Some(&40));
    assert_eq!(yard.counts.get_index(1), Some((&"nuts".to_string(), &-3)));
    assert_eq!(yard.rates.get("day"), Some(&1.25));
    assert_eq!(yard.gates.get("east"), Some(&true));
    assert_eq!(yard.gates.get("west"), Some(&false));
    assert_eq!(yard.owners.get("east").map(String::as_str), Some("ada"));
    assert_eq!(yard.owners.get("west").map(String::as_str), Some(""));
    assert_eq!(yard.grades.get("east"), Some(&Grade::Coarse));

    assert_eq!(yard.weights, [0.5, -2.0]);
    assert_eq!(yard.lamps, [false, true]);

    assert_eq!(yard.sheds.len(), 2);
    assert_eq!(yard.sheds[0].borrow().id, "a");
    assert_eq!(yard.sheds[1].borrow().weight, 8);
    assert_eq!(
        yard.spares,
        [
            Some(Cargo {
                name: Some("x".into())
            }),
            None
        ]
    );

    assert!(yard.main.points_to(&yard.sheds[1]));
    assert_eq!(yard.route.len(), 3);
    assert!(yard.route[0].points_to(&yard.sheds[0]));
    assert!(yard.route[1].is_null());
    assert!(yard.route[2].points_to(&yard.sheds[1]));

    assert_eq!(yard.huts.len(), 3);
    let hut = yard.huts[0].as_ref().unwrap().downcast_ref::<Hut>().unwrap();
    assert_eq!(hut.rooms, 2);
    assert!(yard.huts[1].is_none());
    assert!(yard.huts[2].is_none());
}

#[test]
fn every_legacy_layout_loads_through_describe() {
    let loaded =
        load_from_reader::<Yard>(&legacy_yard()[..], hut_types(), &LoadOptions::default())
            .unwrap();
    assert_eq!(loaded.version, 4);
    assert!(loaded.resolution.is_complete());
    assert_yard(&loaded.value);
}

#[test]
fn legacy_load_survives_json_round_trip() {
    let mut yard =
        load_from_reader::<Yard>(&legacy_yard()[..], hut_types(), &LoadOptions::default())
            .unwrap()
            .value;
    let json = save_to_vec(&mut yard, 4).unwrap();

    let reloaded = load_from_reader::<Yard>(&json[..], hut_types(), &LoadOptions::default())
        .unwrap();
    assert!(reloaded.resolution.is_complete());
    assert_yard(&reloaded.value);
}
