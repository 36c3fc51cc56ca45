//! Post records as produced by the ingestion and SRL pipelines.
//!
//! Upstream documents are loosely shaped: `source` may be an object, a list
//! holding one object, or a JSON string encoding either, and the Twitter
//! model prefixes its fields with an underscore. A [`Post`] keeps the
//! document exactly as received and decodes a typed view next to it; the
//! only key ever written back is `location`.

use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::location::{LocationResult, OriginTag};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Post {
    document: Map<String, Value>,
    metadata: Option<PostMetadata>,
    source: Source,
    argument_structures: Vec<ArgumentStructure>,
    location: Option<PostLocation>,
    relocated: bool,
}

impl Post {
    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        match value {
            Value::Object(document) => Ok(Self::from_document(document)),
            other => Err(serde_json::Error::custom(format!(
                "post must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn from_document(document: Map<String, Value>) -> Self {
        let metadata = document
            .get("_metadata")
            .and_then(|value| decode(value.clone()));
        let source = document.get("source").map(decode_source).unwrap_or_default();
        let argument_structures = first_present(&document, &["arg_structures", "argument_structures"])
            .map(decode_vec)
            .unwrap_or_default();
        let location = document
            .get("location")
            .and_then(|value| decode(value.clone()));

        Self {
            document,
            metadata,
            source,
            argument_structures,
            location,
            relocated: false,
        }
    }

    /// The document as received, with `location` replaced only if this post
    /// was resolved since it was read.
    pub fn to_json(&self) -> serde_json::Result<Value> {
        let mut document = self.document.clone();
        if self.relocated {
            if let Some(location) = &self.location {
                document.insert("location".into(), serde_json::to_value(location)?);
            }
        }
        Ok(Value::Object(document))
    }

    pub fn document(&self) -> &Map<String, Value> {
        &self.document
    }

    pub fn id_doc(&self) -> Option<i64> {
        self.metadata.as_ref().and_then(|meta| meta.id_doc)
    }

    pub fn metadata(&self) -> Option<&PostMetadata> {
        self.metadata.as_ref()
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    pub fn argument_structures(&self) -> &[ArgumentStructure] {
        &self.argument_structures
    }

    /// Every argument in document order, across all structures.
    pub fn arguments(&self) -> impl Iterator<Item = &Argument> {
        self.argument_structures
            .iter()
            .flat_map(|structure| structure.argument.iter())
    }

    pub fn location(&self) -> Option<&PostLocation> {
        self.location.as_ref()
    }

    pub fn set_location(&mut self, location: PostLocation) {
        self.location = Some(location);
        self.relocated = true;
    }
}

impl Serialize for Post {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Post {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Map::<String, Value>::deserialize(deserializer).map(Post::from_document)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct PostMetadata {
    #[serde(default, deserialize_with = "lenient")]
    pub id_doc: Option<i64>,
}

/// Typed view of a post's `source`. Each field reads the plain key first
/// and the underscore-prefixed one second; a value of the wrong shape counts
/// as absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Source {
    pub geo: Option<Coordinates>,
    pub coordinates: Option<Coordinates>,
    pub location: Option<String>,
    pub user: Option<UserProfile>,
}

impl Source {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            geo: aliased(map, "geo"),
            coordinates: aliased(map, "coordinates"),
            location: aliased(map, "location"),
            user: first_decoded(map, &["user", "_user"], |value| match value {
                Value::Object(user) => Some(UserProfile::from_map(user)),
                _ => None,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserProfile {
    pub geo: Option<Coordinates>,
    pub coordinates: Option<Coordinates>,
    pub location: Option<String>,
}

impl UserProfile {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            geo: aliased(map, "geo"),
            coordinates: aliased(map, "coordinates"),
            location: aliased(map, "location"),
        }
    }
}

/// A coordinate pair, either bare (`[a, b]`) or wrapped the way Twitter
/// wraps `geo` (`{"type": "Point", "coordinates": [a, b]}`).
///
/// Element 0 is read as latitude and element 1 as longitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    Pair([f64; 2]),
    Point { coordinates: [f64; 2] },
}

impl Coordinates {
    pub fn pair(latitude: f64, longitude: f64) -> Self {
        Coordinates::Pair([latitude, longitude])
    }

    pub fn point(latitude: f64, longitude: f64) -> Self {
        Coordinates::Point {
            coordinates: [latitude, longitude],
        }
    }

    fn values(&self) -> [f64; 2] {
        match self {
            Coordinates::Pair(values) => *values,
            Coordinates::Point { coordinates } => *coordinates,
        }
    }

    pub fn latitude(&self) -> f64 {
        self.values()[0]
    }

    pub fn longitude(&self) -> f64 {
        self.values()[1]
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ArgumentStructure {
    #[serde(default, deserialize_with = "lenient_vec")]
    pub argument: Vec<Argument>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Argument {
    #[serde(default)]
    pub argument_name: String,
    #[serde(default, deserialize_with = "lenient_vec")]
    pub argument_value: Vec<String>,
}

impl Argument {
    pub fn joined_value(&self) -> String {
        self.argument_value.join(" ")
    }
}

/// The `location` sub-structure attached to a post after resolution.
///
/// `location_type` stays with the cache row; the post only carries
/// `{latitude, longitude, city?, loc_origin, id_location?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "LocationWire", from = "LocationWire")]
pub struct PostLocation {
    pub result: LocationResult,
    pub id_location: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct LocationWire {
    latitude: f64,
    longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    city: Option<String>,
    loc_origin: OriginTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id_location: Option<i64>,
}

impl From<PostLocation> for LocationWire {
    fn from(location: PostLocation) -> Self {
        Self {
            latitude: location.result.latitude,
            longitude: location.result.longitude,
            city: location.result.place_name,
            loc_origin: location.result.origin,
            id_location: location.id_location,
        }
    }
}

impl From<LocationWire> for PostLocation {
    fn from(wire: LocationWire) -> Self {
        Self {
            result: LocationResult {
                latitude: wire.latitude,
                longitude: wire.longitude,
                place_name: wire.city,
                location_type: None,
                origin: wire.loc_origin,
            },
            id_location: wire.id_location,
        }
    }
}

fn decode_source(value: &Value) -> Source {
    match value {
        Value::Object(map) => Source::from_map(map),
        Value::Array(items) => items.first().map(decode_source).unwrap_or_default(),
        Value::String(text) => serde_json::from_str::<Value>(text)
            .map(|decoded| decode_source(&decoded))
            .unwrap_or_default(),
        _ => Source::default(),
    }
}

fn aliased<T: DeserializeOwned>(map: &Map<String, Value>, name: &str) -> Option<T> {
    let underscored = format!("_{name}");
    first_decoded(map, &[name, underscored.as_str()], |value| decode(value.clone()))
}

/// First key among `names` whose value decodes.
fn first_decoded<T>(
    map: &Map<String, Value>,
    names: &[&str],
    decode_one: impl Fn(&Value) -> Option<T>,
) -> Option<T> {
    names
        .iter()
        .filter_map(|name| map.get(*name))
        .find_map(decode_one)
}

fn first_present<'a>(map: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names.iter().find_map(|name| map.get(*name))
}

fn decode<T: DeserializeOwned>(value: Value) -> Option<T> {
    serde_json::from_value(value).ok()
}

/// Decodes a sequence, skipping elements of the wrong shape.
fn decode_vec<T: DeserializeOwned>(value: &Value) -> Vec<T> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| decode(item.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Reads an optional field, turning values of the wrong shape into `None`.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(decode))
}

fn lenient_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().map(decode_vec).unwrap_or_default())
}
