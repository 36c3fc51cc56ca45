use std::fmt;

use serde::{Deserialize, Serialize};

use crate::post::Coordinates;

/// Which branch of the resolution waterfall produced a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginTag {
    Geo,
    Coordinates,
    Location,
    Srl,
    UserGeo,
    UserCoordinates,
    UserLocation,
}

impl OriginTag {
    pub const ALL: [OriginTag; 7] = [
        OriginTag::Geo,
        OriginTag::Coordinates,
        OriginTag::Location,
        OriginTag::Srl,
        OriginTag::UserGeo,
        OriginTag::UserCoordinates,
        OriginTag::UserLocation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OriginTag::Geo => "geo",
            OriginTag::Coordinates => "coordinates",
            OriginTag::Location => "location",
            OriginTag::Srl => "srl",
            OriginTag::UserGeo => "user_geo",
            OriginTag::UserCoordinates => "user_coordinates",
            OriginTag::UserLocation => "user_location",
        }
    }

    pub fn from_tag(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tag| tag.as_str() == value)
    }
}

impl fmt::Display for OriginTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved position plus the branch that produced it.
///
/// Serialized with the field names downstream consumers expect:
/// `place_name` is written as `city` and `origin` as `loc_origin`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationResult {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(rename = "city", default, skip_serializing_if = "Option::is_none")]
    pub place_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_type: Option<String>,
    #[serde(rename = "loc_origin")]
    pub origin: OriginTag,
}

impl LocationResult {
    pub fn from_coordinates(coordinates: &Coordinates, origin: OriginTag) -> Self {
        Self {
            latitude: coordinates.latitude(),
            longitude: coordinates.longitude(),
            place_name: None,
            location_type: None,
            origin,
        }
    }

    pub fn with_origin(mut self, origin: OriginTag) -> Self {
        self.origin = origin;
        self
    }
}
