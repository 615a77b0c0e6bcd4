//! Core domain types for Geoenrich records and cache entries.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bookkeeping key marking a record that still needs remote resolution.
pub const REQUIRES_GEOCODE_FIELD: &str = "__requiresGeocode";

/// Bookkeeping key marking a record resolved by the service in this batch.
pub const GEOCODED_FIELD: &str = "__geocoded";

/// Field receiving the resolved coordinates.
pub const LOCATION_FIELD: &str = "location";

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A resolved coordinate pair in `{lat, lon}` shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

impl Location {
    pub fn to_value(self) -> Value {
        serde_json::json!({ "lat": self.lat, "lon": self.lon })
    }
}

// ---------------------------------------------------------------------------
// AddressFields
// ---------------------------------------------------------------------------

/// Output field names derived once from the configured address field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressFields {
    address: String,
    full: String,
}

impl AddressFields {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let full = format!("{address}_full");
        Self { address, full }
    }

    /// The raw address field, e.g. `addr`.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The normalized-components field, e.g. `addr_full`.
    pub fn full(&self) -> &str {
        &self.full
    }

    /// The flattened field for one component, e.g. `addr_city`.
    pub fn component(&self, name: &str) -> String {
        format!("{}_{name}", self.address)
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One record flowing through the pipeline.
///
/// Serializes as its plain field map; the geocoding bookkeeping flags live
/// outside the map and never serialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    fields: Map<String, Value>,
    #[serde(skip)]
    requires_geocode: bool,
    #[serde(skip)]
    geocoded: bool,
}

impl Record {
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            ..Self::default()
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.fields.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.fields.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// The address held by the address field, rendered as the string used
    /// for both the cache key and the service request.
    ///
    /// Any truthy scalar counts: non-empty strings (whitespace included),
    /// non-zero numbers, and `true`. Null, `false`, `0`, `""`, arrays and
    /// objects do not.
    pub fn address(&self, fields: &AddressFields) -> Option<String> {
        match self.fields.get(fields.address())? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) if n.as_f64().is_some_and(|f| f != 0.0) => Some(n.to_string()),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        }
    }

    pub fn requires_geocode(&self) -> bool {
        self.requires_geocode
    }

    pub fn set_requires_geocode(&mut self, value: bool) {
        self.requires_geocode = value;
    }

    pub fn geocoded(&self) -> bool {
        self.geocoded
    }

    pub fn mark_geocoded(&mut self) {
        self.geocoded = true;
    }

    /// Drop all geocoding bookkeeping, including literal keys that may have
    /// arrived from upstream.
    pub fn clear_bookkeeping(&mut self) {
        self.requires_geocode = false;
        self.geocoded = false;
        self.fields.remove(REQUIRES_GEOCODE_FIELD);
        self.fields.remove(GEOCODED_FIELD);
    }

    /// Write resolved data onto the record: `location`, `<addr>_full`, and
    /// one `<addr>_<component>` per entry of an object-shaped `components`.
    pub fn apply_resolution(
        &mut self,
        fields: &AddressFields,
        location: Option<Location>,
        components: &Value,
    ) {
        if let Some(location) = location {
            self.fields.insert(LOCATION_FIELD.to_string(), location.to_value());
        }
        self.fields.insert(fields.full().to_string(), components.clone());
        if let Value::Object(map) = components {
            for (name, value) in map {
                self.fields.insert(fields.component(name), value.clone());
            }
        }
    }
}

impl From<Map<String, Value>> for Record {
    fn from(fields: Map<String, Value>) -> Self {
        Self::from_map(fields)
    }
}

// ---------------------------------------------------------------------------
// CacheEntry
// ---------------------------------------------------------------------------

/// The serialized value stored per address in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    pub address: Value,
}

impl CacheEntry {
    /// Build an entry from a record the service just resolved.
    pub fn from_record(record: &Record, fields: &AddressFields) -> Option<Self> {
        let address = record.get(fields.full())?.clone();
        let location = record
            .get(LOCATION_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        Some(Self { location, address })
    }

    /// Parse a stored value. `None` for corrupt or unparsable entries.
    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }

    pub fn encode(&self) -> String {
        // Serializing a struct of f64s and a `Value` cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}
