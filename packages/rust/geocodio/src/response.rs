//! Geocodio batch response decoding.
//!
//! A batch response carries one entry per submitted address, in order:
//! - `results[i].query`: the address as submitted
//! - `results[i].response.results`: ranked candidates; the first is used
//! - `results[i].response.error`: per-address failure message
//!
//! Entries may be `null`; such positions decode to `None`.

use geoenrich_shared::Location;
use serde::Deserialize;
use serde_json::Value;

use crate::GeocodeError;

// ---------------------------------------------------------------------------
// Public type
// ---------------------------------------------------------------------------

/// The best candidate the service returned for one address.
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodedAddress {
    /// Normalized components (`number`, `street`, `city`, `zip`, ...),
    /// passed through untouched.
    pub address_components: Value,
    /// Coordinates translated from the service's `lat`/`lng` pair.
    pub location: Option<Location>,
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct BatchResponse {
    #[serde(default)]
    results: Vec<Option<BatchEntry>>,
}

#[derive(Debug, Deserialize)]
struct BatchEntry {
    #[serde(default)]
    response: Option<EntryResponse>,
}

#[derive(Debug, Deserialize)]
struct EntryResponse {
    #[serde(default)]
    results: Vec<Candidate>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    address_components: Value,
    #[serde(default)]
    location: Option<LatLng>,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

impl From<Candidate> for GeocodedAddress {
    fn from(c: Candidate) -> Self {
        Self {
            address_components: c.address_components,
            location: c.location.map(|l| Location {
                lat: l.lat,
                lon: l.lng,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode a batch body, checking it answers exactly `expected` addresses.
pub(crate) fn decode_batch(
    body: &str,
    expected: usize,
) -> Result<Vec<Option<GeocodedAddress>>, GeocodeError> {
    let parsed: BatchResponse =
        serde_json::from_str(body).map_err(|e| GeocodeError::Decode(e.to_string()))?;

    if parsed.results.len() != expected {
        return Err(GeocodeError::LengthMismatch {
            expected,
            got: parsed.results.len(),
        });
    }

    Ok(parsed
        .results
        .into_iter()
        .enumerate()
        .map(|(i, entry)| {
            let response = entry?.response?;
            if let Some(error) = &response.error {
                tracing::debug!(position = i, %error, "service rejected address");
            }
            response.results.into_iter().next().map(GeocodedAddress::from)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_fixture() {
        let body = std::fs::read_to_string("../../../fixtures/geocodio/batch-response.json")
            .expect("read batch fixture");
        let results = decode_batch(&body, 3).expect("decode");

        assert_eq!(results.len(), 3);

        let first = results[0].as_ref().expect("first resolved");
        assert_eq!(
            first.location,
            Some(Location {
                lat: 38.886672,
                lon: -77.094735
            })
        );
        assert_eq!(first.address_components["city"], "Arlington");

        // The second address matched nothing.
        assert!(results[1].is_none());

        let third = results[2].as_ref().expect("third resolved");
        assert_eq!(third.address_components["zip"], "20500");
    }

    #[test]
    fn null_entries_keep_their_position() {
        let body = r#"{"results": [
            {"response": {"results": [{
                "address_components": {"city": "A"},
                "location": {"lat": 1.0, "lng": 2.0}
            }]}},
            null,
            {"response": {"results": [{
                "address_components": {"city": "C"},
                "location": {"lat": 5.0, "lng": 6.0}
            }]}}
        ]}"#;
        let results = decode_batch(body, 3).unwrap();
        assert_eq!(results[0].as_ref().unwrap().address_components["city"], "A");
        assert!(results[1].is_none());
        assert_eq!(
            results[2].as_ref().unwrap().location,
            Some(Location { lat: 5.0, lon: 6.0 })
        );
    }

    #[test]
    fn per_address_error_is_unresolved() {
        let body = r#"{"results": [
            {"query": "???", "response": {"error": "Could not geocode address"}}
        ]}"#;
        let results = decode_batch(body, 1).unwrap();
        assert_eq!(results, vec![None]);
    }

    #[test]
    fn length_mismatch_rejected() {
        let body = r#"{"results": [null]}"#;
        let err = decode_batch(body, 2).unwrap_err();
        assert!(matches!(
            err,
            GeocodeError::LengthMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn missing_results_is_a_mismatch() {
        let err = decode_batch("{}", 1).unwrap_err();
        assert!(matches!(err, GeocodeError::LengthMismatch { got: 0, .. }));
    }

    #[test]
    fn malformed_body_rejected() {
        let err = decode_batch("<html>502</html>", 1).unwrap_err();
        assert!(matches!(err, GeocodeError::Decode(_)));
    }
}
