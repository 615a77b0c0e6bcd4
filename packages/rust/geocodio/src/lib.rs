//! Batched client for the Geocodio geocoding API.
//!
//! One call resolves a whole list of free-text addresses: the addresses go
//! out as a JSON array in a single `POST <base>/geocode?api_key=...` and come
//! back as an ordered `results[]` array, one slot per address.

mod response;

use std::fmt;
use std::time::Duration;

use geoenrich_shared::{GeoenrichError, GeocodioConfig, Result};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

pub use response::GeocodedAddress;

/// User-Agent string for geocoding requests.
const USER_AGENT: &str = concat!("Geoenrich/", env!("CARGO_PKG_VERSION"));

/// Maximum number of characters of an error body kept for diagnostics.
const MAX_ERROR_BODY: usize = 200;

// ---------------------------------------------------------------------------
// GeocodeError
// ---------------------------------------------------------------------------

/// Why a batched geocode call produced no results.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// Transport failure: DNS, connect, TLS, timeout, body read.
    #[error("request failed: {0}")]
    Network(String),

    /// The service answered with a non-2xx status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The body was not a batch response.
    #[error("malformed response: {0}")]
    Decode(String),

    /// The service answered a different number of addresses than were sent.
    #[error("expected {expected} results, got {got}")]
    LengthMismatch { expected: usize, got: usize },

    /// The call did not complete within the pipeline's service timeout.
    #[error("no response within {0:?}")]
    Timeout(Duration),
}

impl From<GeocodeError> for GeoenrichError {
    fn from(e: GeocodeError) -> Self {
        GeoenrichError::Geocode(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Connection settings for [`GeocodioClient`].
#[derive(Clone)]
pub struct GeocodioOptions {
    pub api_key: String,
    /// Base URL without the `/geocode` suffix.
    pub base_url: String,
    /// Timeout for one batched call.
    pub timeout: Duration,
}

impl GeocodioOptions {
    /// Build options from the `[geocodio]` config section and a resolved key.
    pub fn from_config(config: &GeocodioConfig, api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: config.base_url.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

impl fmt::Debug for GeocodioOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeocodioOptions")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// GeocodioClient
// ---------------------------------------------------------------------------

/// HTTP client for batched geocoding. Cheap to share by reference.
pub struct GeocodioClient {
    client: Client,
    endpoint: Url,
}

impl fmt::Debug for GeocodioClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The endpoint carries the API key in its query string.
        f.debug_struct("GeocodioClient")
            .field("host", &self.endpoint.host_str())
            .field("path", &self.endpoint.path())
            .finish()
    }
}

impl GeocodioClient {
    /// Build the client and endpoint URL.
    pub fn new(opts: &GeocodioOptions) -> Result<Self> {
        if opts.api_key.is_empty() {
            return Err(GeoenrichError::config("Geocodio API key is empty"));
        }

        let mut endpoint = Url::parse(&format!(
            "{}/geocode",
            opts.base_url.trim_end_matches('/')
        ))
        .map_err(|e| {
            GeoenrichError::config(format!("invalid Geocodio base URL {}: {e}", opts.base_url))
        })?;
        endpoint
            .query_pairs_mut()
            .append_pair("api_key", &opts.api_key);

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(opts.timeout)
            .build()
            .map_err(|e| GeoenrichError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Resolve `addresses` in one request.
    ///
    /// The result has exactly one slot per address, in the same order;
    /// `None` marks an address the service could not resolve. Any failure
    /// of the call as a whole is an error; nothing is retried.
    #[instrument(skip_all, fields(addresses = addresses.len()))]
    pub async fn geocode_batch(
        &self,
        addresses: &[String],
    ) -> std::result::Result<Vec<Option<GeocodedAddress>>, GeocodeError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(addresses)
            .send()
            .await
            .map_err(|e| GeocodeError::Network(e.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| GeocodeError::Network(e.without_url().to_string()))?;

        if !status.is_success() {
            return Err(GeocodeError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let results = response::decode_batch(&body, addresses.len())?;
        debug!(
            resolved = results.iter().filter(|r| r.is_some()).count(),
            "batch geocoded"
        );
        Ok(results)
    }
}
