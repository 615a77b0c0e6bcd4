//! End-to-end pipeline behaviour against a mock Geocodio server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use geoenrich_core::Pipeline;
use geoenrich_geocodio::{GeocodioClient, GeocodioOptions};
use geoenrich_shared::{
    CacheWriteFailure, GEOCODED_FIELD, GeoenrichError, PipelineConfig, REQUIRES_GEOCODE_FIELD,
    Record, StageOptions,
};
use geoenrich_storage::{GeocodeCache, MemoryCache, Storage};
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Answers each batch request from a fixed address book; unknown addresses
/// come back with no candidates.
struct AddressBook(HashMap<String, (String, f64, f64)>);

impl AddressBook {
    fn new(entries: &[(&str, &str, f64, f64)]) -> Self {
        Self(
            entries
                .iter()
                .map(|(addr, city, lat, lng)| {
                    (addr.to_string(), (city.to_string(), *lat, *lng))
                })
                .collect(),
        )
    }
}

impl Respond for AddressBook {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let addresses: Vec<String> = match serde_json::from_slice(&request.body) {
            Ok(a) => a,
            Err(_) => return ResponseTemplate::new(422),
        };
        let results: Vec<Value> = addresses
            .iter()
            .map(|a| match self.0.get(a) {
                Some((city, lat, lng)) => json!({
                    "query": a,
                    "response": { "results": [{
                        "address_components": { "city": city },
                        "location": { "lat": lat, "lng": lng }
                    }]}
                }),
                None => json!({ "query": a, "response": { "results": [] } }),
            })
            .collect();
        ResponseTemplate::new(200).set_body_json(json!({ "results": results }))
    }
}

fn book() -> AddressBook {
    AddressBook::new(&[
        ("1 Main St", "Springfield", 39.78, -89.65),
        ("2 Elm St", "Shelbyville", 39.40, -88.79),
        ("3 Oak Ave", "Capital City", 40.00, -89.00),
    ])
}

fn client(server: &MockServer) -> GeocodioClient {
    GeocodioClient::new(&GeocodioOptions {
        api_key: "test-key".into(),
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
    })
    .expect("client")
}

fn config(batch_size: usize) -> PipelineConfig {
    PipelineConfig {
        batch_size,
        ..PipelineConfig::default()
    }
}

fn pipeline<C: GeocodeCache + Clone>(
    server: &MockServer,
    cache: C,
    batch_size: usize,
) -> Pipeline<C> {
    Pipeline::builder(
        StageOptions {
            address: "addr".into(),
        },
        cache,
        client(server),
    )
    .config(config(batch_size))
    .build()
    .expect("pipeline")
}

fn records(values: Vec<Value>) -> Vec<Record> {
    values
        .into_iter()
        .map(|v| serde_json::from_value(v).expect("record"))
        .collect()
}

fn ids(out: &[Record]) -> Vec<i64> {
    out.iter()
        .map(|r| r.get("id").and_then(Value::as_i64).expect("id"))
        .collect()
}

fn temp_db() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("ge_pipeline_{}.db", Uuid::now_v7()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn output_matches_input_count_and_order_across_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/geocode"))
        .respond_with(book())
        .mount(&server)
        .await;

    let input = records(vec![
        json!({"id": 0, "addr": "1 Main St"}),
        json!({"id": 1}),
        json!({"id": 2, "addr": "unknown place"}),
        json!({"id": 3, "addr": "2 Elm St"}),
        json!({"id": 4, "addr": ""}),
        json!({"id": 5, "addr": "3 Oak Ave"}),
        json!({"id": 6, "addr": "1 Main St"}),
    ]);

    let cache = Arc::new(MemoryCache::new());
    let (out, stats) = pipeline(&server, cache.clone(), 3)
        .run_records(input)
        .await
        .unwrap();

    assert_eq!(ids(&out), vec![0, 1, 2, 3, 4, 5, 6]);
    assert_eq!(stats.records, 7);
    assert_eq!(stats.batches, 3);

    assert_eq!(out[0].get("addr_city"), Some(&json!("Springfield")));
    assert!(out[1].get("location").is_none());
    assert!(out[2].get("location").is_none());
    assert_eq!(out[3].get("location"), Some(&json!({"lat": 39.40, "lon": -88.79})));
    assert!(out[4].get("addr_full").is_none());
    assert_eq!(out[5].get("addr_full"), Some(&json!({"city": "Capital City"})));
    assert_eq!(out[6].get("addr_city"), Some(&json!("Springfield")));

    assert_eq!(cache.len(), 3);
}

#[tokio::test]
async fn cached_addresses_never_reach_the_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(book())
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let input = records(vec![
        json!({"id": 0, "addr": "1 Main St"}),
        json!({"id": 1, "addr": "2 Elm St"}),
    ]);

    let p = pipeline(&server, cache.clone(), 10);
    let (first, _) = p.run_records(input.clone()).await.unwrap();
    let (second, stats) = p.run_records(input).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(stats.geocode_requested, 0);
    // `expect(1)` is verified when the server drops.
}

#[tokio::test]
async fn persisted_results_survive_a_fresh_run() {
    let db = temp_db();
    let input = records(vec![json!({"id": 0, "addr": "3 Oak Ave", "name": "x"})]);

    let first = {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(book())
            .expect(1)
            .mount(&server)
            .await;

        let storage = Arc::new(Storage::open(&db).await.unwrap());
        let (out, stats) = pipeline(&server, storage.clone(), 1000)
            .run_records(input.clone())
            .await
            .unwrap();
        assert_eq!(stats.cache_written, 1);
        assert_eq!(storage.count().await.unwrap(), 1);
        out
    };

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let storage = Arc::new(Storage::open(&db).await.unwrap());
    let (second, stats) = pipeline(&server, storage, 1000)
        .run_records(input)
        .await
        .unwrap();

    assert_eq!(stats.cache_hits, 1);
    assert_eq!(second[0].get("location"), first[0].get("location"));
    assert_eq!(second[0].get("addr_full"), first[0].get("addr_full"));
    assert_eq!(second[0].get("addr_city"), Some(&json!("Capital City")));

    let _ = std::fs::remove_file(&db);
}

#[tokio::test]
async fn gap_in_service_results_stays_aligned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"response": {"results": [{
                    "address_components": {"city": "A-town"},
                    "location": {"lat": 1.0, "lng": 1.0}
                }]}},
                null,
                {"response": {"results": [{
                    "address_components": {"city": "C-town"},
                    "location": {"lat": 3.0, "lng": 3.0}
                }]}}
            ]
        })))
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let input = records(vec![
        json!({"id": 0, "addr": "A"}),
        json!({"id": 1, "addr": "B"}),
        json!({"id": 2, "addr": "C"}),
    ]);
    let (out, stats) = pipeline(&server, cache.clone(), 10)
        .run_records(input)
        .await
        .unwrap();

    assert_eq!(out[0].get("addr_city"), Some(&json!("A-town")));
    assert!(out[1].get("addr_city").is_none());
    assert_eq!(out[2].get("addr_city"), Some(&json!("C-town")));
    assert_eq!(stats.geocoded, 2);

    assert!(cache.get("A").is_some());
    assert!(cache.get("B").is_none());
    assert!(cache.get("C").is_some());
}

#[tokio::test]
async fn service_outage_completes_without_enrichment() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let input = records(vec![
        json!({"id": 0, "addr": "1 Main St"}),
        json!({"id": 1, "addr": "2 Elm St"}),
        json!({"id": 2, "addr": "3 Oak Ave"}),
    ]);
    let (out, stats) = pipeline(&server, cache.clone(), 2)
        .run_records(input.clone())
        .await
        .unwrap();

    assert_eq!(out, input);
    assert_eq!(stats.geocode_failures, 2);
    assert_eq!(stats.geocoded, 0);
    assert_eq!(cache.write_calls(), 0);
}

#[tokio::test]
async fn bookkeeping_never_escapes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(book())
        .mount(&server)
        .await;

    let input = records(vec![
        json!({"id": 0, "addr": "1 Main St", "__geocoded": true}),
        json!({"id": 1, "__requiresGeocode": false}),
        json!({"id": 2, "addr": "nowhere"}),
    ]);
    let (out, _) = pipeline(&server, Arc::new(MemoryCache::new()), 10)
        .run_records(input)
        .await
        .unwrap();

    for record in &out {
        let serialized = serde_json::to_value(record).unwrap();
        assert!(serialized.get(REQUIRES_GEOCODE_FIELD).is_none());
        assert!(serialized.get(GEOCODED_FIELD).is_none());
    }
}

#[tokio::test]
async fn duplicate_addresses_are_each_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(wiremock::matchers::body_json(json!(["1 Main St", "1 Main St"])))
        .respond_with(book())
        .expect(1)
        .mount(&server)
        .await;

    let input = records(vec![
        json!({"id": 0, "addr": "1 Main St"}),
        json!({"id": 1, "addr": "1 Main St"}),
    ]);
    let (out, stats) = pipeline(&server, Arc::new(MemoryCache::new()), 10)
        .run_records(input)
        .await
        .unwrap();

    assert_eq!(stats.geocoded, 2);
    assert!(out.iter().all(|r| r.get("addr_city") == Some(&json!("Springfield"))));
}

#[tokio::test]
async fn numeric_and_blank_addresses_are_resolved() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(wiremock::matchers::body_json(json!(["90210", "   "])))
        .respond_with(AddressBook::new(&[
            ("90210", "Beverly Hills", 34.09, -118.41),
            ("   ", "Blankton", 0.5, 0.5),
        ]))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let input = records(vec![
        json!({"id": 0, "addr": 90210}),
        json!({"id": 1, "addr": "   "}),
        json!({"id": 2, "addr": 0}),
    ]);
    let p = pipeline(&server, cache.clone(), 10);

    let (out, stats) = p.run_records(input.clone()).await.unwrap();
    assert_eq!(stats.geocode_requested, 2);
    assert_eq!(out[0].get("addr"), Some(&json!(90210)));
    assert_eq!(out[0].get("addr_city"), Some(&json!("Beverly Hills")));
    assert_eq!(out[1].get("addr_city"), Some(&json!("Blankton")));
    assert!(out[2].get("location").is_none());
    assert!(cache.get("90210").is_some());

    // Served from the cache under the same rendered key.
    let (again, stats) = p.run_records(input).await.unwrap();
    assert_eq!(stats.cache_hits, 2);
    assert_eq!(again, out);
}

#[tokio::test]
async fn slow_service_counts_as_a_failed_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "results": [null] }))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let slow = Pipeline::builder(
        StageOptions {
            address: "addr".into(),
        },
        cache.clone(),
        client(&server),
    )
    .config(PipelineConfig {
        service_timeout: Duration::from_millis(50),
        ..PipelineConfig::default()
    })
    .build()
    .unwrap();

    let input = records(vec![json!({"id": 0, "addr": "1 Main St"})]);
    let (out, stats) = slow.run_records(input.clone()).await.unwrap();

    assert_eq!(out, input);
    assert_eq!(stats.geocode_failures, 1);
    assert_eq!(stats.geocoded, 0);
    assert_eq!(cache.write_calls(), 0);
}

#[tokio::test]
async fn cache_read_outage_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(book())
        .expect(0)
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    cache.fail_reads(true);
    let err = pipeline(&server, cache, 10)
        .run_records(records(vec![json!({"addr": "1 Main St"})]))
        .await
        .unwrap_err();
    assert!(matches!(err, GeoenrichError::Cache(_)));
}

#[tokio::test]
async fn cache_write_outage_policy() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(book())
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    cache.fail_writes(true);
    let input = records(vec![json!({"addr": "1 Main St"})]);

    let strict = pipeline(&server, cache.clone(), 10);
    assert!(strict.run_records(input.clone()).await.is_err());

    let lenient = Pipeline::builder(
        StageOptions {
            address: "addr".into(),
        },
        cache.clone(),
        client(&server),
    )
    .config(PipelineConfig {
        cache_write_failure: CacheWriteFailure::Ignore,
        ..PipelineConfig::default()
    })
    .build()
    .unwrap();
    let (out, stats) = lenient.run_records(input).await.unwrap();
    assert_eq!(out[0].get("addr_city"), Some(&json!("Springfield")));
    assert_eq!(stats.cache_written, 0);
    assert!(cache.is_empty());
}

#[tokio::test]
async fn independent_pipelines_share_one_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(book())
        .mount(&server)
        .await;

    let cache = Arc::new(MemoryCache::new());
    let a = pipeline(&server, cache.clone(), 2);
    let b = pipeline(&server, cache.clone(), 5);

    let input_a = records(vec![
        json!({"id": 0, "addr": "1 Main St"}),
        json!({"id": 1, "addr": "2 Elm St"}),
        json!({"id": 2}),
    ]);
    let input_b = records(vec![
        json!({"id": 10, "addr": "3 Oak Ave"}),
        json!({"id": 11, "addr": "1 Main St"}),
    ]);

    let (ra, rb) = tokio::join!(a.run_records(input_a), b.run_records(input_b));
    let (out_a, _) = ra.unwrap();
    let (out_b, _) = rb.unwrap();

    assert_eq!(ids(&out_a), vec![0, 1, 2]);
    assert_eq!(ids(&out_b), vec![10, 11]);
    assert_eq!(out_b[1].get("addr_city"), Some(&json!("Springfield")));
    assert_eq!(cache.len(), 3);
}
