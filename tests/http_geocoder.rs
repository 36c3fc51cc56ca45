use std::sync::Arc;
use std::time::Duration;

use httptest::matchers::{contains, request, url_decoded};
use httptest::responders::{delay_and_then, json_encoded, status_code};
use httptest::{all_of, Expectation, Server};
use secrecy::SecretString;
use serde_json::json;

use post_locator::{
    BackoffGuard, BackoffState, GeocodeClient, GeocodeError, GeocodeProvider, GeocodedPlace,
    HttpGeocodeProvider,
};

fn provider(server: &Server, timeout: Duration) -> HttpGeocodeProvider {
    HttpGeocodeProvider::new(
        server.url("/maps/api/geocode/json").to_string(),
        SecretString::from("test-key".to_string()),
        timeout,
    )
    .expect("http provider")
}

fn candidate(lat: f64, lng: f64, name: &str) -> serde_json::Value {
    json!({
        "geometry": {"location": {"lat": lat, "lng": lng}, "location_type": "APPROXIMATE"},
        "address_components": [{"long_name": name, "short_name": name, "types": ["locality"]}],
        "formatted_address": format!("{name}, Brazil")
    })
}

#[tokio::test]
async fn sends_address_and_key_and_parses_candidates() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of![
            request::method_path("GET", "/maps/api/geocode/json"),
            request::query(url_decoded(contains(("address", "São Paulo")))),
            request::query(url_decoded(contains(("key", "test-key")))),
        ])
        .respond_with(json_encoded(json!({
            "status": "OK",
            "results": [candidate(-23.55, -46.63, "São Paulo"), candidate(-23.0, -46.0, "Other")]
        }))),
    );

    let candidates = provider(&server, Duration::from_secs(5))
        .geocode("São Paulo")
        .await
        .expect("candidates");

    assert_eq!(candidates.len(), 2);
    let place = GeocodedPlace::from_candidate(&candidates[0]).expect("place");
    assert_eq!(place.latitude, -23.55);
    assert_eq!(place.longitude, -46.63);
    assert_eq!(place.place_name.as_deref(), Some("São Paulo"));
    assert_eq!(place.location_type.as_deref(), Some("APPROXIMATE"));
}

#[tokio::test]
async fn accepts_a_bare_candidate_object() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
            .respond_with(json_encoded(json!({
                "status": "OK",
                "results": candidate(-12.97, -38.5, "Salvador")
            }))),
    );

    let candidates = provider(&server, Duration::from_secs(5))
        .geocode("Salvador")
        .await
        .expect("candidates");

    assert_eq!(candidates.len(), 1);
    let place = GeocodedPlace::from_candidate(&candidates[0]).expect("place");
    assert_eq!(place.place_name.as_deref(), Some("Salvador"));
}

#[tokio::test]
async fn zero_results_is_an_empty_answer() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/maps/api/geocode/json"))
            .respond_with(json_encoded(json!({"status": "ZERO_RESULTS", "results": []}))),
    );

    let candidates = provider(&server, Duration::from_secs(5))
        .geocode("asdfgh")
        .await
        .expect("empty answer");
    assert!(candidates.is_empty());
}

#[tokio::test]
async fn quota_statuses_are_rate_limits() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::query(url_decoded(contains(("address", "quota")))))
            .respond_with(json_encoded(json!({
                "status": "OVER_QUERY_LIMIT",
                "error_message": "You have exceeded your daily request quota for this API.",
                "results": []
            }))),
    );
    server.expect(
        Expectation::matching(request::query(url_decoded(contains(("address", "http")))))
            .respond_with(status_code(429)),
    );

    let provider = provider(&server, Duration::from_secs(5));
    match provider.geocode("quota").await {
        Err(GeocodeError::RateLimited(message)) => assert!(message.contains("daily request quota")),
        other => panic!("expected rate limit, got {other:?}"),
    }
    assert!(matches!(
        provider.geocode("http").await,
        Err(GeocodeError::RateLimited(_))
    ));
}

#[tokio::test]
async fn rejected_requests_are_api_errors() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::query(url_decoded(contains(("address", "denied")))))
            .respond_with(json_encoded(json!({
                "status": "REQUEST_DENIED",
                "error_message": "The provided API key is invalid.",
                "results": []
            }))),
    );
    server.expect(
        Expectation::matching(request::query(url_decoded(contains(("address", "broken")))))
            .respond_with(status_code(500).body("upstream exploded")),
    );

    let provider = provider(&server, Duration::from_secs(5));
    assert_eq!(
        provider.geocode("denied").await,
        Err(GeocodeError::Api {
            status: "REQUEST_DENIED".into(),
            message: "The provided API key is invalid.".into(),
        })
    );
    assert_eq!(
        provider.geocode("broken").await,
        Err(GeocodeError::Api {
            status: "500".into(),
            message: "upstream exploded".into(),
        })
    );
}

#[tokio::test]
async fn slow_responses_time_out() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::method_path("GET", "/maps/api/geocode/json")).respond_with(
            delay_and_then(
                Duration::from_secs(2),
                json_encoded(json!({"status": "OK", "results": []})),
            ),
        ),
    );

    let result = provider(&server, Duration::from_millis(200))
        .geocode("Belém")
        .await;
    assert_eq!(result, Err(GeocodeError::Timeout));
}

#[tokio::test]
async fn unreachable_endpoint_is_a_transport_error() {
    let provider = HttpGeocodeProvider::new(
        "http://127.0.0.1:9/maps/api/geocode/json",
        SecretString::from("test-key".to_string()),
        Duration::from_secs(2),
    )
    .expect("http provider");

    let result = provider.geocode("Goiânia").await;
    assert!(
        matches!(result, Err(GeocodeError::Transport(_))),
        "unexpected result {result:?}"
    );
}

#[tokio::test]
async fn undecodable_body_is_an_api_error_and_not_retried() {
    let server = Server::run();
    server.expect(
        Expectation::matching(request::query(url_decoded(contains(("address", "Olinda")))))
            .times(2)
            .respond_with(status_code(200).body("<html>maintenance</html>")),
    );

    let provider = provider(&server, Duration::from_secs(5));
    match provider.geocode("Olinda").await {
        Err(GeocodeError::Api { status, .. }) => assert_eq!(status, "INVALID_RESPONSE"),
        other => panic!("expected api error, got {other:?}"),
    }

    let client = GeocodeClient::new(
        Arc::new(provider),
        BackoffGuard::new(chrono::Duration::hours(24)),
    )
    .with_max_attempts(3)
    .with_retry_base_delay(Duration::ZERO);
    assert!(client.geocode("Olinda").await.is_none());
    assert_eq!(client.backoff().state(), BackoffState::Active);
}
