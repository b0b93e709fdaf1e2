//! HTTP behaviour of the weather client, geocoder and IP locator, checked
//! against a mock server.

use std::sync::Arc;

use skyprobe_core::{
    Coordinates, FetchOutcome, LocationAcquisition, LocationPublisher, LocationSource,
    LocationError, LogIndicator, NominatimGeocoder, ServiceRegistry, StateHolder, StatusProber,
    WeatherApi, WeatherError, WeatherService,
    location::IpLocationSource,
    provider::open_meteo::OpenMeteoClient,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn san_francisco() -> Coordinates {
    Coordinates::new(37.7749, -122.4194).unwrap()
}

fn forecast_fixture() -> serde_json::Value {
    serde_json::json!({
        "latitude": 37.763283,
        "longitude": -122.41286,
        "generationtime_ms": 0.05,
        "utc_offset_seconds": 0,
        "timezone": "GMT",
        "timezone_abbreviation": "GMT",
        "elevation": 18.0,
        "current_weather": {
            "time": "2024-05-01T12:00",
            "interval": 900,
            "temperature": 15.2,
            "windspeed": 10.5,
            "winddirection": 270,
            "is_day": 1,
            "weathercode": 3
        }
    })
}

async fn mount_forecast(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .and(query_param("latitude", "37.7749"))
        .and(query_param("longitude", "-122.4194"))
        .and(query_param("current_weather", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(forecast_fixture()))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_current_weather_passes_values_through() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;

    let client = OpenMeteoClient::new(server.uri());
    let current = client.current_weather(san_francisco()).await.unwrap();

    assert_eq!(current.temperature, 15.2);
    assert_eq!(current.windspeed, 10.5);
    assert_eq!(current.winddirection, 270);
}

#[tokio::test]
async fn test_current_weather_error_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(400).set_body_string("{\"reason\":\"bad latitude\"}"))
        .mount(&server)
        .await;

    let client = OpenMeteoClient::new(server.uri());
    let err = client.current_weather(san_francisco()).await.unwrap_err();

    match err {
        WeatherError::Status { status, body } => {
            assert_eq!(status.as_u16(), 400);
            assert!(body.contains("bad latitude"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_current_weather_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let client = OpenMeteoClient::new(server.uri());
    let err = client.current_weather(san_francisco()).await.unwrap_err();
    assert!(matches!(err, WeatherError::Parse(_)));
}

#[tokio::test]
async fn test_reverse_geocode_reads_locality_and_country() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .and(query_param("lat", "37.7749"))
        .and(query_param("format", "json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "display_name": "San Francisco, California, United States",
            "address": {
                "city": "San Francisco",
                "state": "California",
                "country": "United States"
            }
        })))
        .mount(&server)
        .await;

    let geocoder = NominatimGeocoder::new(server.uri());
    let place = skyprobe_core::Geocoder::reverse(&geocoder, san_francisco()).await.unwrap();

    assert_eq!(place.locality.as_deref(), Some("San Francisco"));
    assert_eq!(place.country.as_deref(), Some("United States"));
}

#[tokio::test]
async fn test_geocoder_failure_does_not_fail_fetch() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let service = WeatherService::new(
        Arc::new(OpenMeteoClient::new(server.uri())),
        Arc::new(NominatimGeocoder::new(server.uri())),
    );
    let reading = service.fetch_weather(san_francisco()).await.unwrap();

    assert_eq!(reading.temperature, 15.2);
    assert_eq!(reading.wind_speed, 10.5);
    assert_eq!(reading.wind_direction, 270);
    assert_eq!(reading.locality, None);
    assert_eq!(reading.country, None);
}

#[tokio::test]
async fn test_ip_locator_success_and_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "country": "United States",
            "lat": 37.7749,
            "lon": -122.4194
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "fail",
            "message": "private range"
        })))
        .mount(&server)
        .await;

    let http = reqwest::Client::new();
    let found = IpLocationSource::new(format!("{}/json", server.uri()), http.clone(), true);
    assert_eq!(found.current_location().await.unwrap(), Some(san_francisco()));

    let private = IpLocationSource::new(format!("{}/private", server.uri()), http, true);
    assert_eq!(private.current_location().await.unwrap(), None);
}

#[tokio::test]
async fn test_ip_locator_error_status_is_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let source =
        IpLocationSource::new(format!("{}/json", server.uri()), reqwest::Client::new(), true);
    let err = source.current_location().await.unwrap_err();

    match err {
        LocationError::Unavailable(message) => assert!(message.contains("500"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_background_fix_flows_into_presentation_state() {
    let server = MockServer::start().await;
    mount_forecast(&server).await;
    Mock::given(method("GET"))
        .and(path("/reverse"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "address": {"city": "San Francisco", "country": "United States"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "success",
            "lat": 37.7749,
            "lon": -122.4194
        })))
        .mount(&server)
        .await;

    let registry = ServiceRegistry::new();
    let publisher = LocationPublisher::new();
    let source =
        IpLocationSource::new(format!("{}/json", server.uri()), reqwest::Client::new(), true);
    let acquisition = LocationAcquisition::new(
        Arc::new(source),
        Arc::new(LogIndicator),
        publisher.clone(),
        registry.clone(),
        "skyprobe",
    );
    let weather = WeatherService::new(
        Arc::new(OpenMeteoClient::new(server.uri())),
        Arc::new(NominatimGeocoder::new(server.uri())),
    );
    let holder = StateHolder::new(weather, StatusProber::new(registry, "skyprobe"), acquisition);

    let listener = holder.spawn_location_listener(publisher.subscribe());
    let mut rx = holder.subscribe();
    holder.start_acquisition();

    rx.wait_for(|s| s.weather.is_some() && !s.loading).await.unwrap();
    let state = holder.snapshot();
    let weather = state.weather.unwrap();
    assert_eq!(weather.temperature, 15.2);
    assert_eq!(weather.locality.as_deref(), Some("San Francisco"));
    assert_eq!(state.error, None);
    assert_eq!(state.latitude_text, "37.7749");

    listener.abort();
}

#[tokio::test]
async fn test_manual_fetch_failure_sets_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/forecast"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal"))
        .mount(&server)
        .await;

    let registry = ServiceRegistry::new();
    let acquisition = LocationAcquisition::new(
        Arc::new(skyprobe_core::location::FixedLocationSource::new(san_francisco())),
        Arc::new(LogIndicator),
        LocationPublisher::new(),
        registry.clone(),
        "skyprobe",
    );
    let weather = WeatherService::new(
        Arc::new(OpenMeteoClient::new(server.uri())),
        Arc::new(NominatimGeocoder::new(server.uri())),
    );
    let holder = StateHolder::new(weather, StatusProber::new(registry, "skyprobe"), acquisition);

    holder.set_latitude_text("37.7749");
    holder.set_longitude_text("-122.4194");
    let outcome = holder.fetch_from_input().await.unwrap();

    assert!(matches!(outcome, FetchOutcome::Failed(ref msg) if msg.contains("status 500")));
    let state = holder.snapshot();
    assert!(state.weather.is_none());
    assert!(!state.loading);
}
