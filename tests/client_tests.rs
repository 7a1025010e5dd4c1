//! Transport, retry and catchup tests against a mock device

use ecowitt_gateway::{GatewayConfig, GatewayError, GatewayHttpClient, HistoryCatchup};
use futures::StreamExt;
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> GatewayConfig {
    let address = server.address();
    let mut config = GatewayConfig::new(address.ip().to_string());
    config.port = address.port();
    config.max_retries = 3;
    config.retry_wait = Duration::from_millis(10);
    config.catchup_retries = 2;
    config.timeout = Duration::from_secs(2);
    config
}

#[tokio::test]
async fn retry_shim_succeeds_after_transient_server_errors() {
    let server = MockServer::start().await;

    // Two failures, then a good answer; three attempts fit the budget.
    Mock::given(method("GET"))
        .and(path("/get_version"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/get_version"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"version": "GW2000C_V3.1.2", "newVersion": "0"})),
        )
        .mount(&server)
        .await;

    let client = GatewayHttpClient::new(config_for(&server)).unwrap();
    let raw = client.get_version().await.unwrap();
    assert_eq!(raw.get("version"), Some(&json!("GW2000C_V3.1.2")));
}

#[tokio::test]
async fn exhausted_retries_report_device_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_version"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = GatewayHttpClient::new(config_for(&server)).unwrap();
    let err = client.get_version().await.unwrap_err();
    assert!(matches!(err, GatewayError::Unreachable(_)));
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn refused_connection_reports_device_unreachable() {
    let mut config = GatewayConfig::new("127.0.0.1");
    config.port = 1; // nothing listens here
    config.max_retries = 2;
    config.retry_wait = Duration::from_millis(10);
    config.timeout = Duration::from_millis(500);

    let client = GatewayHttpClient::new(config).unwrap();
    let err = client.get_livedata().await.unwrap_err();
    assert!(err.is_connectivity());
}

#[tokio::test]
async fn malformed_body_is_a_content_failure_not_connectivity() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_livedata_info"))
        .respond_with(ResponseTemplate::new(200).set_body_string("this is not json"))
        .mount(&server)
        .await;

    let client = GatewayHttpClient::new(config_for(&server)).unwrap();
    let err = client.get_livedata().await.unwrap_err();
    assert!(matches!(err, GatewayError::Parse(_)));
    assert!(!err.is_connectivity());
}

#[tokio::test]
async fn current_record_carries_datetime_and_interval() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_livedata_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "common_list": [
                {"id": "0x02", "val": "26.5", "unit": "C"},
                {"id": "0x0B", "val": "4.20 km/h"}
            ]
        })))
        .mount(&server)
        .await;

    let client = GatewayHttpClient::new(config_for(&server)).unwrap();
    let record = client.current_record().await.unwrap();
    assert_eq!(record.get("outtemp.val"), Some(&json!(26.5)));
    assert_eq!(record.get("windspeed.val"), Some(&json!(4.2)));
    assert!(record.get("datetime").and_then(|v| v.as_i64()).is_some());
    assert_eq!(record.get("interval"), Some(&json!(20)));
}

#[tokio::test]
async fn configured_field_map_renames_record_keys() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_livedata_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "common_list": [{"id": "0x02", "val": "26.5", "unit": "C"}]
        })))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config
        .field_map
        .insert("outtemp.val".to_string(), "outTemp".to_string());
    let client = GatewayHttpClient::new(config).unwrap();
    let record = client.current_record().await.unwrap();
    assert_eq!(record.get("outTemp"), Some(&json!(26.5)));
    assert!(!record.contains_key("outtemp.val"));
}

#[tokio::test]
async fn health_check_does_not_propagate_errors() {
    let mut config = GatewayConfig::new("127.0.0.1");
    config.port = 1;
    config.max_retries = 1;
    config.retry_wait = Duration::from_millis(10);
    config.timeout = Duration::from_millis(500);

    let client = GatewayHttpClient::new(config).unwrap();
    assert!(!client.health_check().await);
}

#[tokio::test]
async fn sensor_list_classifies_under_configured_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_sensors_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "wh65": {"address": "0", "id": "a1b2c3d4", "batt": "0", "signal": "4", "idst": "1"},
            "wn31": {
                "ch1": {"address": "6", "id": "0014bf80", "batt": "0", "signal": "4", "idst": "1"},
                "ch2": {"address": "7", "id": "ffffffff", "batt": "0", "signal": "0", "idst": "0"}
            }
        })))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.only_registered = true;
    let client = GatewayHttpClient::new(config).unwrap();
    let sensors = client.sensors().await.unwrap();
    assert_eq!(sensors.connected(), vec!["wh65", "wn31_ch1"]);
    assert_eq!(sensors.disabled(), vec!["wn31_ch2"]);
}

const AUGUST_LOG: &str = "Time,Outdoor Temperature(\u{2103}),Outdoor Humidity(%),Wind(m/s)\n\
    2024-08-01 00:05,26.5,56,4.2\n\
    \n\
    2024-08-01 00:10,26.4,57,3.9\n\
    2024-08-01 00:15,26.2,57,4.0\n";

#[tokio::test]
async fn catchup_streams_records_from_selected_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_sdmmc_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "info": {"Name": "SD", "Total": "29.7GB"},
            "file_list": [
                {"name": "202407A.csv", "type": "csv", "size": "824512"},
                {"name": "202408A.csv", "type": "csv", "size": "102400"},
                {"name": "notes.txt", "type": "txt", "size": "64"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/202408A.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(AUGUST_LOG))
        .mount(&server)
        .await;

    // Last good record mid-window: 2024-08-01 00:10 UTC is 1722470400 + 600.
    let last_good_ts = 1722470400 + 600;
    let client = GatewayHttpClient::new(config_for(&server)).unwrap();
    let catchup = HistoryCatchup::new(client, last_good_ts);

    let stream = catchup.records();
    futures::pin_mut!(stream);
    let mut records = Vec::new();
    while let Some(item) = stream.next().await {
        records.push(item.unwrap());
    }

    // Grace (120s) reaches back to 00:08; rows 00:10 and 00:15 qualify.
    // The July file is outside the window and notes.txt never matches.
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].get("datetime").and_then(|v| v.as_i64()),
        Some(1722470400 + 600)
    );
    assert_eq!(records[0].get("outtemp.val"), Some(&json!(26.4)));
    assert_eq!(records[1].get("outtemp.val"), Some(&json!(26.2)));

    // Timestamps are non-decreasing and never at or below the threshold.
    let threshold = last_good_ts - 120;
    let mut previous = i64::MIN;
    for record in &records {
        let ts = record.get("datetime").and_then(|v| v.as_i64()).unwrap();
        assert!(ts > threshold);
        assert!(ts >= previous);
        previous = ts;
    }
}

#[tokio::test]
async fn catchup_reports_failed_file_and_continues() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/get_sdmmc_info"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "file_list": [
                {"name": "202408A.csv", "type": "csv", "size": "1024"},
                {"name": "202408B.csv", "type": "csv", "size": "1024"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/202408A.csv"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/202408B.csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string(AUGUST_LOG))
        .mount(&server)
        .await;

    let mut config = config_for(&server);
    config.max_retries = 1;
    let client = GatewayHttpClient::new(config).unwrap();
    let catchup = HistoryCatchup::new(client, 0);

    let stream = catchup.records();
    futures::pin_mut!(stream);
    let mut failures = 0;
    let mut records = Vec::new();
    while let Some(item) = stream.next().await {
        match item {
            Ok(record) => records.push(record),
            Err(e) => {
                assert!(matches!(e, GatewayError::Catchup(_)));
                failures += 1;
            }
        }
    }

    assert_eq!(failures, 1);
    assert_eq!(records.len(), 3);
}

#[tokio::test]
async fn catchup_without_storage_info_is_void() {
    let mut config = GatewayConfig::new("127.0.0.1");
    config.port = 1;
    config.max_retries = 1;
    config.retry_wait = Duration::from_millis(10);
    config.timeout = Duration::from_millis(500);
    let client = GatewayHttpClient::new(config).unwrap();
    let catchup = HistoryCatchup::new(client, 0);

    let stream = catchup.records();
    futures::pin_mut!(stream);
    let first = stream.next().await.unwrap();
    assert!(matches!(first.unwrap_err(), GatewayError::Catchup(_)));
    assert!(stream.next().await.is_none());
}
