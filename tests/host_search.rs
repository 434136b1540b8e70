//! End-to-end searches over the demo federation.

use fedbroker::{HostConfig, build_broker, search};
use fedbroker_core::{Query, SortOrder, SortSpec, SourceError};

fn ids(response: &fedbroker_core::AggregatedResponse) -> Vec<&str> {
    response
        .results
        .iter()
        .map(|r| r.record.id.as_str())
        .collect()
}

#[tokio::test(start_paused = true)]
async fn sample_federation_reports_slow_and_failed_sources() {
    let config = HostConfig::sample();
    let query = Query::builder()
        .text("coast")
        .timeout_ms(2_000)
        .build()
        .expect("query");

    let response = search(&config, &query, &[]).await.expect("search");

    assert_eq!(ids(&response), vec!["hf-002", "na-001"]);
    assert_eq!(response.total_hits, 43);
    assert_eq!(
        response.responded_sources,
        vec!["harbour-feed".to_string(), "north-archive".to_string()]
    );

    let details: Vec<_> = response
        .processing_details
        .iter()
        .map(|d| (d.source_id.as_str(), d.error.clone()))
        .collect();
    assert_eq!(details.len(), 2);
    assert_eq!(
        details[0],
        ("offline", Some(SourceError::Failed("connection refused".into())))
    );
    assert_eq!(details[1].0, "slow-mirror");
    assert!(matches!(details[1].1, Some(SourceError::Timeout { .. })));
}

#[tokio::test(start_paused = true)]
async fn temporal_sort_orders_across_sources() {
    let config = HostConfig::sample();
    let query = Query::builder()
        .text("coast OR harbour")
        .timeout_ms(2_000)
        .sort(SortSpec::new("created", SortOrder::Ascending))
        .build()
        .expect("query");

    let response = search(&config, &query, &[]).await.expect("search");
    assert_eq!(ids(&response), vec!["na-002", "hf-002", "na-001", "hf-001"]);
}

#[tokio::test(start_paused = true)]
async fn source_selection_limits_fan_out() {
    let config = HostConfig::sample();
    let query = Query::builder()
        .text("coast")
        .timeout_ms(2_000)
        .build()
        .expect("query");

    let response = search(&config, &query, &["north-archive".to_string()])
        .await
        .expect("search");
    assert_eq!(ids(&response), vec!["na-001"]);
    assert!(response.processing_details.is_empty());
    assert!(response.source_properties.contains_key("north-archive"));
}

#[tokio::test(start_paused = true)]
async fn response_serializes_for_the_cli() {
    let config = HostConfig::sample();
    let query = Query::builder()
        .text("coast")
        .timeout_ms(2_000)
        .correlation_id("cli-1")
        .build()
        .expect("query");

    let response = search(&config, &query, &[]).await.expect("search");
    let json = serde_json::to_value(&response).expect("json");
    assert_eq!(json["correlation_id"], "cli-1");
    assert_eq!(json["processing_details"][1]["error"]["kind"], "timeout");
}

#[test]
fn broker_reflects_configured_sources() {
    let broker = build_broker(&HostConfig::sample()).expect("broker");
    assert_eq!(
        broker.source_ids(),
        vec!["harbour-feed", "north-archive", "offline", "slow-mirror"]
    );
}
