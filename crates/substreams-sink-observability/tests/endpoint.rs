use indexmap::IndexMap;

use substreams_sink_core::signal::{BlockClock, StreamSignal};
use substreams_sink_observability::{router, sample_value, ManifestDescriptor, MetricsBridge};

async fn spawn(bridge: &MetricsBridge) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = router(bridge.reader());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn health_turns_ok_after_first_data_message() {
    let mut bridge = MetricsBridge::new(&IndexMap::new(), ManifestDescriptor::default());
    let base = spawn(&bridge).await;

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 503);
    assert_eq!(resp.text().await.unwrap(), "no messages received yet");

    bridge.observe(&StreamSignal::Block {
        clock: BlockClock {
            number: 1,
            id: "0x01".into(),
            timestamp: 0,
        },
        size_bytes: 512,
    });

    let resp = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn metrics_endpoint_serves_bridge_registry() {
    let labels: IndexMap<String, String> = [("sink".to_string(), "postgres".to_string())].into_iter().collect();
    let mut bridge = MetricsBridge::new(&labels, ManifestDescriptor::default());
    let base = spawn(&bridge).await;

    bridge.observe(&StreamSignal::clock_at(99, 1_700_000_000));

    let body = reqwest::get(format!("{base}/metrics")).await.unwrap().text().await.unwrap();
    assert_eq!(
        sample_value(&body, "substreams_sink_head_block_number", &[("sink", "postgres")]),
        Some(99.0)
    );
}
