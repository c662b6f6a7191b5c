//! Pipeline engine end-to-end: fed responses produce records in the sink
//! and extracted links land in the scheduler frontier via the fan-in.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};

use spindle::config::{PipelineConfig, SchedulerConfig};
use spindle::pipeline::{FetchedPage, JsonlSink, Pipeline, PipelineEngine};
use spindle::scheduler::{LinkSink, SchedulerClient, SchedulerState, server};

#[tokio::test]
async fn responses_flow_to_records_and_frontier() {
    let dir = TempDir::new().unwrap();

    // Real scheduler service on an ephemeral port.
    let config = SchedulerConfig {
        store_max_retries: 1,
        store_retry_delay: 0,
        ..SchedulerConfig::default()
    };
    let state = Arc::new(Mutex::new(
        SchedulerState::open_at(&config, &dir.path().join("db"))
            .await
            .unwrap(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server_state = Arc::clone(&state);
    tokio::spawn(async move {
        let _ = server::serve(&listener, server_state, &mut shutdown_rx).await;
    });

    // Engine wired to the service through the fan-in sink. The stop flag
    // sender stays alive for the whole test so the consumer only exits on
    // the explicit Stop sentinel.
    let (_sink_stop_tx, sink_stop_rx) = watch::channel(false);
    let (links, sink_handle) = LinkSink::start(addr.clone(), Duration::from_millis(50), sink_stop_rx);
    let records_path = dir.path().join("records.jsonl");
    let sink = Arc::new(JsonlSink::open(&records_path).unwrap());
    let pipeline_config = PipelineConfig {
        engine_pool_size: 2,
        ..PipelineConfig::default()
    };
    let (engine, workers) = PipelineEngine::start(&pipeline_config, sink, links.clone());

    // A topic index page linking to a profile and a topic page.
    engine.feed(FetchedPage {
        url: "https://m.weibo.cn/p/100808aa/index".to_string(),
        final_url: "https://m.weibo.cn/p/100808aa/index".to_string(),
        status: 200,
        body: r#"{"cards": ["https://m.weibo.cn/u/42", "https://m.weibo.cn/p/100808bb/index"]}"#
            .to_string(),
        fetched_at: Utc::now(),
    });

    // Drain the engine: drop every feeder handle and join the workers.
    drop(engine);
    for worker in workers {
        worker.await.unwrap();
    }

    // One record line for the processed page.
    let records = std::fs::read_to_string(&records_path).unwrap();
    let lines: Vec<&str> = records.lines().collect();
    assert_eq!(lines.len(), 1);
    let record: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(record["kind"], "Topic");
    assert_eq!(record["links_found"], 2);

    // Give the sink consumer a beat to dispatch, then check the frontier.
    // Grabs are destructive, so collect across polls.
    let mut client = SchedulerClient::new(addr);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let mut general = Vec::new();
    let mut topic = Vec::new();
    loop {
        general.extend(client.grab_links(10).await.unwrap());
        topic.extend(client.grab_topic_links(10).await.unwrap());
        if general == vec!["https://m.weibo.cn/u/42".to_string()]
            && topic == vec!["https://m.weibo.cn/p/100808bb/index".to_string()]
        {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "links never reached the frontier: general={general:?} topic={topic:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    links.stop();
    sink_handle.await.unwrap();
    shutdown_tx.send(true).unwrap();
}
