//! End-to-end exercises of the scheduler service over real TCP: a client
//! speaking the framed protocol against a server on an ephemeral port.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, watch};

use spindle::config::SchedulerConfig;
use spindle::scheduler::{SchedulerClient, SchedulerState, server};
use spindle::wire::{Cookie, RetStatus, UserIdentity};

struct TestService {
    addr: String,
    shutdown: watch::Sender<bool>,
    _dir: TempDir,
}

async fn start_service(identities: Vec<UserIdentity>) -> TestService {
    let dir = TempDir::new().unwrap();
    let config = SchedulerConfig {
        user_identity: identities,
        store_max_retries: 1,
        store_retry_delay: 0,
        ..SchedulerConfig::default()
    };
    let state = Arc::new(Mutex::new(
        SchedulerState::open_at(&config, dir.path()).await.unwrap(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let (tx, mut rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = server::serve(&listener, state, &mut rx).await;
    });

    TestService {
        addr,
        shutdown: tx,
        _dir: dir,
    }
}

#[tokio::test]
async fn register_then_grab_on_empty_frontier() {
    let service = start_service(Vec::new()).await;
    let mut client = SchedulerClient::new(service.addr.clone());

    assert_eq!(
        client.register_downloader("w0").await.unwrap(),
        RetStatus::Success
    );
    assert_eq!(client.grab_links(10).await.unwrap(), Vec::<String>::new());

    service.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn submit_grab_and_dead_set_over_the_wire() {
    let service = start_service(Vec::new()).await;
    let mut client = SchedulerClient::new(service.addr.clone());

    let links = vec!["http://a".to_string(), "http://b".to_string()];
    assert_eq!(
        client.submit_links(links.clone()).await.unwrap(),
        RetStatus::Success
    );

    let mut grabbed = client.grab_links(10).await.unwrap();
    grabbed.sort();
    assert_eq!(grabbed, links);

    assert!(client.grab_links(10).await.unwrap().is_empty());

    // Resubmitting a dispensed fingerprint is swallowed by the dead set.
    client
        .submit_links(vec!["http://a".to_string()])
        .await
        .unwrap();
    assert!(client.grab_links(10).await.unwrap().is_empty());

    service.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn topic_fifo_over_the_wire() {
    let service = start_service(Vec::new()).await;
    let mut client = SchedulerClient::new(service.addr.clone());

    client
        .submit_topic_links(vec!["t1".to_string(), "t2".to_string()])
        .await
        .unwrap();
    client
        .submit_topic_links(vec!["t3".to_string()])
        .await
        .unwrap();

    assert_eq!(client.grab_topic_links(2).await.unwrap(), vec!["t1", "t2"]);
    assert_eq!(client.grab_topic_links(2).await.unwrap(), vec!["t3"]);
    assert!(client.grab_topic_links(2).await.unwrap().is_empty());

    service.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn identity_exclusivity_across_connections() {
    let service = start_service(vec![
        UserIdentity::new("A", "pa"),
        UserIdentity::new("B", "pb"),
    ])
    .await;

    // Each worker talks over its own connection, like the real fleet.
    let mut c0 = SchedulerClient::new(service.addr.clone());
    let mut c1 = SchedulerClient::new(service.addr.clone());
    let mut c2 = SchedulerClient::new(service.addr.clone());

    let w0 = c0.request_user_identity("w0").await.unwrap();
    let w1 = c1.request_user_identity("w1").await.unwrap();
    assert_ne!(w0, w1);

    // Pool exhausted: the third lease comes from the config refill.
    let w2 = c2.request_user_identity("w2").await.unwrap();
    assert!(w2 == w0 || w2 == w1);

    // Sticky for the original holder.
    assert_eq!(c0.request_user_identity("w0").await.unwrap(), w0);

    // Resigning someone else's identity is rejected.
    assert_eq!(
        c1.resign_user_identity(w0.clone(), "w1").await.unwrap(),
        RetStatus::Failed
    );
    assert_eq!(
        c0.resign_user_identity(w0, "w0").await.unwrap(),
        RetStatus::Success
    );

    service.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn cookie_cycle_over_the_wire() {
    let service = start_service(Vec::new()).await;
    let mut client = SchedulerClient::new(service.addr.clone());

    assert!(client.request_cookie("w").await.unwrap().is_sentinel());

    client
        .submit_cookies(vec![Cookie::new("u1", "c1"), Cookie::new("u2", "c2")])
        .await
        .unwrap();

    let first = client.request_cookie("w").await.unwrap();
    let second = client.request_cookie("w").await.unwrap();
    assert_ne!(first.user, second.user);

    // Third request refills from the by-user map.
    let third = client.request_cookie("w").await.unwrap();
    assert!(!third.is_sentinel());

    service.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn torn_connection_leaves_the_service_running() {
    let service = start_service(Vec::new()).await;

    // First client connects and dies mid-session.
    {
        let mut client = SchedulerClient::new(service.addr.clone());
        client.register_downloader("w0").await.unwrap();
        client.close();
    }

    // A fresh client still gets served.
    let mut client = SchedulerClient::new(service.addr.clone());
    assert_eq!(
        client.register_downloader("w1").await.unwrap(),
        RetStatus::Success
    );

    service.shutdown.send(true).unwrap();
}

#[tokio::test]
async fn client_reconnects_after_transport_failure() {
    let service = start_service(Vec::new()).await;
    let mut client = SchedulerClient::new(service.addr.clone());

    client.register_downloader("w0").await.unwrap();
    assert!(client.is_open());

    // Poison the connection; the next call reopens transparently.
    client.close();
    assert!(!client.is_open());
    assert_eq!(
        client.register_downloader("w0").await.unwrap(),
        RetStatus::Success
    );

    service.shutdown.send(true).unwrap();

    // Once the service is gone, calls fail with a transport error instead
    // of hanging.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close();
    assert!(client.grab_links(1).await.is_err());
}
