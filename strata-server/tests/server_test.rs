//! gRPC server integration tests.
//!
//! These run the full tonic stack over loopback TCP: unary produce/consume,
//! the three streaming shapes, the typed out-of-range status, and policy
//! enforcement.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tonic::transport::{Channel, Server};
use tonic::Code;

use strata_api::log_v1::log_client::LogClient;
use strata_api::log_v1::log_server::LogServer;
use strata_api::log_v1::{ConsumeRequest, ProduceRequest, Record};
use strata_api::offset_from_status;
use strata_log::{Config, Log};
use strata_server::{authenticate, Authorizer, LogService};

/// Maximum time to wait for any single server interaction.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn record(value: &str) -> Record {
    Record {
        value: value.as_bytes().to_vec(),
        offset: 0,
    }
}

fn produce_request(value: &str) -> ProduceRequest {
    ProduceRequest {
        record: Some(record(value)),
    }
}

/// Starts a server on an ephemeral port and connects a client. Without TLS
/// every caller authenticates as the anonymous subject.
async fn start_test_server(
    authorizer: Authorizer,
) -> (LogClient<Channel>, Arc<Log>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(Log::open(dir.path(), Config::default()).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let service = LogService::new(Arc::clone(&log), Arc::new(authorizer));
    tokio::spawn(async move {
        Server::builder()
            .add_service(LogServer::with_interceptor(service, authenticate))
            .serve_with_incoming(tokio_stream::wrappers::TcpListenerStream::new(listener))
            .await
            .unwrap();
    });

    let client = LogClient::connect(format!("http://{addr}")).await.unwrap();
    (client, log, dir)
}

#[tokio::test]
async fn test_produce_consume_roundtrip() {
    let (mut client, _log, _dir) = start_test_server(Authorizer::allow_all()).await;

    let produced = client
        .produce(produce_request("hello world"))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(produced.offset, 0);

    let consumed = client
        .consume(ConsumeRequest { offset: 0 })
        .await
        .unwrap()
        .into_inner();
    let rec = consumed.record.unwrap();
    assert_eq!(rec.value, b"hello world");
    assert_eq!(rec.offset, 0);
}

#[tokio::test]
async fn test_consume_past_end_is_typed_out_of_range() {
    let (mut client, _log, _dir) = start_test_server(Authorizer::allow_all()).await;

    let status = client
        .consume(ConsumeRequest { offset: 1 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
    assert_eq!(offset_from_status(&status), Some(1));
}

#[tokio::test]
async fn test_produce_stream_answers_each_request() {
    let (mut client, _log, _dir) = start_test_server(Authorizer::allow_all()).await;

    let requests = vec![
        produce_request("first"),
        produce_request("second"),
        produce_request("third"),
    ];
    let mut responses = client
        .produce_stream(tokio_stream::iter(requests))
        .await
        .unwrap()
        .into_inner();

    for want in 0..3 {
        let response = timeout(TEST_TIMEOUT, responses.message())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(response.offset, want);
    }
    assert!(timeout(TEST_TIMEOUT, responses.message())
        .await
        .unwrap()
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_consume_stream_tails_the_log() {
    let (client, _log, _dir) = start_test_server(Authorizer::allow_all()).await;

    // Subscribe past the current end of the (empty) log first.
    let mut consumer = client.clone();
    let mut stream = consumer
        .consume_stream(ConsumeRequest { offset: 0 })
        .await
        .unwrap()
        .into_inner();

    // Now produce; the stream must pick the records up in order.
    let mut producer = client.clone();
    for i in 0..3 {
        producer
            .produce(produce_request(&format!("tail-{i}")))
            .await
            .unwrap();
    }

    for i in 0..3u64 {
        let response = timeout(TEST_TIMEOUT, stream.message())
            .await
            .expect("stream stalled")
            .unwrap()
            .unwrap();
        let rec = response.record.unwrap();
        assert_eq!(rec.offset, i);
        assert_eq!(rec.value, format!("tail-{i}").into_bytes());
    }

    // Cancelling the stream must leave the server healthy.
    drop(stream);
    let offset = producer
        .produce(produce_request("after-cancel"))
        .await
        .unwrap()
        .into_inner()
        .offset;
    assert_eq!(offset, 3);
}

#[tokio::test]
async fn test_produce_bulk_reports_inserted_count() {
    let (mut client, _log, _dir) = start_test_server(Authorizer::allow_all()).await;

    let requests: Vec<_> = (0..5).map(|i| produce_request(&format!("bulk-{i}"))).collect();
    let response = client
        .produce_bulk_records(tokio_stream::iter(requests))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.records_inserted, 5);

    for i in 0..5u64 {
        let consumed = client
            .consume(ConsumeRequest { offset: i })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(consumed.record.unwrap().value, format!("bulk-{i}").into_bytes());
    }
}

#[tokio::test]
async fn test_policy_denies_unauthorized_action() {
    // Anonymous callers may produce but not consume.
    let authorizer = Authorizer::from_policy("p, *, *, produce");
    let (mut client, _log, _dir) = start_test_server(authorizer).await;

    client.produce(produce_request("allowed")).await.unwrap();

    let status = client
        .consume(ConsumeRequest { offset: 0 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);

    let status = client
        .consume_stream(ConsumeRequest { offset: 0 })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::PermissionDenied);
}

#[tokio::test]
async fn test_missing_record_is_invalid_argument() {
    let (mut client, _log, _dir) = start_test_server(Authorizer::allow_all()).await;

    let status = client
        .produce(ProduceRequest { record: None })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}
