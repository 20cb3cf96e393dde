//! Batching notifier tests
//!
//! Timer-driven tests use a 100ms batch timeout and wait 250ms.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use webhook_store::observability::init_test_logging;
use webhook_store::webhook::{
    MutationRecord, RecordMethod, RecordingTransport, SimulatedTransport, SimulatedTransportConfig,
    TransportError,
};
use webhook_store::{BatchedWebHookFileStore, Contents, FileStore, InMemoryFileStore, WebhookConfig};

type Batched = BatchedWebHookFileStore<Arc<InMemoryFileStore>, RecordingTransport>;

const TIMER_WAIT: Duration = Duration::from_millis(250);

fn setup_with(config: WebhookConfig) -> (Batched, Arc<InMemoryFileStore>, RecordingTransport) {
    init_test_logging();
    let backing = Arc::new(InMemoryFileStore::new());
    let transport = RecordingTransport::new();
    let store =
        BatchedWebHookFileStore::new(Arc::clone(&backing), transport.clone(), config).unwrap();
    (store, backing, transport)
}

fn setup() -> (Batched, Arc<InMemoryFileStore>, RecordingTransport) {
    setup_with(WebhookConfig::test("http://example.com"))
}

/// The single batch sent so far, as wire JSON
fn only_batch_json(transport: &RecordingTransport) -> Vec<serde_json::Value> {
    let batches = transport.batches();
    assert_eq!(batches.len(), 1, "expected exactly one batch, got {:?}", batches);
    assert_eq!(batches[0].0, "http://example.com");
    batches[0]
        .1
        .iter()
        .map(|r| serde_json::to_value(r).unwrap())
        .collect()
}

#[tokio::test]
async fn test_write_operation_batched() {
    let (store, backing, transport) = setup();

    store.write("/test.txt", "Hello, world!".into()).unwrap();
    assert_eq!(backing.read("/test.txt").unwrap(), Contents::from("Hello, world!"));
    assert_eq!(transport.request_count(), 0);

    tokio::time::sleep(TIMER_WAIT).await;

    let payload = only_batch_json(&transport);
    assert_eq!(
        payload,
        vec![serde_json::json!({"method": "POST", "path": "/test.txt", "content": "Hello, world!"})]
    );
    assert_eq!(store.stats().idle_triggered, 1);
}

#[tokio::test]
async fn test_delete_overwrites_pending_write() {
    let (store, _backing, transport) = setup();

    store.write("/test.txt", "Hello, world!".into()).unwrap();
    store.delete("/test.txt").unwrap();
    assert_eq!(transport.request_count(), 0);

    tokio::time::sleep(TIMER_WAIT).await;

    let payload = only_batch_json(&transport);
    assert_eq!(payload.len(), 1);
    assert_eq!(payload[0]["method"], "DELETE");
    assert_eq!(payload[0]["path"], "/test.txt");
    assert!(payload[0].get("content").is_none());
}

#[tokio::test]
async fn test_write_after_delete_replaces_it() {
    let (store, _backing, transport) = setup();

    store.delete("/a").unwrap();
    store.write("/a", "back".into()).unwrap();
    store.flush().await;

    assert_eq!(
        transport.batches()[0].1,
        vec![MutationRecord::put("/a", &Contents::from("back"))]
    );
}

#[tokio::test]
async fn test_batch_size_limit_triggers_send() {
    // Long timeout so only the size limit can trigger
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_secs(10), 1000);
    let (store, _backing, transport) = setup_with(config);
    let large = "x".repeat(1001);

    store.write("/large.txt", large.clone().into()).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let payload = only_batch_json(&transport);
    assert_eq!(payload[0]["content"], large.as_str());
    assert_eq!(store.stats().size_triggered, 1);
    assert_eq!(store.pending_len(), 0);
}

#[tokio::test]
async fn test_size_limit_holds_while_endpoint_is_slow() {
    init_test_logging();
    let recorder = RecordingTransport::new();
    let slow = SimulatedTransportConfig {
        latency_range_us: (500_000, 500_001),
        ..SimulatedTransportConfig::no_faults()
    };
    let transport = SimulatedTransport::new(recorder.clone(), 7, slow);
    let limit = 400;
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_secs(10), limit);
    let store = BatchedWebHookFileStore::new(InMemoryFileStore::new(), transport, config).unwrap();

    // Each record estimates at 218 bytes, so every second write reaches the limit
    let start = std::time::Instant::now();
    for i in 0..50 {
        store.write(&format!("/f{:02}", i), "x".repeat(150).into()).unwrap();
        assert!(store.pending_size() < limit, "pending {} after write {}", store.pending_size(), i);
        if i % 10 == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
    assert!(start.elapsed() < Duration::from_millis(300));

    // Batches were drained while the first requests were still in flight
    assert_eq!(recorder.request_count(), 0);
    assert_eq!(store.stats().size_triggered, 25);

    store.flush().await;
    let delivered: usize = recorder.batches().iter().map(|(_, records)| records.len()).sum();
    assert_eq!(delivered, 50);
    assert_eq!(store.stats().records_sent, 50);
    assert_eq!(store.pending_len(), 0);
}

#[tokio::test]
async fn test_multiple_updates_same_file() {
    let (store, _backing, transport) = setup();

    store.write("/test.txt", "Version 1".into()).unwrap();
    store.write("/test.txt", "Version 2".into()).unwrap();
    store.write("/test.txt", "Version 3".into()).unwrap();
    assert_eq!(store.pending_len(), 1);

    tokio::time::sleep(TIMER_WAIT).await;

    let payload = only_batch_json(&transport);
    assert_eq!(payload.len(), 1);
    assert_eq!(payload[0]["content"], "Version 3");
}

#[tokio::test]
async fn test_flush_sends_immediately() {
    let (store, _backing, transport) = setup();

    store.write("/test.txt", "Hello, world!".into()).unwrap();
    store.flush().await;

    let payload = only_batch_json(&transport);
    assert_eq!(payload[0]["content"], "Hello, world!");

    // The idle timer fires later on an empty batch and sends nothing
    tokio::time::sleep(TIMER_WAIT).await;
    assert_eq!(transport.request_count(), 1);
}

#[tokio::test]
async fn test_multiple_operations_in_single_batch() {
    let (store, _backing, transport) = setup();

    store.write("/file1.txt", "Content 1".into()).unwrap();
    store.write("/file2.txt", "Content 2".into()).unwrap();
    store.delete("/file3.txt").unwrap();

    tokio::time::sleep(TIMER_WAIT).await;

    // Insertion order is preserved
    let records = &transport.batches()[0].1;
    assert_eq!(
        records,
        &vec![
            MutationRecord::put("/file1.txt", &"Content 1".into()),
            MutationRecord::put("/file2.txt", &"Content 2".into()),
            MutationRecord::delete("/file3.txt"),
        ]
    );
}

#[tokio::test]
async fn test_binary_content_is_base64() {
    let (store, _backing, transport) = setup();
    let binary = vec![0x00, 0x01, 0x02, 0x03, 0xff, 0xfe, 0xfd, 0xfc];

    store.write("/binary.bin", Contents::Bytes(binary.clone())).unwrap();
    tokio::time::sleep(TIMER_WAIT).await;

    let payload = only_batch_json(&transport);
    assert_eq!(payload[0]["method"], "POST");
    assert_eq!(payload[0]["encoding"], "base64");
    let decoded = BASE64.decode(payload[0]["content"].as_str().unwrap()).unwrap();
    assert_eq!(decoded, binary);
}

#[tokio::test]
async fn test_small_binary_round_trip() {
    let (store, _backing, transport) = setup();

    store.write("/b", Contents::from(b"\x00\x01\xff")).unwrap();
    store.flush().await;

    let record = &transport.batches()[0].1[0];
    assert_eq!(record.decoded_content(), Some(Contents::Bytes(vec![0x00, 0x01, 0xff])));
}

#[tokio::test]
async fn test_mixed_content_types() {
    let (store, _backing, transport) = setup();

    store.write("/text.txt", "Plain text content".into()).unwrap();
    store.write("/binary.bin", Contents::from(b"\x00\x01\x02\x03")).unwrap();
    store.delete("/old.txt").unwrap();
    tokio::time::sleep(TIMER_WAIT).await;

    let payload = only_batch_json(&transport);
    let by_path: HashMap<&str, &serde_json::Value> =
        payload.iter().map(|op| (op["path"].as_str().unwrap(), op)).collect();

    assert_eq!(by_path["/text.txt"]["content"], "Plain text content");
    assert!(by_path["/text.txt"].get("encoding").is_none());
    assert_eq!(by_path["/binary.bin"]["encoding"], "base64");
    assert_eq!(by_path["/old.txt"]["method"], "DELETE");
}

#[tokio::test]
async fn test_empty_flush_sends_nothing() {
    let (store, _backing, transport) = setup();

    store.flush().await;
    tokio::time::sleep(TIMER_WAIT).await;

    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_batch_url_is_base_url_verbatim() {
    let (store, _backing, transport) = setup_with(WebhookConfig::test("http://example.com/"));

    store.write("/test.txt", "content".into()).unwrap();
    tokio::time::sleep(TIMER_WAIT).await;

    assert_eq!(transport.batches()[0].0, "http://example.com/");
}

#[tokio::test]
async fn test_special_characters_and_unicode() {
    let (store, _backing, transport) = setup();
    let paths = [
        "/file with spaces.txt",
        "/file-with-dashes.txt",
        "/path/to/file.txt",
        "/file(1).txt",
        "/file[1].txt",
        "/file{1}.txt",
    ];
    for path in paths {
        store.write(path, format!("content for {}", path).into()).unwrap();
    }
    let unicode = "Hello 世界 🌍 Café naïve résumé";
    store.write("/unicode.txt", unicode.into()).unwrap();
    tokio::time::sleep(TIMER_WAIT).await;

    let records = &transport.batches()[0].1;
    assert_eq!(records.len(), paths.len() + 1);
    assert_eq!(records.last().unwrap().content.as_deref(), Some(unicode));

    // JSON wire format keeps the text intact
    let wire = serde_json::to_string(records).unwrap();
    let parsed: Vec<MutationRecord> = serde_json::from_str(&wire).unwrap();
    assert_eq!(&parsed, records);
}

#[tokio::test]
async fn test_idle_timer_is_rearmed_by_activity() {
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_millis(150), 1_000_000);
    let (store, _backing, transport) = setup_with(config);

    // Keep writing more often than the timeout
    for i in 0..6 {
        store.write(&format!("/f{}", i), "x".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(transport.request_count(), 0);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].1.len(), 6);
}

#[tokio::test]
async fn test_flush_failure_is_not_raised() {
    let (store, backing, transport) = setup();
    transport.fail_always(TransportError::Network("Network error".into()));

    store.write("/test.txt", "content".into()).unwrap();
    tokio::time::sleep(TIMER_WAIT).await;

    // The batch was attempted once and then dropped
    assert_eq!(transport.batches().len(), 1);
    let stats = store.stats();
    assert_eq!(stats.failed_flushes, 1);
    assert_eq!(stats.records_dropped, 1);
    assert_eq!(store.pending_len(), 0);
    assert_eq!(backing.read("/test.txt").unwrap(), Contents::from("content"));

    // Later batches still go out once the endpoint recovers
    transport.recover();
    store.write("/next.txt", "more".into()).unwrap();
    store.flush().await;
    assert_eq!(store.stats().records_sent, 1);
}

#[tokio::test]
async fn test_large_batch_is_fast_and_single_request() {
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_secs(1), 10_000);
    let (store, _backing, transport) = setup_with(config);

    let start = std::time::Instant::now();
    for i in 0..100 {
        store.write(&format!("/file_{:03}.txt", i), format!("Content {}", i).into()).unwrap();
    }
    assert!(start.elapsed() < Duration::from_millis(500));

    store.flush().await;
    assert_eq!(transport.request_count(), 1);
    assert_eq!(transport.batches()[0].1.len(), 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_writers_no_loss_or_duplication() {
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_millis(100), 2000);
    let (store, _backing, transport) = setup_with(config);
    let store = Arc::new(store);

    let threads = 8;
    let writes = 25;
    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let store = Arc::clone(&store);
            std::thread::spawn(move || {
                for i in 0..writes {
                    store
                        .write(
                            &format!("/thread{}_file{}.txt", t, i),
                            format!("Content from thread {}", t).into(),
                        )
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    store.flush().await;

    let all: Vec<MutationRecord> = transport
        .batches()
        .into_iter()
        .flat_map(|(_, records)| records)
        .collect();
    assert_eq!(all.len(), threads * writes);

    let mut paths: Vec<&str> = all.iter().map(|r| r.path.as_str()).collect();
    paths.sort();
    paths.dedup();
    assert_eq!(paths.len(), threads * writes);
    assert!(all.iter().all(|r| r.method == RecordMethod::Put));
}

#[tokio::test]
async fn test_shutdown_flushes_pending() {
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_secs(60), 1_000_000);
    let (store, _backing, transport) = setup_with(config);

    store.write("/a", "1".into()).unwrap();
    store.write("/b", "2".into()).unwrap();
    store.shutdown().await;

    assert_eq!(transport.batches()[0].1.len(), 2);

    // Worker is gone: later writes wait for an explicit flush
    store.write("/c", "3".into()).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(transport.request_count(), 1);
    store.flush().await;
    assert_eq!(transport.request_count(), 2);
}

#[tokio::test]
async fn test_drop_performs_final_flush() {
    let config = WebhookConfig::test("http://example.com").with_batch(Duration::from_secs(60), 1_000_000);
    let (store, _backing, transport) = setup_with(config);

    store.write("/a", "1".into()).unwrap();
    drop(store);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(transport.batches().len(), 1);
}
