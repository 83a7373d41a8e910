use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_test::{assert_err, assert_ok};
use victoria_metrics_client::client::ShutdownError;
use victoria_metrics_client::reliability::ManualClock;
use victoria_metrics_client::sender::{
    EncodedPayload, Transport, TransportError, TransportResponse,
};
use victoria_metrics_client::{
    BufferError, ClientConfig, Labels, MetricRegistry, MetricsClient, Sample,
};

/// Holds every request until a permit is added to `gate`.
#[derive(Debug)]
struct GatedTransport {
    gate: Arc<Semaphore>,
    calls: Arc<AtomicUsize>,
    payloads: Arc<Mutex<Vec<EncodedPayload>>>,
}

impl GatedTransport {
    fn closed() -> Self {
        Self {
            gate: Arc::new(Semaphore::new(0)),
            calls: Arc::new(AtomicUsize::new(0)),
            payloads: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn open() -> Self {
        let transport = Self::closed();
        transport.gate.add_permits(Semaphore::MAX_PERMITS / 2);
        transport
    }
}

impl Transport for GatedTransport {
    async fn post(&self, payload: &EncodedPayload) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(permit) = self.gate.acquire().await {
            permit.forget();
        }
        self.payloads.lock().push(payload.clone());
        Ok(TransportResponse {
            status: 204,
            body: String::new(),
        })
    }
}

fn config(max_batch_samples: usize, max_in_flight_batches: usize) -> ClientConfig {
    ClientConfig {
        max_batch_samples,
        max_in_flight_batches,
        max_concurrent_deliveries: 1,
        max_batch_interval: Duration::from_secs(60),
        compression_enabled: false,
        ..ClientConfig::default()
    }
}

fn sample(value: f64) -> Sample {
    Sample::new("jobs_done", Labels::new(), 1_000, value).unwrap()
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_submit_fails_fast_when_in_flight_limit_reached() {
    let transport = GatedTransport::closed();
    let gate = Arc::clone(&transport.gate);
    let client =
        MetricsClient::with_transport(config(1, 2), transport, Arc::new(ManualClock::new()))
            .unwrap();

    assert_ok!(client.submit(sample(1.0)));
    assert_ok!(client.submit(sample(2.0)));
    assert_eq!(client.in_flight(), 2);
    assert_eq!(
        client.submit(sample(3.0)),
        Err(BufferError::CapacityExceeded {
            in_flight: 2,
            limit: 2
        })
    );

    gate.add_permits(10);
    wait_until(|| client.in_flight() < 2).await;
    assert_ok!(client.submit(sample(3.0)));

    client.close(Duration::from_secs(5)).await.unwrap();
    let stats = client.stats();
    assert_eq!(stats.batches_delivered, 3);
    assert_eq!(stats.samples_delivered, 3);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_close_cancels_after_grace_period() {
    let transport = GatedTransport::closed();
    let calls = Arc::clone(&transport.calls);
    let client =
        MetricsClient::with_transport(config(1, 4), transport, Arc::new(ManualClock::new()))
            .unwrap();

    client.submit(sample(1.0)).unwrap();
    wait_until(|| calls.load(Ordering::SeqCst) == 1).await;

    let result = client.close(Duration::from_millis(100)).await;
    assert_eq!(result, Err(ShutdownError::GracePeriodExceeded { pending: 1 }));

    let stats = client.stats();
    assert_eq!(stats.cancelled, 1);
    assert_eq!(stats.batches_delivered, 0);
    assert_eq!(client.in_flight(), 0);
}

#[tokio::test]
async fn test_close_seals_remainder_and_is_idempotent() {
    let transport = GatedTransport::open();
    let payloads = Arc::clone(&transport.payloads);
    let client =
        MetricsClient::with_transport(config(100, 4), transport, Arc::new(ManualClock::new()))
            .unwrap();

    for i in 0..5 {
        client.submit(sample(i as f64)).unwrap();
    }
    assert_ok!(client.close(Duration::from_secs(5)).await);
    assert_ok!(client.close(Duration::from_secs(5)).await);
    assert!(client.is_closed());

    assert_err!(client.submit(sample(9.0)));
    assert_eq!(client.submit(sample(9.0)), Err(BufferError::Closed));

    let payloads = payloads.lock();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].sample_count, 5);
}

#[tokio::test]
async fn test_flush_only_when_pending() {
    let transport = GatedTransport::open();
    let client =
        MetricsClient::with_transport(config(100, 4), transport, Arc::new(ManualClock::new()))
            .unwrap();

    assert!(!client.flush());
    client.submit(sample(1.0)).unwrap();
    assert!(client.flush());
    assert!(!client.flush());

    client.close(Duration::from_secs(5)).await.unwrap();
    assert_eq!(client.stats().batches_flushed, 1);
}

#[tokio::test]
async fn test_registry_snapshot_is_delivered() {
    let transport = GatedTransport::open();
    let payloads = Arc::clone(&transport.payloads);
    let client =
        MetricsClient::with_transport(config(100, 4), transport, Arc::new(ManualClock::new()))
            .unwrap();

    let registry = MetricRegistry::new();
    let labels = Labels::from_pairs([("queue", "emails")]).unwrap();
    registry.counter("jobs_total", &labels).unwrap().inc_by(7);
    registry.gauge("queue_depth", &labels, || 42.0).unwrap();

    assert_eq!(client.submit_registry(&registry).unwrap(), 2);
    client.close(Duration::from_secs(5)).await.unwrap();

    let payloads = payloads.lock();
    let body = std::str::from_utf8(&payloads[0].body).unwrap();
    let lines: Vec<&str> = body.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("jobs_total{queue=\"emails\"} 7 "));
    assert!(lines[1].starts_with("queue_depth{queue=\"emails\"} 42 "));
}
