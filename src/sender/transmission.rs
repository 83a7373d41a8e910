use super::client::{Transport, TransportError, TransportResponse};
use super::encoding::EncodedPayload;
use super::stats::DeliveryStats;
use crate::reliability::{Clock, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Retryable failure (status {status:?}): {reason}")]
    Retryable { reason: String, status: Option<u16> },

    #[error("Rejected by endpoint with status {status}: {message}")]
    Fatal { status: u16, message: String },

    #[error("Gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<DeliveryError>,
    },

    #[error("Delivery cancelled")]
    Cancelled,
}

impl DeliveryError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::Retryable { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Retryable { status, .. } => *status,
            DeliveryError::Fatal { status, .. } => Some(*status),
            DeliveryError::RetriesExhausted { last, .. } => last.status(),
            DeliveryError::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Pending,
    InFlight,
    Succeeded,
    RetryableFailure,
    FatalFailure,
}

/// Delivery state of one payload across its attempts.
#[derive(Debug, Clone)]
pub struct DeliveryAttempt {
    pub payload: EncodedPayload,
    pub attempt_count: u32,
    pub next_retry_at: Option<Instant>,
    pub state: AttemptState,
}

impl DeliveryAttempt {
    pub fn new(payload: EncodedPayload) -> Self {
        Self {
            payload,
            attempt_count: 0,
            next_retry_at: None,
            state: AttemptState::Pending,
        }
    }

    pub fn into_payload(self) -> EncodedPayload {
        self.payload
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub batch_id: String,
    pub attempts: u32,
    pub status: u16,
    pub bytes_sent: usize,
    pub latency: Duration,
}

/// Classify one attempt. 2xx is success, 429 and 5xx are retryable, every other
/// status is fatal. Transport failures follow their own retryability.
pub fn classify(
    result: Result<Result<TransportResponse, TransportError>, tokio::time::error::Elapsed>,
    send_timeout: Duration,
) -> Result<u16, DeliveryError> {
    match result {
        Err(_) => Err(DeliveryError::Retryable {
            reason: format!("no response within {send_timeout:?}"),
            status: None,
        }),
        Ok(Err(error)) if error.is_retryable() => Err(DeliveryError::Retryable {
            reason: error.to_string(),
            status: None,
        }),
        Ok(Err(error)) => Err(DeliveryError::Fatal {
            status: 0,
            message: error.to_string(),
        }),
        Ok(Ok(response)) => match response.status {
            200..=299 => Ok(response.status),
            429 | 500..=599 => Err(DeliveryError::Retryable {
                reason: status_reason(&response),
                status: Some(response.status),
            }),
            status => Err(DeliveryError::Fatal {
                status,
                message: status_reason(&response),
            }),
        },
    }
}

fn status_reason(response: &TransportResponse) -> String {
    if response.body.is_empty() {
        format!("HTTP {}", response.status)
    } else {
        format!("HTTP {}: {}", response.status, response.body)
    }
}

/// Sends payloads with bounded, jittered exponential retry. Every wait and
/// every attempt races the cancellation token.
#[derive(Debug)]
pub struct DeliverySender<T: Transport> {
    transport: Arc<T>,
    policy: RetryPolicy,
    send_timeout: Duration,
    clock: Arc<dyn Clock>,
    stats: Arc<DeliveryStats>,
}

impl<T: Transport> Clone for DeliverySender<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            policy: self.policy.clone(),
            send_timeout: self.send_timeout,
            clock: Arc::clone(&self.clock),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<T: Transport> DeliverySender<T> {
    pub fn new(
        transport: Arc<T>,
        policy: RetryPolicy,
        send_timeout: Duration,
        clock: Arc<dyn Clock>,
        stats: Arc<DeliveryStats>,
    ) -> Self {
        Self {
            transport,
            policy,
            send_timeout,
            clock,
            stats,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn send(
        &self,
        payload: EncodedPayload,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, DeliveryError> {
        let mut attempt = DeliveryAttempt::new(payload);
        self.deliver(&mut attempt, cancel).await
    }

    /// Drive `attempt` to a terminal outcome. On failure the payload stays in
    /// `attempt` for the overflow policy.
    pub async fn deliver(
        &self,
        attempt: &mut DeliveryAttempt,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, DeliveryError> {
        let started = self.clock.now();

        loop {
            if cancel.is_cancelled() {
                attempt.state = AttemptState::FatalFailure;
                return Err(DeliveryError::Cancelled);
            }

            attempt.state = AttemptState::InFlight;
            attempt.attempt_count += 1;
            attempt.next_retry_at = None;
            self.stats.record_request(attempt.payload.len() as u64);
            debug!(
                batch_id = %attempt.payload.batch_id,
                attempt = attempt.attempt_count,
                bytes = attempt.payload.len(),
                "sending batch"
            );

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    attempt.state = AttemptState::FatalFailure;
                    return Err(DeliveryError::Cancelled);
                }
                result = tokio::time::timeout(self.send_timeout, self.transport.post(&attempt.payload)) => {
                    classify(result, self.send_timeout)
                }
            };

            let error = match outcome {
                Ok(status) => {
                    attempt.state = AttemptState::Succeeded;
                    let latency = self.clock.now().saturating_duration_since(started);
                    info!(
                        batch_id = %attempt.payload.batch_id,
                        samples = attempt.payload.sample_count,
                        attempts = attempt.attempt_count,
                        status,
                        ?latency,
                        "batch delivered"
                    );
                    return Ok(DeliveryReport {
                        batch_id: attempt.payload.batch_id.clone(),
                        attempts: attempt.attempt_count,
                        status,
                        bytes_sent: attempt.payload.len(),
                        latency,
                    });
                }
                Err(error @ DeliveryError::Retryable { .. }) => error,
                Err(error) => {
                    attempt.state = AttemptState::FatalFailure;
                    return Err(error);
                }
            };

            attempt.state = AttemptState::RetryableFailure;
            if !self.policy.has_attempts_left(attempt.attempt_count) {
                attempt.state = AttemptState::FatalFailure;
                return Err(DeliveryError::RetriesExhausted {
                    attempts: attempt.attempt_count,
                    last: Box::new(error),
                });
            }

            let delay = self.policy.calculate_delay(attempt.attempt_count);
            attempt.next_retry_at = Some(self.clock.now() + delay);
            self.stats.record_retry();
            warn!(
                batch_id = %attempt.payload.batch_id,
                attempt = attempt.attempt_count,
                ?delay,
                %error,
                "delivery failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    attempt.state = AttemptState::FatalFailure;
                    return Err(DeliveryError::Cancelled);
                }
                _ = self.clock.sleep(delay) => {}
            }
            attempt.state = AttemptState::Pending;
        }
    }
}
