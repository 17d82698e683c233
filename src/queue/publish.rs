//! Rate-limit-gated publishing.
//!
//! Before a work item is published, the last enqueue time for its fingerprint
//! is looked up in the rate-limit bucket. Inside the interval the message is
//! published with the deduplication id and a `DelayUntil` header pointing at
//! the interval end; outside it the message goes out undelayed. Either way
//! the bucket is updated with the current time.

use async_nats::jetstream;
use async_nats::jetstream::kv;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::fingerprint::Fingerprint;
use super::{DELAY_UNTIL_HEADER, MESSAGE_ID_HEADER};
use crate::settings::Settings;
use crate::types::{DeliveryId, PullRequestMessage, PushMessage, StatusMessage};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("unable to get rate limit from kv bucket: {0}")]
    RateLimitRead(#[from] kv::EntryError),

    #[error("unable to store last message time in kv bucket: {0}")]
    RateLimitWrite(#[from] kv::PutError),

    #[error("unable to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("unable to publish message to queue: {0}")]
    Publish(#[from] jetstream::context::PublishError),
}

/// The enqueue seam. The production implementation is
/// [`RateLimitedPublisher`]; tests substitute a recorder.
#[async_trait]
pub trait WorkPublisher: Send + Sync {
    async fn publish(
        &self,
        subject: String,
        fingerprint: &Fingerprint,
        payload: Vec<u8>,
    ) -> Result<(), QueueError>;
}

/// The three work subjects, each suffixed with the delivery id on publish.
#[derive(Debug, Clone)]
pub struct Subjects {
    pub push: String,
    pub status: String,
    pub pull_request: String,
}

impl Subjects {
    pub fn from_settings(settings: &Settings) -> Self {
        Subjects {
            push: settings.push_subject.clone(),
            status: settings.status_subject.clone(),
            pull_request: settings.pull_request_subject.clone(),
        }
    }
}

/// JetStream-backed publisher applying the fingerprint rate-limit gate.
pub struct RateLimitedPublisher {
    jetstream: jetstream::Context,
    rate_limit: kv::Store,
    interval: Duration,
}

impl RateLimitedPublisher {
    pub fn new(jetstream: jetstream::Context, rate_limit: kv::Store, interval: Duration) -> Self {
        RateLimitedPublisher {
            jetstream,
            rate_limit,
            interval,
        }
    }
}

#[async_trait]
impl WorkPublisher for RateLimitedPublisher {
    async fn publish(
        &self,
        subject: String,
        fingerprint: &Fingerprint,
        payload: Vec<u8>,
    ) -> Result<(), QueueError> {
        let key = fingerprint.key();
        let now = Utc::now();

        let last_sent = self
            .rate_limit
            .get(key.as_str())
            .await?
            .and_then(|value| decode_unix_seconds(&value));

        let mut headers = async_nats::HeaderMap::new();
        if let Some(not_before) = delay_until(last_sent, self.interval, now) {
            // Same fingerprint inside the interval: deduplicate by message id
            // and hold the redelivery until the interval end.
            headers.insert(MESSAGE_ID_HEADER, key.as_str());
            headers.insert(
                DELAY_UNTIL_HEADER,
                not_before.to_rfc3339_opts(SecondsFormat::Secs, true).as_str(),
            );
        }

        // Publish is fire-and-forget: the send itself can fail, the ack is
        // not awaited.
        let _ack = self
            .jetstream
            .publish_with_headers(subject.clone(), headers, Bytes::from(payload))
            .await?;
        debug!(subject = %subject, fingerprint = %fingerprint.as_str(), "published message");

        self.rate_limit
            .put(key.as_str(), Bytes::from(encode_unix_seconds(now).to_vec()))
            .await?;
        Ok(())
    }
}

/// The interval end, if the previous enqueue is still inside the interval.
fn delay_until(
    last_sent: Option<DateTime<Utc>>,
    interval: Duration,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let last_sent = last_sent?;
    let not_before = last_sent + chrono::Duration::from_std(interval).ok()?;
    (now < not_before).then_some(not_before)
}

/// Rate-limit values are 8-byte little-endian unix seconds.
fn decode_unix_seconds(value: &[u8]) -> Option<DateTime<Utc>> {
    let bytes: [u8; 8] = value.try_into().ok()?;
    DateTime::<Utc>::from_timestamp(i64::from_le_bytes(bytes), 0)
}

fn encode_unix_seconds(when: DateTime<Utc>) -> [u8; 8] {
    when.timestamp().to_le_bytes()
}

/// Typed publishing front door shared by the ingress and the worker.
#[derive(Clone)]
pub struct WorkQueue {
    publisher: Arc<dyn WorkPublisher>,
    subjects: Subjects,
}

impl WorkQueue {
    pub fn new(publisher: Arc<dyn WorkPublisher>, subjects: Subjects) -> Self {
        WorkQueue {
            publisher,
            subjects,
        }
    }

    pub fn subjects(&self) -> &Subjects {
        &self.subjects
    }

    pub async fn publish_push(
        &self,
        delivery: &DeliveryId,
        msg: &PushMessage,
    ) -> Result<(), QueueError> {
        let fingerprint = Fingerprint::push(msg.installation_id, &msg.repository.node_id);
        self.publish(&self.subjects.push, delivery, &fingerprint, msg).await
    }

    pub async fn publish_status(
        &self,
        delivery: &DeliveryId,
        msg: &StatusMessage,
    ) -> Result<(), QueueError> {
        let fingerprint = Fingerprint::status(msg.installation_id, &msg.repository.node_id);
        self.publish(&self.subjects.status, delivery, &fingerprint, msg)
            .await
    }

    pub async fn publish_pull_request(
        &self,
        delivery: &DeliveryId,
        msg: &PullRequestMessage,
    ) -> Result<(), QueueError> {
        let fingerprint = Fingerprint::pull_request(
            msg.installation_id,
            &msg.repository.node_id,
            msg.pull_request.number,
        );
        self.publish(&self.subjects.pull_request, delivery, &fingerprint, msg)
            .await
    }

    async fn publish<T: Serialize>(
        &self,
        prefix: &str,
        delivery: &DeliveryId,
        fingerprint: &Fingerprint,
        msg: &T,
    ) -> Result<(), QueueError> {
        let payload = serde_json::to_vec(msg)?;
        self.publisher
            .publish(format!("{prefix}.{delivery}"), fingerprint, payload)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    // ─── rate-limit window arithmetic ───

    #[test]
    fn first_enqueue_has_no_delay() {
        assert_eq!(delay_until(None, Duration::from_secs(30), Utc::now()), None);
    }

    #[test]
    fn enqueue_inside_interval_is_delayed_to_interval_end() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap();
        let not_before = delay_until(Some(last), Duration::from_secs(30), now).unwrap();
        assert_eq!(not_before, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap());
    }

    #[test]
    fn enqueue_after_interval_is_not_delayed() {
        let last = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 31).unwrap();
        assert_eq!(delay_until(Some(last), Duration::from_secs(30), now), None);
    }

    // ─── KV value encoding ───

    #[test]
    fn unix_seconds_roundtrip() {
        let when = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let encoded = encode_unix_seconds(when);
        assert_eq!(decode_unix_seconds(&encoded), Some(when));
    }

    #[test]
    fn short_values_decode_to_none() {
        assert_eq!(decode_unix_seconds(&[]), None);
        assert_eq!(decode_unix_seconds(&[1, 2, 3]), None);
    }
}
