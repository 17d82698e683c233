//! Adapter over the JetStream substrate.
//!
//! Everything the rest of the crate knows about the queue goes through this
//! module: fingerprint-deduplicated publishing with a rate-limit gate,
//! the `DelayUntil` redelivery check, and stream/bucket/consumer setup.

mod fingerprint;
mod publish;
mod substrate;

pub use fingerprint::{Fingerprint, kv_key};
pub use publish::{QueueError, RateLimitedPublisher, Subjects, WorkPublisher, WorkQueue};
pub use substrate::{SubjectConsumer, Substrate, SubstrateError};

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Header carrying the substrate's deduplication id.
pub const MESSAGE_ID_HEADER: &str = "Nats-Msg-Id";

/// Header naming the earliest instant a message may be processed.
pub const DELAY_UNTIL_HEADER: &str = "DelayUntil";

/// Outcome of inspecting a message's `DelayUntil` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayCheck {
    /// No delay header, or the delay has already elapsed.
    Ready,
    /// The message must wait this much longer before processing.
    Delay(Duration),
    /// The header is present but unparseable.
    Invalid,
}

/// Checks whether a message is ready to be processed.
pub fn delay_check(headers: Option<&async_nats::HeaderMap>, now: DateTime<Utc>) -> DelayCheck {
    let Some(value) = headers.and_then(|h| h.get(DELAY_UNTIL_HEADER)) else {
        return DelayCheck::Ready;
    };
    let Ok(delay_until) = DateTime::parse_from_rfc3339(value.as_str()) else {
        return DelayCheck::Invalid;
    };
    match (delay_until.with_timezone(&Utc) - now).to_std() {
        Ok(remaining) if !remaining.is_zero() => DelayCheck::Delay(remaining),
        _ => DelayCheck::Ready,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers_with(value: &str) -> async_nats::HeaderMap {
        let mut headers = async_nats::HeaderMap::new();
        headers.insert(DELAY_UNTIL_HEADER, value);
        headers
    }

    #[test]
    fn no_headers_is_ready() {
        assert_eq!(delay_check(None, Utc::now()), DelayCheck::Ready);
        assert_eq!(
            delay_check(Some(&async_nats::HeaderMap::new()), Utc::now()),
            DelayCheck::Ready
        );
    }

    #[test]
    fn future_delay_reports_remaining_time() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let headers = headers_with("2024-05-01T12:00:30Z");
        match delay_check(Some(&headers), now) {
            DelayCheck::Delay(remaining) => assert_eq!(remaining, Duration::from_secs(30)),
            other => panic!("expected Delay, got {other:?}"),
        }
    }

    #[test]
    fn elapsed_delay_is_ready() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap();
        let headers = headers_with("2024-05-01T12:00:30Z");
        assert_eq!(delay_check(Some(&headers), now), DelayCheck::Ready);
    }

    #[test]
    fn garbage_header_is_invalid() {
        let headers = headers_with("soon");
        assert_eq!(delay_check(Some(&headers), Utc::now()), DelayCheck::Invalid);
    }
}
