//! Retry metadata carried in delivery headers.

use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";
pub const LAST_ERROR_HEADER: &str = "x-last-error";
pub const LAST_RETRY_HEADER: &str = "x-last-retry";

/// Retry state of a delivery.
///
/// It has no identity of its own: it is read from the headers of each
/// delivery and rebuilt by the publisher on every republish.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryEnvelope {
    /// How many times the task has been requeued. Zero on first delivery.
    pub retry_count: u32,
    /// Description of the most recent failure.
    pub last_error: Option<String>,
    /// Unix seconds of the most recent requeue.
    pub last_retry: Option<i64>,
}

impl RetryEnvelope {
    /// Read the envelope from delivery headers.
    ///
    /// Absent or malformed values fall back to their defaults, so a delivery
    /// without usable headers is treated as a first attempt.
    #[must_use]
    pub fn from_headers(headers: Option<&FieldTable>) -> Self {
        let Some(headers) = headers else {
            return Self::default();
        };
        let table = headers.inner();

        let retry_count = table
            .get(&ShortString::from(RETRY_COUNT_HEADER))
            .and_then(as_integer)
            .map_or(0, |count| {
                if count < 0 {
                    0
                } else {
                    u32::try_from(count).unwrap_or(u32::MAX)
                }
            });

        let last_error = table
            .get(&ShortString::from(LAST_ERROR_HEADER))
            .and_then(as_string);

        let last_retry = table
            .get(&ShortString::from(LAST_RETRY_HEADER))
            .and_then(as_integer);

        Self {
            retry_count,
            last_error,
            last_retry,
        }
    }

    /// The envelope for the next requeue of this delivery.
    #[must_use]
    pub fn next_attempt(&self, error: impl Into<String>, now: i64) -> Self {
        Self {
            retry_count: self.retry_count.saturating_add(1),
            last_error: Some(error.into()),
            last_retry: Some(now),
        }
    }

    /// Headers for a republished delivery.
    ///
    /// The count is always written; error and timestamp only when known.
    #[must_use]
    pub fn to_headers(&self) -> FieldTable {
        let mut headers = FieldTable::default();
        headers.insert(
            RETRY_COUNT_HEADER.into(),
            AMQPValue::LongLongInt(i64::from(self.retry_count)),
        );
        if let Some(error) = &self.last_error {
            headers.insert(
                LAST_ERROR_HEADER.into(),
                AMQPValue::LongString(LongString::from(error.as_str())),
            );
        }
        if let Some(at) = self.last_retry {
            headers.insert(LAST_RETRY_HEADER.into(), AMQPValue::LongLongInt(at));
        }
        headers
    }
}

fn as_integer(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortInt(v) => Some(i64::from(*v)),
        AMQPValue::ShortUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongInt(v) => Some(i64::from(*v)),
        AMQPValue::LongUInt(v) => Some(i64::from(*v)),
        AMQPValue::LongLongInt(v) => Some(*v),
        AMQPValue::Timestamp(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn as_string(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}
