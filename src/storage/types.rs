use bytes::Bytes;
use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Retention window, in seconds, applied to every capture unless configured otherwise.
pub const DEFAULT_TTL_SECS: i64 = 600;

/// Longest retention window accepted anywhere: one year.
pub const MAX_TTL_SECS: i64 = 365 * 24 * 60 * 60;

/// A captured frame and its retention deadline.
///
/// `image_data` holds the already encoded, watermarked bytes handed over by
/// the capture pipeline. It is never mutated; clones share the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedImage {
    pub id: Uuid,
    pub image_data: Bytes,
    pub captured_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CapturedImage {
    /// Creates a capture stamped `captured_at`, expiring `ttl` later.
    ///
    /// Timestamps are truncated to milliseconds, the persisted precision. A
    /// deadline past the end of the representable range saturates there.
    pub fn new(image_data: impl Into<Bytes>, captured_at: DateTime<Utc>, ttl: Duration) -> Self {
        let captured_at = captured_at.trunc_subsecs(3);
        Self {
            id: Uuid::new_v4(),
            image_data: image_data.into(),
            captured_at,
            expires_at: captured_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, clamped at zero.
    pub fn remaining_time(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            id: self.id,
            size_bytes: self.image_data.len(),
            captured_at: self.captured_at,
            expires_at: self.expires_at,
        }
    }
}

/// Byte-free view of a capture, used for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: Uuid,
    pub size_bytes: usize,
    pub captured_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Converts persisted epoch millis back to a timestamp.
pub fn from_millis(millis: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis).single()
}
