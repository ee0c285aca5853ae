//! Read results carrying staleness metadata.

use chrono::Utc;
use ideafit_core::Timestamp;
use std::time::Duration;

/// Result of a keyed cache read.
///
/// SWR reads never hide staleness: the value comes back either way and the
/// caller inspects [`CacheRead::is_stale`] to decide whether to refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRead<T> {
    value: T,
    cached_at: Timestamp,
    ttl: Duration,
    stale: bool,
}

impl<T> CacheRead<T> {
    pub(crate) fn new(value: T, cached_at: Timestamp, ttl: Duration, stale: bool) -> Self {
        Self {
            value,
            cached_at,
            ttl,
            stale,
        }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn into_value(self) -> T {
        self.value
    }

    /// When the value was stored.
    pub fn cached_at(&self) -> Timestamp {
        self.cached_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Time since the value was stored.
    pub fn age(&self) -> Duration {
        (Utc::now() - self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// True once the entry's age reached its TTL at read time.
    pub fn is_stale(&self) -> bool {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let cached_at = Utc::now() - chrono::Duration::seconds(30);
        let read = CacheRead::new(7u32, cached_at, Duration::from_secs(60), false);
        assert_eq!(*read.value(), 7);
        assert_eq!(read.cached_at(), cached_at);
        assert_eq!(read.ttl(), Duration::from_secs(60));
        assert!(read.age() >= Duration::from_secs(30));
        assert!(!read.is_stale());
        assert_eq!(read.into_value(), 7);
    }

    #[test]
    fn test_future_timestamp_has_zero_age() {
        let read = CacheRead::new(
            (),
            Utc::now() + chrono::Duration::seconds(60),
            Duration::from_secs(1),
            false,
        );
        assert_eq!(read.age(), Duration::ZERO);
    }
}
