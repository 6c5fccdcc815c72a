use std::time::Duration;

/// How long a claimed query stays leased before another poller may take it.
pub const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(5 * 60);

/// Maximum number of queries handed out by a single claim.
pub const DEFAULT_BATCH_SIZE: u32 = 4;

/// Lease window and batch cap applied to every claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeasePolicy {
    lease_duration: Duration,
    batch_size: u32,
}

impl Default for LeasePolicy {
    fn default() -> Self {
        Self {
            lease_duration: DEFAULT_LEASE_DURATION,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl LeasePolicy {
    /// Set how long a lease lasts.
    ///
    /// Sub-second precision is dropped since timestamps are unix seconds.
    pub fn lease_duration(mut self, lease_duration: Duration) -> Self {
        self.lease_duration = lease_duration;
        self
    }

    /// Set the maximum number of queries returned per claim.
    pub fn batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// The configured lease length.
    pub fn get_lease_duration(&self) -> Duration {
        self.lease_duration
    }

    /// The configured batch cap.
    pub fn get_batch_size(&self) -> u32 {
        self.batch_size
    }

    /// Leases started strictly before this unix timestamp are stale at `now`.
    pub fn lease_cutoff(&self, now: i64) -> i64 {
        let secs = i64::try_from(self.lease_duration.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let policy = LeasePolicy::default();
        assert_eq!(policy.get_lease_duration(), DEFAULT_LEASE_DURATION);
        assert_eq!(policy.get_batch_size(), DEFAULT_BATCH_SIZE);
        assert_eq!(policy.lease_cutoff(1_000), 700);
    }

    #[test]
    fn lease_cutoff_saturates() {
        let policy = LeasePolicy::default().lease_duration(Duration::MAX);
        assert_eq!(policy.lease_cutoff(0), i64::MIN);
    }
}
