use std::time::Duration;

/// Tunables for a drive session.
///
/// The defaults match the protocol's expectations: a 5 second event poll
/// cadence and at most 8 child-listing requests per second (burst 1)
/// during tree materialization.
#[derive(Debug, Clone)]
pub struct DriveConfig {
    /// How often the event loop polls for new share events when idle.
    pub poll_interval: Duration,
    /// Average child-listing requests per second during initialization.
    pub list_rate: u32,
    /// Child-listing burst size.
    pub list_burst: u32,
    /// Delay before retrying a failed event batch fetch.
    pub fetch_retry_delay: Duration,
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            list_rate: 8,
            list_burst: 1,
            fetch_retry_delay: Duration::from_secs(1),
        }
    }
}
