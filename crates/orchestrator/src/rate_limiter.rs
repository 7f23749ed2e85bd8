//! Discovery rate limiting

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter as Governor};
use std::num::NonZeroU32;

/// Token bucket shared by every discovery worker. A rate of zero is treated
/// as one request per second.
pub struct RateLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            limiter: Governor::direct(Quota::per_second(rate)),
        }
    }

    /// Wait until one request may be sent.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }
}
