//! Per-connection quotas for chatty frame types.
//!
//! Each category has its own bucket, refilled in full once per window.
//! Frames over quota are dropped, not answered.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::messages::FrameCategory;

/// Frames allowed per window, by category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalQuotas {
    #[serde(default = "default_typing")]
    pub typing: u32,
    #[serde(default = "default_read_receipt")]
    pub read_receipt: u32,
    #[serde(default = "default_presence")]
    pub presence: u32,
    #[serde(default = "default_call_signal")]
    pub call_signal: u32,
    #[serde(default = "default_ping")]
    pub ping: u32,
}

fn default_typing() -> u32 {
    30
}
fn default_read_receipt() -> u32 {
    60
}
fn default_presence() -> u32 {
    10
}
fn default_call_signal() -> u32 {
    200
}
fn default_ping() -> u32 {
    30
}

impl Default for LocalQuotas {
    fn default() -> Self {
        Self {
            typing: default_typing(),
            read_receipt: default_read_receipt(),
            presence: default_presence(),
            call_signal: default_call_signal(),
            ping: default_ping(),
        }
    }
}

impl LocalQuotas {
    pub fn limit_for(&self, category: FrameCategory) -> u32 {
        match category {
            FrameCategory::Typing => self.typing,
            FrameCategory::ReadReceipt => self.read_receipt,
            FrameCategory::Presence => self.presence,
            FrameCategory::CallSignal => self.call_signal,
            FrameCategory::Ping => self.ping,
        }
    }
}

#[derive(Debug)]
pub struct LocalRateLimiter {
    quotas: LocalQuotas,
    window: Duration,
    window_started: Instant,
    used: HashMap<FrameCategory, u32>,
}

impl LocalRateLimiter {
    pub fn new(quotas: LocalQuotas, window: Duration) -> Self {
        Self {
            quotas,
            window,
            window_started: Instant::now(),
            used: HashMap::new(),
        }
    }

    /// Takes one token for `category`; false when the bucket is empty.
    pub fn allow(&mut self, category: FrameCategory) -> bool {
        if self.window_started.elapsed() >= self.window {
            self.used.clear();
            self.window_started = Instant::now();
        }

        let used = self.used.entry(category).or_insert(0);
        if *used >= self.quotas.limit_for(category) {
            return false;
        }
        *used += 1;
        true
    }

    pub fn remaining(&self, category: FrameCategory) -> u32 {
        let used = self.used.get(&category).copied().unwrap_or(0);
        self.quotas.limit_for(category).saturating_sub(used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quotas() -> LocalQuotas {
        LocalQuotas {
            typing: 2,
            ping: 1,
            ..LocalQuotas::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn bucket_empties_then_refills_after_window() {
        let mut limiter = LocalRateLimiter::new(quotas(), Duration::from_secs(60));

        assert!(limiter.allow(FrameCategory::Typing));
        assert!(limiter.allow(FrameCategory::Typing));
        assert!(!limiter.allow(FrameCategory::Typing));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.allow(FrameCategory::Typing));
    }

    #[tokio::test(start_paused = true)]
    async fn categories_are_independent() {
        let mut limiter = LocalRateLimiter::new(quotas(), Duration::from_secs(60));

        assert!(limiter.allow(FrameCategory::Ping));
        assert!(!limiter.allow(FrameCategory::Ping));

        assert_eq!(limiter.remaining(FrameCategory::Typing), 2);
        assert!(limiter.allow(FrameCategory::Typing));
    }
}
