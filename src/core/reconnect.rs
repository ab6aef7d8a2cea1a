use std::time::Duration;

use super::types::ReconnectConfig;

/// Close codes that signal an intentional shutdown of the session.
///
/// 1000 = normal closure, 1001 = going away. Everything else, including
/// no-status closes (1005/1006 never appear on the wire), takes the retry path.
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_GOING_AWAY: u16 = 1001;

/// Whether a close with the given code should be retried.
#[inline]
pub fn should_retry_close(code: Option<u16>) -> bool {
    !matches!(code, Some(CLOSE_NORMAL) | Some(CLOSE_GOING_AWAY))
}

/// Pure exponential backoff: doubling from a base delay, capped.
///
/// The attempt counter is owned by the connection actor (reset on every
/// successful open), so this stays a pure function of the attempt number and
/// is testable without any IO.
#[derive(Clone, Copy, Debug)]
pub struct ExponentialBackoff {
    base: Duration,
    cap: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry `attempt` (1-based). Attempt 0 retries immediately.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let shift = (attempt - 1).min(31);
        let delay = self.base.saturating_mul(1u32 << shift);
        delay.min(self.cap)
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        let cfg = ReconnectConfig::default();
        Self::new(cfg.base_delay, cfg.max_delay)
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(cfg: ReconnectConfig) -> Self {
        Self::new(cfg.base_delay, cfg.max_delay)
    }
}
