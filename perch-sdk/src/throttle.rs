//! Outbound flood control.
//!
//! Servers disconnect clients that write too fast. `Throttle` is a token
//! bucket: `burst` lines go out immediately, then one line per `interval`.

use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct Throttle {
    burst: u32,
    interval: Duration,
    tokens: u32,
    last_refill: Instant,
}

impl Throttle {
    pub fn new(burst: u32, interval: Duration) -> Self {
        let burst = burst.max(1);
        Self {
            burst,
            interval,
            tokens: burst,
            last_refill: Instant::now(),
        }
    }

    /// A throttle that never waits.
    pub fn unlimited() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Wait until a line may be sent, then consume a token.
    pub async fn acquire(&mut self) {
        if self.interval.is_zero() {
            return;
        }
        self.refill();
        if self.tokens == 0 {
            tokio::time::sleep_until(self.last_refill + self.interval).await;
            self.refill();
        }
        self.tokens = self.tokens.saturating_sub(1);
    }

    /// Tokens currently available.
    pub fn available(&mut self) -> u32 {
        self.refill();
        self.tokens
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_refill);
        let earned = (elapsed.as_nanos() / self.interval.as_nanos().max(1)) as u32;
        if earned > 0 {
            self.tokens = self.tokens.saturating_add(earned).min(self.burst);
            self.last_refill += self.interval * earned;
        }
        if self.tokens == self.burst {
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn burst_is_immediate_then_paced() {
        let mut t = Throttle::new(3, Duration::from_secs(1));
        let start = Instant::now();
        for _ in 0..3 {
            t.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);

        t.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(1));
        t.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn tokens_refill_while_idle() {
        let mut t = Throttle::new(2, Duration::from_secs(1));
        t.acquire().await;
        t.acquire().await;
        assert_eq!(t.available(), 0);
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(t.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unlimited_never_waits() {
        let mut t = Throttle::unlimited();
        let start = Instant::now();
        for _ in 0..100 {
            t.acquire().await;
        }
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
