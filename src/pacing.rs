use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::RequestDelay;

/// Token-bucket gate handing out query slots at a fixed rate.
///
/// Acquisition is FIFO (waiters queue on the internal mutex) and suspends
/// on the timer instead of spinning. One instance is shared by all workers
/// for the global cap; per-worker caps get a private instance each.
#[derive(Debug)]
pub struct RateLimiter {
	period: Duration,
	next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
	/// A limiter releasing `rate` tokens per second. Returns `None` when
	/// rate is 0 (unlimited), so the disabled case costs nothing per query.
	pub fn new(rate: u32) -> Option<Self> {
		if rate == 0 {
			return None;
		}
		Some(RateLimiter {
			period: Duration::from_secs(1) / rate,
			next_slot: Mutex::new(None),
		})
	}

	/// Take one token, sleeping until it becomes available.
	///
	/// Returns false if the run was cancelled while waiting; the caller
	/// must not issue the query in that case.
	pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
		let slot = {
			let mut next = self.next_slot.lock().await;
			let now = Instant::now();
			let slot = match *next {
				Some(at) if at > now => at,
				_ => now,
			};
			*next = Some(slot + self.period);
			slot
		};
		tokio::select! {
			_ = cancel.cancelled() => false,
			_ = tokio::time::sleep_until(slot) => true,
		}
	}
}

/// Sleep for the configured per-request delay, drawing a fresh uniform
/// value for range delays. Returns false if cancelled mid-sleep.
pub async fn request_delay<R: Rng>(
	delay: RequestDelay,
	rng: &mut R,
	cancel: &CancellationToken,
) -> bool {
	let d = match delay {
		RequestDelay::None => return true,
		RequestDelay::Constant(d) => d,
		RequestDelay::Range(lo, hi) => {
			if lo == hi {
				lo
			} else {
				rng.gen_range(lo..=hi)
			}
		}
	};
	tokio::select! {
		_ = cancel.cancelled() => false,
		_ = tokio::time::sleep(d) => true,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::rngs::StdRng;
	use rand::SeedableRng;
	use std::time::Instant as StdInstant;

	#[test]
	fn test_zero_rate_is_disabled() {
		assert!(RateLimiter::new(0).is_none());
	}

	#[tokio::test]
	async fn test_first_token_is_immediate() {
		let limiter = RateLimiter::new(1).unwrap();
		let cancel = CancellationToken::new();
		let start = StdInstant::now();
		assert!(limiter.acquire(&cancel).await);
		assert!(start.elapsed() < Duration::from_millis(100));
	}

	#[tokio::test]
	async fn test_rate_is_enforced() {
		// 100 qps -> 10 tokens should take roughly 90ms beyond the first
		let limiter = RateLimiter::new(100).unwrap();
		let cancel = CancellationToken::new();
		let start = StdInstant::now();
		for _ in 0..10 {
			assert!(limiter.acquire(&cancel).await);
		}
		let elapsed = start.elapsed();
		assert!(elapsed >= Duration::from_millis(80), "elapsed {elapsed:?}");
		assert!(elapsed < Duration::from_millis(500), "elapsed {elapsed:?}");
	}

	#[tokio::test]
	async fn test_acquire_cancelled_while_waiting() {
		let limiter = RateLimiter::new(1).unwrap();
		let cancel = CancellationToken::new();
		// Consume the immediate token so the next acquire has to wait.
		assert!(limiter.acquire(&cancel).await);
		let waiter = {
			let cancel = cancel.clone();
			tokio::spawn(async move { limiter.acquire(&cancel).await })
		};
		tokio::time::sleep(Duration::from_millis(20)).await;
		cancel.cancel();
		let acquired = waiter.await.unwrap();
		assert!(!acquired);
	}

	#[tokio::test]
	async fn test_constant_delay_sleeps() {
		let cancel = CancellationToken::new();
		let mut rng = StdRng::seed_from_u64(1);
		let start = StdInstant::now();
		let ok = request_delay(
			RequestDelay::Constant(Duration::from_millis(50)),
			&mut rng,
			&cancel,
		)
		.await;
		assert!(ok);
		assert!(start.elapsed() >= Duration::from_millis(45));
	}

	#[tokio::test]
	async fn test_range_delay_within_bounds() {
		let cancel = CancellationToken::new();
		let mut rng = StdRng::seed_from_u64(7);
		let lo = Duration::from_millis(10);
		let hi = Duration::from_millis(30);
		let start = StdInstant::now();
		let ok = request_delay(RequestDelay::Range(lo, hi), &mut rng, &cancel).await;
		assert!(ok);
		let elapsed = start.elapsed();
		assert!(elapsed >= Duration::from_millis(8), "elapsed {elapsed:?}");
	}

	#[tokio::test]
	async fn test_no_delay_returns_immediately() {
		let cancel = CancellationToken::new();
		let mut rng = StdRng::seed_from_u64(1);
		let start = StdInstant::now();
		assert!(request_delay(RequestDelay::None, &mut rng, &cancel).await);
		assert!(start.elapsed() < Duration::from_millis(5));
	}

	#[tokio::test]
	async fn test_delay_cancelled() {
		let cancel = CancellationToken::new();
		cancel.cancel();
		let mut rng = StdRng::seed_from_u64(1);
		let ok = request_delay(
			RequestDelay::Constant(Duration::from_secs(10)),
			&mut rng,
			&cancel,
		)
		.await;
		assert!(!ok);
	}
}
