//!
//! Retry policy and backoff scheduling.
//!
//! Each network has a [`RetryPolicy`]. Every pipeline owns a [`RetryScheduler`] built from its
//! network's policy; the scheduler hands out backoff delays after retryable failures and decides
//! when a record has to give up.

use crate::adapter::AdapterError;
use crate::sync::record::{FailureReason, SyncFailure};

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use std::time::Duration;

/// Backoff and polling profile of one network.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub base_delay: Duration,
	/// Upper bound of the un-jittered delay.
	pub max_delay: Duration,
	/// Fraction in `[0, 1]` by which a delay is randomly shortened or stretched.
	pub jitter: f64,
	/// Submit calls plus failed status fetches allowed per record.
	pub max_attempts: u32,
	/// Interval between status polls.
	pub poll_interval: Duration,
	/// Upper bound for a single adapter call.
	pub attempt_timeout: Duration,
	/// Polls allowed before a submission is given up as unconfirmed.
	pub max_polls: u32,
	/// How long a submission may stay unknown to the network before it is resubmitted.
	pub submission_timeout: Duration,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			base_delay: Duration::from_secs(1),
			max_delay: Duration::from_secs(30),
			jitter: 0.2,
			max_attempts: 5,
			poll_interval: Duration::from_secs(3),
			attempt_timeout: Duration::from_secs(15),
			max_polls: 200,
			submission_timeout: Duration::from_secs(120),
		}
	}
}

impl RetryPolicy {
	/// Exponential backoff doubling from `base_delay` up to `max_delay`, never expiring.
	pub fn backoff(&self) -> ExponentialBackoff {
		ExponentialBackoffBuilder::new()
			.with_initial_interval(self.base_delay)
			.with_max_interval(self.max_delay)
			.with_multiplier(2.0)
			.with_randomization_factor(self.jitter.clamp(0.0, 1.0))
			.with_max_elapsed_time(None)
			.build()
	}

	/// Bounds of the delay before retry number `attempt` (0-based).
	pub fn delay_bounds(&self, attempt: u32) -> (Duration, Duration) {
		let factor = 2u32.saturating_pow(attempt);
		let nominal = self.base_delay.saturating_mul(factor).min(self.max_delay);
		let jitter = self.jitter.clamp(0.0, 1.0);
		(nominal.mul_f64(1.0 - jitter), nominal.mul_f64(1.0 + jitter))
	}
}

/// What to do after a failed adapter call.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
	/// Record the failed attempt and try again after the delay.
	RetryAfter(Duration),
	/// Fail the record.
	Fail(SyncFailure),
}

/// Per-record retry state.
pub struct RetryScheduler {
	policy: RetryPolicy,
	backoff: ExponentialBackoff,
}

impl RetryScheduler {
	pub fn new(policy: RetryPolicy) -> Self {
		let backoff = policy.backoff();
		Self { policy, backoff }
	}

	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Decide how to continue after `error`, given the attempts already counted on the record.
	///
	/// The failed call itself counts as an attempt, so a record never exceeds `max_attempts`.
	pub fn on_failure(&mut self, error: &AdapterError, attempts_so_far: u32) -> RetryDecision {
		if !error.is_retryable() {
			return RetryDecision::Fail(SyncFailure::from(error));
		}

		let attempts = attempts_so_far + 1;
		if attempts >= self.policy.max_attempts {
			return RetryDecision::Fail(SyncFailure::new(
				FailureReason::RetriesExhausted,
				format!("{} attempts, last error: {}", attempts, error),
			));
		}

		let delay = self
			.backoff
			.next_backoff()
			.unwrap_or(self.policy.max_delay);
		RetryDecision::RetryAfter(delay)
	}

	/// A call went through; the next failure starts again from `base_delay`.
	pub fn on_success(&mut self) {
		self.backoff.reset();
	}

	/// Whether a submission still unknown to the network should be sent again.
	pub fn can_resubmit(&self, attempts_so_far: u32) -> bool {
		attempts_so_far < self.policy.max_attempts
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::AdapterErrorKind;
	use crate::network::Network;

	fn close(a: Duration, b: Duration) -> bool {
		a.abs_diff(b) < Duration::from_micros(10)
	}

	fn policy() -> RetryPolicy {
		RetryPolicy {
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(1_000),
			jitter: 0.25,
			max_attempts: 4,
			..RetryPolicy::default()
		}
	}

	#[test]
	fn delays_grow_and_stay_within_jitter_bounds() {
		let mut scheduler = RetryScheduler::new(policy());
		let error = AdapterError::new(AdapterErrorKind::NetworkUnavailable, Network::Base, "down");

		for attempt in 0..3 {
			let (low, high) = scheduler.policy().delay_bounds(attempt);
			match scheduler.on_failure(&error, attempt) {
				RetryDecision::RetryAfter(delay) => {
					let slack = Duration::from_millis(1);
					assert!(
						delay + slack >= low && delay <= high + slack,
						"{:?} not in {:?}..{:?}",
						delay,
						low,
						high
					);
				}
				other => panic!("expected retry, got {:?}", other),
			}
		}
	}

	#[test]
	fn delay_bounds_are_capped() {
		let policy = policy();
		let (low, high) = policy.delay_bounds(0);
		assert!(close(low, Duration::from_millis(75)));
		assert!(close(high, Duration::from_millis(125)));
		let (low, high) = policy.delay_bounds(10);
		assert!(close(low, Duration::from_millis(750)));
		assert!(close(high, Duration::from_millis(1_250)));
	}

	#[test]
	fn gives_up_at_max_attempts() {
		let mut scheduler = RetryScheduler::new(policy());
		let error = AdapterError::timeout(Network::Solana, "slow");

		assert!(matches!(scheduler.on_failure(&error, 2), RetryDecision::RetryAfter(_)));
		match scheduler.on_failure(&error, 3) {
			RetryDecision::Fail(failure) => {
				assert_eq!(failure.reason, FailureReason::RetriesExhausted)
			}
			other => panic!("expected failure, got {:?}", other),
		}
	}

	#[test]
	fn terminal_kinds_fail_immediately() {
		let mut scheduler = RetryScheduler::new(policy());
		for kind in [
			AdapterErrorKind::InsufficientFunds,
			AdapterErrorKind::RejectedByNetwork,
			AdapterErrorKind::Unknown,
		] {
			let error = AdapterError::new(kind, Network::Polygon, "nope");
			assert_eq!(
				scheduler.on_failure(&error, 0),
				RetryDecision::Fail(SyncFailure::new(FailureReason::Adapter(kind), "nope"))
			);
		}
	}
}
