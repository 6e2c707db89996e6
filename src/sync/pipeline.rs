//!
//! Per-record sync pipeline.
//!
//! A pipeline owns one record from `Created` until it reaches a terminal state, the engine shuts
//! down, or the record is cancelled. Every adapter call runs under a poller permit and the
//! network's attempt timeout. Results are committed against the version the pipeline read, so a
//! result arriving after a cancellation is discarded.

use crate::adapter::{
	AdapterError, AdapterErrorKind, OperationKind, RegisteredNetwork, StatusReport,
};
use crate::sync::orchestrator::SyncContext;
use crate::sync::reconciliation::ReconciliationEngine;
use crate::sync::record::{FailureReason, RecordId, RecordUpdate, SyncFailure, TransactionRecord, TxState};
use crate::sync::retry::{RetryDecision, RetryScheduler};
use crate::sync::scheduler::{CancelSignal, Signal};
use crate::sync::tracker::TrackerError;
use crate::todo::{StoreError, TodoPatch};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

enum Step {
	/// Run the next step after the delay unless the record is cancelled first.
	Wait(Duration),
	Stop,
}

pub(crate) struct Pipeline {
	ctx: Arc<SyncContext>,
	record_id: RecordId,
	entry: RegisteredNetwork,
	retry: RetryScheduler,
	signal: CancelSignal,
	polls: u32,
	submitted_at: Instant,
}

impl Pipeline {
	pub(crate) fn new(
		ctx: Arc<SyncContext>,
		record_id: RecordId,
		entry: RegisteredNetwork,
		signal: CancelSignal,
	) -> Self {
		let retry = RetryScheduler::new(entry.policy.clone());
		Self {
			ctx,
			record_id,
			entry,
			retry,
			signal,
			polls: 0,
			submitted_at: Instant::now(),
		}
	}

	pub(crate) async fn run(mut self) {
		debug!("Pipeline started for record {}", self.record_id);

		loop {
			let Some(record) = self.ctx.record(&self.record_id) else {
				warn!("Record {} vanished from the tracker", self.record_id);
				break;
			};
			if record.is_terminal() || self.signal.current() != Signal::Run {
				break;
			}

			let step = match record.state {
				TxState::Created => self.submit(&record).await,
				TxState::Submitted | TxState::Pending => self.poll(&record).await,
				_ => Step::Stop,
			};

			match step {
				Step::Wait(delay) => {
					if self.signal.sleep(delay).await != Signal::Run {
						break;
					}
				}
				Step::Stop => break,
			}
		}

		self.ctx.scheduler.release(&self.record_id);
		if let Err(e) = self.ctx.persist().await {
			warn!("Failed to persist records: {}", e);
		}
		debug!("Pipeline stopped for record {}", self.record_id);
	}

	/// Run an adapter call under a poller permit and the attempt timeout.
	///
	/// `None` when the scheduler has closed.
	async fn timed<T>(
		&self,
		call: impl Future<Output = Result<T, AdapterError>>,
	) -> Option<Result<T, AdapterError>> {
		let _permit = self.ctx.scheduler.acquire().await?;
		let timeout = self.retry.policy().attempt_timeout;
		Some(match tokio::time::timeout(timeout, call).await {
			Ok(result) => result,
			Err(_) => Err(AdapterError::timeout(
				self.entry.target.network,
				format!("no answer within {:?}", timeout),
			)),
		})
	}

	/// Commit an update computed from `record`. `None` when the record moved on in the meantime.
	fn commit(&self, record: &TransactionRecord, update: RecordUpdate) -> Option<TransactionRecord> {
		match self.ctx.commit(&record.record_id, record.version, update) {
			Ok(record) => Some(record),
			Err(TrackerError::VersionConflict { .. }) => {
				debug!("Result for record {} discarded", record.record_id);
				None
			}
			Err(e) => {
				warn!("Stopping pipeline for record {}: {}", record.record_id, e);
				None
			}
		}
	}

	fn fail(&self, record: &TransactionRecord, failure: SyncFailure, attempted: bool) -> Step {
		if failure.reason == FailureReason::Adapter(AdapterErrorKind::Unknown) {
			error!(
				"Sync of todo {} on {} failed with an unclassified error: {} (record {}, operation {}, tx {:?})",
				record.todo_id,
				record.network,
				failure,
				record.record_id,
				record.operation_kind(),
				record.tx_ref
			);
		} else {
			warn!(
				"Sync of todo {} on {} failed: {}",
				record.todo_id, record.network, failure
			);
		}
		self.commit(record, RecordUpdate::Failed { failure, attempted });
		Step::Stop
	}

	/// Submit, or resubmit, the record's operation.
	async fn submit(&mut self, record: &TransactionRecord) -> Step {
		let adapter = self.entry.adapter.clone();
		let wallet = self.entry.target.wallet_address.clone();
		let Some(result) = self.timed(adapter.submit(&record.operation, &wallet)).await else {
			return Step::Stop;
		};

		let update = match result {
			Ok(handle) => {
				info!(
					"Submitted {} of todo {} to {}: {}",
					record.operation_kind(),
					record.todo_id,
					record.network,
					handle.tx_ref
				);
				RecordUpdate::Submitted {
					tx_ref: handle.tx_ref,
				}
			}
			Err(e) if e.kind == AdapterErrorKind::DuplicateSubmission => {
				// The handle being resubmitted was already reported unknown; it cannot be adopted.
				let stale = record.tx_ref.as_deref();
				match e.existing.clone() {
					Some(existing) if stale != Some(existing.tx_ref.as_str()) => {
						info!(
							"{} already knows the submission for todo {}; polling {}",
							record.network, record.todo_id, existing.tx_ref
						);
						if stale.is_some() {
							// Resubmissions count as attempts even when they resolve to a known handle.
							RecordUpdate::Submitted {
								tx_ref: existing.tx_ref,
							}
						} else {
							RecordUpdate::Adopted {
								tx_ref: existing.tx_ref,
							}
						}
					}
					_ => return self.fail(record, SyncFailure::from(&e), true),
				}
			}
			Err(e) => return self.on_error(record, e),
		};

		let Some(submitted) = self.commit(record, update) else {
			return Step::Stop;
		};
		self.retry.on_success();
		if submitted.tx_ref != record.tx_ref {
			self.polls = 0;
		}
		self.submitted_at = Instant::now();
		if let Err(e) = self.ctx.persist().await {
			warn!("Failed to persist records: {}", e);
		}
		Step::Wait(self.retry.policy().poll_interval)
	}

	async fn poll(&mut self, record: &TransactionRecord) -> Step {
		let Some(handle) = record.handle() else {
			let failure = SyncFailure::new(
				FailureReason::Adapter(AdapterErrorKind::Unknown),
				"record has no submission handle",
			);
			return self.fail(record, failure, false);
		};

		let policy = self.retry.policy().clone();
		self.polls += 1;
		if self.polls > policy.max_polls {
			let failure = SyncFailure::new(
				FailureReason::ConfirmationTimeout,
				format!("not confirmed after {} status checks", policy.max_polls),
			);
			return self.fail(record, failure, false);
		}

		let adapter = self.entry.adapter.clone();
		let Some(result) = self.timed(adapter.fetch_status(&handle)).await else {
			return Step::Stop;
		};

		match result {
			Ok(StatusReport::NotFound) => {
				let dropped = record.state == TxState::Submitted
					&& self.submitted_at.elapsed() >= policy.submission_timeout;
				if !dropped {
					return Step::Wait(policy.poll_interval);
				}
				if self.retry.can_resubmit(record.attempt_count) {
					info!(
						"{} does not know {} after {:?}; resubmitting",
						record.network, handle.tx_ref, policy.submission_timeout
					);
					return self.submit(record).await;
				}
				let failure = SyncFailure::new(
					FailureReason::ConfirmationTimeout,
					format!("{} was dropped by the network", handle.tx_ref),
				);
				self.fail(record, failure, false)
			}
			Ok(StatusReport::Pending { confirmations }) => {
				if record.state == TxState::Submitted
					&& self
						.commit(record, RecordUpdate::Pending { confirmations })
						.is_none()
				{
					return Step::Stop;
				}
				Step::Wait(policy.poll_interval)
			}
			Ok(StatusReport::Confirmed { confirmations }) => {
				if let Some(confirmed) = self.commit(record, RecordUpdate::Confirmed { confirmations }) {
					info!(
						"Todo {} confirmed on {} ({} confirmation(s))",
						confirmed.todo_id, confirmed.network, confirmations
					);
					self.reconcile(&confirmed).await;
				}
				Step::Stop
			}
			Ok(StatusReport::Failed { detail }) => {
				self.fail(record, SyncFailure::new(FailureReason::RejectedByNetwork, detail), false)
			}
			Err(e) => self.on_error(record, e),
		}
	}

	fn on_error(&mut self, record: &TransactionRecord, error: AdapterError) -> Step {
		match self.retry.on_failure(&error, record.attempt_count) {
			RetryDecision::RetryAfter(delay) => {
				warn!(
					"Attempt for todo {} on {} failed, retrying in {:?}: {}",
					record.todo_id, record.network, delay, error
				);
				match self.commit(record, RecordUpdate::AttemptFailed(SyncFailure::from(&error))) {
					Some(_) => Step::Wait(delay),
					None => Step::Stop,
				}
			}
			RetryDecision::Fail(failure) => self.fail(record, failure, true),
		}
	}

	/// Write the confirmed target back to the store and check the on-chain copy for drift.
	async fn reconcile(&self, record: &TransactionRecord) {
		let todo = match self.ctx.store.get_todo(&record.todo_id).await {
			Ok(todo) => Some(todo),
			Err(StoreError::NotFound(_)) => None,
			Err(e) => {
				warn!("Could not read todo {} for reconciliation: {}", record.todo_id, e);
				None
			}
		};

		if todo.is_some() {
			let patch = if record.operation_kind() == OperationKind::Delete {
				TodoPatch::DetachTarget
			} else {
				TodoPatch::AttachTarget {
					target: self.entry.target.clone(),
					transaction_ref: record.tx_ref.clone().unwrap_or_default(),
				}
			};
			if let Err(e) = self.ctx.store.update_todo(&record.todo_id, &patch).await {
				warn!("Failed to write sync metadata for todo {}: {}", record.todo_id, e);
			}
		}

		let adapter = self.entry.adapter.clone();
		let lookup = match self.timed(adapter.fetch_record(&record.todo_id)).await {
			Some(Ok(lookup)) => lookup,
			Some(Err(e)) => {
				warn!(
					"Skipping drift check for todo {} on {}: {}",
					record.todo_id, record.network, e
				);
				return;
			}
			None => return,
		};

		let drift = ReconciliationEngine::check_drift(todo.as_ref(), record, &lookup);
		self.ctx.publish_drift(record, drift);
	}
}
