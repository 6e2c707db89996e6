//!
//! Bounded pool of cooperative pollers.
//!
//! Every unresolved record is driven by one tokio task. The scheduler bounds how many of those
//! tasks may exist (`queue_capacity`) and how many adapter calls may be in flight at once
//! (`pollers`). Each task gets a [`CancelSignal`] that wakes it from backoff sleeps when its
//! record is cancelled or the engine shuts down.

use crate::sync::record::RecordId;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
	Run,
	Cancel,
	Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulerError {
	#[error("Sync queue is full ({capacity} records in flight)")]
	QueueFull { capacity: usize },

	#[error("Scheduler is shutting down")]
	ShuttingDown,
}

/// Receiving side of a record's cancellation signal.
pub struct CancelSignal {
	receiver: watch::Receiver<Signal>,
}

impl CancelSignal {
	pub fn current(&self) -> Signal {
		*self.receiver.borrow()
	}

	/// Sleep for `duration` unless the signal changes first. Returns the signal after waking.
	pub async fn sleep(&mut self, duration: Duration) -> Signal {
		tokio::select! {
			_ = tokio::time::sleep(duration) => {}
			changed = self.receiver.changed() => {
				if changed.is_err() {
					return Signal::Shutdown;
				}
			}
		}
		self.current()
	}
}

pub struct PollScheduler {
	permits: Arc<Semaphore>,
	pollers: usize,
	capacity: usize,
	accepting: AtomicBool,
	signals: Mutex<HashMap<RecordId, watch::Sender<Signal>>>,
	tasks: Mutex<JoinSet<()>>,
}

impl PollScheduler {
	pub fn new(pollers: usize, capacity: usize) -> Self {
		let pollers = pollers.max(1);
		Self {
			permits: Arc::new(Semaphore::new(pollers)),
			pollers,
			capacity: capacity.max(1),
			accepting: AtomicBool::new(true),
			signals: Mutex::new(HashMap::new()),
			tasks: Mutex::new(JoinSet::new()),
		}
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}

	pub fn pollers(&self) -> usize {
		self.pollers
	}

	pub fn is_accepting(&self) -> bool {
		self.accepting.load(Ordering::SeqCst)
	}

	/// Number of records with a registered pipeline.
	pub fn in_flight(&self) -> usize {
		self.signals.lock().unwrap_or_else(PoisonError::into_inner).len()
	}

	/// Check that one more record can be tracked.
	pub fn ensure_capacity(&self) -> Result<(), SchedulerError> {
		if !self.is_accepting() {
			return Err(SchedulerError::ShuttingDown);
		}
		if self.in_flight() >= self.capacity {
			return Err(SchedulerError::QueueFull {
				capacity: self.capacity,
			});
		}
		Ok(())
	}

	/// Register a record and hand out its cancellation signal.
	pub fn register(&self, record_id: &RecordId) -> Result<CancelSignal, SchedulerError> {
		self.ensure_capacity()?;
		let (sender, receiver) = watch::channel(Signal::Run);
		self.signals
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.insert(record_id.clone(), sender);
		Ok(CancelSignal { receiver })
	}

	/// Forget a record whose pipeline has ended.
	pub fn release(&self, record_id: &RecordId) {
		self.signals
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(record_id);
	}

	/// Wake the record's task with `Cancel`.
	pub fn cancel(&self, record_id: &RecordId) {
		if let Some(sender) = self
			.signals
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(record_id)
		{
			let _ = sender.send(Signal::Cancel);
		}
	}

	pub fn spawn<F>(&self, task: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
		// Reap finished tasks so the set does not grow with the record history.
		while tasks.try_join_next().is_some() {}
		tasks.spawn(task);
	}

	/// Wait for a free poller. `None` once the scheduler is closed.
	pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
		self.permits.clone().acquire_owned().await.ok()
	}

	/// Stop accepting records, signal every task and wait for all of them to finish.
	pub async fn shutdown(&self) {
		if !self.accepting.swap(false, Ordering::SeqCst) {
			debug!("Scheduler already shut down");
		}

		{
			let signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
			info!("Stopping {} poller task(s)", signals.len());
			for sender in signals.values() {
				let _ = sender.send(Signal::Shutdown);
			}
		}
		self.permits.close();

		let mut tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
		while let Some(result) = tasks.join_next().await {
			if let Err(e) = result {
				warn!("Poller task ended abnormally: {}", e);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn capacity_is_enforced() {
		let scheduler = PollScheduler::new(2, 2);
		let a = RecordId::from("rec_a");
		let b = RecordId::from("rec_b");
		let _sa = scheduler.register(&a).unwrap();
		let _sb = scheduler.register(&b).unwrap();
		assert_eq!(
			scheduler.register(&RecordId::from("rec_c")).err(),
			Some(SchedulerError::QueueFull { capacity: 2 })
		);

		scheduler.release(&a);
		assert!(scheduler.ensure_capacity().is_ok());
	}

	#[tokio::test(start_paused = true)]
	async fn cancel_wakes_sleeping_task() {
		let scheduler = PollScheduler::new(1, 4);
		let id = RecordId::from("rec_a");
		let mut signal = scheduler.register(&id).unwrap();

		let sleeper = tokio::spawn(async move { signal.sleep(Duration::from_secs(3600)).await });
		tokio::task::yield_now().await;
		scheduler.cancel(&id);

		assert_eq!(sleeper.await.unwrap(), Signal::Cancel);
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_drains_tasks_and_refuses_new_work() {
		let scheduler = Arc::new(PollScheduler::new(1, 4));
		let id = RecordId::from("rec_a");
		let mut signal = scheduler.register(&id).unwrap();
		let (done_tx, done_rx) = tokio::sync::oneshot::channel();

		scheduler.spawn(async move {
			let signal = signal.sleep(Duration::from_secs(3600)).await;
			let _ = done_tx.send(signal);
		});

		scheduler.shutdown().await;
		assert_eq!(done_rx.await.unwrap(), Signal::Shutdown);
		assert_eq!(
			scheduler.register(&RecordId::from("rec_b")).err(),
			Some(SchedulerError::ShuttingDown)
		);
		assert!(scheduler.acquire().await.is_none());
	}
}
