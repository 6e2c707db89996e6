//! Scripted in-process adapter.
//!
//! Scripted results are consumed FIFO. When a queue runs dry the adapter behaves like a healthy
//! chain: submissions succeed with a fresh handle and are applied to an in-memory ledger, status
//! fetches report `Confirmed` and record lookups read the ledger.

use crate::adapter::{
	AdapterError, NetworkAdapter, OnChainTodoView, RecordLookup, StatusReport, SubmissionHandle,
	TodoOperation,
};
use crate::network::Network;
use crate::todo::{SyncTarget, TodoId};

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub(crate) struct MockAdapter {
	network: Network,
	submits: Mutex<VecDeque<Result<SubmissionHandle, AdapterError>>>,
	statuses: Mutex<VecDeque<Result<StatusReport, AdapterError>>>,
	lookups: Mutex<VecDeque<Result<RecordLookup, AdapterError>>>,
	ledger: Mutex<HashMap<TodoId, OnChainTodoView>>,
	delay: Mutex<Duration>,
	submit_calls: AtomicUsize,
	status_calls: AtomicUsize,
	record_calls: AtomicUsize,
}

impl MockAdapter {
	pub fn new(network: Network) -> Self {
		Self {
			network,
			submits: Mutex::new(VecDeque::new()),
			statuses: Mutex::new(VecDeque::new()),
			lookups: Mutex::new(VecDeque::new()),
			ledger: Mutex::new(HashMap::new()),
			delay: Mutex::new(Duration::ZERO),
			submit_calls: AtomicUsize::new(0),
			status_calls: AtomicUsize::new(0),
			record_calls: AtomicUsize::new(0),
		}
	}

	pub fn target(network: Network) -> SyncTarget {
		SyncTarget {
			network,
			contract_ref: "todo-program".to_string(),
			wallet_address: "wallet-1".to_string(),
		}
	}

	pub fn handle(&self, tx_ref: &str) -> SubmissionHandle {
		SubmissionHandle {
			network: self.network,
			tx_ref: tx_ref.to_string(),
		}
	}

	pub fn push_submit(&self, result: Result<SubmissionHandle, AdapterError>) {
		self.submits.lock().unwrap().push_back(result);
	}

	pub fn push_status(&self, result: Result<StatusReport, AdapterError>) {
		self.statuses.lock().unwrap().push_back(result);
	}

	pub fn push_lookup(&self, result: Result<RecordLookup, AdapterError>) {
		self.lookups.lock().unwrap().push_back(result);
	}

	/// Make every call take `delay` before answering.
	pub fn set_delay(&self, delay: Duration) {
		*self.delay.lock().unwrap() = delay;
	}

	pub fn submit_calls(&self) -> usize {
		self.submit_calls.load(Ordering::SeqCst)
	}

	pub fn status_calls(&self) -> usize {
		self.status_calls.load(Ordering::SeqCst)
	}

	pub fn record_calls(&self) -> usize {
		self.record_calls.load(Ordering::SeqCst)
	}

	async fn pause(&self) {
		let delay = *self.delay.lock().unwrap();
		if !delay.is_zero() {
			tokio::time::sleep(delay).await;
		}
	}

	fn apply_to_ledger(&self, operation: &TodoOperation) {
		let mut ledger = self.ledger.lock().unwrap();
		match operation {
			TodoOperation::Create(payload) | TodoOperation::Update(payload) => {
				ledger.insert(
					payload.todo_id.clone(),
					OnChainTodoView {
						todo_id: payload.todo_id.clone(),
						title: payload.title.clone(),
						description: payload.description.clone(),
						completed: payload.completed,
						owner: None,
					},
				);
			}
			TodoOperation::Toggle { todo_id, completed } => {
				if let Some(view) = ledger.get_mut(todo_id) {
					view.completed = *completed;
				}
			}
			TodoOperation::Delete { todo_id } => {
				ledger.remove(todo_id);
			}
		}
	}
}

#[async_trait::async_trait]
impl NetworkAdapter for MockAdapter {
	fn network(&self) -> Network {
		self.network
	}

	async fn submit(
		&self,
		operation: &TodoOperation,
		_wallet: &str,
	) -> Result<SubmissionHandle, AdapterError> {
		let call = self.submit_calls.fetch_add(1, Ordering::SeqCst) + 1;
		self.pause().await;
		let scripted = self.submits.lock().unwrap().pop_front();
		let result = scripted.unwrap_or_else(|| Ok(self.handle(&format!("0xmock{}", call))));
		if result.is_ok() {
			self.apply_to_ledger(operation);
		}
		result
	}

	async fn fetch_status(&self, _handle: &SubmissionHandle) -> Result<StatusReport, AdapterError> {
		self.status_calls.fetch_add(1, Ordering::SeqCst);
		self.pause().await;
		let scripted = self.statuses.lock().unwrap().pop_front();
		scripted.unwrap_or(Ok(StatusReport::Confirmed { confirmations: 1 }))
	}

	async fn fetch_record(&self, todo_id: &str) -> Result<RecordLookup, AdapterError> {
		self.record_calls.fetch_add(1, Ordering::SeqCst);
		self.pause().await;
		let scripted = self.lookups.lock().unwrap().pop_front();
		scripted.unwrap_or_else(|| {
			Ok(match self.ledger.lock().unwrap().get(todo_id) {
				Some(view) => RecordLookup::Found(view.clone()),
				None => RecordLookup::NotFound,
			})
		})
	}
}
