//!
//! Reconciliation of on-chain outcomes with the off-chain todo list.
//!
//! The [`ReconciliationEngine`] derives everything the rest of the application sees about sync
//! health: the unified per-todo view, drift between a confirmed on-chain record and the off-chain
//! todo, and the aggregate [`SyncStats`]. All of it is recomputed from the tracker's records;
//! the only state kept here is the set of known todos, the latest drift report per todo and the
//! last published stats.

use crate::adapter::{OperationKind, RecordLookup};
use crate::network::Network;
use crate::sync::record::{TransactionRecord, TxState};
use crate::sync::tracker::TransactionTracker;
use crate::todo::{Todo, TodoId};

use itertools::Itertools;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Aggregate sync health over all known todos.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
	pub total: usize,
	pub on_chain_count: usize,
	pub off_chain_count: usize,
	/// Todos with a sync in flight, whether on-chain already or not.
	pub pending_count: usize,
	pub per_network_breakdown: BTreeMap<Network, usize>,
	/// `round(on_chain_count / total * 100)`, 0 for an empty list.
	pub sync_percentage: u8,
}

impl SyncStats {
	/// One-line summary for logs and the CLI.
	pub fn summary(&self) -> String {
		let breakdown = self
			.per_network_breakdown
			.iter()
			.map(|(network, count)| format!("{}={}", network, count))
			.join(", ");
		format!(
			"{}/{} on-chain ({}%), {} pending [{}]",
			self.on_chain_count, self.total, self.sync_percentage, self.pending_count, breakdown
		)
	}
}

/// How an on-chain record disagrees with the off-chain todo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftKind {
	/// The listed fields differ.
	FieldMismatch { fields: Vec<String> },
	/// A confirmed create/update/toggle left no record behind.
	MissingRecord,
	/// A confirmed delete left the record in place.
	UnexpectedRecord,
}

/// Advisory report that a confirmed operation does not match the off-chain state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DriftReport {
	pub todo_id: TodoId,
	pub network: Network,
	pub record_id: String,
	pub kind: DriftKind,
}

/// Everything known about one todo's presence on-chain.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedTodoView {
	pub todo_id: TodoId,
	/// Latest confirmed record per network.
	pub latest_confirmed: BTreeMap<Network, TransactionRecord>,
	/// Networks the todo is currently on.
	pub on_chain: BTreeSet<Network>,
	pub active: Option<TransactionRecord>,
	pub last_failure: Option<TransactionRecord>,
	pub drift: Option<DriftReport>,
}

impl UnifiedTodoView {
	pub fn is_on_chain(&self) -> bool {
		!self.on_chain.is_empty()
	}
}

/// Networks `records` leave the todo on: those whose latest confirmed record is not a delete.
pub fn on_chain_networks<'a>(
	records: impl IntoIterator<Item = &'a TransactionRecord>,
) -> BTreeSet<Network> {
	latest_confirmed(records)
		.into_iter()
		.filter(|(_, record)| record.operation_kind() != OperationKind::Delete)
		.map(|(network, _)| network)
		.collect()
}

fn latest_confirmed<'a>(
	records: impl IntoIterator<Item = &'a TransactionRecord>,
) -> BTreeMap<Network, &'a TransactionRecord> {
	let mut latest: BTreeMap<Network, &TransactionRecord> = BTreeMap::new();
	for record in records {
		if record.state != TxState::Confirmed {
			continue;
		}
		let entry = latest.entry(record.network).or_insert(record);
		if record.sequence > entry.sequence {
			*entry = record;
		}
	}
	latest
}

/// Stats over `known` todos plus every todo that has records.
pub fn compute_stats<'a>(
	known: &BTreeSet<TodoId>,
	records: impl IntoIterator<Item = &'a TransactionRecord>,
) -> SyncStats {
	let mut per_todo: HashMap<&str, Vec<&TransactionRecord>> = known
		.iter()
		.map(|id| (id.as_str(), Vec::new()))
		.collect();
	for record in records {
		per_todo.entry(record.todo_id.as_str()).or_default().push(record);
	}

	let mut stats = SyncStats {
		total: per_todo.len(),
		..SyncStats::default()
	};
	for records in per_todo.values() {
		let networks = on_chain_networks(records.iter().copied());
		if !networks.is_empty() {
			stats.on_chain_count += 1;
		}
		for network in networks {
			*stats.per_network_breakdown.entry(network).or_default() += 1;
		}
		if records.iter().any(|r| !r.is_terminal()) {
			stats.pending_count += 1;
		}
	}
	stats.off_chain_count = stats.total - stats.on_chain_count;
	stats.sync_percentage = if stats.total > 0 {
		(stats.on_chain_count as f64 / stats.total as f64 * 100.0).round() as u8
	} else {
		0
	};
	stats
}

#[derive(Debug, Default)]
pub struct ReconciliationEngine {
	known_todos: BTreeSet<TodoId>,
	drift: HashMap<TodoId, DriftReport>,
	last_stats: Option<SyncStats>,
}

impl ReconciliationEngine {
	pub fn new() -> Self {
		Self::default()
	}

	/// Replace the known todo ids with a fresh listing from the store.
	pub fn set_known_todos(&mut self, ids: impl IntoIterator<Item = TodoId>) {
		self.known_todos = ids.into_iter().collect();
	}

	pub fn add_todo(&mut self, todo_id: &str) {
		self.known_todos.insert(todo_id.to_string());
	}

	pub fn known_todos(&self) -> usize {
		self.known_todos.len()
	}

	pub fn stats(&self, tracker: &TransactionTracker) -> SyncStats {
		compute_stats(&self.known_todos, tracker.records())
	}

	/// Recompute stats, returning them only when they differ from the last published value.
	pub fn refresh_stats(&mut self, tracker: &TransactionTracker) -> Option<SyncStats> {
		let stats = self.stats(tracker);
		if self.last_stats.as_ref() == Some(&stats) {
			return None;
		}
		self.last_stats = Some(stats.clone());
		Some(stats)
	}

	pub fn on_chain_networks(&self, tracker: &TransactionTracker, todo_id: &str) -> BTreeSet<Network> {
		on_chain_networks(tracker.records_for(todo_id))
	}

	pub fn view(&self, tracker: &TransactionTracker, todo_id: &str) -> UnifiedTodoView {
		let records = tracker.records_for(todo_id);
		let latest_confirmed = latest_confirmed(records.iter().copied())
			.into_iter()
			.map(|(network, record)| (network, record.clone()))
			.collect();
		let last_failure = records
			.iter()
			.filter(|r| r.state == TxState::Failed)
			.max_by_key(|r| r.sequence)
			.map(|r| (*r).clone());

		UnifiedTodoView {
			todo_id: todo_id.to_string(),
			latest_confirmed,
			on_chain: on_chain_networks(records.iter().copied()),
			active: tracker.active_record(todo_id).cloned(),
			last_failure,
			drift: self.drift.get(todo_id).cloned(),
		}
	}

	/// Remember the outcome of the latest drift check for the record's todo.
	pub fn record_drift(&mut self, todo_id: &str, report: Option<DriftReport>) {
		match report {
			Some(report) => {
				self.drift.insert(todo_id.to_string(), report);
			}
			None => {
				self.drift.remove(todo_id);
			}
		}
	}

	/// Compare a confirmed record's on-chain lookup with the off-chain todo.
	///
	/// `todo` is `None` when the todo no longer exists off-chain; field comparison is skipped.
	pub fn check_drift(
		todo: Option<&Todo>,
		record: &TransactionRecord,
		lookup: &RecordLookup,
	) -> Option<DriftReport> {
		let kind = match (record.operation_kind(), lookup) {
			(OperationKind::Delete, RecordLookup::Found(_)) => DriftKind::UnexpectedRecord,
			(OperationKind::Delete, RecordLookup::NotFound) => return None,
			(_, RecordLookup::NotFound) => DriftKind::MissingRecord,
			(_, RecordLookup::Found(view)) => {
				let todo = todo?;
				let mut fields = Vec::new();
				if view.title != todo.title {
					fields.push("title".to_string());
				}
				if view.description.as_deref().unwrap_or_default()
					!= todo.description.as_deref().unwrap_or_default()
				{
					fields.push("description".to_string());
				}
				if view.completed != todo.completed {
					fields.push("completed".to_string());
				}
				if fields.is_empty() {
					return None;
				}
				DriftKind::FieldMismatch { fields }
			}
		};

		Some(DriftReport {
			todo_id: record.todo_id.clone(),
			network: record.network,
			record_id: record.record_id.to_string(),
			kind,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::adapter::{OnChainTodoView, TodoOperation};
	use crate::sync::record::RecordUpdate;
	use crate::todo::store::sample_todo;

	fn confirm(tracker: &mut TransactionTracker, todo: &Todo, kind: OperationKind, network: Network) {
		let record = tracker
			.create(&todo.id, network, TodoOperation::from_todo(kind, todo))
			.unwrap();
		let record = tracker
			.apply(
				&record.record_id,
				record.version,
				RecordUpdate::Submitted {
					tx_ref: "0x1".into(),
				},
			)
			.unwrap();
		tracker
			.apply(
				&record.record_id,
				record.version,
				RecordUpdate::Confirmed { confirmations: 1 },
			)
			.unwrap();
	}

	fn assert_consistent(stats: &SyncStats) {
		assert_eq!(stats.total, stats.on_chain_count + stats.off_chain_count);
		assert!(stats.sync_percentage <= 100);
	}

	#[test]
	fn empty_list_has_zero_percentage() {
		let stats = compute_stats(&BTreeSet::new(), std::iter::empty());
		assert_eq!(stats, SyncStats::default());
		assert_consistent(&stats);
	}

	#[test]
	fn stats_follow_latest_confirmed_operation() {
		let mut tracker = TransactionTracker::new();
		let mut engine = ReconciliationEngine::new();
		engine.set_known_todos(["t1", "t2", "t3"].map(String::from));

		let t1 = sample_todo("t1", "Groceries");
		let t2 = sample_todo("t2", "Taxes");
		confirm(&mut tracker, &t1, OperationKind::Create, Network::Polygon);
		confirm(&mut tracker, &t2, OperationKind::Create, Network::Solana);

		let stats = engine.stats(&tracker);
		assert_consistent(&stats);
		assert_eq!(stats.total, 3);
		assert_eq!(stats.on_chain_count, 2);
		assert_eq!(stats.sync_percentage, 67);
		assert_eq!(stats.per_network_breakdown.get(&Network::Polygon), Some(&1));

		// A confirmed delete takes the todo off-chain again.
		confirm(&mut tracker, &t2, OperationKind::Delete, Network::Solana);
		let stats = engine.stats(&tracker);
		assert_consistent(&stats);
		assert_eq!(stats.on_chain_count, 1);
		assert_eq!(stats.per_network_breakdown.get(&Network::Solana), None);
		assert_eq!(stats.sync_percentage, 33);
	}

	#[test]
	fn failed_update_keeps_todo_on_chain() {
		let mut tracker = TransactionTracker::new();
		let t1 = sample_todo("t1", "Groceries");
		confirm(&mut tracker, &t1, OperationKind::Create, Network::Base);

		let update = tracker
			.create(
				"t1",
				Network::Base,
				TodoOperation::from_todo(OperationKind::Update, &t1),
			)
			.unwrap();
		let engine = ReconciliationEngine::new();
		let stats = engine.stats(&tracker);
		assert_eq!(stats.pending_count, 1);
		assert_eq!(stats.on_chain_count, 1);

		tracker
			.apply(&update.record_id, update.version, RecordUpdate::Cancelled)
			.unwrap();
		let view = engine.view(&tracker, "t1");
		assert!(view.is_on_chain());
		assert!(view.active.is_none());
		assert_eq!(engine.stats(&tracker).pending_count, 0);
	}

	#[test]
	fn refresh_reports_only_changes() {
		let mut tracker = TransactionTracker::new();
		let mut engine = ReconciliationEngine::new();
		engine.add_todo("t1");
		assert!(engine.refresh_stats(&tracker).is_some());
		assert!(engine.refresh_stats(&tracker).is_none());

		confirm(&mut tracker, &sample_todo("t1", "x"), OperationKind::Create, Network::Base);
		let stats = engine.refresh_stats(&tracker).unwrap();
		assert_eq!(stats.on_chain_count, 1);
		assert!(stats.summary().contains("1/1 on-chain (100%)"));
	}

	#[test]
	fn drift_detection() {
		let mut tracker = TransactionTracker::new();
		let todo = sample_todo("t1", "Call plumber");
		let record = tracker
			.create(
				"t1",
				Network::Base,
				TodoOperation::from_todo(OperationKind::Create, &todo),
			)
			.unwrap();

		let matching = RecordLookup::Found(OnChainTodoView {
			todo_id: "t1".into(),
			title: todo.title.clone(),
			description: todo.description.clone(),
			completed: false,
			owner: None,
		});
		assert_eq!(ReconciliationEngine::check_drift(Some(&todo), &record, &matching), None);

		let renamed = RecordLookup::Found(OnChainTodoView {
			todo_id: "t1".into(),
			title: "Call electrician".into(),
			description: todo.description.clone(),
			completed: true,
			owner: None,
		});
		let report = ReconciliationEngine::check_drift(Some(&todo), &record, &renamed).unwrap();
		assert_eq!(
			report.kind,
			DriftKind::FieldMismatch {
				fields: vec!["title".into(), "completed".into()]
			}
		);

		let report =
			ReconciliationEngine::check_drift(Some(&todo), &record, &RecordLookup::NotFound).unwrap();
		assert_eq!(report.kind, DriftKind::MissingRecord);

		let delete = tracker
			.create(
				"t2",
				Network::Base,
				TodoOperation::from_todo(OperationKind::Delete, &sample_todo("t2", "old")),
			)
			.unwrap();
		let report = ReconciliationEngine::check_drift(None, &delete, &renamed).unwrap();
		assert_eq!(report.kind, DriftKind::UnexpectedRecord);
		assert_eq!(
			ReconciliationEngine::check_drift(None, &delete, &RecordLookup::NotFound),
			None
		);
	}
}
