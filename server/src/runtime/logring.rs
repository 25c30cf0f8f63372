//! Per-app execution and error ring buffers, bounded by entry count and
//! total bytes.

use parking_lot::Mutex;
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::collections::{HashMap, VecDeque};

use crate::prelude::*;

const MAX_ENTRIES: usize = 500;
const MAX_BYTES: usize = 512 * 1024;
const MAX_ERRORS: usize = 100;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
	pub method: Box<str>,
	pub path: Box<str>,
	pub status: u16,
	pub duration_ms: u64,
	pub storage_ops: u32,
	pub error: Option<Box<str>>,
	pub at: Timestamp,
}

impl ExecutionRecord {
	fn weight(&self) -> usize {
		self.method.len()
			+ self.path.len()
			+ self.error.as_ref().map_or(0, |e| e.len())
			+ 48
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
	pub message: Box<str>,
	/// Full stack, kept server-side only (responses carry a sanitized body)
	pub stack: Option<Box<str>>,
	pub method: Box<str>,
	pub path: Box<str>,
	pub at: Timestamp,
}

#[derive(Debug, Default)]
struct RingState {
	executions: VecDeque<ExecutionRecord>,
	execution_bytes: usize,
	errors: VecDeque<ErrorRecord>,
}

#[derive(Debug, Default)]
pub struct LogRing {
	apps: Mutex<HashMap<AppId, RingState>>,
}

impl LogRing {
	pub fn new() -> LogRing {
		LogRing::default()
	}

	pub fn push_execution(&self, app: &AppId, record: ExecutionRecord) {
		let mut apps = self.apps.lock();
		let state = apps.entry(app.clone()).or_default();
		state.execution_bytes += record.weight();
		state.executions.push_back(record);
		while state.executions.len() > MAX_ENTRIES || state.execution_bytes > MAX_BYTES {
			match state.executions.pop_front() {
				Some(evicted) => {
					state.execution_bytes = state.execution_bytes.saturating_sub(evicted.weight());
				}
				None => break,
			}
		}
	}

	pub fn push_error(&self, app: &AppId, record: ErrorRecord) {
		let mut apps = self.apps.lock();
		let state = apps.entry(app.clone()).or_default();
		state.errors.push_back(record);
		while state.errors.len() > MAX_ERRORS {
			state.errors.pop_front();
		}
	}

	pub fn executions(&self, app: &AppId) -> Vec<ExecutionRecord> {
		self.apps.lock().get(app).map(|s| s.executions.iter().cloned().collect()).unwrap_or_default()
	}

	pub fn errors(&self, app: &AppId) -> Vec<ErrorRecord> {
		self.apps.lock().get(app).map(|s| s.errors.iter().cloned().collect()).unwrap_or_default()
	}

	pub fn forget_app(&self, app: &AppId) {
		self.apps.lock().remove(app);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn app() -> AppId {
		AppId("app_00000001".into())
	}

	fn record(path: &str) -> ExecutionRecord {
		ExecutionRecord {
			method: "GET".into(),
			path: path.into(),
			status: 200,
			duration_ms: 3,
			storage_ops: 0,
			error: None,
			at: Timestamp(0),
		}
	}

	#[test]
	fn ring_keeps_latest_entries() {
		let ring = LogRing::new();
		for i in 0..(MAX_ENTRIES + 50) {
			ring.push_execution(&app(), record(&format!("/e{}", i)));
		}
		let entries = ring.executions(&app());
		assert_eq!(entries.len(), MAX_ENTRIES);
		assert_eq!(&*entries.last().unwrap().path, &format!("/e{}", MAX_ENTRIES + 49));
		assert_eq!(&*entries.first().unwrap().path, "/e50");
	}

	#[test]
	fn byte_budget_evicts_early() {
		let ring = LogRing::new();
		let big = "x".repeat(16 * 1024);
		for _ in 0..100 {
			let mut r = record("/big");
			r.error = Some(big.clone().into());
			ring.push_execution(&app(), r);
		}
		assert!(ring.executions(&app()).len() < 100);
	}

	#[test]
	fn error_ring_bounded() {
		let ring = LogRing::new();
		for i in 0..(MAX_ERRORS + 10) {
			ring.push_error(
				&app(),
				ErrorRecord {
					message: format!("boom {}", i).into(),
					stack: None,
					method: "POST".into(),
					path: "/x".into(),
					at: Timestamp(0),
				},
			);
		}
		assert_eq!(ring.errors(&app()).len(), MAX_ERRORS);
	}
}

// vim: ts=4
