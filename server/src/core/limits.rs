//! Host/cgroup probe deriving soft resource caps.
//!
//! Runs once at startup: reads host memory (or the cgroup v2 memory limit,
//! whichever is smaller), CPU count and free disk, and derives the caps the
//! rest of the system consumes. The derived record is served from
//! `/api/system/limits` with display metadata for the admin UI.

use serde::Serialize;
use serde_with::skip_serializing_none;
use std::path::Path;
use sysinfo::System;

use crate::prelude::*;

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
	/// Memory budget the probe worked from
	pub memory_bytes: u64,
	pub cpu_count: usize,
	pub free_disk_bytes: u64,

	pub vfs_cache_bytes: u64,
	pub max_upload_bytes: u64,
	pub serverless_concurrency: usize,
	pub net_concurrency: usize,
	/// Default serverless wall-clock deadline
	pub handler_timeout_ms: u64,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimitEntry {
	pub key: &'static str,
	pub label: &'static str,
	pub value: u64,
	pub unit: &'static str,
	pub min: Option<u64>,
	pub max: Option<u64>,
	pub read_only: bool,
}

/// Read the cgroup v2 memory limit, if this process runs under one.
fn cgroup_memory_limit(root: &Path) -> Option<u64> {
	let raw = std::fs::read_to_string(root.join("memory.max")).ok()?;
	let raw = raw.trim();
	if raw == "max" {
		return None;
	}
	raw.parse::<u64>().ok()
}

pub fn derive(memory_bytes: u64, cpu_count: usize, free_disk_bytes: u64) -> Limits {
	let max_upload_bytes = (memory_bytes / 10).clamp(10 * MIB, 100 * MIB);
	let serverless_concurrency = (cpu_count * 4).min(128).max(1);
	let net_concurrency = (cpu_count * 4).clamp(20, 50);

	Limits {
		memory_bytes,
		cpu_count,
		free_disk_bytes,
		vfs_cache_bytes: memory_bytes / 4,
		max_upload_bytes,
		serverless_concurrency,
		net_concurrency,
		handler_timeout_ms: 10_000,
	}
}

/// Probe the host. Never fails: a probe that cannot read the system falls
/// back to a conservative 1 GiB / 2 CPU shape.
pub fn probe() -> Limits {
	let mut sys = System::new();
	sys.refresh_memory();
	sys.refresh_cpu_all();

	let mut memory = sys.total_memory();
	if memory == 0 {
		warn!("memory probe failed, assuming 1 GiB");
		memory = 1024 * MIB;
	}
	if let Some(cg) = cgroup_memory_limit(Path::new("/sys/fs/cgroup")) {
		if cg < memory {
			info!("cgroup memory limit {} MiB below host memory", cg / MIB);
			memory = cg;
		}
	}

	let cpu_count = match sys.cpus().len() {
		0 => 2,
		n => n,
	};

	let free_disk = sysinfo::Disks::new_with_refreshed_list()
		.iter()
		.map(|d| d.available_space())
		.max()
		.unwrap_or(0);

	let limits = derive(memory, cpu_count, free_disk);
	info!(
		"limits probe: mem={} MiB cpu={} upload={} MiB serverless={} net={}",
		memory / MIB,
		cpu_count,
		limits.max_upload_bytes / MIB,
		limits.serverless_concurrency,
		limits.net_concurrency
	);
	limits
}

impl Limits {
	/// Display schema consumed by the admin UI.
	pub fn entries(&self) -> Vec<LimitEntry> {
		vec![
			LimitEntry {
				key: "memory",
				label: "Memory budget",
				value: self.memory_bytes,
				unit: "bytes",
				min: None,
				max: None,
				read_only: true,
			},
			LimitEntry {
				key: "cpu",
				label: "CPU count",
				value: self.cpu_count as u64,
				unit: "cores",
				min: None,
				max: None,
				read_only: true,
			},
			LimitEntry {
				key: "disk_free",
				label: "Free disk",
				value: self.free_disk_bytes,
				unit: "bytes",
				min: None,
				max: None,
				read_only: true,
			},
			LimitEntry {
				key: "vfs_cache",
				label: "VFS cache size",
				value: self.vfs_cache_bytes,
				unit: "bytes",
				min: Some(MIB),
				max: Some(self.memory_bytes / 2),
				read_only: false,
			},
			LimitEntry {
				key: "max_upload",
				label: "Max upload per request",
				value: self.max_upload_bytes,
				unit: "bytes",
				min: Some(10 * MIB),
				max: Some(100 * MIB),
				read_only: false,
			},
			LimitEntry {
				key: "serverless_concurrency",
				label: "Serverless concurrency",
				value: self.serverless_concurrency as u64,
				unit: "executions",
				min: Some(1),
				max: Some(128),
				read_only: false,
			},
			LimitEntry {
				key: "net_concurrency",
				label: "Outbound fetch concurrency",
				value: self.net_concurrency as u64,
				unit: "requests",
				min: Some(20),
				max: Some(50),
				read_only: false,
			},
			LimitEntry {
				key: "handler_timeout",
				label: "Handler deadline",
				value: self.handler_timeout_ms,
				unit: "ms",
				min: Some(1000),
				max: Some(60_000),
				read_only: false,
			},
		]
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn upload_cap_bounds() {
		// 64 MiB host: floor wins
		assert_eq!(derive(64 * MIB, 4, 0).max_upload_bytes, 10 * MIB);
		// 2 GiB host: 10% of memory
		assert_eq!(derive(2048 * MIB, 4, 0).max_upload_bytes, 204 * MIB + 819 * 1024 + 204);
		// Huge host: ceiling wins
		assert_eq!(derive(64 * 1024 * MIB, 4, 0).max_upload_bytes, 100 * MIB);
	}

	#[test]
	fn serverless_concurrency_scales_with_cpu() {
		assert_eq!(derive(MIB, 2, 0).serverless_concurrency, 8);
		assert_eq!(derive(MIB, 64, 0).serverless_concurrency, 128);
	}

	#[test]
	fn net_concurrency_window() {
		assert_eq!(derive(MIB, 1, 0).net_concurrency, 20);
		assert_eq!(derive(MIB, 8, 0).net_concurrency, 32);
		assert_eq!(derive(MIB, 64, 0).net_concurrency, 50);
	}

	#[test]
	fn vfs_cache_is_quarter_of_memory() {
		assert_eq!(derive(1024 * MIB, 4, 0).vfs_cache_bytes, 256 * MIB);
	}
}

// vim: ts=4
