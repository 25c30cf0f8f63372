//! Adapter that manages host metadata: apps, their files, aliases, analytics
//! events, the activity log, configuration, the outbound-net allowlist,
//! worker jobs and known peers.
//!
//! All mutating methods are implemented on top of the store's write
//! serializer; reads go straight to the read pool.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::fmt::Debug;

use crate::{
	prelude::*,
	types::{Manifest, Patch, Timestamp},
};

// Apps
//******
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppSource {
	#[serde(rename = "deploy")]
	Deploy,
	#[serde(rename = "git")]
	Git,
	#[serde(rename = "fork")]
	Fork,
	#[serde(rename = "template")]
	Template,
	#[serde(rename = "system")]
	System,
}

impl AppSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			AppSource::Deploy => "deploy",
			AppSource::Git => "git",
			AppSource::Fork => "fork",
			AppSource::Template => "template",
			AppSource::System => "system",
		}
	}
}

impl std::str::FromStr for AppSource {
	type Err = Error;
	fn from_str(s: &str) -> Result<Self, Error> {
		Ok(match s {
			"deploy" => AppSource::Deploy,
			"git" => AppSource::Git,
			"fork" => AppSource::Fork,
			"template" => AppSource::Template,
			"system" => AppSource::System,
			_ => return Err(Error::Validation(format!("unknown app source: {}", s))),
		})
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRecord {
	pub id: AppId,
	pub label: Option<Box<str>>,
	pub original_id: Option<AppId>,
	pub forked_from_id: Option<AppId>,
	pub source: AppSource,
	pub manifest: Manifest,
	pub source_url: Option<Box<str>>,
	pub source_ref: Option<Box<str>>,
	pub source_commit: Option<Box<str>>,
	pub installed_at: Option<Timestamp>,
	pub created_at: Timestamp,
}

#[derive(Debug, Clone, Default)]
pub struct CreateAppOptions {
	pub label: Option<Box<str>>,
	pub source: Option<AppSource>,
	pub original_id: Option<AppId>,
	pub forked_from_id: Option<AppId>,
	pub manifest: Option<Manifest>,
	pub source_url: Option<Box<str>>,
	pub source_ref: Option<Box<str>>,
	pub source_commit: Option<Box<str>>,
	pub installed_at: Option<Timestamp>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAppsOptions {
	pub source: Option<AppSource>,
	pub q: Option<Box<str>>,
	pub limit: Option<u32>,
	pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateAppData {
	#[serde(default)]
	pub label: Patch<Box<str>>,
	#[serde(default)]
	pub manifest: Patch<Manifest>,
}

// App files (VFS rows)
//**********************
#[derive(Debug, Clone)]
pub struct FileRecord {
	pub path: Box<str>,
	pub bytes: Bytes,
	pub mime: Box<str>,
	pub modified_at: Timestamp,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
	pub path: Box<str>,
	pub mime: Box<str>,
	pub size: u64,
	pub modified_at: Timestamp,
}

// Aliases
//*********
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AliasKind {
	#[serde(rename = "proxy")]
	Proxy,
	#[serde(rename = "redirect")]
	Redirect,
	#[serde(rename = "split")]
	Split,
	#[serde(rename = "reserved")]
	Reserved,
}

impl AliasKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			AliasKind::Proxy => "proxy",
			AliasKind::Redirect => "redirect",
			AliasKind::Split => "split",
			AliasKind::Reserved => "reserved",
		}
	}
}

impl std::str::FromStr for AliasKind {
	type Err = Error;
	fn from_str(s: &str) -> Result<Self, Error> {
		Ok(match s {
			"proxy" => AliasKind::Proxy,
			"redirect" => AliasKind::Redirect,
			"split" => AliasKind::Split,
			"reserved" => AliasKind::Reserved,
			_ => return Err(Error::Validation(format!("unknown alias type: {}", s))),
		})
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SplitTarget {
	pub target: Box<str>,
	pub weight: u32,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AliasRecord {
	pub subdomain: Box<str>,
	#[serde(rename = "type")]
	pub kind: AliasKind,
	/// Proxy: target app id. Redirect: target URL.
	pub target: Option<Box<str>>,
	/// Redirect only: 301 instead of 302
	pub permanent: bool,
	/// Split only
	pub split_targets: Vec<SplitTarget>,
	pub created_at: Timestamp,
}

// Analytics events
//******************
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
	pub domain: Box<str>,
	pub tags: Option<Box<str>>,
	pub source_type: Option<Box<str>>,
	pub event_type: Box<str>,
	pub path: Option<Box<str>>,
	pub referrer: Option<Box<str>>,
	pub user_agent: Option<Box<str>>,
	pub ip: Option<Box<str>>,
	pub query_params: Option<Box<str>>,
	pub created_at: Timestamp,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsOptions {
	pub domain: Option<Box<str>>,
	#[serde(rename = "type")]
	pub event_type: Option<Box<str>>,
	pub since: Option<Timestamp>,
	pub limit: Option<u32>,
}

// Activity log
//**************
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
	#[serde(rename = "user")]
	User,
	#[serde(rename = "system")]
	System,
	#[serde(rename = "api_key")]
	ApiKey,
	#[serde(rename = "anonymous")]
	Anonymous,
}

impl Actor {
	pub fn as_str(&self) -> &'static str {
		match self {
			Actor::User => "user",
			Actor::System => "system",
			Actor::ApiKey => "api_key",
			Actor::Anonymous => "anonymous",
		}
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEntry {
	/// 0..=9, higher is more important; retention deletes low weights first
	pub weight: u8,
	pub actor: Actor,
	pub actor_id: Option<Box<str>>,
	pub resource: Box<str>,
	pub action: Box<str>,
	pub result: Box<str>,
	pub details: Option<serde_json::Value>,
	pub created_at: Timestamp,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListActivityOptions {
	pub min_weight: Option<u8>,
	pub resource: Option<Box<str>>,
	pub since: Option<Timestamp>,
	pub limit: Option<u32>,
}

// Outbound net allowlist
//************************
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetRule {
	pub domain: Box<str>,
	pub https_only: bool,
	/// Token bucket refill, requests per minute
	pub rate_per_min: u32,
	pub burst: u32,
	pub max_response_bytes: u64,
	pub timeout_ms: u64,
	/// Response cache TTL; 0 disables caching
	pub cache_ttl_secs: u64,
}

// Worker jobs
//*************
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
	#[serde(rename = "pending")]
	Pending,
	#[serde(rename = "running")]
	Running,
	#[serde(rename = "done")]
	Done,
	#[serde(rename = "failed")]
	Failed,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Pending => "pending",
			JobStatus::Running => "running",
			JobStatus::Done => "done",
			JobStatus::Failed => "failed",
		}
	}
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
	pub id: Box<str>,
	pub app_id: AppId,
	pub handler: Box<str>,
	pub status: JobStatus,
	pub config: Option<serde_json::Value>,
	pub progress: Option<serde_json::Value>,
	pub result: Option<serde_json::Value>,
	pub error: Option<Box<str>>,
	pub logs: Option<Box<str>>,
	pub checkpoint: Option<serde_json::Value>,
	pub attempt: u32,
	pub restart_count: u32,
	pub created_at: Timestamp,
	pub started_at: Option<Timestamp>,
	pub done_at: Option<Timestamp>,
	pub last_healthy_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
pub struct UpdateJobData {
	pub status: Option<JobStatus>,
	pub progress: Patch<serde_json::Value>,
	pub result: Patch<serde_json::Value>,
	pub error: Patch<Box<str>>,
	pub log_append: Option<Box<str>>,
	pub checkpoint: Patch<serde_json::Value>,
	pub mark_healthy: bool,
}

// Peers
//*******
#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerRecord {
	pub name: Box<str>,
	pub admin_url: Box<str>,
	pub token: Box<str>,
	pub last_seen_at: Option<Timestamp>,
	pub is_default: bool,
}

// Adapter trait
//***************
#[async_trait]
pub trait MetaAdapter: Send + Sync + Debug {
	// Apps. `delete_app` cascades to files, KV, docs, blobs, snapshots and
	// per-app net rules; lineage ids on surviving forks are left dangling.
	async fn create_app(&self, id: &AppId, opts: CreateAppOptions) -> FzResult<AppRecord>;
	async fn read_app(&self, id: &AppId) -> FzResult<AppRecord>;
	async fn read_app_by_label(&self, label: &str) -> FzResult<AppRecord>;
	async fn list_apps(&self, opts: &ListAppsOptions) -> FzResult<Vec<AppRecord>>;
	async fn update_app(&self, id: &AppId, data: &UpdateAppData) -> FzResult<AppRecord>;
	/// Atomically exchange the labels of two apps in one transaction.
	async fn swap_labels(&self, a: &AppId, b: &AppId) -> FzResult<()>;
	async fn delete_app(&self, id: &AppId) -> FzResult<()>;

	// App files
	async fn write_file(&self, app: &AppId, path: &str, bytes: Bytes, mime: &str)
		-> FzResult<()>;
	async fn read_file(&self, app: &AppId, path: &str) -> FzResult<FileRecord>;
	async fn list_files(&self, app: &AppId) -> FzResult<Vec<FileInfo>>;
	async fn delete_file(&self, app: &AppId, path: &str) -> FzResult<()>;
	/// Copy every file row of `src` to `dst` (fork support)
	async fn copy_files(&self, src: &AppId, dst: &AppId) -> FzResult<u64>;

	// Aliases
	async fn upsert_alias(&self, alias: &AliasRecord) -> FzResult<()>;
	async fn read_alias(&self, subdomain: &str) -> FzResult<AliasRecord>;
	async fn list_aliases(&self) -> FzResult<Vec<AliasRecord>>;
	async fn delete_alias(&self, subdomain: &str) -> FzResult<()>;

	// Analytics events. One call inserts the whole batch in one transaction.
	async fn insert_events(&self, events: Vec<EventRecord>) -> FzResult<()>;
	async fn list_events(&self, opts: &ListEventsOptions) -> FzResult<Vec<EventRecord>>;
	async fn count_events_since(&self, since: Timestamp) -> FzResult<u64>;

	// Activity log
	async fn append_activity(&self, entry: ActivityEntry) -> FzResult<()>;
	async fn list_activity(&self, opts: &ListActivityOptions) -> FzResult<Vec<ActivityEntry>>;
	/// Delete rows beyond `keep_rows`, lowest `(weight, created_at)` first.
	async fn prune_activity(&self, keep_rows: u64) -> FzResult<u64>;

	// Configuration (flat dotted keys; value None deletes)
	async fn read_config(&self, key: &str) -> FzResult<Option<Box<str>>>;
	async fn read_config_all(&self) -> FzResult<Vec<(Box<str>, Box<str>)>>;
	async fn write_config(&self, key: &str, value: Option<&str>) -> FzResult<()>;

	// Outbound net allowlist
	async fn list_net_rules(&self, app: &AppId) -> FzResult<Vec<NetRule>>;
	async fn upsert_net_rule(&self, app: &AppId, rule: &NetRule) -> FzResult<()>;
	async fn delete_net_rule(&self, app: &AppId, domain: &str) -> FzResult<()>;

	// Worker jobs
	async fn create_job(
		&self,
		app: &AppId,
		handler: &str,
		config: Option<serde_json::Value>,
	) -> FzResult<JobRecord>;
	async fn read_job(&self, id: &str) -> FzResult<JobRecord>;
	async fn list_jobs(&self, app: &AppId, status: Option<JobStatus>) -> FzResult<Vec<JobRecord>>;
	/// Atomically claim the oldest pending job (pending -> running).
	async fn claim_pending_job(&self) -> FzResult<Option<JobRecord>>;
	async fn update_job(&self, id: &str, data: UpdateJobData) -> FzResult<()>;

	// Peers
	async fn upsert_peer(&self, peer: &PeerRecord) -> FzResult<()>;
	async fn list_peers(&self) -> FzResult<Vec<PeerRecord>>;
	async fn delete_peer(&self, name: &str) -> FzResult<()>;
	/// Make `name` the single default peer.
	async fn set_default_peer(&self, name: &str) -> FzResult<()>;
}

// vim: ts=4
