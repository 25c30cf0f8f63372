//! Channel registry and broadcast plumbing.
//!
//! One `AppHub` per app holds channel -> subscriber maps; apps cannot
//! address each other's channels because every operation goes through the
//! per-app hub (the qualified `app:channel` form only ever appears in
//! logs). Broadcasts are O(subscribers) and never touch the database.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::meta_adapter::{ActivityEntry, Actor};
use crate::prelude::*;
use crate::realtime::websocket::ServerFrame;

#[derive(Debug, Clone, Copy)]
pub struct RealtimeLimits {
	pub max_total: usize,
	pub max_per_app: usize,
	pub max_channels_per_app: usize,
	pub max_subscriptions_per_client: usize,
	pub max_message_bytes: usize,
	pub max_messages_per_sec: u32,
	pub idle_timeout_secs: u64,
}

impl Default for RealtimeLimits {
	fn default() -> Self {
		Self {
			max_total: 5000,
			max_per_app: 500,
			max_channels_per_app: 100,
			max_subscriptions_per_client: 20,
			max_message_bytes: 64 * 1024,
			max_messages_per_sec: 100,
			idle_timeout_secs: 300,
		}
	}
}

pub type ClientId = Box<str>;

/// Per-client outbound queue. Bounded: a client that cannot drain its
/// queue is dropped rather than allowed to backpressure the hub.
pub const CLIENT_QUEUE: usize = 256;

#[derive(Debug, Clone)]
pub struct MemberInfo {
	pub client_id: ClientId,
	pub user_id: Option<UserId>,
	pub name: Option<Box<str>>,
}

#[derive(Debug)]
struct ChannelState {
	subscribers: HashMap<ClientId, mpsc::Sender<ServerFrame>>,
	/// Presence channels track members and emit join/leave
	members: HashMap<ClientId, MemberInfo>,
}

impl ChannelState {
	fn new() -> ChannelState {
		ChannelState { subscribers: HashMap::new(), members: HashMap::new() }
	}
}

#[derive(Debug)]
pub struct AppHub {
	app_id: AppId,
	channels: RwLock<HashMap<Box<str>, ChannelState>>,
	clients: RwLock<HashMap<ClientId, mpsc::Sender<ServerFrame>>>,
	conn_count: AtomicUsize,
}

impl AppHub {
	fn new(app_id: AppId) -> AppHub {
		AppHub {
			app_id,
			channels: RwLock::new(HashMap::new()),
			clients: RwLock::new(HashMap::new()),
			conn_count: AtomicUsize::new(0),
		}
	}

	pub fn connections(&self) -> usize {
		self.conn_count.load(Ordering::Relaxed)
	}

	pub fn channel_count(&self) -> usize {
		self.channels.read().len()
	}

	pub fn subscriber_count(&self, channel: &str) -> usize {
		self.channels.read().get(channel).map_or(0, |c| c.subscribers.len())
	}

	pub fn members(&self, channel: &str) -> Vec<MemberInfo> {
		self.channels
			.read()
			.get(channel)
			.map(|c| c.members.values().cloned().collect())
			.unwrap_or_default()
	}

	/// Subscribe a client. Presence channels additionally register the
	/// member and notify existing subscribers.
	pub fn subscribe(
		&self,
		channel: &str,
		member: MemberInfo,
		tx: mpsc::Sender<ServerFrame>,
		max_channels: usize,
	) -> FzResult<()> {
		let mut channels = self.channels.write();
		if !channels.contains_key(channel) && channels.len() >= max_channels {
			return Err(Error::ServiceUnavailable("channel limit reached".into()));
		}
		let state = channels.entry(Box::from(channel)).or_insert_with(ChannelState::new);
		state.subscribers.insert(member.client_id.clone(), tx);

		if channel.starts_with("presence-") {
			state.members.insert(member.client_id.clone(), member.clone());
			let frame = ServerFrame::presence(channel, "join", &member);
			for (client_id, tx) in &state.subscribers {
				if *client_id != member.client_id {
					let _ = tx.try_send(frame.clone());
				}
			}
		}
		Ok(())
	}

	pub fn unsubscribe(&self, channel: &str, client_id: &str) {
		let mut channels = self.channels.write();
		let Some(state) = channels.get_mut(channel) else { return };
		state.subscribers.remove(client_id);
		if let Some(member) = state.members.remove(client_id) {
			let frame = ServerFrame::presence(channel, "leave", &member);
			for tx in state.subscribers.values() {
				let _ = tx.try_send(frame.clone());
			}
		}
		if state.subscribers.is_empty() {
			channels.remove(channel);
		}
	}

	/// Deliver to every subscriber of a channel; full client queues are
	/// skipped (their connection loop drops them on overflow).
	pub fn broadcast(&self, channel: &str, data: Value) -> usize {
		let channels = self.channels.read();
		let Some(state) = channels.get(channel) else { return 0 };
		let frame = ServerFrame::message(channel, data);
		let mut delivered = 0;
		for tx in state.subscribers.values() {
			if tx.try_send(frame.clone()).is_ok() {
				delivered += 1;
			}
		}
		delivered
	}

	/// Deliver to every connected client of the app, subscribed or not.
	pub fn broadcast_all(&self, data: Value) -> usize {
		let clients = self.clients.read();
		let frame = ServerFrame::broadcast_all(data);
		let mut delivered = 0;
		for tx in clients.values() {
			if tx.try_send(frame.clone()).is_ok() {
				delivered += 1;
			}
		}
		delivered
	}

	/// Force-disconnect a client. The kicked frame rides the queue; the
	/// connection loop closes the socket and unregisters as usual.
	pub fn kick(&self, client_id: &str) -> bool {
		match self.clients.read().get(client_id) {
			Some(tx) => {
				let _ = tx.try_send(ServerFrame::kicked());
				true
			}
			None => false,
		}
	}

	/// The outbound sender registered for a connected client.
	pub fn sender_for(&self, client_id: &str) -> Option<mpsc::Sender<ServerFrame>> {
		self.clients.read().get(client_id).cloned()
	}

	fn register_client(&self, client_id: ClientId, tx: mpsc::Sender<ServerFrame>) {
		self.clients.write().insert(client_id, tx);
		self.conn_count.fetch_add(1, Ordering::Relaxed);
	}

	fn drop_client(&self, client_id: &str) {
		if self.clients.write().remove(client_id).is_some() {
			self.conn_count.fetch_sub(1, Ordering::Relaxed);
		}
		let names: Vec<Box<str>> = self.channels.read().keys().cloned().collect();
		for name in names {
			self.unsubscribe(&name, client_id);
		}
	}
}

/// Shared registry of per-app hubs.
pub struct HubRegistry {
	hubs: RwLock<HashMap<AppId, Arc<AppHub>>>,
	total: AtomicUsize,
	pub limits: RealtimeLimits,
	activity: Arc<crate::activity::ActivityLog>,
}

impl std::fmt::Debug for HubRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("HubRegistry")
			.field("total", &self.total.load(Ordering::Relaxed))
			.finish()
	}
}

impl HubRegistry {
	pub fn new(
		limits: RealtimeLimits,
		activity: Arc<crate::activity::ActivityLog>,
	) -> Arc<HubRegistry> {
		Arc::new(HubRegistry {
			hubs: RwLock::new(HashMap::new()),
			total: AtomicUsize::new(0),
			limits,
			activity,
		})
	}

	pub fn hub(&self, app_id: &AppId) -> Arc<AppHub> {
		if let Some(hub) = self.hubs.read().get(app_id) {
			return hub.clone();
		}
		let mut hubs = self.hubs.write();
		hubs.entry(app_id.clone()).or_insert_with(|| Arc::new(AppHub::new(app_id.clone()))).clone()
	}

	pub fn total_connections(&self) -> usize {
		self.total.load(Ordering::Relaxed)
	}

	fn warn_at_80(&self, what: &str, current: usize, max: usize, app: Option<&AppId>) {
		if current * 10 >= max * 8 {
			self.activity.record(ActivityEntry {
				weight: 4,
				actor: Actor::System,
				actor_id: None,
				resource: app.map_or_else(|| "realtime".into(), |a| format!("app:{}", a).into()),
				action: format!("realtime.{}_pressure", what).into(),
				result: "warning".into(),
				details: Some(serde_json::json!({ "current": current, "max": max })),
				created_at: Timestamp::now(),
			});
		}
	}

	/// Admit a new connection for an app; 503 past the caps, activity
	/// warning at 80%.
	pub fn register(
		&self,
		app_id: &AppId,
		client_id: ClientId,
		tx: mpsc::Sender<ServerFrame>,
	) -> FzResult<Arc<AppHub>> {
		let total = self.total.load(Ordering::Relaxed);
		if total >= self.limits.max_total {
			return Err(Error::ServiceUnavailable("realtime connection limit".into()));
		}
		self.warn_at_80("total", total + 1, self.limits.max_total, None);

		let hub = self.hub(app_id);
		let per_app = hub.connections();
		if per_app >= self.limits.max_per_app {
			return Err(Error::ServiceUnavailable("app connection limit".into()));
		}
		self.warn_at_80("app", per_app + 1, self.limits.max_per_app, Some(app_id));

		hub.register_client(client_id, tx);
		self.total.fetch_add(1, Ordering::Relaxed);
		Ok(hub)
	}

	pub fn unregister(&self, app_id: &AppId, client_id: &str) {
		let hub = self.hub(app_id);
		hub.drop_client(client_id);
		self.total.fetch_sub(1, Ordering::Relaxed);

		// Drop empty hubs so deleted apps don't linger
		let mut hubs = self.hubs.write();
		if let Some(hub) = hubs.get(app_id) {
			if hub.connections() == 0 && hub.channel_count() == 0 {
				hubs.remove(app_id);
			}
		}
	}

	/// Shutdown notice: `server_restart` to every client, then the grace
	/// period runs in the caller before connections are torn down.
	pub fn notify_shutdown(&self) -> usize {
		let hubs = self.hubs.read();
		let mut notified = 0;
		for hub in hubs.values() {
			let clients = hub.clients.read();
			for tx in clients.values() {
				if tx.try_send(ServerFrame::server_restart()).is_ok() {
					notified += 1;
				}
			}
		}
		notified
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	fn app(n: u8) -> AppId {
		AppId(format!("app_0000000{}", n).into())
	}

	fn registry() -> Arc<HubRegistry> {
		HubRegistry::new(
			RealtimeLimits { max_total: 4, max_per_app: 2, ..Default::default() },
			crate::activity::ActivityLog::new(null_meta()),
		)
	}

	// Minimal meta adapter stub for activity recording in tests.
	fn null_meta() -> Arc<dyn crate::meta_adapter::MetaAdapter> {
		use crate::meta_adapter::*;
		use async_trait::async_trait;

		#[derive(Debug)]
		struct Null;

		#[async_trait]
		impl MetaAdapter for Null {
			async fn create_app(&self, _: &AppId, _: CreateAppOptions) -> FzResult<AppRecord> {
				Err(Error::NotFound)
			}
			async fn read_app(&self, _: &AppId) -> FzResult<AppRecord> {
				Err(Error::NotFound)
			}
			async fn read_app_by_label(&self, _: &str) -> FzResult<AppRecord> {
				Err(Error::NotFound)
			}
			async fn list_apps(&self, _: &ListAppsOptions) -> FzResult<Vec<AppRecord>> {
				Ok(vec![])
			}
			async fn update_app(&self, _: &AppId, _: &UpdateAppData) -> FzResult<AppRecord> {
				Err(Error::NotFound)
			}
			async fn swap_labels(&self, _: &AppId, _: &AppId) -> FzResult<()> {
				Ok(())
			}
			async fn delete_app(&self, _: &AppId) -> FzResult<()> {
				Ok(())
			}
			async fn write_file(&self, _: &AppId, _: &str, _: bytes::Bytes, _: &str) -> FzResult<()> {
				Ok(())
			}
			async fn read_file(&self, _: &AppId, _: &str) -> FzResult<FileRecord> {
				Err(Error::NotFound)
			}
			async fn list_files(&self, _: &AppId) -> FzResult<Vec<FileInfo>> {
				Ok(vec![])
			}
			async fn delete_file(&self, _: &AppId, _: &str) -> FzResult<()> {
				Ok(())
			}
			async fn copy_files(&self, _: &AppId, _: &AppId) -> FzResult<u64> {
				Ok(0)
			}
			async fn upsert_alias(&self, _: &AliasRecord) -> FzResult<()> {
				Ok(())
			}
			async fn read_alias(&self, _: &str) -> FzResult<AliasRecord> {
				Err(Error::NotFound)
			}
			async fn list_aliases(&self) -> FzResult<Vec<AliasRecord>> {
				Ok(vec![])
			}
			async fn delete_alias(&self, _: &str) -> FzResult<()> {
				Ok(())
			}
			async fn insert_events(&self, _: Vec<EventRecord>) -> FzResult<()> {
				Ok(())
			}
			async fn list_events(&self, _: &ListEventsOptions) -> FzResult<Vec<EventRecord>> {
				Ok(vec![])
			}
			async fn count_events_since(&self, _: Timestamp) -> FzResult<u64> {
				Ok(0)
			}
			async fn append_activity(&self, _: ActivityEntry) -> FzResult<()> {
				Ok(())
			}
			async fn list_activity(&self, _: &ListActivityOptions) -> FzResult<Vec<ActivityEntry>> {
				Ok(vec![])
			}
			async fn prune_activity(&self, _: u64) -> FzResult<u64> {
				Ok(0)
			}
			async fn read_config(&self, _: &str) -> FzResult<Option<Box<str>>> {
				Ok(None)
			}
			async fn read_config_all(&self) -> FzResult<Vec<(Box<str>, Box<str>)>> {
				Ok(vec![])
			}
			async fn write_config(&self, _: &str, _: Option<&str>) -> FzResult<()> {
				Ok(())
			}
			async fn list_net_rules(&self, _: &AppId) -> FzResult<Vec<NetRule>> {
				Ok(vec![])
			}
			async fn upsert_net_rule(&self, _: &AppId, _: &NetRule) -> FzResult<()> {
				Ok(())
			}
			async fn delete_net_rule(&self, _: &AppId, _: &str) -> FzResult<()> {
				Ok(())
			}
			async fn create_job(
				&self,
				_: &AppId,
				_: &str,
				_: Option<serde_json::Value>,
			) -> FzResult<JobRecord> {
				Err(Error::NotFound)
			}
			async fn read_job(&self, _: &str) -> FzResult<JobRecord> {
				Err(Error::NotFound)
			}
			async fn list_jobs(&self, _: &AppId, _: Option<JobStatus>) -> FzResult<Vec<JobRecord>> {
				Ok(vec![])
			}
			async fn claim_pending_job(&self) -> FzResult<Option<JobRecord>> {
				Ok(None)
			}
			async fn update_job(&self, _: &str, _: UpdateJobData) -> FzResult<()> {
				Ok(())
			}
			async fn upsert_peer(&self, _: &PeerRecord) -> FzResult<()> {
				Ok(())
			}
			async fn list_peers(&self) -> FzResult<Vec<PeerRecord>> {
				Ok(vec![])
			}
			async fn delete_peer(&self, _: &str) -> FzResult<()> {
				Ok(())
			}
			async fn set_default_peer(&self, _: &str) -> FzResult<()> {
				Ok(())
			}
		}

		Arc::new(Null)
	}

	fn member(id: &str) -> MemberInfo {
		MemberInfo { client_id: id.into(), user_id: None, name: None }
	}

	#[tokio::test]
	async fn broadcast_reaches_only_same_app() {
		let registry = registry();
		let (tx1, mut rx1) = mpsc::channel(8);
		let (tx2, mut rx2) = mpsc::channel(8);
		let (tx3, mut rx3) = mpsc::channel(8);

		let hub_a = registry.register(&app(1), "c1".into(), tx1.clone()).unwrap();
		registry.register(&app(1), "c2".into(), tx2.clone()).unwrap();
		let hub_b = registry.register(&app(2), "c3".into(), tx3.clone()).unwrap();

		hub_a.subscribe("chat", member("c1"), tx1, 100).unwrap();
		hub_a.subscribe("chat", member("c2"), tx2, 100).unwrap();
		hub_b.subscribe("chat", member("c3"), tx3, 100).unwrap();

		let delivered = hub_a.broadcast("chat", json!({"x": 1}));
		assert_eq!(delivered, 2);
		assert!(rx1.try_recv().is_ok());
		assert!(rx2.try_recv().is_ok());
		assert!(rx3.try_recv().is_err());
	}

	#[tokio::test]
	async fn per_app_connection_cap() {
		let registry = registry();
		let (tx, _rx) = mpsc::channel(8);
		registry.register(&app(1), "c1".into(), tx.clone()).unwrap();
		registry.register(&app(1), "c2".into(), tx.clone()).unwrap();
		assert!(matches!(
			registry.register(&app(1), "c3".into(), tx.clone()),
			Err(Error::ServiceUnavailable(_))
		));
		// Other app still admitted
		registry.register(&app(2), "c4".into(), tx).unwrap();
	}

	#[tokio::test]
	async fn total_connection_cap() {
		let registry = registry();
		let (tx, _rx) = mpsc::channel(8);
		registry.register(&app(1), "c1".into(), tx.clone()).unwrap();
		registry.register(&app(1), "c2".into(), tx.clone()).unwrap();
		registry.register(&app(2), "c3".into(), tx.clone()).unwrap();
		registry.register(&app(2), "c4".into(), tx.clone()).unwrap();
		assert!(registry.register(&app(3), "c5".into(), tx).is_err());
	}

	#[tokio::test]
	async fn presence_join_and_leave_events() {
		let registry = registry();
		let (tx1, mut rx1) = mpsc::channel(8);
		let (tx2, _rx2) = mpsc::channel(8);

		let hub = registry.register(&app(1), "c1".into(), tx1.clone()).unwrap();
		registry.register(&app(1), "c2".into(), tx2.clone()).unwrap();

		hub.subscribe("presence-room", member("c1"), tx1, 100).unwrap();
		hub.subscribe("presence-room", member("c2"), tx2, 100).unwrap();

		// c1 sees c2's join
		let frame = rx1.try_recv().unwrap();
		let text = frame.to_json();
		assert!(text.contains("\"presence\""));
		assert!(text.contains("join"));

		assert_eq!(hub.members("presence-room").len(), 2);
		hub.unsubscribe("presence-room", "c2");
		let frame = rx1.try_recv().unwrap();
		assert!(frame.to_json().contains("leave"));
		assert_eq!(hub.members("presence-room").len(), 1);
	}

	#[tokio::test]
	async fn unregister_cleans_empty_hub() {
		let registry = registry();
		let (tx, _rx) = mpsc::channel(8);
		registry.register(&app(1), "c1".into(), tx).unwrap();
		assert_eq!(registry.total_connections(), 1);
		registry.unregister(&app(1), "c1");
		assert_eq!(registry.total_connections(), 0);
		assert!(registry.hubs.read().is_empty());
	}
}

// vim: ts=4
