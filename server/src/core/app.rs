//! App state type and builder.

use rustls::sign::CertifiedKey;
use std::{
	collections::HashMap,
	path::{Path, PathBuf},
	sync::{Arc, RwLock},
};
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityLog;
use crate::analytics::AnalyticsBuffer;
use crate::auth::oauth::OAuthService;
use crate::auth_adapter::AuthAdapter;
use crate::config::ConfigStore;
use crate::core::admission::{AdmissionConfig, AdmissionListener, ConnGauge};
use crate::core::limits::{self, Limits};
use crate::core::rate_limit::LoginLimiter;
use crate::core::router::{HostRouter, RESERVED_LABELS};
use crate::core::{webserver, worker};
use crate::data_adapter::DataAdapter;
use crate::meta_adapter::{AppSource, CreateAppOptions, MetaAdapter};
use crate::net::NetFetch;
use crate::prelude::*;
use crate::realtime::{HubRegistry, RealtimeLimits};
use crate::runtime::ops::HostCaps;
use crate::runtime::RuntimePool;
use crate::vfs::VfsCache;
use crate::{routes, types::Manifest};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// In-flight drain window on shutdown.
const SHUTDOWN_GRACE_SECS: u64 = 30;

pub struct AppState {
	pub opts: AppBuilderOpts,
	pub limits: Limits,

	pub meta_adapter: Arc<dyn MetaAdapter>,
	pub auth_adapter: Arc<dyn AuthAdapter>,
	pub data_adapter: Arc<dyn DataAdapter>,

	pub router: HostRouter,
	pub conn_gauge: Arc<ConnGauge>,
	pub vfs_cache: VfsCache,
	pub analytics: Arc<AnalyticsBuffer>,
	pub activity: Arc<ActivityLog>,
	pub login_limiter: LoginLimiter,
	pub hub: Arc<HubRegistry>,
	pub runtime: Arc<RuntimePool>,
	pub fetch: Arc<NetFetch>,
	pub worker: Arc<worker::WorkerPool>,
	pub config: Arc<ConfigStore>,
	pub oauth: OAuthService,

	pub certs: RwLock<HashMap<Box<str>, Arc<CertifiedKey>>>,
	pub shutdown: CancellationToken,
	pub started_at: std::time::Instant,
}

impl std::fmt::Debug for AppState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppState").field("opts", &self.opts).finish()
	}
}

pub type App = Arc<AppState>;

pub struct Adapters {
	pub meta_adapter: Option<Arc<dyn MetaAdapter>>,
	pub auth_adapter: Option<Arc<dyn AuthAdapter>>,
	pub data_adapter: Option<Arc<dyn DataAdapter>>,
}

#[derive(Debug)]
pub struct AppBuilderOpts {
	pub listen: Box<str>,
	pub listen_https: Option<Box<str>>,
	pub base_domain: Box<str>,
	pub https: bool,
	pub admission: AdmissionConfig,
	pub legacy_config_path: Option<Box<Path>>,
}

pub struct AppBuilder {
	opts: AppBuilderOpts,
	adapters: Adapters,
	config_overrides: Vec<(Box<str>, Box<str>)>,
}

impl AppBuilder {
	pub fn new() -> Self {
		AppBuilder {
			opts: AppBuilderOpts {
				listen: "127.0.0.1:8080".into(),
				listen_https: None,
				base_domain: "localhost".into(),
				https: false,
				admission: AdmissionConfig::default(),
				legacy_config_path: None,
			},
			adapters: Adapters { meta_adapter: None, auth_adapter: None, data_adapter: None },
			config_overrides: Vec::new(),
		}
	}

	// Opts
	pub fn listen(&mut self, listen: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen = listen.into();
		self
	}
	pub fn listen_https(&mut self, listen_https: impl Into<Box<str>>) -> &mut Self {
		self.opts.listen_https = Some(listen_https.into());
		self.opts.https = true;
		self
	}
	pub fn base_domain(&mut self, base_domain: impl Into<Box<str>>) -> &mut Self {
		self.opts.base_domain = base_domain.into();
		self
	}
	pub fn admission(&mut self, admission: AdmissionConfig) -> &mut Self {
		self.opts.admission = admission;
		self
	}
	pub fn legacy_config_path(&mut self, path: impl Into<PathBuf>) -> &mut Self {
		self.opts.legacy_config_path = Some(path.into().into());
		self
	}
	/// CLI config override, applied in memory on top of the store.
	pub fn config_override(
		&mut self,
		key: impl Into<Box<str>>,
		value: impl Into<Box<str>>,
	) -> &mut Self {
		self.config_overrides.push((key.into(), value.into()));
		self
	}

	// Adapters
	pub fn meta_adapter(&mut self, meta_adapter: Arc<dyn MetaAdapter>) -> &mut Self {
		self.adapters.meta_adapter = Some(meta_adapter);
		self
	}
	pub fn auth_adapter(&mut self, auth_adapter: Arc<dyn AuthAdapter>) -> &mut Self {
		self.adapters.auth_adapter = Some(auth_adapter);
		self
	}
	pub fn data_adapter(&mut self, data_adapter: Arc<dyn DataAdapter>) -> &mut Self {
		self.adapters.data_adapter = Some(data_adapter);
		self
	}

	pub async fn run(self) -> FzResult<()> {
		info!("fazt v{}", VERSION);

		if rustls::crypto::CryptoProvider::install_default(
			rustls::crypto::aws_lc_rs::default_provider(),
		)
		.is_err()
		{
			debug!("crypto provider already installed");
		}

		let Some(meta_adapter) = self.adapters.meta_adapter else {
			error!("FATAL: No meta adapter configured");
			return Err(Error::ConfigError("no meta adapter configured".into()));
		};
		let Some(auth_adapter) = self.adapters.auth_adapter else {
			error!("FATAL: No auth adapter configured");
			return Err(Error::ConfigError("no auth adapter configured".into()));
		};
		let Some(data_adapter) = self.adapters.data_adapter else {
			error!("FATAL: No data adapter configured");
			return Err(Error::ConfigError("no data adapter configured".into()));
		};

		let limits = limits::probe();

		let config = ConfigStore::new(meta_adapter.clone());
		for (key, value) in &self.config_overrides {
			config.set_override(key, value);
		}
		if let Some(legacy) = &self.opts.legacy_config_path {
			config.migrate_legacy_file(legacy).await?;
		}

		let activity = ActivityLog::new(meta_adapter.clone());
		let analytics = AnalyticsBuffer::new(meta_adapter.clone());
		let hub = HubRegistry::new(RealtimeLimits::default(), activity.clone());
		let worker = worker::WorkerPool::new(1, limits.cpu_count.max(1));
		let fetch = NetFetch::new(meta_adapter.clone(), limits.net_concurrency)?;
		let oauth = OAuthService::new(config.clone())?;

		let caps = HostCaps {
			data: data_adapter.clone(),
			fetch: fetch.clone(),
			hub: hub.clone(),
			worker: worker.clone(),
		};
		let runtime = RuntimePool::new(caps, meta_adapter.clone(), activity.clone(), &limits);

		let mut base_domain = self.opts.base_domain.clone();
		if let Some(configured) = config.get("server.domain").await? {
			base_domain = configured;
		}

		let app: App = Arc::new(AppState {
			router: HostRouter::new(meta_adapter.clone(), base_domain),
			conn_gauge: ConnGauge::new(self.opts.admission),
			vfs_cache: VfsCache::new(limits.vfs_cache_bytes as usize),
			analytics,
			activity,
			login_limiter: LoginLimiter::new(),
			hub,
			runtime,
			fetch,
			worker,
			config,
			oauth,
			certs: RwLock::new(HashMap::new()),
			shutdown: CancellationToken::new(),
			started_at: std::time::Instant::now(),
			limits,
			opts: self.opts,
			meta_adapter,
			auth_adapter,
			data_adapter,
		});

		bootstrap_system_apps(&app).await?;

		// Background maintenance
		app.analytics.start();
		app.activity.start_retention();
		crate::auth::session::start_session_cleanup(&app);
		start_kv_expiry_sweep(&app);

		let (admin_router, app_router) = routes::init(app.clone());

		let http_listener = AdmissionListener::bind(
			app.opts
				.listen
				.parse()
				.map_err(|_| Error::ConfigError(format!("bad listen address: {}", app.opts.listen)))?,
			app.conn_gauge.clone(),
		)
		.await
		.map_err(|err| {
			error!("FATAL: cannot bind {}: {}", app.opts.listen, err);
			Error::ConfigError(format!("cannot bind {}", app.opts.listen))
		})?;
		info!("Listening on HTTP {}", app.opts.listen);

		let http_server = tokio::spawn(webserver::serve_http(
			app.clone(),
			http_listener,
			admin_router.clone(),
			app_router.clone(),
		));

		let https_server = match &app.opts.listen_https {
			Some(listen_https) => {
				let https_listener = AdmissionListener::bind(
					listen_https.parse().map_err(|_| {
						Error::ConfigError(format!("bad listen address: {}", listen_https))
					})?,
					app.conn_gauge.clone(),
				)
				.await
				.map_err(|err| {
					error!("FATAL: cannot bind {}: {}", listen_https, err);
					Error::ConfigError(format!("cannot bind {}", listen_https))
				})?;
				info!("Listening on HTTPS {}", listen_https);
				Some(tokio::spawn(webserver::serve_https(
					app.clone(),
					https_listener,
					admin_router,
					app_router,
				)))
			}
			None => None,
		};

		// Shutdown sequencing: stop accepting, notify realtime clients,
		// wait out the grace, flush the analytics buffer. The caller owns
		// the store and closes the write serializer after run() returns.
		tokio::signal::ctrl_c().await.map_err(Error::from)?;
		info!("shutdown requested");
		let notified = app.hub.notify_shutdown();
		if notified > 0 {
			debug!("notified {} realtime clients", notified);
		}
		app.shutdown.cancel();
		let drain = async {
			let _ = http_server.await;
			if let Some(https_server) = https_server {
				let _ = https_server.await;
			}
		};
		if tokio::time::timeout(std::time::Duration::from_secs(SHUTDOWN_GRACE_SECS), drain)
			.await
			.is_err()
		{
			warn!("drain grace elapsed, forcing shutdown");
		}

		app.analytics.shutdown().await;
		info!("fazt stopped");
		Ok(())
	}
}

impl Default for AppBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// The `root`, `admin` and `404` labels are apps like any other; create
/// them with placeholder content on first boot.
async fn bootstrap_system_apps(app: &App) -> FzResult<()> {
	for label in RESERVED_LABELS {
		match app.meta_adapter.read_app_by_label(label).await {
			Ok(_) => continue,
			Err(Error::NotFound) => {}
			Err(err) => return Err(err),
		}

		let id = crate::core::utils::random_app_id();
		info!("bootstrapping system app '{}' as {}", label, id);
		app.meta_adapter
			.create_app(
				&id,
				CreateAppOptions {
					label: Some(Box::from(label)),
					source: Some(AppSource::System),
					manifest: Some(Manifest::default()),
					..Default::default()
				},
			)
			.await?;

		let body: String = match label {
			"404" => "<!doctype html><html><body><h1>404</h1><p>No app here.</p></body></html>"
				.to_string(),
			"admin" => {
				"<!doctype html><html><body><h1>fazt admin</h1><p>Deploy the admin app to replace this page.</p></body></html>"
					.to_string()
			}
			_ => format!(
				"<!doctype html><html><body><h1>fazt v{}</h1><p>It works.</p></body></html>",
				VERSION
			),
		};
		app.meta_adapter
			.write_file(&id, "index.html", body.into_bytes().into(), "text/html; charset=utf-8")
			.await?;
	}
	Ok(())
}

/// Periodic sweep deleting expired KV rows through the serializer.
fn start_kv_expiry_sweep(app: &App) {
	let data_adapter = app.data_adapter.clone();
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			interval.tick().await;
			match data_adapter.kv_purge_expired().await {
				Ok(0) => {}
				Ok(purged) => debug!("kv expiry sweep removed {} rows", purged),
				Err(err) => warn!("kv expiry sweep failed: {}", err),
			}
		}
	});
}

// vim: ts=4
