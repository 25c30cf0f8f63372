// Webserver implementation

use axum::response::IntoResponse;
use axum::Router;
use rustls::{
	server::{ClientHello, ResolvesServerCert},
	sign::CertifiedKey,
};
use rustls_pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::{Service, ServiceExt};

use crate::core::admission::AdmissionListener;
use crate::core::extract::TenantCtx;
use crate::core::router::RouteTarget;
use crate::meta_adapter::EventRecord;
use crate::prelude::*;

pub struct CertResolver {
	state: App,
}

impl CertResolver {
	pub fn new(state: App) -> CertResolver {
		CertResolver { state }
	}

	pub fn get(&self, name: &str) -> Option<Arc<CertifiedKey>> {
		match self.state.certs.read() {
			Ok(cache) => cache.get(name).cloned(),
			Err(poisoned) => {
				error!("RwLock poisoned in cert cache read (recovering)");
				poisoned.into_inner().get(name).cloned()
			}
		}
	}

	fn insert(&self, name: Box<str>, cert: Arc<CertifiedKey>) {
		match self.state.certs.write() {
			Ok(mut cache) => {
				cache.insert(name, cert);
			}
			Err(poisoned) => {
				error!("RwLock poisoned in cert cache write (recovering)");
				poisoned.into_inner().insert(name, cert);
			}
		}
	}
}

impl std::fmt::Debug for CertResolver {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CertResolver").finish()
	}
}

fn certified_key_from_pem(cert_pem: &str, key_pem: &str) -> Option<Arc<CertifiedKey>> {
	let certified_key = CertifiedKey::from_der(
		CertificateDer::pem_slice_iter(cert_pem.as_bytes()).filter_map(Result::ok).collect(),
		PrivateKeyDer::from_pem_slice(key_pem.as_bytes()).ok()?,
		rustls::crypto::CryptoProvider::get_default()?,
	)
	.ok()?;
	Some(Arc::new(certified_key))
}

impl ResolvesServerCert for CertResolver {
	fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
		let name = client_hello.server_name()?;
		if let Some(cert) = self.get(name) {
			return Some(cert);
		}
		// FIXME: Should not block the handshake on a DB read
		let cert_data = tokio::task::block_in_place(|| {
			tokio::runtime::Handle::current()
				.block_on(async { self.state.auth_adapter.read_cert(name).await })
		});
		match cert_data {
			Ok(cert_data) => {
				let certified_key =
					certified_key_from_pem(&cert_data.cert_pem, &cert_data.key_pem)?;
				self.insert(cert_data.domain, certified_key.clone());
				Some(certified_key)
			}
			Err(_) => {
				warn!("Certificate not found for {}", name);
				None
			}
		}
	}
}

/// Pre-populate the TLS cert cache so handshakes avoid blocking I/O.
pub async fn prepopulate_cert_cache(app: &App) -> usize {
	let certs = match app.auth_adapter.list_certs().await {
		Ok(certs) => certs,
		Err(err) => {
			warn!("Failed to pre-populate TLS cert cache: {}", err);
			return 0;
		}
	};
	let mut loaded = 0;
	for cert_data in &certs {
		let Some(certified_key) = certified_key_from_pem(&cert_data.cert_pem, &cert_data.key_pem)
		else {
			continue;
		};
		match app.certs.write() {
			Ok(mut cache) => {
				cache.insert(cert_data.domain.clone(), certified_key);
				loaded += 1;
			}
			Err(_) => break,
		}
	}
	loaded
}

/// Per-request dispatch: resolve the Host header to a tenant, pick the
/// admin or app router, log, and sample analytics.
async fn handle_request(
	app: App,
	admin_router: Router,
	app_router: Router,
	peer: Option<SocketAddr>,
	req: hyper::Request<hyper::body::Incoming>,
) -> axum::response::Response {
	let start = std::time::Instant::now();
	let mut req = req.map(axum::body::Body::new);
	let peer_ip = peer.map(|p| p.ip().to_string()).unwrap_or_else(|| "-".to_string());

	let host = req
		.uri()
		.host()
		.map(str::to_string)
		.or_else(|| {
			req.headers()
				.get(axum::http::header::HOST)
				.and_then(|h| h.to_str().ok())
				.map(str::to_string)
		})
		.unwrap_or_default();
	let user_agent = req
		.headers()
		.get(axum::http::header::USER_AGENT)
		.and_then(|h| h.to_str().ok())
		.unwrap_or_default()
		.to_string();
	let method = req.method().clone();
	let path = req.uri().path().to_string();
	let referrer = req
		.headers()
		.get(axum::http::header::REFERER)
		.and_then(|h| h.to_str().ok())
		.map(str::to_string);
	let query = req.uri().query().map(str::to_string);
	let accepts_html = crate::vfs::serve::accepts_html(req.headers());

	if let Some(peer) = peer {
		req.extensions_mut().insert(axum::extract::ConnectInfo(peer));
	}

	let client_key = format!("{}|{}", peer_ip, user_agent);
	let response = match app.router.resolve(&host, &client_key).await {
		Ok(RouteTarget::Redirect { location, permanent }) => {
			let status = if permanent {
				axum::http::StatusCode::MOVED_PERMANENTLY
			} else {
				axum::http::StatusCode::FOUND
			};
			axum::response::Response::builder()
				.status(status)
				.header(axum::http::header::LOCATION, &*location)
				.body(axum::body::Body::empty())
				.unwrap_or_else(|_| Error::Internal("redirect build".into()).into_response())
		}
		Ok(RouteTarget::App(record)) => {
			let is_admin = record.label.as_deref() == Some("admin");
			let is_not_found_app = record.label.as_deref() == Some("404");
			let tenant = Arc::new(record);
			req.extensions_mut().insert(TenantCtx(tenant.clone()));

			let router = if is_admin { admin_router } else { app_router };
			let mut response = match router.oneshot(req).await {
				Ok(response) => response,
				Err(never) => match never {},
			};
			// The 404 system app provides the body; the status still says
			// "no such tenant"
			if is_not_found_app && response.status() == axum::http::StatusCode::OK {
				*response.status_mut() = axum::http::StatusCode::NOT_FOUND;
			}
			response
		}
		Err(err) => {
			warn!("route resolution failed for {}: {}", host, err);
			err.into_response()
		}
	};

	let status = response.status();
	if status.is_client_error() || status.is_server_error() {
		warn!(
			"REQ [{}] {} {}{} RES: {} tm:{:?}",
			peer_ip,
			method,
			host,
			path,
			status,
			start.elapsed().as_millis()
		);
	} else {
		info!(
			"REQ [{}] {} {}{} RES: {} tm:{:?}",
			peer_ip,
			method,
			host,
			path,
			status,
			start.elapsed().as_millis()
		);
	}

	// Sample completed requests into the analytics buffer
	if !path.starts_with("/_") && status.is_success() {
		let event_type = if method == axum::http::Method::GET && accepts_html {
			"pageview"
		} else {
			"request"
		};
		app.analytics.push(EventRecord {
			domain: host.into(),
			tags: None,
			source_type: Some("web".into()),
			event_type: event_type.into(),
			path: Some(path.into()),
			referrer: referrer.map(Into::into),
			user_agent: Some(user_agent.into()),
			ip: Some(peer_ip.into()),
			query_params: query.map(Into::into),
			created_at: Timestamp(0),
		});
	}

	response
}

fn dispatch_service(
	app: App,
	admin_router: Router,
	app_router: Router,
) -> impl Service<
	hyper::Request<hyper::body::Incoming>,
	Response = axum::response::Response,
	Error = Infallible,
	Future = impl Send,
> + Clone
+ Send {
	tower::service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
		let app = app.clone();
		let admin_router = admin_router.clone();
		let app_router = app_router.clone();
		async move {
			let peer = req
				.extensions()
				.get::<axum::extract::ConnectInfo<SocketAddr>>()
				.map(|info| info.0);
			Ok::<_, Infallible>(handle_request(app, admin_router, app_router, peer, req).await)
		}
	})
}

/// Plaintext server over the admission-gated listener.
pub async fn serve_http(
	app: App,
	listener: AdmissionListener,
	admin_router: Router,
	app_router: Router,
) {
	let shutdown = app.shutdown.clone();
	let svc = dispatch_service(app, admin_router, app_router);
	let server = axum::serve(
		listener,
		axum::ServiceExt::into_make_service_with_connect_info::<SocketAddr>(svc),
	)
	.with_graceful_shutdown(async move { shutdown.cancelled().await });
	if let Err(err) = server.await {
		error!("http server error: {}", err);
	}
}

/// TLS server: the admission wrapper sits beneath the TLS accept, so
/// rejected connections never reach the handshake.
pub async fn serve_https(
	app: App,
	mut listener: AdmissionListener,
	admin_router: Router,
	app_router: Router,
) {
	let loaded = prepopulate_cert_cache(&app).await;
	info!("Pre-populated TLS cert cache with {} certificates", loaded);

	let cert_resolver = Arc::new(CertResolver::new(app.clone()));
	let mut server_config =
		rustls::ServerConfig::builder().with_no_client_auth().with_cert_resolver(cert_resolver);
	server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
	let acceptor = tokio_rustls::TlsAcceptor::from(Arc::new(server_config));

	loop {
		let (stream, peer) = tokio::select! {
			accepted = listener.accept_admitted() => accepted,
			_ = app.shutdown.cancelled() => break,
		};

		let acceptor = acceptor.clone();
		let app = app.clone();
		let admin_router = admin_router.clone();
		let app_router = app_router.clone();
		tokio::spawn(async move {
			let tls_stream = match acceptor.accept(stream).await {
				Ok(tls_stream) => tls_stream,
				Err(err) => {
					debug!("TLS handshake failed from {}: {}", peer, err);
					return;
				}
			};

			let svc = tower::service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
				let app = app.clone();
				let admin_router = admin_router.clone();
				let app_router = app_router.clone();
				req.extensions_mut().insert(axum::extract::ConnectInfo(peer));
				async move {
					Ok::<_, Infallible>(
						handle_request(app, admin_router, app_router, Some(peer), req).await,
					)
				}
			});

			let io = hyper_util::rt::TokioIo::new(tls_stream);
			let service = hyper_util::service::TowerToHyperService::new(svc);
			if let Err(err) = hyper_util::server::conn::auto::Builder::new(
				hyper_util::rt::TokioExecutor::new(),
			)
			.serve_connection_with_upgrades(io, service)
			.await
			{
				debug!("connection error from {}: {}", peer, err);
			}
		});
	}
}

// vim: ts=4
