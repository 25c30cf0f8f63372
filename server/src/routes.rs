//! API routes

use axum::{
	body::Body,
	extract::State,
	http::Request,
	middleware,
	response::Response,
	routing::{any, get, post, put},
	Router,
};
use tower_http::compression::CompressionLayer;

use crate::admin;
use crate::auth;
use crate::auth::session::resolve_session;
use crate::core::extract::{OptionalAuth, TenantCtx};
use crate::core::middleware::require_owner;
use crate::prelude::*;
use crate::realtime::websocket;
use crate::runtime::{dispatcher, ports};
use crate::vfs;

// ============================================================================
// RESERVED SUBPATHS - short-circuit per-app routing on every host
// ============================================================================
fn init_reserved_routes() -> Router<App> {
	Router::new()
		// --- Auth (cookie lands on the root domain) ---
		.route("/auth/login/{provider}", get(auth::handler::get_login))
		.route("/auth/callback/{provider}", get(auth::handler::get_callback))
		.route("/auth/session", get(auth::handler::get_session))
		.route("/auth/logout", post(auth::handler::post_logout))

		// --- Realtime ---
		.route("/_ws", any(websocket::get_ws))

		// --- Developer/agent introspection (owner or app token) ---
		.route("/_fazt/logs", get(ports::get_logs))
		.route("/_fazt/errors", get(ports::get_errors))
		.route("/_fazt/storage", get(ports::get_storage))
		.route("/_fazt/storage/{key}", get(ports::get_storage_key))
		.route("/_fazt/snapshot/{name}", post(ports::post_snapshot))
		.route("/_fazt/restore/{name}", post(ports::post_restore))
}

// ============================================================================
// APP PIPELINE - /api/* to the serverless dispatcher when the app declares
// a handler, everything else to the VFS
// ============================================================================
async fn app_pipeline(
	State(app): State<App>,
	TenantCtx(tenant): TenantCtx,
	OptionalAuth(auth): OptionalAuth,
	req: Request<Body>,
) -> FzResult<Response> {
	let path = req.uri().path().to_string();

	// /api/* hits the dispatcher iff the app declares a handler; otherwise
	// it falls through to the VFS like any other path.
	if (path == "/api" || path.starts_with("/api/"))
		&& app.runtime.has_handler(&tenant.id).await
	{
		return dispatcher::handle_api_request(&app, &tenant, auth.as_ref(), req).await;
	}

	let headers = req.headers().clone();
	vfs_response(&app, &tenant, &path, &headers, auth.as_ref()).await
}

async fn vfs_response(
	app: &App,
	tenant: &std::sync::Arc<crate::meta_adapter::AppRecord>,
	path: &str,
	headers: &axum::http::HeaderMap,
	auth: Option<&crate::core::extract::AuthCtx>,
) -> FzResult<Response> {
	let private_ok = ports::authorize_app_access(app, &tenant.id, auth, headers).await.is_ok();
	vfs::serve_path(app, tenant, path, headers, private_ok).await
}

// ============================================================================
// ADMIN API - owner-gated JSON surface on the admin system app
// ============================================================================
fn init_admin_api(app: App) -> Router<App> {
	Router::new()
		// --- Apps ---
		.route("/api/apps", get(admin::apps::list_apps).post(admin::apps::create_app))
		.route(
			"/api/apps/{id}",
			get(admin::apps::get_app)
				.patch(admin::apps::update_app)
				.delete(admin::apps::delete_app),
		)
		.route("/api/apps/{id}/files", get(admin::apps::list_files))
		.route(
			"/api/apps/{id}/files/{*path}",
			put(admin::apps::put_file)
				.delete(admin::apps::delete_file)
				// Deploys may carry up to the probe-derived upload cap
				.layer(axum::extract::DefaultBodyLimit::max(100 * 1024 * 1024)),
		)
		.route("/api/apps/{id}/fork", post(admin::apps::fork_app))
		.route(
			"/api/apps/{id}/net",
			get(admin::apps::list_net_rules).put(admin::apps::put_net_rule),
		)
		.route("/api/apps/{id}/net/{domain}", axum::routing::delete(admin::apps::delete_net_rule))

		// --- Aliases ---
		.route(
			"/api/aliases",
			get(admin::aliases::list_aliases).post(admin::aliases::create_alias),
		)
		.route("/api/aliases/swap", post(admin::aliases::swap_labels))
		.route(
			"/api/aliases/{subdomain}",
			get(admin::aliases::get_alias)
				.patch(admin::aliases::update_alias)
				.delete(admin::aliases::delete_alias),
		)
		.route("/api/aliases/{subdomain}/reserve", post(admin::aliases::reserve_alias))
		.route("/api/aliases/{subdomain}/split", post(admin::aliases::set_split))

		// --- System ---
		.route("/api/system/health", get(admin::system::get_health))
		.route("/api/system/config", get(admin::system::get_config).put(admin::system::put_config))
		.route("/api/system/limits", get(admin::system::get_limits))
		.route("/api/system/cache/clear", post(admin::system::post_cache_clear))
		.route("/api/system/db", get(admin::system::get_db))
		.route("/api/system/capacity", get(admin::system::get_capacity))

		// --- Stats / events / logs ---
		.route("/api/stats/overview", get(admin::stats::get_overview))
		.route("/api/stats/apps/{id}", get(admin::stats::get_app_stats))
		.route("/api/events", get(admin::events::list_events))
		.route("/api/logs/{app_id}", get(admin::logs::get_app_logs))
		.route("/api/activity", get(admin::logs::list_activity))
		.route_layer(middleware::from_fn_with_state(app, require_owner))
}

/// Router pair for the webserver dispatch: `(admin, app)`. The admin
/// router serves the admin system app (API + its SPA files); the app
/// router serves every other tenant.
pub fn init(app: App) -> (Router, Router) {
	let reserved = init_reserved_routes();

	let app_router = reserved
		.clone()
		.fallback(app_pipeline)
		.layer(middleware::from_fn_with_state(app.clone(), resolve_session))
		.layer(CompressionLayer::new())
		.with_state(app.clone());

	let admin_router = init_admin_api(app.clone())
		.merge(reserved)
		.fallback(app_pipeline)
		.layer(middleware::from_fn_with_state(app.clone(), resolve_session))
		.layer(CompressionLayer::new())
		.with_state(app);

	(admin_router, app_router)
}

// vim: ts=4
