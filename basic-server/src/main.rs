use std::process::ExitCode;
use std::sync::Arc;
use std::{env, path::PathBuf};

use fazt::AppBuilder;
use fazt_store_sqlite::StoreSqlite;
use tracing::{error, info};

const DEFAULT_DB_PATH: &str = "~/.fazt/data.db";

fn expand_home(raw: &str) -> PathBuf {
	if raw == "~" {
		if let Ok(home) = env::var("HOME") {
			return PathBuf::from(home);
		}
	}
	if let Some(rest) = raw.strip_prefix("~/") {
		if let Ok(home) = env::var("HOME") {
			return PathBuf::from(home).join(rest);
		}
	}
	PathBuf::from(raw)
}

/// DB path resolution: explicit CLI path wins over `FAZT_DB_PATH`, which
/// wins over the default.
fn resolve_db_path() -> PathBuf {
	let raw = env::args()
		.nth(1)
		.filter(|arg| !arg.starts_with('-'))
		.or_else(|| env::var("FAZT_DB_PATH").ok())
		.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
	expand_home(&raw)
}

#[tokio::main]
async fn main() -> ExitCode {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
		)
		.with_target(false)
		.init();

	let db_path = resolve_db_path();
	info!("database: {}", db_path.display());

	let store = match StoreSqlite::new(&db_path).await {
		Ok(store) => Arc::new(store),
		Err(err) => {
			error!("FATAL: cannot open database {}: {}", db_path.display(), err);
			return ExitCode::FAILURE;
		}
	};

	let mut builder = AppBuilder::new();
	builder
		.meta_adapter(store.clone())
		.auth_adapter(store.clone())
		.data_adapter(store.clone());

	if let Ok(listen) = env::var("FAZT_LISTEN") {
		builder.listen(listen);
	} else {
		builder.listen("0.0.0.0:8080");
	}
	if let Ok(listen_https) = env::var("FAZT_LISTEN_HTTPS") {
		builder.listen_https(listen_https);
	}
	if let Ok(domain) = env::var("FAZT_DOMAIN") {
		builder.base_domain(domain);
	}
	if let Some(parent) = db_path.parent() {
		builder.legacy_config_path(parent.join("config.json"));
	}

	match builder.run().await {
		Ok(()) => {
			store.shutdown().await;
			ExitCode::SUCCESS
		}
		Err(err) => {
			error!("FATAL: {}", err);
			ExitCode::FAILURE
		}
	}
}

// vim: ts=4
