//! OAuth provider wiring: authorize-URL construction, code exchange and
//! profile fetch over the shared HTTPS client.
//!
//! Callback URLs always live on the registered root domain
//! (`https://<root>/auth/callback/<provider>`), never a subdomain.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Method;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use url::Url;

use crate::auth_adapter::OAuthProfile;
use crate::config::ConfigStore;
use crate::core::utils::random_session_token;
use crate::prelude::*;

const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);
const STATE_TTL: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ProviderConfig {
	pub client_id: Box<str>,
	pub client_secret: Box<str>,
	pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
	Github,
	Google,
}

impl Provider {
	pub fn parse(name: &str) -> Option<Provider> {
		match name {
			"github" => Some(Provider::Github),
			"google" => Some(Provider::Google),
			_ => None,
		}
	}

	pub fn name(&self) -> &'static str {
		match self {
			Provider::Github => "github",
			Provider::Google => "google",
		}
	}

	fn authorize_url(&self) -> &'static str {
		match self {
			Provider::Github => "https://github.com/login/oauth/authorize",
			Provider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
		}
	}

	fn token_url(&self) -> &'static str {
		match self {
			Provider::Github => "https://github.com/login/oauth/access_token",
			Provider::Google => "https://oauth2.googleapis.com/token",
		}
	}

	fn userinfo_url(&self) -> &'static str {
		match self {
			Provider::Github => "https://api.github.com/user",
			Provider::Google => "https://openidconnect.googleapis.com/v1/userinfo",
		}
	}

	fn scope(&self) -> &'static str {
		match self {
			Provider::Github => "read:user user:email",
			Provider::Google => "openid email profile",
		}
	}
}

/// In-flight login attempt, keyed by the state nonce.
#[derive(Debug, Clone)]
struct PendingLogin {
	provider: Provider,
	redirect: Option<Box<str>>,
	created: Instant,
}

pub struct OAuthService {
	client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
	config: std::sync::Arc<ConfigStore>,
	pending: Mutex<HashMap<Box<str>, PendingLogin>>,
}

impl std::fmt::Debug for OAuthService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("OAuthService").finish()
	}
}

impl OAuthService {
	pub fn new(config: std::sync::Arc<ConfigStore>) -> FzResult<OAuthService> {
		let connector = HttpsConnectorBuilder::new()
			.with_native_roots()
			.map_err(|_| Error::ConfigError("no native root CA certificates found".into()))?
			.https_only()
			.enable_http1()
			.build();
		Ok(OAuthService {
			client: Client::builder(TokioExecutor::new()).build(connector),
			config,
			pending: Mutex::new(HashMap::new()),
		})
	}

	pub async fn provider_config(&self, provider: Provider) -> FzResult<ProviderConfig> {
		let prefix = format!("oauth.{}", provider.name());
		let enabled = self.config.get_bool(&format!("{}.enabled", prefix), false).await?;
		let client_id = self.config.get(&format!("{}.client_id", prefix)).await?;
		let client_secret = self.config.get(&format!("{}.client_secret", prefix)).await?;
		match (client_id, client_secret) {
			(Some(client_id), Some(client_secret)) if enabled => {
				Ok(ProviderConfig { client_id, client_secret, enabled })
			}
			_ => Err(Error::Validation(format!("provider {} not configured", provider.name()))),
		}
	}

	/// Begin a flow: remember the state nonce and build the authorize URL.
	pub async fn begin(
		&self,
		provider: Provider,
		root_domain: &str,
		https: bool,
		redirect: Option<&str>,
	) -> FzResult<String> {
		let config = self.provider_config(provider).await?;
		let state = random_session_token();

		{
			let mut pending = self.pending.lock();
			pending.retain(|_, login| login.created.elapsed() < STATE_TTL);
			pending.insert(
				Box::from(state.as_str()),
				PendingLogin {
					provider,
					redirect: redirect.map(Box::from),
					created: Instant::now(),
				},
			);
		}

		let scheme = if https { "https" } else { "http" };
		let callback = format!("{}://{}/auth/callback/{}", scheme, root_domain, provider.name());
		let mut url = Url::parse(provider.authorize_url())?;
		url.query_pairs_mut()
			.append_pair("client_id", &config.client_id)
			.append_pair("redirect_uri", &callback)
			.append_pair("response_type", "code")
			.append_pair("scope", provider.scope())
			.append_pair("state", &state);
		Ok(url.to_string())
	}

	/// Look up and consume the state nonce; returns the stored redirect.
	pub fn take_state(&self, provider: Provider, state: &str) -> FzResult<Option<Box<str>>> {
		let mut pending = self.pending.lock();
		match pending.remove(state) {
			Some(login) if login.provider == provider && login.created.elapsed() < STATE_TTL => {
				Ok(login.redirect)
			}
			_ => Err(Error::InvalidCredentials),
		}
	}

	async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> FzResult<Value> {
		let mut body = url::form_urlencoded::Serializer::new(String::new());
		for (name, value) in form {
			body.append_pair(name, value);
		}
		let req = hyper::Request::builder()
			.method(Method::POST)
			.uri(url)
			.header(hyper::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
			.header(hyper::header::ACCEPT, "application/json")
			.body(Full::new(Bytes::from(body.finish())))?;

		let response = tokio::time::timeout(EXCHANGE_TIMEOUT, self.client.request(req))
			.await
			.map_err(|_| Error::Timeout)??;
		if !response.status().is_success() {
			warn!("oauth exchange failed: {}", response.status());
			return Err(Error::InvalidCredentials);
		}
		let bytes = tokio::time::timeout(EXCHANGE_TIMEOUT, response.into_body().collect())
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|_| Error::NetworkError("oauth response body".into()))?
			.to_bytes();
		Ok(serde_json::from_slice(&bytes)?)
	}

	async fn get_json(&self, url: &str, bearer: &str) -> FzResult<Value> {
		let req = hyper::Request::builder()
			.method(Method::GET)
			.uri(url)
			.header(hyper::header::AUTHORIZATION, format!("Bearer {}", bearer))
			.header(hyper::header::ACCEPT, "application/json")
			.header(hyper::header::USER_AGENT, "fazt")
			.body(Full::new(Bytes::new()))?;

		let response = tokio::time::timeout(EXCHANGE_TIMEOUT, self.client.request(req))
			.await
			.map_err(|_| Error::Timeout)??;
		if !response.status().is_success() {
			return Err(Error::InvalidCredentials);
		}
		let bytes = tokio::time::timeout(EXCHANGE_TIMEOUT, response.into_body().collect())
			.await
			.map_err(|_| Error::Timeout)?
			.map_err(|_| Error::NetworkError("oauth userinfo body".into()))?
			.to_bytes();
		Ok(serde_json::from_slice(&bytes)?)
	}

	/// Exchange the authorization code and fetch the user's profile.
	pub async fn exchange(
		&self,
		provider: Provider,
		root_domain: &str,
		https: bool,
		code: &str,
	) -> FzResult<OAuthProfile> {
		let config = self.provider_config(provider).await?;
		let scheme = if https { "https" } else { "http" };
		let callback = format!("{}://{}/auth/callback/{}", scheme, root_domain, provider.name());

		let token_response = self
			.post_form(
				provider.token_url(),
				&[
					("client_id", &config.client_id),
					("client_secret", &config.client_secret),
					("code", code),
					("grant_type", "authorization_code"),
					("redirect_uri", &callback),
				],
			)
			.await?;
		let access_token = token_response
			.get("access_token")
			.and_then(Value::as_str)
			.ok_or(Error::InvalidCredentials)?;

		let profile = self.get_json(provider.userinfo_url(), access_token).await?;
		Ok(match provider {
			Provider::Github => OAuthProfile {
				provider: "github".into(),
				provider_id: profile
					.get("id")
					.map(|id| id.to_string())
					.ok_or(Error::InvalidCredentials)?
					.into(),
				email: profile.get("email").and_then(Value::as_str).map(Into::into),
				name: profile
					.get("name")
					.and_then(Value::as_str)
					.or_else(|| profile.get("login").and_then(Value::as_str))
					.map(Into::into),
				avatar_url: profile.get("avatar_url").and_then(Value::as_str).map(Into::into),
			},
			Provider::Google => OAuthProfile {
				provider: "google".into(),
				provider_id: profile
					.get("sub")
					.and_then(Value::as_str)
					.ok_or(Error::InvalidCredentials)?
					.into(),
				email: profile.get("email").and_then(Value::as_str).map(Into::into),
				name: profile.get("name").and_then(Value::as_str).map(Into::into),
				avatar_url: profile.get("picture").and_then(Value::as_str).map(Into::into),
			},
		})
	}
}

/// A login redirect must land back on the root domain or one of its
/// subdomains; anything else is an open-redirect vector.
pub fn validate_redirect(redirect: &str, root_domain: &str) -> FzResult<()> {
	let url = Url::parse(redirect).map_err(|_| Error::Validation("invalid redirect".into()))?;
	let host = url.host_str().ok_or_else(|| Error::Validation("invalid redirect".into()))?;
	let ok = host == root_domain || host.ends_with(&format!(".{}", root_domain));
	if !ok {
		return Err(Error::Validation("redirect outside root domain".into()));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn provider_parsing() {
		assert_eq!(Provider::parse("github"), Some(Provider::Github));
		assert_eq!(Provider::parse("google"), Some(Provider::Google));
		assert_eq!(Provider::parse("gitlab"), None);
	}

	#[test]
	fn redirect_validation() {
		assert!(validate_redirect("https://blog.example.com/after", "example.com").is_ok());
		assert!(validate_redirect("https://example.com/", "example.com").is_ok());
		assert!(validate_redirect("https://evil.com/", "example.com").is_err());
		assert!(validate_redirect("https://notexample.com/", "example.com").is_err());
		assert!(validate_redirect("https://example.com.evil.com/", "example.com").is_err());
		assert!(validate_redirect("garbage", "example.com").is_err());
	}
}

// vim: ts=4
