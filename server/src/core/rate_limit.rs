//! Login rate limiting.
//!
//! Fixed 15-minute window per source IP: five failed logins lock the IP
//! out for 15 minutes. Reported as 429 with `Retry-After`.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::prelude::*;

const WINDOW: Duration = Duration::from_secs(15 * 60);
const LOCKOUT: Duration = Duration::from_secs(15 * 60);
const MAX_FAILURES: u32 = 5;
/// Entries beyond this are evicted oldest-window-first.
const MAX_TRACKED_IPS: usize = 50_000;

#[derive(Debug, Clone)]
struct IpWindow {
	window_start: Instant,
	failures: u32,
	locked_until: Option<Instant>,
}

#[derive(Debug, Default)]
pub struct LoginLimiter {
	windows: Mutex<HashMap<IpAddr, IpWindow>>,
}

impl LoginLimiter {
	pub fn new() -> LoginLimiter {
		LoginLimiter::default()
	}

	/// Gate an authentication attempt. Locked IPs get `RateLimited` with
	/// the remaining lockout as `Retry-After`.
	pub fn check(&self, ip: IpAddr) -> FzResult<()> {
		let mut windows = self.windows.lock();
		let Some(state) = windows.get_mut(&ip) else { return Ok(()) };

		if let Some(until) = state.locked_until {
			let now = Instant::now();
			if now < until {
				let retry_after_secs = (until - now).as_secs().max(1);
				return Err(Error::RateLimited { retry_after_secs });
			}
			windows.remove(&ip);
		}
		Ok(())
	}

	/// Record a failed login. The fifth failure inside the window engages
	/// the lockout.
	pub fn record_failure(&self, ip: IpAddr) {
		let now = Instant::now();
		let mut windows = self.windows.lock();

		if windows.len() >= MAX_TRACKED_IPS && !windows.contains_key(&ip) {
			if let Some(oldest) =
				windows.iter().min_by_key(|(_, w)| w.window_start).map(|(ip, _)| *ip)
			{
				windows.remove(&oldest);
			}
		}

		let state = windows
			.entry(ip)
			.or_insert(IpWindow { window_start: now, failures: 0, locked_until: None });
		if now.duration_since(state.window_start) > WINDOW {
			state.window_start = now;
			state.failures = 0;
		}
		state.failures += 1;
		if state.failures >= MAX_FAILURES {
			warn!("login lockout for {} after {} failures", ip, state.failures);
			state.locked_until = Some(now + LOCKOUT);
		}
	}

	/// A successful login clears the window.
	pub fn record_success(&self, ip: IpAddr) {
		self.windows.lock().remove(&ip);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ip(s: &str) -> IpAddr {
		s.parse().unwrap()
	}

	#[test]
	fn five_failures_lock_out() {
		let limiter = LoginLimiter::new();
		let addr = ip("10.0.0.1");

		for _ in 0..4 {
			limiter.record_failure(addr);
			assert!(limiter.check(addr).is_ok());
		}
		limiter.record_failure(addr);
		match limiter.check(addr) {
			Err(Error::RateLimited { retry_after_secs }) => {
				assert!(retry_after_secs > 0 && retry_after_secs <= 15 * 60);
			}
			other => panic!("expected RateLimited, got {:?}", other),
		}
	}

	#[test]
	fn other_ips_unaffected() {
		let limiter = LoginLimiter::new();
		for _ in 0..5 {
			limiter.record_failure(ip("10.0.0.1"));
		}
		assert!(limiter.check(ip("10.0.0.2")).is_ok());
	}

	#[test]
	fn success_clears_window() {
		let limiter = LoginLimiter::new();
		let addr = ip("10.0.0.1");
		for _ in 0..4 {
			limiter.record_failure(addr);
		}
		limiter.record_success(addr);
		for _ in 0..4 {
			limiter.record_failure(addr);
		}
		assert!(limiter.check(addr).is_ok());
	}
}

// vim: ts=4
