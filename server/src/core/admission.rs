//! Connection admission at the TCP layer.
//!
//! Wraps the raw listener before any HTTP code runs and enforces a global
//! and a per-source-IP cap on live connections. Header-read timeouts bound
//! how long a connection may dribble bytes, but they cannot stop a peer
//! from holding a task slot while sending nothing; rejecting at accept
//! keeps such connections away from the HTTP parser entirely.
//!
//! Rejection is a silent TCP close. An optional hook observes rejects.

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::pin::Pin;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::{TcpListener, TcpStream};

use crate::prelude::*;

pub const DEFAULT_MAX_PER_IP: usize = 50;
pub const DEFAULT_MAX_TOTAL: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
	TotalLimit,
	PerIpLimit,
}

pub type RejectHook = Box<dyn Fn(IpAddr, RejectReason) + Send + Sync>;

#[derive(Clone, Copy, Debug)]
pub struct AdmissionConfig {
	pub max_per_ip: usize,
	pub max_total: usize,
}

impl Default for AdmissionConfig {
	fn default() -> Self {
		Self { max_per_ip: DEFAULT_MAX_PER_IP, max_total: DEFAULT_MAX_TOTAL }
	}
}

/// Shared live-connection counters. The per-IP map mutex is held only
/// across the increment/decrement itself.
pub struct ConnGauge {
	config: AdmissionConfig,
	total: AtomicUsize,
	per_ip: Mutex<HashMap<IpAddr, usize>>,
	on_reject: Option<RejectHook>,
}

impl std::fmt::Debug for ConnGauge {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConnGauge")
			.field("config", &self.config)
			.field("total", &self.total.load(Ordering::Relaxed))
			.finish()
	}
}

impl ConnGauge {
	pub fn new(config: AdmissionConfig) -> Arc<ConnGauge> {
		Arc::new(ConnGauge { config, total: AtomicUsize::new(0), per_ip: Mutex::new(HashMap::new()), on_reject: None })
	}

	pub fn with_reject_hook(config: AdmissionConfig, hook: RejectHook) -> Arc<ConnGauge> {
		Arc::new(ConnGauge {
			config,
			total: AtomicUsize::new(0),
			per_ip: Mutex::new(HashMap::new()),
			on_reject: Some(hook),
		})
	}

	pub fn live_total(&self) -> usize {
		self.total.load(Ordering::Relaxed)
	}

	pub fn live_for_ip(&self, ip: IpAddr) -> usize {
		self.per_ip.lock().get(&ip).copied().unwrap_or(0)
	}

	/// Try to admit a connection from `ip`. On success returns a guard that
	/// decrements both counters exactly once when released or dropped.
	pub fn admit(self: &Arc<Self>, ip: IpAddr) -> Result<ConnGuard, RejectReason> {
		if self.total.fetch_add(1, Ordering::AcqRel) >= self.config.max_total {
			self.total.fetch_sub(1, Ordering::AcqRel);
			if let Some(hook) = &self.on_reject {
				hook(ip, RejectReason::TotalLimit);
			}
			return Err(RejectReason::TotalLimit);
		}

		{
			let mut per_ip = self.per_ip.lock();
			let count = per_ip.entry(ip).or_insert(0);
			if *count >= self.config.max_per_ip {
				drop(per_ip);
				self.total.fetch_sub(1, Ordering::AcqRel);
				if let Some(hook) = &self.on_reject {
					hook(ip, RejectReason::PerIpLimit);
				}
				return Err(RejectReason::PerIpLimit);
			}
			*count += 1;
		}

		Ok(ConnGuard { gauge: self.clone(), ip, released: AtomicBool::new(false) })
	}

	fn release(&self, ip: IpAddr) {
		self.total.fetch_sub(1, Ordering::AcqRel);
		let mut per_ip = self.per_ip.lock();
		match per_ip.get_mut(&ip) {
			Some(count) if *count > 1 => *count -= 1,
			Some(_) => {
				per_ip.remove(&ip);
			}
			None => {
				warn!("connection gauge underflow for {}", ip);
			}
		}
	}
}

/// Decrements the gauge exactly once, even under concurrent close attempts.
pub struct ConnGuard {
	gauge: Arc<ConnGauge>,
	ip: IpAddr,
	released: AtomicBool,
}

impl ConnGuard {
	pub fn release(&self) {
		if !self.released.swap(true, Ordering::AcqRel) {
			self.gauge.release(self.ip);
		}
	}
}

impl Drop for ConnGuard {
	fn drop(&mut self) {
		self.release();
	}
}

/// A tracked TCP connection: releases its gauge slot on close/drop.
pub struct TrackedStream {
	inner: TcpStream,
	guard: ConnGuard,
}

impl TrackedStream {
	pub fn guard(&self) -> &ConnGuard {
		&self.guard
	}
}

impl AsyncRead for TrackedStream {
	fn poll_read(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &mut ReadBuf<'_>,
	) -> Poll<io::Result<()>> {
		Pin::new(&mut self.inner).poll_read(cx, buf)
	}
}

impl AsyncWrite for TrackedStream {
	fn poll_write(
		mut self: Pin<&mut Self>,
		cx: &mut Context<'_>,
		buf: &[u8],
	) -> Poll<io::Result<usize>> {
		Pin::new(&mut self.inner).poll_write(cx, buf)
	}

	fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		Pin::new(&mut self.inner).poll_flush(cx)
	}

	fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
		let res = Pin::new(&mut self.inner).poll_shutdown(cx);
		if let Poll::Ready(Ok(())) = res {
			self.guard.release();
		}
		res
	}
}

/// Admission-gated TCP listener. Hands out only connections that pass the
/// caps; everything else is closed before the HTTP server sees it.
pub struct AdmissionListener {
	inner: TcpListener,
	gauge: Arc<ConnGauge>,
}

impl AdmissionListener {
	pub async fn bind(addr: SocketAddr, gauge: Arc<ConnGauge>) -> io::Result<AdmissionListener> {
		let domain =
			if addr.is_ipv6() { socket2::Domain::IPV6 } else { socket2::Domain::IPV4 };
		let socket =
			socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;
		socket.set_reuse_address(true)?;
		socket.set_nonblocking(true)?;
		// Don't wake the accept loop until the client has sent bytes.
		#[cfg(target_os = "linux")]
		if let Err(err) = socket.set_deferaccept(1) {
			warn!("TCP_DEFER_ACCEPT not available: {}", err);
		}
		socket.bind(&addr.into())?;
		socket.listen(1024)?;
		let inner = TcpListener::from_std(socket.into())?;
		Ok(AdmissionListener { inner, gauge })
	}

	pub fn from_listener(inner: TcpListener, gauge: Arc<ConnGauge>) -> AdmissionListener {
		AdmissionListener { inner, gauge }
	}

	pub fn gauge(&self) -> Arc<ConnGauge> {
		self.gauge.clone()
	}

	/// Accept the next admitted connection. Rejected and errored accepts are
	/// consumed here; the caller only ever sees admitted streams.
	pub async fn accept_admitted(&mut self) -> (TrackedStream, SocketAddr) {
		loop {
			match self.inner.accept().await {
				Ok((stream, peer)) => match self.gauge.admit(peer.ip()) {
					Ok(guard) => {
						let _ = stream.set_nodelay(true);
						return (TrackedStream { inner: stream, guard }, peer);
					}
					Err(reason) => {
						debug!("admission reject {:?} from {}", reason, peer.ip());
						drop(stream);
					}
				},
				Err(err) => {
					warn!("accept error: {}", err);
					tokio::time::sleep(std::time::Duration::from_millis(50)).await;
				}
			}
		}
	}
}

impl axum::serve::Listener for AdmissionListener {
	type Io = TrackedStream;
	type Addr = SocketAddr;

	async fn accept(&mut self) -> (Self::Io, Self::Addr) {
		self.accept_admitted().await
	}

	fn local_addr(&self) -> io::Result<Self::Addr> {
		self.inner.local_addr()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ip(s: &str) -> IpAddr {
		s.parse().unwrap()
	}

	#[test]
	fn per_ip_cap_enforced() {
		let gauge = ConnGauge::new(AdmissionConfig { max_per_ip: 1, max_total: 100 });

		let first = gauge.admit(ip("10.0.0.1")).unwrap();
		assert_eq!(gauge.admit(ip("10.0.0.1")).unwrap_err(), RejectReason::PerIpLimit);
		// Another IP is unaffected
		let _other = gauge.admit(ip("10.0.0.2")).unwrap();

		// Freeing the slot admits the next connection
		first.release();
		let _second = gauge.admit(ip("10.0.0.1")).unwrap();
		assert_eq!(gauge.admit(ip("10.0.0.1")).unwrap_err(), RejectReason::PerIpLimit);
	}

	#[test]
	fn total_cap_enforced() {
		let gauge = ConnGauge::new(AdmissionConfig { max_per_ip: 100, max_total: 2 });

		let _a = gauge.admit(ip("10.0.0.1")).unwrap();
		let _b = gauge.admit(ip("10.0.0.2")).unwrap();
		assert_eq!(gauge.admit(ip("10.0.0.3")).unwrap_err(), RejectReason::TotalLimit);
		assert_eq!(gauge.live_total(), 2);
	}

	#[test]
	fn slowloris_burst_leaves_room_for_others() {
		let gauge = ConnGauge::new(AdmissionConfig { max_per_ip: 50, max_total: 10_000 });

		let mut admitted = Vec::new();
		let mut rejected = 0;
		for _ in 0..200 {
			match gauge.admit(ip("10.0.0.1")) {
				Ok(guard) => admitted.push(guard),
				Err(_) => rejected += 1,
			}
		}
		assert_eq!(admitted.len(), 50);
		assert_eq!(rejected, 150);

		// The well-behaved client still gets in
		assert!(gauge.admit(ip("10.0.0.2")).is_ok());
	}

	#[test]
	fn release_is_idempotent() {
		let gauge = ConnGauge::new(AdmissionConfig { max_per_ip: 10, max_total: 10 });
		let guard = gauge.admit(ip("10.0.0.1")).unwrap();
		assert_eq!(gauge.live_total(), 1);

		guard.release();
		guard.release();
		drop(guard);
		assert_eq!(gauge.live_total(), 0);
		assert_eq!(gauge.live_for_ip(ip("10.0.0.1")), 0);
	}

	#[test]
	fn concurrent_release_decrements_once() {
		let gauge = ConnGauge::new(AdmissionConfig { max_per_ip: 10, max_total: 10 });
		let guard = Arc::new(gauge.admit(ip("10.0.0.1")).unwrap());

		let handles: Vec<_> = (0..8)
			.map(|_| {
				let guard = guard.clone();
				std::thread::spawn(move || guard.release())
			})
			.collect();
		for handle in handles {
			handle.join().unwrap();
		}
		assert_eq!(gauge.live_total(), 0);
	}

	#[test]
	fn reject_hook_fires() {
		let hits = Arc::new(AtomicUsize::new(0));
		let hook_hits = hits.clone();
		let gauge = ConnGauge::with_reject_hook(
			AdmissionConfig { max_per_ip: 1, max_total: 100 },
			Box::new(move |_ip, _reason| {
				hook_hits.fetch_add(1, Ordering::Relaxed);
			}),
		);

		let _a = gauge.admit(ip("10.0.0.1")).unwrap();
		let _ = gauge.admit(ip("10.0.0.1"));
		let _ = gauge.admit(ip("10.0.0.1"));
		assert_eq!(hits.load(Ordering::Relaxed), 2);
	}
}

// vim: ts=4
