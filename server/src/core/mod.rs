//! Core subsystem. This handles the request-path infrastructure of Fazt.

pub mod admission;
pub mod app;
pub mod extract;
pub mod limits;
pub mod middleware;
pub mod rate_limit;
pub mod router;
pub mod utils;
pub mod webserver;
pub mod worker;

pub use crate::core::extract::{Auth, AuthCtx, OptionalAuth, TenantCtx};

// vim: ts=4
