//! Outbound network access and CPU-bound media operations exposed to
//! handlers.

pub mod fetch;
pub mod image;

pub use fetch::NetFetch;

// vim: ts=4
