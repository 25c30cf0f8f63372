//! Tenant storage support types shared between the capability surface and
//! the store adapters.

pub mod query;

// vim: ts=4
