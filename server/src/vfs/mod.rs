//! Virtual filesystem: app files stored as database rows, served like a
//! static site.

pub mod cache;
pub mod mime;
pub mod serve;

pub use cache::VfsCache;
pub use serve::serve_path;

// vim: ts=4
