//! Reconstruct the revision history of PmWiki pages into per-page JSON archives.

pub mod config;
pub mod convert;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod history;
pub mod model;
pub mod runtime;
pub mod session;
