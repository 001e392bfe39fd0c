//! Read-side access to cached data for offline use.
//!
//! `CacheAccessor` serves entities from the latest committed snapshot held
//! in memory. It never triggers a sync and never fails: before the first
//! successful sync, or when the stored snapshot is unreadable, it simply
//! returns empty results.

pub mod accessor;

pub use accessor::CacheAccessor;
