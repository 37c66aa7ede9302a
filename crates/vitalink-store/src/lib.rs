//! # vitalink-store
//!
//! Local cache layer over SQLite. One key-value table holds cached
//! conversations, message pages, user profiles, and last-seen markers,
//! each entry stamped with its write time and namespaced by a schema
//! version so a version bump implicitly invalidates everything.
//!
//! The public [`CacheStore`] API never raises: a failed write reports
//! `false`, a failed or expired read reports `None`, and the reason is
//! logged. Callers treat those as "cache unavailable", not as errors.

pub mod cache;
pub mod database;
pub mod keys;
pub mod migrations;

mod error;

pub use cache::CacheStore;
pub use database::Database;
pub use error::StoreError;
