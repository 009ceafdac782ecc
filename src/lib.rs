//! Cache-first write-behind persistence for chats and messages.
//!
//! Reads go through [`cache::CacheStore::get_cached`]; new chats and messages
//! are written to the cache immediately and persisted to PostgreSQL by the
//! [`write_behind::WriteBehindQueue`] worker.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
pub mod write_behind;
