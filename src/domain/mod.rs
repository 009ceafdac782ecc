//! Chat and message records shared by the cache and the store.

pub mod entities;
pub mod types;
