//! Application services: cached read paths and the persistence contracts.

pub mod chats;
pub mod error;
pub mod pagination;
pub mod repos;
