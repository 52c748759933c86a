pub mod classify;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
pub mod query;
pub mod sanitize;
pub mod session;
pub mod store;
pub mod tracker;
pub mod writer;
