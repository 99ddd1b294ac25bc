//! Parley API Library Crate
//!
//! HTTP surface around `parley-core`: configuration, persistence, the shared
//! application state, the chat handlers and routing. The `api` binary is a
//! thin wrapper around this library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod store;
