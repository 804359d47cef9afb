//! progressd library - exposes modules for testing.

pub mod config;
pub mod hooks;
pub mod remote;
pub mod retry;
pub mod routes;
pub mod server;
pub mod service;
pub mod state;
pub mod store;
pub mod sync;

pub use service::ProgressionService;
