//! Library crate for self-scan-rs: admission-controlled scan queue, full-range port scanner and result store.
pub mod average;
pub mod config;
pub mod error;
#[cfg(unix)]
pub mod qsock;
pub mod queue;
pub mod report;
pub mod scanner;
pub mod server;
pub mod service;
pub mod store;
pub mod types;
