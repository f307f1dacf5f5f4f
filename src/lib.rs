#![recursion_limit = "256"]
#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]

//! Turns stored cluster credential records into tuned, authenticated HTTP
//! transports for talking to Kubernetes API servers.
//!
//! The flow is two steps. [`kubernetes::resolve`] picks exactly one
//! authentication strategy for a [`Cluster`] and produces a plain
//! [`kubernetes::Config`]. [`kubernetes::TransportTuner`] then folds that
//! config into a pooled, rate-limited, authenticated
//! [`kubernetes::Transport`].

#[macro_use]
extern crate tracing;

#[macro_use]
pub mod internal_events;
pub mod cluster;
pub mod config;
pub mod http;
pub mod kubernetes;
#[cfg(test)]
pub mod test_util;
pub mod tls;

pub use cluster::Cluster;

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

pub fn get_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
