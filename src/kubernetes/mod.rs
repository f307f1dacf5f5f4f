//! Cluster credential resolution and transport construction.

use snafu::Snafu;

pub mod client;
mod environment;
mod resolve;
mod tune;

pub use client::{Config, Credentials, Transport};
pub use environment::{Environment, FAKE_IN_CLUSTER_ENV, KUBECONFIG_ENV, SERVICE_ACCOUNT_DIR};
pub use resolve::{ResolveError, Strategy, resolve};
pub use tune::{TransportTuner, TuneError, TunedConfig};

pub use crate::config::TuningConfig;

/// Either step of turning a cluster record into a transport failed.
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(context(false), display("{}", source))]
    Resolve { source: ResolveError },
    #[snafu(context(false), display("{}", source))]
    Tune { source: TuneError },
}
