use metrics::counter;

use super::InternalEvent;
use super::prelude::{error_stage, error_type};

#[derive(Debug)]
pub struct CredentialStrategySelected<'a> {
    pub cluster: &'a str,
    pub strategy: &'static str,
}

impl InternalEvent for CredentialStrategySelected<'_> {
    fn emit(self) {
        debug!(
            message = "Selected credential strategy.",
            cluster = %self.cluster,
            strategy = self.strategy,
        );
        counter!("credential_resolutions_total", "strategy" => self.strategy).increment(1);
    }
}

#[derive(Debug)]
pub struct CredentialResolutionError<'a, E> {
    pub cluster: &'a str,
    pub strategy: &'static str,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for CredentialResolutionError<'_, E> {
    fn emit(self) {
        error!(
            message = "Failed to resolve cluster credentials.",
            cluster = %self.cluster,
            strategy = self.strategy,
            error = %self.error,
            error_type = error_type::CONFIGURATION_FAILED,
            stage = error_stage::RESOLVING,
        );
        counter!(
            "component_errors_total",
            "strategy" => self.strategy,
            "error_type" => error_type::CONFIGURATION_FAILED,
            "stage" => error_stage::RESOLVING,
        )
        .increment(1);
    }

    fn name(&self) -> Option<&'static str> {
        Some("CredentialResolutionError")
    }
}

#[derive(Debug)]
pub struct KubeConfigLoaded<'a> {
    pub path: &'a std::path::Path,
    pub context: &'a str,
}

impl InternalEvent for KubeConfigLoaded<'_> {
    fn emit(self) {
        debug!(
            message = "Loaded kubeconfig.",
            path = %self.path.display(),
            context = %self.context,
        );
    }
}

#[derive(Debug)]
pub struct TransportTuned<'a> {
    pub host: &'a http::Uri,
    pub qps: u32,
    pub burst: u32,
    pub max_connections: usize,
    pub auth: &'static str,
}

impl InternalEvent for TransportTuned<'_> {
    fn emit(self) {
        debug!(
            message = "Built cluster transport.",
            host = %self.host,
            qps = self.qps,
            burst = self.burst,
            max_connections = self.max_connections,
            auth = self.auth,
        );
        counter!("transports_built_total", "auth" => self.auth).increment(1);
    }
}

#[derive(Debug)]
pub struct TransportTuneError<'a, E> {
    pub host: &'a http::Uri,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for TransportTuneError<'_, E> {
    fn emit(self) {
        error!(
            message = "Failed to build cluster transport.",
            host = %self.host,
            error = %self.error,
            error_type = error_type::CONFIGURATION_FAILED,
            stage = error_stage::BUILDING,
        );
        counter!(
            "component_errors_total",
            "error_type" => error_type::CONFIGURATION_FAILED,
            "stage" => error_stage::BUILDING,
        )
        .increment(1);
    }

    fn name(&self) -> Option<&'static str> {
        Some("TransportTuneError")
    }
}
