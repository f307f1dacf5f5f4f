use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};

use super::InternalEvent;
use super::prelude::{error_stage, error_type};

#[derive(Debug)]
pub struct ExecCredentialFetched<'a> {
    pub command: &'a str,
    pub expires_at: Option<DateTime<Utc>>,
    pub elapsed: Duration,
}

impl InternalEvent for ExecCredentialFetched<'_> {
    fn emit(self) {
        debug!(
            message = "Fetched exec credential.",
            command = %self.command,
            expires_at = ?self.expires_at,
            elapsed_millis = %self.elapsed.as_millis(),
        );
        counter!("exec_credential_fetches_total", "command" => self.command.to_owned())
            .increment(1);
        histogram!(
            "exec_credential_fetch_duration_seconds",
            "command" => self.command.to_owned(),
        )
        .record(self.elapsed);
    }
}

#[derive(Debug)]
pub struct ExecCredentialError<'a, E> {
    pub command: &'a str,
    pub error: &'a E,
}

impl<E: std::fmt::Display> InternalEvent for ExecCredentialError<'_, E> {
    fn emit(self) {
        error!(
            message = "Unable to obtain exec credential.",
            command = %self.command,
            error = %self.error,
            error_type = error_type::COMMAND_FAILED,
            stage = error_stage::SENDING,
        );
        counter!(
            "component_errors_total",
            "command" => self.command.to_owned(),
            "error_type" => error_type::COMMAND_FAILED,
            "stage" => error_stage::SENDING,
        )
        .increment(1);
    }

    fn name(&self) -> Option<&'static str> {
        Some("ExecCredentialError")
    }
}

/// The API server refused a plugin issued token.
#[derive(Debug)]
pub struct ExecCredentialRejected<'a> {
    pub command: &'a str,
}

impl InternalEvent for ExecCredentialRejected<'_> {
    fn emit(self) {
        info!(
            message = "Exec credential was rejected, it will be refreshed on next use.",
            command = %self.command,
        );
        counter!("exec_credential_rejections_total", "command" => self.command.to_owned())
            .increment(1);
    }
}
