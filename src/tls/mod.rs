use openssl::{
    error::ErrorStack,
    ssl::{SslConnector, SslConnectorBuilder, SslMethod},
};
use snafu::{ResultExt, Snafu};

mod settings;

pub use settings::TlsSettings;

pub type Result<T> = std::result::Result<T, TlsError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TlsError {
    #[snafu(display("Could not parse certificate authority data: {}", source))]
    ParseAuthorities { source: ErrorStack },
    #[snafu(display("Could not parse client certificate data: {}", source))]
    ParseCertificate { source: ErrorStack },
    #[snafu(display("Could not parse client key data: {}", source))]
    ParsePrivateKey { source: ErrorStack },
    #[snafu(display("Client certificate data was provided without key data"))]
    MissingKey,
    #[snafu(display("Client key data was provided without certificate data"))]
    MissingCertificate,
    #[snafu(display("Could not compare client certificate and key: {}", source))]
    CompareKeys { source: ErrorStack },
    #[snafu(display("Client key does not match the client certificate"))]
    KeyMismatch,
    #[snafu(display("Could not build TLS connector: {}", source))]
    TlsBuildConnector { source: ErrorStack },
    #[snafu(display("Could not set TLS certificate: {}", source))]
    SetCertificate { source: ErrorStack },
    #[snafu(display("Could not set TLS private key: {}", source))]
    SetPrivateKey { source: ErrorStack },
    #[snafu(display("Could not create new certificate store: {}", source))]
    NewStoreBuilder { source: ErrorStack },
    #[snafu(display("Could not add certificate to store: {}", source))]
    AddCertToStore { source: ErrorStack },
    #[snafu(display("Could not set verify certificate store: {}", source))]
    SetVerifyCert { source: ErrorStack },
}

pub fn tls_connector_builder(settings: &TlsSettings) -> Result<SslConnectorBuilder> {
    let mut builder = SslConnector::builder(SslMethod::tls_client()).context(TlsBuildConnectorSnafu)?;
    settings.apply_context(&mut builder)?;
    Ok(builder)
}
