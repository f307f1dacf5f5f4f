use openssl::{
    error::ErrorStack,
    pkey::{PKey, Private},
    ssl::{ConnectConfiguration, SslContextBuilder, SslVerifyMode},
    x509::{X509, store::X509StoreBuilder},
};
use snafu::ResultExt;

use super::{
    AddCertToStoreSnafu, CompareKeysSnafu, NewStoreBuilderSnafu, ParseAuthoritiesSnafu,
    ParseCertificateSnafu, ParsePrivateKeySnafu, Result, SetCertificateSnafu,
    SetPrivateKeySnafu, SetVerifyCertSnafu, TlsError,
};
use crate::cluster::TlsClientConfig;

const PEM_START_MARKER: &str = "-----BEGIN ";

/// Directly usable settings for TLS connectors.
#[derive(Clone)]
pub struct TlsSettings {
    verify_certificate: bool,
    verify_hostname: bool,
    server_name: Option<String>,
    authorities: Vec<X509>,
    identity: Option<Identity>,
}

#[derive(Clone)]
struct Identity {
    cert: X509,
    key: PKey<Private>,
}

impl TlsSettings {
    /// Parses the embedded certificate material of a cluster's TLS block.
    ///
    /// Certificate authorities may be a bundle of PEM certificates or a single
    /// DER certificate. With no authorities the system trust store is used.
    pub fn from_client_config(config: &TlsClientConfig) -> Result<Self> {
        if config.insecure {
            warn!(
                message = "TLS certificate verification is DISABLED, this may lead to security vulnerabilities."
            );
        }

        Ok(Self {
            verify_certificate: !config.insecure,
            verify_hostname: !config.insecure,
            server_name: (!config.server_name.is_empty()).then(|| config.server_name.clone()),
            authorities: load_authorities(&config.ca_data)?,
            identity: load_identity(&config.cert_data, &config.key_data)?,
        })
    }

    pub const fn verify_certificate(&self) -> bool {
        self.verify_certificate
    }

    pub fn authorities(&self) -> usize {
        self.authorities.len()
    }

    pub const fn has_identity(&self) -> bool {
        self.identity.is_some()
    }

    pub(super) fn apply_context(&self, context: &mut SslContextBuilder) -> Result<()> {
        context.set_verify(if self.verify_certificate {
            SslVerifyMode::PEER | SslVerifyMode::FAIL_IF_NO_PEER_CERT
        } else {
            SslVerifyMode::NONE
        });
        if let Some(identity) = &self.identity {
            context
                .set_certificate(&identity.cert)
                .context(SetCertificateSnafu)?;
            context
                .set_private_key(&identity.key)
                .context(SetPrivateKeySnafu)?;
        }
        if !self.authorities.is_empty() {
            let mut store = X509StoreBuilder::new().context(NewStoreBuilderSnafu)?;
            for authority in &self.authorities {
                store
                    .add_cert(authority.clone())
                    .context(AddCertToStoreSnafu)?;
            }
            context
                .set_verify_cert_store(store.build())
                .context(SetVerifyCertSnafu)?;
        } else {
            debug!("Using system root certs.");
        }

        Ok(())
    }

    /// Applies per connection settings. A configured server name replaces the
    /// contacted host for both SNI and certificate hostname checks.
    pub fn apply_connect_configuration(
        &self,
        connection: &mut ConnectConfiguration,
    ) -> std::result::Result<(), ErrorStack> {
        match &self.server_name {
            None => connection.set_verify_hostname(self.verify_hostname),
            Some(server_name) => {
                connection.set_verify_hostname(false);
                connection.set_use_server_name_indication(false);
                connection.set_hostname(server_name)?;
                if self.verify_hostname {
                    connection.param_mut().set_host(server_name)?;
                }
            }
        }
        Ok(())
    }
}

fn load_authorities(data: &[u8]) -> Result<Vec<X509>> {
    if data.is_empty() {
        return Ok(vec![]);
    }
    der_or_pem(
        data,
        |der| X509::from_der(der).map(|x509| vec![x509]),
        |pem| {
            pem.match_indices(PEM_START_MARKER)
                .map(|(start, _)| X509::from_pem(pem[start..].as_bytes()))
                .collect()
        },
    )
    .context(ParseAuthoritiesSnafu)
}

fn load_identity(cert: &[u8], key: &[u8]) -> Result<Option<Identity>> {
    match (cert.is_empty(), key.is_empty()) {
        (true, true) => Ok(None),
        (true, false) => Err(TlsError::MissingCertificate),
        (false, true) => Err(TlsError::MissingKey),
        (false, false) => {
            let cert = der_or_pem(cert, X509::from_der, |pem| X509::from_pem(pem.as_bytes()))
                .context(ParseCertificateSnafu)?;
            let key = der_or_pem(key, PKey::private_key_from_der, |pem| {
                PKey::private_key_from_pem(pem.as_bytes())
            })
            .context(ParsePrivateKeySnafu)?;

            let public = cert.public_key().context(CompareKeysSnafu)?;
            if !public.public_eq(&key) {
                return Err(TlsError::KeyMismatch);
            }

            Ok(Some(Identity { cert, key }))
        }
    }
}

fn der_or_pem<T>(data: &[u8], der_fn: impl Fn(&[u8]) -> T, pem_fn: impl Fn(&str) -> T) -> T {
    match std::str::from_utf8(data) {
        Ok(text) if text.contains(PEM_START_MARKER) => pem_fn(text),
        _ => der_fn(data),
    }
}
