//! Loading configuration from kubeconfig files.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use http::{Uri, uri::InvalidUri};
use kube::config::{AuthInfo, KubeConfigOptions, Kubeconfig, KubeconfigError};
use openssl::{base64, error::ErrorStack, x509::X509};
use secrecy::ExposeSecret;
use snafu::{ResultExt, Snafu};

use super::{Config, Credentials};
use crate::{
    cluster::TlsClientConfig, internal_events::KubeConfigLoaded,
    kubernetes::client::auth::ExecConfig,
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("unable to read {}: {}", path.display(), source))]
    Read {
        path: PathBuf,
        source: KubeconfigError,
    },
    #[snafu(display("no current context is set and the file defines {} contexts", count))]
    NoCurrentContext { count: usize },
    #[snafu(display("unable to load context {:?}: {}", context, source))]
    Load {
        context: String,
        source: KubeconfigError,
    },
    #[snafu(display("invalid server URL {:?}: {}", server, source))]
    InvalidServer { server: String, source: InvalidUri },
    #[snafu(display("unable to read referenced file {}: {}", path.display(), source))]
    ReadReferenced {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("invalid {}: {}", field, source))]
    InvalidData {
        field: &'static str,
        source: ErrorStack,
    },
}

impl Config {
    /// Builds the configuration of the current context of a kubeconfig file.
    pub async fn from_kubeconfig_file(path: &Path) -> Result<Self, Error> {
        let kubeconfig = Kubeconfig::read_from(path).context(ReadSnafu { path })?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let (context, config) = load(kubeconfig, base_dir).await?;
        emit!(KubeConfigLoaded {
            path,
            context: &context,
        });
        Ok(config)
    }
}

/// Loads the current context of `kubeconfig`, or its only context when none
/// is set. Relative file references are resolved against `base_dir`.
/// Returns the name of the context used.
pub async fn load(mut kubeconfig: Kubeconfig, base_dir: &Path) -> Result<(String, Config), Error> {
    let context = match kubeconfig.current_context.as_deref() {
        Some(name) if !name.is_empty() => name.to_owned(),
        _ => match kubeconfig.contexts.as_slice() {
            [only] => only.name.clone(),
            contexts => {
                return Err(Error::NoCurrentContext {
                    count: contexts.len(),
                });
            }
        },
    };
    resolve_paths(&mut kubeconfig, base_dir);

    let options = KubeConfigOptions {
        context: Some(context.clone()),
        ..Default::default()
    };
    let loaded = kube::Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .context(LoadSnafu {
            context: context.clone(),
        })?;
    Ok((context, from_kube_config(loaded)?))
}

fn resolve_paths(kubeconfig: &mut Kubeconfig, base_dir: &Path) {
    let resolve = |file: &mut Option<String>| {
        if let Some(file) = file {
            *file = base_dir.join(file.as_str()).to_string_lossy().into_owned();
        }
    };
    for cluster in kubeconfig
        .clusters
        .iter_mut()
        .filter_map(|named| named.cluster.as_mut())
    {
        resolve(&mut cluster.certificate_authority);
    }
    for user in kubeconfig
        .auth_infos
        .iter_mut()
        .filter_map(|named| named.auth_info.as_mut())
    {
        resolve(&mut user.client_certificate);
        resolve(&mut user.client_key);
        resolve(&mut user.token_file);
    }
}

fn from_kube_config(config: kube::Config) -> Result<Config, Error> {
    let server = config.cluster_url.to_string();
    let host = server
        .parse::<Uri>()
        .context(InvalidServerSnafu { server })?;

    // Authorities arrive DER encoded, one per certificate.
    let ca_data = config
        .root_cert
        .unwrap_or_default()
        .iter()
        .map(|der| X509::from_der(der).and_then(|cert| cert.to_pem()))
        .collect::<Result<Vec<_>, _>>()
        .context(InvalidDataSnafu {
            field: "certificate authority",
        })?
        .concat();

    let user = config.auth_info;
    let key_data = user
        .client_key_data
        .as_ref()
        .map(|key| key.expose_secret().to_owned());
    let tls = TlsClientConfig {
        insecure: config.accept_invalid_certs,
        server_name: config.tls_server_name.unwrap_or_default(),
        cert_data: data_or_file(
            user.client_certificate_data.as_deref(),
            user.client_certificate.as_deref(),
            "client certificate",
        )?,
        key_data: data_or_file(key_data.as_deref(), user.client_key.as_deref(), "client key")?,
        ca_data,
    };

    Ok(Config {
        host,
        tls,
        credentials: credentials(&user)?,
    })
}

fn credentials(user: &AuthInfo) -> Result<Credentials, Error> {
    if let Some(exec) = &user.exec {
        let env: HashMap<String, String> = exec
            .env
            .iter()
            .flatten()
            .filter_map(|var| Some((var.get("name")?.clone(), var.get("value")?.clone())))
            .collect();
        return Ok(Credentials::Exec(ExecConfig::build(
            exec.command.clone().unwrap_or_default(),
            exec.args.clone().unwrap_or_default(),
            exec.api_version.clone().unwrap_or_default(),
            env,
        )));
    }

    let token = user
        .token
        .as_ref()
        .map(|token| token.expose_secret().to_owned())
        .filter(|token| !token.is_empty());
    let bearer_token = match (token, &user.token_file) {
        (Some(token), _) => token,
        (None, Some(file)) => {
            let path = PathBuf::from(file);
            std::fs::read_to_string(&path)
                .context(ReadReferencedSnafu { path })?
                .trim()
                .to_owned()
        }
        (None, None) => String::new(),
    };

    Ok(Credentials::Static {
        username: user.username.clone().unwrap_or_default(),
        password: user
            .password
            .as_ref()
            .map(|password| password.expose_secret().to_owned())
            .unwrap_or_default(),
        bearer_token,
    })
}

/// Inline base64 data wins over a file reference.
fn data_or_file(
    data: Option<&str>,
    file: Option<&str>,
    field: &'static str,
) -> Result<Vec<u8>, Error> {
    match (data, file) {
        (Some(data), _) if !data.is_empty() => {
            base64::decode_block(data.trim()).context(InvalidDataSnafu { field })
        }
        (_, Some(file)) if !file.is_empty() => {
            let path = PathBuf::from(file);
            std::fs::read(&path).context(ReadReferencedSnafu { path })
        }
        _ => Ok(Vec::new()),
    }
}
