use std::{ffi::OsString, path::PathBuf};

/// Setting this to `true` makes a cluster whose server is the in-cluster
/// address load from the kubeconfig file (`$KUBECONFIG`, falling back to
/// `$HOME/.kube/config`). Other servers are unaffected.
pub const FAKE_IN_CLUSTER_ENV: &str = "FAKE_IN_CLUSTER_CONFIG";

pub const KUBECONFIG_ENV: &str = "KUBECONFIG";

pub const SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// The process environment credential resolution depends on.
///
/// Captured once so resolution itself never reads globals.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Environment {
    pub fake_in_cluster: bool,
    pub kubeconfig: Option<PathBuf>,
    pub home: Option<PathBuf>,
    pub service_host: Option<String>,
    pub service_port: Option<String>,
    pub service_account_dir: PathBuf,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            fake_in_cluster: false,
            kubeconfig: None,
            home: None,
            service_host: None,
            service_port: None,
            service_account_dir: SERVICE_ACCOUNT_DIR.into(),
        }
    }
}

impl Environment {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var_os(key))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.is_empty());
        let string = |key: &str| non_empty(key).and_then(|value| value.into_string().ok());
        Self {
            fake_in_cluster: lookup(FAKE_IN_CLUSTER_ENV).is_some_and(|value| value == "true"),
            kubeconfig: non_empty(KUBECONFIG_ENV).map(PathBuf::from),
            home: non_empty("HOME").map(PathBuf::from),
            service_host: string("KUBERNETES_SERVICE_HOST"),
            service_port: string("KUBERNETES_SERVICE_PORT"),
            service_account_dir: SERVICE_ACCOUNT_DIR.into(),
        }
    }

    /// `$KUBECONFIG`, or `$HOME/.kube/config`.
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig.clone().unwrap_or_else(|| {
            self.home
                .clone()
                .unwrap_or_default()
                .join(".kube")
                .join("config")
        })
    }
}
