use headers::Authorization;
use http::uri::InvalidUri;
use hyper_proxy::{Custom, Intercept, Proxy, ProxyConnector};
use no_proxy::NoProxy;
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct NoProxyInterceptor(NoProxy);

impl NoProxyInterceptor {
    fn intercept(self, expected_scheme: &'static str) -> Intercept {
        Intercept::Custom(Custom::from(
            move |scheme: Option<&str>, host: Option<&str>, port: Option<u16>| {
                if scheme.is_some() && scheme != Some(expected_scheme) {
                    return false;
                }
                let matches = host.is_some_and(|host| {
                    self.0.matches(host)
                        || port.is_some_and(|port| {
                            let url = format!("{host}:{port}");
                            self.0.matches(&url)
                        })
                });
                // only intercept those that don't match
                !matches
            },
        ))
    }
}

/// Proxy configuration.
///
/// Traffic to the API server goes through an HTTP(S) proxy when one is
/// configured for the request's scheme and the host isn't listed in
/// `no_proxy`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Enables proxying support.
    #[serde(default = "ProxyConfig::default_enabled")]
    pub enabled: bool,

    /// Proxy endpoint to use when proxying HTTP traffic.
    #[serde(default)]
    pub http: Option<String>,

    /// Proxy endpoint to use when proxying HTTPS traffic.
    #[serde(default)]
    pub https: Option<String>,

    /// Hosts, domains, IP addresses and CIDR blocks to reach directly.
    #[serde(default)]
    pub no_proxy: NoProxy,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            enabled: Self::default_enabled(),
            http: None,
            https: None,
            no_proxy: NoProxy::default(),
        }
    }
}

impl ProxyConfig {
    const fn default_enabled() -> bool {
        true
    }

    /// Reads `HTTP_PROXY`, `HTTPS_PROXY` and `NO_PROXY` from the process
    /// environment, preferring the lowercase spelling of each.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let from_env =
            |key: &str| lookup(&key.to_lowercase()).or_else(|| lookup(&key.to_uppercase()));
        Self {
            enabled: true,
            http: from_env("HTTP_PROXY"),
            https: from_env("HTTPS_PROXY"),
            no_proxy: from_env("NO_PROXY").map(NoProxy::from).unwrap_or_default(),
        }
    }

    /// A configuration that never proxies.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    fn interceptor(&self) -> NoProxyInterceptor {
        NoProxyInterceptor(self.no_proxy.clone())
    }

    fn build_proxy(
        &self,
        proxy_scheme: &'static str,
        proxy_url: &Option<String>,
    ) -> Result<Option<Proxy>, InvalidUri> {
        proxy_url
            .as_ref()
            .map(|url| {
                url.parse().map(|parsed| {
                    let mut proxy = Proxy::new(self.interceptor().intercept(proxy_scheme), parsed);
                    if let Ok(authority) = Url::parse(url)
                        && let Some(password) = authority.password()
                    {
                        proxy.set_authorization(Authorization::basic(
                            authority.username(),
                            password,
                        ));
                    }
                    proxy
                })
            })
            .transpose()
    }

    fn http_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("http", &self.http)
    }

    fn https_proxy(&self) -> Result<Option<Proxy>, InvalidUri> {
        self.build_proxy("https", &self.https)
    }

    /// Install the proxies of this `ProxyConfig` into a [`ProxyConnector<C>`].
    ///
    /// # Errors
    ///
    /// Fails if a configured proxy URL isn't a valid URI.
    pub fn configure<C>(&self, connector: &mut ProxyConnector<C>) -> Result<(), InvalidUri> {
        if self.enabled {
            if let Some(proxy) = self.http_proxy()? {
                connector.add_proxy(proxy);
            }
            if let Some(proxy) = self.https_proxy()? {
                connector.add_proxy(proxy);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use http::Uri;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn reads_environment() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("HTTP_PROXY", "http://1.2.3.4:3128"),
            ("HTTPS_PROXY", "http://2.3.4.5:3128"),
            ("NO_PROXY", "localhost,.svc"),
        ]));

        assert!(config.enabled);
        assert_eq!(config.http.as_deref(), Some("http://1.2.3.4:3128"));
        assert_eq!(config.https.as_deref(), Some("http://2.3.4.5:3128"));
        assert!(config.no_proxy.matches("localhost"));
        assert!(config.no_proxy.matches("kubernetes.default.svc"));
        assert!(!config.no_proxy.matches("example.com"));
    }

    #[test]
    fn lowercase_takes_precedence() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("HTTPS_PROXY", "http://upper:3128"),
            ("https_proxy", "http://lower:3128"),
        ]));

        assert_eq!(config.https.as_deref(), Some("http://lower:3128"));
        assert_eq!(config.http, None);
    }

    #[test]
    fn no_proxy_skips_interception() {
        let config = ProxyConfig::from_lookup(lookup(&[
            ("HTTPS_PROXY", "http://proxy:3128"),
            ("NO_PROXY", "10.0.0.0/8,internal.example.com"),
        ]));
        let proxy = config.https_proxy().unwrap().unwrap();

        let direct: Uri = "https://10.1.2.3:6443".parse().unwrap();
        let proxied: Uri = "https://api.example.com".parse().unwrap();
        let plain: Uri = "http://api.example.com".parse().unwrap();
        assert!(!proxy.intercept().matches(&direct));
        assert!(proxy.intercept().matches(&proxied));
        assert!(!proxy.intercept().matches(&plain));
    }

    #[test]
    fn rejects_invalid_proxy_uri() {
        let config = ProxyConfig {
            http: Some("http://bad host:3128".into()),
            ..Default::default()
        };

        assert!(config.http_proxy().is_err());
    }

    #[test]
    fn deserializes_with_defaults() {
        let config: ProxyConfig = toml::from_str(r#"https = "http://proxy:3128""#).unwrap();

        assert!(config.enabled);
        assert_eq!(config.https.as_deref(), Some("http://proxy:3128"));
        assert!(config.no_proxy.is_empty());
    }
}
