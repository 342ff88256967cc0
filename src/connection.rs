//! TAXII connections
//!
//! A [`TaxiiConnection`] holds everything needed to talk to one TAXII server and
//! builds its HTTP client on first use:
//!
//! 1. Proxy: `use_proxy` with host and port, either from the settings or from the
//!    `<scheme>.proxyHost` / `<scheme>.proxyPort` environment variables
//! 2. TLS: only when a key or trust store is configured
//! 3. Preemptive basic authentication when a username is set
//! 4. The XML codec for request and response bodies
//!
//! The client is built once and reused for the lifetime of the connection.
//!
//! # Example
//!
//! ```no_run
//! use taxii_client::configs::ConnectionSettings;
//! use taxii_client::connection::TaxiiConnection;
//!
//! # fn example() -> anyhow::Result<()> {
//! let mut settings = ConnectionSettings::new("http://hailataxii.com/taxii-discovery-service");
//! settings.use_proxy = true;
//!
//! let connection = TaxiiConnection::new(settings)?;
//! let client = connection.http_client()?;
//! # let _ = client;
//! # Ok(())
//! # }
//! ```

use crate::configs::ConnectionSettings;
use crate::envelope::Envelope;
use crate::key_store::CredentialStore;
use crate::messages::XmlCodec;
use crate::store_source::{LazyStore, StoreRole, StoreSource};
use crate::tls;
use crate::transport::{
    BasicCredentials, HttpTransport, PreemptiveBasicAuth, ProxyAddress, Transport,
    TransportResponse,
};
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

pub struct TaxiiConnection {
    settings: ConnectionSettings,
    discovery_url: Url,
    key_store: LazyStore,
    trust_store: LazyStore,
    transport: Option<Arc<dyn Transport>>,
    client: OnceCell<TaxiiHttpClient>,
}

impl TaxiiConnection {
    /// Create a connection from its settings
    ///
    /// Fails when the discovery URL cannot be parsed. Nothing is loaded or
    /// connected until [`http_client`](Self::http_client) is first called.
    pub fn new(settings: ConnectionSettings) -> Result<Self> {
        let discovery_url = Url::parse(&settings.discovery_url)
            .with_context(|| format!("invalid discovery URL {}", settings.discovery_url))?;

        let key_store = LazyStore::new(StoreRole::Key, StoreSource::key_material(None, &settings));
        let trust_store = LazyStore::new(
            StoreRole::Trust,
            StoreSource::trust_material(None, &settings),
        );

        Ok(Self {
            settings,
            discovery_url,
            key_store,
            trust_store,
            transport: None,
            client: OnceCell::new(),
        })
    }

    /// Use `store` for client authentication instead of any configured file or PEM
    pub fn with_key_store(mut self, store: CredentialStore) -> Self {
        self.key_store = LazyStore::new(
            StoreRole::Key,
            StoreSource::key_material(Some(store), &self.settings),
        );
        self.client = OnceCell::new();
        self
    }

    /// Use `store` as the trust anchors instead of any configured file or PEM
    pub fn with_trust_store(mut self, store: CredentialStore) -> Self {
        self.trust_store = LazyStore::new(
            StoreRole::Trust,
            StoreSource::trust_material(Some(store), &self.settings),
        );
        self.client = OnceCell::new();
        self
    }

    /// Send every request through `transport`, as is
    ///
    /// Proxy, TLS and basic authentication settings are not applied to an
    /// injected transport.
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self.client = OnceCell::new();
        self
    }

    pub fn discovery_url(&self) -> &Url {
        &self.discovery_url
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// The effective key store, loaded on first access
    pub fn key_store(&self) -> Result<Option<Arc<CredentialStore>>> {
        self.key_store.get()
    }

    /// The effective trust store, loaded on first access
    pub fn trust_store(&self) -> Result<Option<Arc<CredentialStore>>> {
        self.trust_store.get()
    }

    /// The proxy requests go through, if one is configured completely
    pub fn proxy(&self) -> Option<ProxyAddress> {
        resolve_proxy_with(&self.settings, self.discovery_url.scheme(), |name| {
            std::env::var(name).ok()
        })
    }

    /// The HTTP client of this connection, built on first call
    ///
    /// Errors from loading the key or trust store, or from building the TLS
    /// context, are returned here.
    pub fn http_client(&self) -> Result<&TaxiiHttpClient> {
        self.client.get_or_try_init(|| self.build_client())
    }

    fn build_client(&self) -> Result<TaxiiHttpClient> {
        if let Some(transport) = &self.transport {
            debug!("Using the supplied transport for {}", self.discovery_url);
            return Ok(TaxiiHttpClient::new(Arc::clone(transport)));
        }

        let proxy = self.proxy();

        let key_store = self.key_store.get()?;
        let trust_store = self.trust_store.get()?;
        let tls_config = if key_store.is_some() || trust_store.is_some() {
            let config = tls::client_config(
                key_store.as_deref(),
                trust_store.as_deref(),
                self.settings.trust_self_signed,
            )
            .context("unable to create TLS context")?;
            Some(config)
        } else {
            None
        };

        let http = HttpTransport::build(proxy.as_ref(), tls_config)?;

        let transport: Arc<dyn Transport> = if self.settings.username.is_empty() {
            Arc::new(http)
        } else {
            let credentials =
                BasicCredentials::new(self.settings.username.as_str(), self.settings.password.as_str());
            Arc::new(PreemptiveBasicAuth::new(http, credentials))
        };

        info!("HTTP client ready for {}", self.discovery_url);
        Ok(TaxiiHttpClient::new(transport))
    }
}

impl fmt::Debug for TaxiiConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxiiConnection")
            .field("discovery_url", &self.discovery_url.as_str())
            .field("settings", &self.settings)
            .field("key_store", &self.key_store)
            .field("trust_store", &self.trust_store)
            .field("custom_transport", &self.transport.is_some())
            .field("client_built", &self.client.get().is_some())
            .finish()
    }
}

/// Resolve the proxy of a connection, reading missing values through `lookup`
///
/// `lookup` is never called when `use_proxy` is off. Each of host and port falls
/// back to `<scheme>.proxyHost` / `<scheme>.proxyPort` on its own. An empty host
/// and a zero port count as unset.
pub(crate) fn resolve_proxy_with<F>(
    settings: &ConnectionSettings,
    scheme: &str,
    lookup: F,
) -> Option<ProxyAddress>
where
    F: Fn(&str) -> Option<String>,
{
    if !settings.use_proxy {
        return None;
    }

    let host = settings
        .proxy_host
        .clone()
        .filter(|host| !host.trim().is_empty())
        .or_else(|| {
            lookup(&format!("{}.proxyHost", scheme)).filter(|host| !host.trim().is_empty())
        });

    let port = settings.proxy_port.filter(|port| *port != 0).or_else(|| {
        let raw = lookup(&format!("{}.proxyPort", scheme))?;
        match raw.trim().parse::<u16>() {
            Ok(port) if port != 0 => Some(port),
            Ok(_) => None,
            Err(_) => {
                warn!("Ignoring unparseable {}.proxyPort value {:?}", scheme, raw);
                None
            }
        }
    });

    match (host, port) {
        (Some(host), Some(port)) => {
            let proxy = ProxyAddress { host, port };
            info!("Using {} proxy: {}", scheme, proxy);
            Some(proxy)
        }
        _ => {
            warn!("Proxy requested, but not set up; not using a proxy");
            None
        }
    }
}

/// Transport plus codec, shared by every request of a connection
pub struct TaxiiHttpClient {
    transport: Arc<dyn Transport>,
    codec: XmlCodec,
}

impl TaxiiHttpClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            codec: XmlCodec,
        }
    }

    pub fn codec(&self) -> &XmlCodec {
        &self.codec
    }

    pub fn post(&self, url: &Url, envelope: &Envelope) -> Result<TransportResponse> {
        self.transport
            .post(url, envelope)
            .with_context(|| format!("unable to reach TAXII service at {}", url))
    }
}

impl fmt::Debug for TaxiiHttpClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxiiHttpClient")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::TaxiiVersion;
    use crate::test_pki::{cert_pem, key_pem, TestAuthority};
    use reqwest::StatusCode;
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn proxied(host: Option<&str>, port: Option<u16>) -> ConnectionSettings {
        let mut settings = ConnectionSettings::new("https://taxii.example.com/discovery");
        settings.use_proxy = true;
        settings.proxy_host = host.map(str::to_string);
        settings.proxy_port = port;
        settings
    }

    #[test]
    fn test_proxy_env_never_read_when_disabled() {
        let settings = ConnectionSettings::new("https://taxii.example.com/discovery");
        let lookups = RefCell::new(Vec::new());

        let proxy = resolve_proxy_with(&settings, "https", |name| {
            lookups.borrow_mut().push(name.to_string());
            Some("8080".to_string())
        });

        assert!(proxy.is_none());
        assert!(lookups.borrow().is_empty());
    }

    #[test]
    fn test_explicit_proxy_used_verbatim() {
        let settings = proxied(Some("web-proxy"), Some(8888));
        let lookups = RefCell::new(Vec::new());

        let proxy = resolve_proxy_with(&settings, "https", |name| {
            lookups.borrow_mut().push(name.to_string());
            None
        });

        assert_eq!(
            proxy,
            Some(ProxyAddress {
                host: "web-proxy".to_string(),
                port: 8888
            })
        );
        assert!(lookups.borrow().is_empty());
    }

    #[test]
    fn test_proxy_falls_back_to_scheme_variables() {
        let env: HashMap<&str, &str> = [
            ("https.proxyHost", "env-proxy"),
            ("https.proxyPort", "3128"),
            ("http.proxyHost", "wrong-proxy"),
        ]
        .into_iter()
        .collect();
        let lookup = |name: &str| env.get(name).map(|value| value.to_string());

        let from_env = resolve_proxy_with(&proxied(None, None), "https", lookup).unwrap();
        assert_eq!(from_env.host, "env-proxy");
        assert_eq!(from_env.port, 3128);

        let mixed = resolve_proxy_with(&proxied(Some("web-proxy"), None), "https", lookup).unwrap();
        assert_eq!(mixed.host, "web-proxy");
        assert_eq!(mixed.port, 3128);
    }

    #[test]
    fn test_incomplete_proxy_is_ignored() {
        assert!(resolve_proxy_with(&proxied(Some("web-proxy"), None), "http", |_| None).is_none());
        assert!(resolve_proxy_with(&proxied(Some(""), Some(8080)), "http", |_| None).is_none());
        assert!(resolve_proxy_with(&proxied(Some("web-proxy"), Some(0)), "http", |_| None).is_none());
    }

    #[test]
    fn test_unparseable_proxy_port_is_ignored() {
        let proxy = resolve_proxy_with(&proxied(Some("web-proxy"), None), "http", |name| {
            (name == "http.proxyPort").then(|| "eighty".to_string())
        });
        assert!(proxy.is_none());
    }

    #[test]
    fn test_malformed_discovery_url() {
        let err = TaxiiConnection::new(ConnectionSettings::new("not a url")).unwrap_err();
        assert!(err.to_string().contains("invalid discovery URL"));
    }

    #[test]
    fn test_client_is_built_once() {
        let connection =
            TaxiiConnection::new(ConnectionSettings::new("http://taxii.example.com/discovery"))
                .unwrap();

        let first = connection.http_client().unwrap();
        let second = connection.http_client().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_client_with_basic_auth_and_tls() {
        let ca = TestAuthority::new("Connection CA").unwrap();
        let (key, leaf) = ca.issue_server("client.local").unwrap();

        let mut settings = ConnectionSettings::new("https://taxii.example.com/discovery");
        settings.username = "user".to_string();
        settings.password = "password".to_string();
        settings.private_key_pem = Some(key_pem(&key));
        settings.client_certificate_pem_chain = Some(vec![cert_pem(&leaf), cert_pem(&ca.cert)]);
        settings.trusted_pem_certificates = vec![cert_pem(&ca.cert)];

        let connection = TaxiiConnection::new(settings).unwrap();
        assert!(connection.http_client().is_ok());
        assert_eq!(connection.key_store().unwrap().unwrap().len(), 3);
        assert_eq!(connection.trust_store().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_unreadable_key_store_fails_client() {
        let mut settings = ConnectionSettings::new("https://taxii.example.com/discovery");
        settings.key_store_file = Some(PathBuf::from("/nonexistent/client.p12"));
        settings.key_store_password = Some("changeit".to_string());

        let connection = TaxiiConnection::new(settings).unwrap();
        let err = connection.http_client().unwrap_err();
        assert!(format!("{:#}", err).contains("a key store file was set, but it could not be read"));
    }

    #[test]
    fn test_supplied_stores_win() {
        let ca = TestAuthority::new("Supplied CA").unwrap();
        let mut trust = CredentialStore::new();
        trust.add_certificate(ca.cert.clone());

        let mut settings = ConnectionSettings::new("https://taxii.example.com/discovery");
        settings.trust_store_file = Some(PathBuf::from("/nonexistent/trust.p12"));

        let connection = TaxiiConnection::new(settings)
            .unwrap()
            .with_trust_store(trust);
        assert_eq!(connection.trust_store().unwrap().unwrap().len(), 1);
        assert!(connection.http_client().is_ok());
    }

    struct Counting {
        calls: AtomicUsize,
    }

    impl Transport for Counting {
        fn post(&self, _url: &Url, envelope: &Envelope) -> Result<TransportResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert!(envelope.header("authorization").is_none());
            Ok(TransportResponse {
                status: StatusCode::OK,
                content_type: None,
                body: Vec::new(),
            })
        }
    }

    #[test]
    fn test_supplied_transport_used_as_is() {
        let counting = Arc::new(Counting {
            calls: AtomicUsize::new(0),
        });

        let mut settings = ConnectionSettings::new("https://taxii.example.com/discovery");
        settings.username = "user".to_string();
        settings.key_store_file = Some(PathBuf::from("/nonexistent/client.p12"));

        let connection = TaxiiConnection::new(settings)
            .unwrap()
            .with_transport(counting.clone());
        let client = connection.http_client().unwrap();

        let envelope = Envelope::new(Vec::new(), TaxiiVersion::V11, connection.discovery_url());
        client.post(connection.discovery_url(), &envelope).unwrap();
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_first_callers_share_one_build() {
        let connection =
            TaxiiConnection::new(ConnectionSettings::new("http://taxii.example.com/discovery"))
                .unwrap();
        let builds = AtomicUsize::new(0);
        let barrier = std::sync::Barrier::new(8);

        let clients: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        let client = connection
                            .client
                            .get_or_try_init(|| {
                                builds.fetch_add(1, Ordering::SeqCst);
                                connection.build_client()
                            })
                            .unwrap();
                        client as *const TaxiiHttpClient as usize
                    })
                })
                .collect();
            handles.into_iter().map(|handle| handle.join().unwrap()).collect()
        });

        assert_eq!(builds.load(Ordering::SeqCst), 1);
        let built = connection.http_client().unwrap() as *const TaxiiHttpClient as usize;
        assert!(clients.iter().all(|client| *client == built));
    }
}
