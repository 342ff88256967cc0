//! HTTP transport
//!
//! [`Transport`] posts an [`Envelope`] and hands back the raw response. The
//! production implementation is [`HttpTransport`], a blocking reqwest client;
//! [`PreemptiveBasicAuth`] decorates any transport so every request carries
//! basic credentials without waiting for a challenge.

use crate::envelope::Envelope;
use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, Secret};
use std::fmt;
use std::net::Ipv6Addr;
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// What came back from the server
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK
    }
}

/// Posts envelopes to a URL
pub trait Transport: Send + Sync {
    fn post(&self, url: &Url, envelope: &Envelope) -> Result<TransportResponse>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn post(&self, url: &Url, envelope: &Envelope) -> Result<TransportResponse> {
        (**self).post(url, envelope)
    }
}

/// Proxy every request goes through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddress {
    pub host: String,
    pub port: u16,
}

impl ProxyAddress {
    /// The proxy as an `http://` URL reqwest accepts
    pub fn url(&self) -> String {
        format!("http://{}", self)
    }
}

/// `host:port`, with IPv6 literals in brackets
impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.parse::<Ipv6Addr>().is_ok() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Blocking reqwest transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(client: reqwest::blocking::Client) -> Self {
        Self { client }
    }

    /// Build the underlying client
    ///
    /// Without a proxy, reqwest's own detection of proxy environment variables
    /// is switched off so only the connection settings decide.
    pub fn build(
        proxy: Option<&ProxyAddress>,
        tls: Option<rustls::ClientConfig>,
    ) -> Result<Self> {
        let mut builder = reqwest::blocking::Client::builder();

        builder = match proxy {
            Some(address) => {
                let proxy = reqwest::Proxy::all(address.url())
                    .with_context(|| format!("invalid proxy address {}", address))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        if let Some(config) = tls {
            builder = builder.use_preconfigured_tls(config);
        }

        let client = builder.build().context("unable to build HTTP client")?;
        Ok(Self::new(client))
    }
}

impl Transport for HttpTransport {
    fn post(&self, url: &Url, envelope: &Envelope) -> Result<TransportResponse> {
        let response = self
            .client
            .post(url.clone())
            .headers(envelope.headers().clone())
            .body(envelope.body().to_vec())
            .send()
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .with_context(|| format!("unable to read response body from {}", url))?
            .to_vec();

        Ok(TransportResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Username and password for HTTP basic authentication
#[derive(Clone)]
pub struct BasicCredentials {
    username: String,
    password: Secret<String>,
}

impl BasicCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Secret::new(password.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// `Authorization` header value, marked sensitive
    pub fn header_value(&self) -> Result<HeaderValue> {
        let token = STANDARD.encode(format!(
            "{}:{}",
            self.username,
            self.password.expose_secret()
        ));
        let mut value = HeaderValue::from_str(&format!("Basic {}", token))
            .context("credentials cannot be sent as a header")?;
        value.set_sensitive(true);
        Ok(value)
    }
}

impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Attaches basic credentials to every request of the wrapped transport
#[derive(Debug)]
pub struct PreemptiveBasicAuth<T> {
    inner: T,
    credentials: BasicCredentials,
}

impl<T: Transport> PreemptiveBasicAuth<T> {
    pub fn new(inner: T, credentials: BasicCredentials) -> Self {
        Self { inner, credentials }
    }
}

impl<T: Transport> Transport for PreemptiveBasicAuth<T> {
    fn post(&self, url: &Url, envelope: &Envelope) -> Result<TransportResponse> {
        let mut envelope = envelope.clone();
        envelope.insert_header(AUTHORIZATION, self.credentials.header_value()?);

        debug!(
            "Preemptive basic auth as {} for {}:{}",
            self.credentials.username(),
            url.host_str().unwrap_or_default(),
            url.port_or_known_default().unwrap_or_default()
        );

        self.inner.post(url, &envelope)
    }
}
