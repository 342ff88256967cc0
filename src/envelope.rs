//! Request envelopes
//!
//! Pairs a serialized TAXII message with the HTTP headers the TAXII HTTP binding
//! requires. The protocol binding header is derived from the discovery URL of the
//! connection, not from the URL the request is posted to.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

pub const XML_MEDIA_TYPE: &str = "application/xml";

pub const X_TAXII_SERVICES: &str = "x-taxii-services";
pub const X_TAXII_CONTENT_TYPE: &str = "x-taxii-content-type";
pub const X_TAXII_PROTOCOL: &str = "x-taxii-protocol";

/// TAXII protocol version spoken by a template
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TaxiiVersion {
    #[serde(rename = "1.0")]
    V10,
    #[serde(rename = "1.1")]
    #[default]
    V11,
}

impl TaxiiVersion {
    pub fn services_id(&self) -> &'static str {
        match self {
            TaxiiVersion::V10 => "urn:taxii.mitre.org:services:1.0",
            TaxiiVersion::V11 => "urn:taxii.mitre.org:services:1.1",
        }
    }

    pub fn message_id(&self) -> &'static str {
        match self {
            TaxiiVersion::V10 => "urn:taxii.mitre.org:message:xml:1.0",
            TaxiiVersion::V11 => "urn:taxii.mitre.org:message:xml:1.1",
        }
    }

    /// XML namespace of the message binding
    pub fn namespace(&self) -> &'static str {
        match self {
            TaxiiVersion::V10 => "http://taxii.mitre.org/messages/taxii_xml_binding-1",
            TaxiiVersion::V11 => "http://taxii.mitre.org/messages/taxii_xml_binding-1.1",
        }
    }

    /// Element prefix used when writing messages
    pub fn prefix(&self) -> &'static str {
        match self {
            TaxiiVersion::V10 => "taxii",
            TaxiiVersion::V11 => "taxii_11",
        }
    }
}

impl fmt::Display for TaxiiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaxiiVersion::V10 => write!(f, "1.0"),
            TaxiiVersion::V11 => write!(f, "1.1"),
        }
    }
}

impl FromStr for TaxiiVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "1.0" => Ok(TaxiiVersion::V10),
            "1.1" => Ok(TaxiiVersion::V11),
            other => Err(format!("unsupported TAXII version: {}", other)),
        }
    }
}

/// HTTP or HTTPS protocol binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolBinding {
    Http,
    Https,
}

impl ProtocolBinding {
    /// Any scheme ending in `s` selects the HTTPS binding
    pub fn for_url(url: &Url) -> Self {
        if url.scheme().ends_with('s') {
            ProtocolBinding::Https
        } else {
            ProtocolBinding::Http
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolBinding::Http => "urn:taxii.mitre.org:protocol:http:1.0",
            ProtocolBinding::Https => "urn:taxii.mitre.org:protocol:https:1.0",
        }
    }
}

/// A message body with its TAXII headers
#[derive(Debug, Clone)]
pub struct Envelope {
    headers: HeaderMap,
    body: Vec<u8>,
}

impl Envelope {
    pub fn new(body: Vec<u8>, version: TaxiiVersion, discovery_url: &Url) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(XML_MEDIA_TYPE));
        headers.insert(ACCEPT, HeaderValue::from_static(XML_MEDIA_TYPE));
        headers.insert(
            HeaderName::from_static(X_TAXII_SERVICES),
            HeaderValue::from_static(version.services_id()),
        );
        headers.insert(
            HeaderName::from_static(X_TAXII_CONTENT_TYPE),
            HeaderValue::from_static(version.message_id()),
        );
        headers.insert(
            HeaderName::from_static(X_TAXII_PROTOCOL),
            HeaderValue::from_static(ProtocolBinding::for_url(discovery_url).as_str()),
        );

        Self { headers, body }
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A header value as text, if present and printable
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub(crate) fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }
}
