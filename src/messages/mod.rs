//! TAXII message library
//!
//! Typed TAXII 1.0 ([`taxii10`]) and 1.1 ([`taxii11`]) messages for discovery,
//! collection or feed information, polling and status reporting, with the XML
//! codec that turns them into request bodies and parses responses.

pub mod taxii10;
pub mod taxii11;
pub mod xml;

use crate::envelope::TaxiiVersion;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use std::fmt;
use std::str::FromStr;
use xml::{parse_document, Element, MessageWriter};

/// Elements whose inner markup is payload rather than TAXII structure
const RAW_ELEMENTS: &[&str] = &["Content"];

/// A request message that can be written as TAXII XML
pub trait ToTaxiiXml {
    const VERSION: TaxiiVersion;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()>;
}

/// A response message that can be read from a TAXII XML root element
pub trait FromTaxiiXml: Sized {
    fn from_element(element: &Element) -> Result<Self>;
}

/// The body codec of a connection
#[derive(Debug, Clone, Copy, Default)]
pub struct XmlCodec;

impl XmlCodec {
    pub fn encode<M: ToTaxiiXml>(&self, message: &M) -> Result<Vec<u8>> {
        let mut writer = MessageWriter::new(M::VERSION);
        message.write_xml(&mut writer)?;
        Ok(writer.finish())
    }

    /// Only XML media types are read; a response without a content type is tolerated
    pub fn supports(&self, content_type: Option<&str>) -> bool {
        let Some(content_type) = content_type else {
            return true;
        };
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        media_type == "application/xml" || media_type == "text/xml" || media_type.ends_with("+xml")
    }

    pub fn decode<M: FromTaxiiXml>(&self, content_type: Option<&str>, body: &[u8]) -> Result<M> {
        if !self.supports(content_type) {
            return Err(anyhow!(
                "cannot read a TAXII message from content type {}",
                content_type.unwrap_or_default()
            ));
        }

        let text = std::str::from_utf8(body).context("response body is not UTF-8")?;
        let root = parse_document(text, RAW_ELEMENTS)?;
        M::from_element(&root)
    }
}

pub(crate) fn expect_root(element: &Element, name: &str) -> Result<()> {
    if element.name == name {
        Ok(())
    } else {
        Err(anyhow!("expected {} but received {}", name, element.name))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Discovery,
    Inbox,
    Poll,
    CollectionManagement,
    FeedManagement,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Discovery => "DISCOVERY",
            ServiceType::Inbox => "INBOX",
            ServiceType::Poll => "POLL",
            ServiceType::CollectionManagement => "COLLECTION_MANAGEMENT",
            ServiceType::FeedManagement => "FEED_MANAGEMENT",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "DISCOVERY" => Ok(ServiceType::Discovery),
            "INBOX" => Ok(ServiceType::Inbox),
            "POLL" => Ok(ServiceType::Poll),
            "COLLECTION_MANAGEMENT" => Ok(ServiceType::CollectionManagement),
            "FEED_MANAGEMENT" => Ok(ServiceType::FeedManagement),
            other => Err(anyhow!("unknown service type {}", other)),
        }
    }
}

/// A service advertised by a discovery response
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceInstance {
    pub service_type: ServiceType,
    pub services_version: String,
    pub available: Option<bool>,
    pub protocol_binding: String,
    pub address: String,
    pub message_bindings: Vec<String>,
    pub message: Option<String>,
}

impl ServiceInstance {
    /// `version_attribute` is `services_version` in 1.0 and `service_version` in 1.1
    pub(crate) fn from_element(element: &Element, version_attribute: &str) -> Result<Self> {
        Ok(Self {
            service_type: element.required_attr("service_type")?.parse()?,
            services_version: element.attr(version_attribute).unwrap_or_default().to_string(),
            available: parse_flag(element.attr("available"))?,
            protocol_binding: element.child_text("Protocol_Binding").unwrap_or_default().to_string(),
            address: element
                .child_text("Address")
                .ok_or_else(|| anyhow!("Service_Instance is missing its Address"))?
                .to_string(),
            message_bindings: element
                .children_named("Message_Binding")
                .map(|binding| binding.text.trim().to_string())
                .collect(),
            message: element.child_text("Message").map(str::to_string),
        })
    }
}

/// Where a collection or feed can be reached for one kind of service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceContact {
    pub protocol_binding: String,
    pub address: String,
    pub message_bindings: Vec<String>,
}

impl ServiceContact {
    pub(crate) fn from_element(element: &Element) -> Result<Self> {
        Ok(Self {
            protocol_binding: element.child_text("Protocol_Binding").unwrap_or_default().to_string(),
            address: element
                .child_text("Address")
                .ok_or_else(|| anyhow!("{} is missing its Address", element.name))?
                .to_string(),
            message_bindings: element
                .children_named("Message_Binding")
                .map(|binding| binding.text.trim().to_string())
                .collect(),
        })
    }
}

/// A unit of polled content
#[derive(Debug, Clone, PartialEq)]
pub struct ContentBlock {
    pub binding: String,
    pub content: String,
    pub timestamp_label: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

/// One `Status_Detail` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusDetail {
    pub name: String,
    pub values: Vec<String>,
}

/// A server-side status report, sent in place of the expected response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub message_id: String,
    pub in_response_to: String,
    pub status_type: String,
    pub message: Option<String>,
    pub details: Vec<StatusDetail>,
}

impl StatusMessage {
    /// Details as a comma separated list
    pub fn details_summary(&self) -> String {
        self.details
            .iter()
            .map(|detail| {
                if detail.name.is_empty() {
                    detail.values.join("|")
                } else {
                    format!("{}={}", detail.name, detail.values.join("|"))
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl FromTaxiiXml for StatusMessage {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Status_Message")?;

        let details = match element.child("Status_Detail") {
            // 1.1 details are named, 1.0 details are free text
            Some(status_detail) if !status_detail.children.is_empty() => status_detail
                .children_named("Detail")
                .map(|detail| StatusDetail {
                    name: detail.attr("name").unwrap_or_default().to_string(),
                    values: detail
                        .children_named("Value")
                        .map(|value| value.text.trim().to_string())
                        .collect(),
                })
                .collect(),
            Some(status_detail) if !status_detail.text.trim().is_empty() => vec![StatusDetail {
                name: String::new(),
                values: vec![status_detail.text.trim().to_string()],
            }],
            _ => Vec::new(),
        };

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            status_type: element.required_attr("status_type")?.to_string(),
            message: element.child_text("Message").map(str::to_string),
            details,
        })
    }
}

pub(crate) fn parse_flag(value: Option<&str>) -> Result<Option<bool>> {
    match value.map(str::trim) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(anyhow!("invalid boolean {}", other)),
    }
}

/// xs:dateTime in UTC with millisecond precision
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an xs:dateTime; values without an offset are taken as UTC
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(value) {
        return Ok(timestamp.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .with_context(|| format!("invalid timestamp {}", value))
}

pub(crate) fn optional_timestamp(element: &Element, name: &str) -> Result<Option<DateTime<Utc>>> {
    element.child_text(name).map(parse_timestamp).transpose()
}
