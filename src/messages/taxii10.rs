//! TAXII 1.0 messages
//!
//! 1.0 names collections "feeds", carries the subscription ID as a poll request
//! attribute and writes content bindings as element text.

use super::xml::{Element, MessageWriter};
use super::{
    expect_root, format_timestamp, optional_timestamp, parse_flag, ContentBlock, FromTaxiiXml,
    ServiceContact, ServiceInstance, StatusMessage, ToTaxiiXml,
};
use crate::envelope::TaxiiVersion;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryRequest {
    pub message_id: String,
}

impl ToTaxiiXml for DiscoveryRequest {
    const VERSION: TaxiiVersion = TaxiiVersion::V10;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()> {
        writer.start_root("Discovery_Request", &[("message_id", self.message_id.as_str())])?;
        writer.end("Discovery_Request")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub service_instances: Vec<ServiceInstance>,
}

impl FromTaxiiXml for DiscoveryResponse {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Discovery_Response")?;

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            service_instances: element
                .children_named("Service_Instance")
                .map(|service| ServiceInstance::from_element(service, "services_version"))
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedInformationRequest {
    pub message_id: String,
}

impl ToTaxiiXml for FeedInformationRequest {
    const VERSION: TaxiiVersion = TaxiiVersion::V10;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()> {
        writer.start_root(
            "Feed_Information_Request",
            &[("message_id", self.message_id.as_str())],
        )?;
        writer.end("Feed_Information_Request")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedInformationResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub feeds: Vec<FeedRecord>,
}

impl FromTaxiiXml for FeedInformationResponse {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Feed_Information_Response")?;

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            feeds: element
                .children_named("Feed")
                .map(FeedRecord::from_element)
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedRecord {
    pub feed_name: String,
    pub available: Option<bool>,
    pub description: Option<String>,
    pub content_bindings: Vec<String>,
    pub polling_services: Vec<ServiceContact>,
    pub subscription_services: Vec<ServiceContact>,
}

impl FeedRecord {
    fn from_element(element: &Element) -> Result<Self> {
        Ok(Self {
            feed_name: element.required_attr("feed_name")?.to_string(),
            available: parse_flag(element.attr("available"))?,
            description: element.child_text("Description").map(str::to_string),
            content_bindings: element
                .children_named("Content_Binding")
                .map(|binding| binding.text.trim().to_string())
                .collect(),
            polling_services: element
                .children_named("Polling_Service")
                .map(ServiceContact::from_element)
                .collect::<Result<_>>()?,
            subscription_services: element
                .children_named("Subscription_Service")
                .map(ServiceContact::from_element)
                .collect::<Result<_>>()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    pub message_id: String,
    pub feed_name: String,
    pub exclusive_begin: Option<DateTime<Utc>>,
    pub inclusive_end: Option<DateTime<Utc>>,
    pub subscription_id: Option<String>,
}

impl ToTaxiiXml for PollRequest {
    const VERSION: TaxiiVersion = TaxiiVersion::V10;

    fn write_xml(&self, writer: &mut MessageWriter) -> Result<()> {
        let mut attributes = vec![
            ("message_id", self.message_id.as_str()),
            ("feed_name", self.feed_name.as_str()),
        ];
        if let Some(subscription_id) = self.subscription_id.as_deref() {
            if !subscription_id.is_empty() {
                attributes.push(("subscription_id", subscription_id));
            }
        }
        writer.start_root("Poll_Request", &attributes)?;

        if let Some(begin) = &self.exclusive_begin {
            writer.text_element("Exclusive_Begin_Timestamp", &[], &format_timestamp(begin))?;
        }
        if let Some(end) = &self.inclusive_end {
            writer.text_element("Inclusive_End_Timestamp", &[], &format_timestamp(end))?;
        }

        writer.end("Poll_Request")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResponse {
    pub message_id: String,
    pub in_response_to: String,
    pub feed_name: String,
    pub subscription_id: Option<String>,
    pub inclusive_begin: Option<DateTime<Utc>>,
    pub inclusive_end: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub content_blocks: Vec<ContentBlock>,
}

impl FromTaxiiXml for PollResponse {
    fn from_element(element: &Element) -> Result<Self> {
        expect_root(element, "Poll_Response")?;

        Ok(Self {
            message_id: element.required_attr("message_id")?.to_string(),
            in_response_to: element.attr("in_response_to").unwrap_or_default().to_string(),
            feed_name: element.attr("feed_name").unwrap_or_default().to_string(),
            subscription_id: element.attr("subscription_id").map(str::to_string),
            inclusive_begin: optional_timestamp(element, "Inclusive_Begin_Timestamp")?,
            inclusive_end: optional_timestamp(element, "Inclusive_End_Timestamp")?,
            message: element.child_text("Message").map(str::to_string),
            content_blocks: element
                .children_named("Content_Block")
                .map(content_block)
                .collect::<Result<_>>()?,
        })
    }
}

fn content_block(element: &Element) -> Result<ContentBlock> {
    let binding = element
        .child_text("Content_Binding")
        .ok_or_else(|| anyhow!("Content_Block is missing its Content_Binding"))?;

    Ok(ContentBlock {
        binding: binding.to_string(),
        content: element
            .child("Content")
            .map(|content| content.text.clone())
            .unwrap_or_default(),
        timestamp_label: optional_timestamp(element, "Timestamp_Label")?,
        message: None,
    })
}

/// What a 1.0 poll service may answer with
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Poll(PollResponse),
    Status(StatusMessage),
}

impl FromTaxiiXml for PollOutcome {
    fn from_element(element: &Element) -> Result<Self> {
        match element.name.as_str() {
            "Status_Message" => StatusMessage::from_element(element).map(PollOutcome::Status),
            _ => PollResponse::from_element(element).map(PollOutcome::Poll),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{ServiceType, XmlCodec};
    use chrono::TimeZone;

    #[test]
    fn test_discovery_response_uses_services_version() {
        let response: DiscoveryResponse = XmlCodec
            .decode(
                Some("text/xml"),
                br#"<taxii:Discovery_Response xmlns:taxii="http://taxii.mitre.org/messages/taxii_xml_binding-1" message_id="2" in_response_to="1">
  <taxii:Service_Instance service_type="FEED_MANAGEMENT" services_version="urn:taxii.mitre.org:services:1.0" available="true">
    <taxii:Protocol_Binding>urn:taxii.mitre.org:protocol:https:1.0</taxii:Protocol_Binding>
    <taxii:Address>https://taxii.example.com/feeds</taxii:Address>
    <taxii:Message_Binding>urn:taxii.mitre.org:message:xml:1.0</taxii:Message_Binding>
  </taxii:Service_Instance>
</taxii:Discovery_Response>"#,
            )
            .unwrap();

        let service = &response.service_instances[0];
        assert_eq!(service.service_type, ServiceType::FeedManagement);
        assert_eq!(service.services_version, "urn:taxii.mitre.org:services:1.0");
        assert_eq!(service.protocol_binding, "urn:taxii.mitre.org:protocol:https:1.0");
    }

    #[test]
    fn test_feed_information_response() {
        let response: FeedInformationResponse = XmlCodec
            .decode(
                None,
                br#"<taxii:Feed_Information_Response xmlns:taxii="http://taxii.mitre.org/messages/taxii_xml_binding-1" message_id="3" in_response_to="1">
  <taxii:Feed feed_name="default" available="true">
    <taxii:Description>Default feed</taxii:Description>
    <taxii:Content_Binding>urn:stix.mitre.org:xml:1.0</taxii:Content_Binding>
    <taxii:Polling_Service>
      <taxii:Protocol_Binding>urn:taxii.mitre.org:protocol:https:1.0</taxii:Protocol_Binding>
      <taxii:Address>https://taxii.example.com/poll</taxii:Address>
      <taxii:Message_Binding>urn:taxii.mitre.org:message:xml:1.0</taxii:Message_Binding>
    </taxii:Polling_Service>
  </taxii:Feed>
</taxii:Feed_Information_Response>"#,
            )
            .unwrap();

        let feed = &response.feeds[0];
        assert_eq!(feed.feed_name, "default");
        assert_eq!(feed.content_bindings, vec!["urn:stix.mitre.org:xml:1.0"]);
        assert_eq!(feed.polling_services[0].address, "https://taxii.example.com/poll");
    }

    #[test]
    fn test_poll_request_xml() {
        let xml = XmlCodec
            .encode(&PollRequest {
                message_id: "1".to_string(),
                feed_name: "default".to_string(),
                exclusive_begin: Some(Utc.with_ymd_and_hms(2015, 11, 2, 0, 0, 0).unwrap()),
                inclusive_end: None,
                subscription_id: Some("sub-9".to_string()),
            })
            .unwrap();
        let xml = String::from_utf8(xml).unwrap();

        assert!(xml.contains(
            r#"<taxii:Poll_Request xmlns:taxii="http://taxii.mitre.org/messages/taxii_xml_binding-1" message_id="1" feed_name="default" subscription_id="sub-9">"#
        ));
        assert!(xml.contains(
            "<taxii:Exclusive_Begin_Timestamp>2015-11-02T00:00:00.000Z</taxii:Exclusive_Begin_Timestamp>"
        ));
        assert!(!xml.contains("Inclusive_End_Timestamp"));
    }

    #[test]
    fn test_poll_request_omits_empty_subscription() {
        let xml = XmlCodec
            .encode(&PollRequest {
                message_id: "1".to_string(),
                feed_name: "default".to_string(),
                exclusive_begin: None,
                inclusive_end: None,
                subscription_id: Some(String::new()),
            })
            .unwrap();

        assert!(!String::from_utf8(xml).unwrap().contains("subscription_id"));
    }

    #[test]
    fn test_poll_response_content() {
        let outcome: PollOutcome = XmlCodec
            .decode(
                None,
                br#"<taxii:Poll_Response xmlns:taxii="http://taxii.mitre.org/messages/taxii_xml_binding-1" message_id="4" in_response_to="1" feed_name="default">
  <taxii:Inclusive_End_Timestamp>2015-11-03T00:00:00Z</taxii:Inclusive_End_Timestamp>
  <taxii:Content_Block>
    <taxii:Content_Binding>urn:stix.mitre.org:xml:1.0</taxii:Content_Binding>
    <taxii:Content><stix:STIX_Package xmlns:stix="http://stix.mitre.org/stix-1" id="pkg-2"/></taxii:Content>
  </taxii:Content_Block>
</taxii:Poll_Response>"#,
            )
            .unwrap();

        let PollOutcome::Poll(response) = outcome else {
            panic!("expected a poll response");
        };
        assert_eq!(response.feed_name, "default");
        assert_eq!(response.content_blocks[0].binding, "urn:stix.mitre.org:xml:1.0");
        assert!(response.content_blocks[0].content.contains("pkg-2"));
    }
}
